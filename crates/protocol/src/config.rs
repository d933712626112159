use serde::{Deserialize, Serialize};

/// Fixed peer address when the device runs its own access point.
pub const LOCAL_AP_ADDRESS: &str = "192.168.12.1";

/// How the driver reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectMethod {
    /// Device access point; the peer is always 192.168.12.1.
    LocalAp,
    /// Device joined to the local network; addressed by serial or IP.
    LocalSta,
    /// Through the vendor cloud with TURN relay.
    Remote,
}

/// Immutable connection descriptor.
///
/// Credentials are only meaningful for [`ConnectMethod::Remote`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub method: ConnectMethod,
    pub serial: Option<String>,
    pub ip: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectOptions {
    pub fn local_ap() -> Self {
        Self {
            method: ConnectMethod::LocalAp,
            serial: None,
            ip: None,
            username: None,
            password: None,
        }
    }

    pub fn local_sta() -> Self {
        Self {
            method: ConnectMethod::LocalSta,
            serial: None,
            ip: None,
            username: None,
            password: None,
        }
    }

    pub fn remote(
        serial: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            method: ConnectMethod::Remote,
            serial: Some(serial.into()),
            ip: None,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Check the descriptor invariants for the selected method.
    pub fn validate(&self) -> Result<(), String> {
        match self.method {
            ConnectMethod::LocalAp => Ok(()),
            ConnectMethod::LocalSta => {
                if self.serial.is_none() && self.ip.is_none() {
                    Err("LocalSta requires a serial number or an IP address".to_string())
                } else {
                    Ok(())
                }
            }
            ConnectMethod::Remote => {
                if self.serial.is_none() {
                    Err("Remote requires a serial number".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// The peer address, when it is already known without discovery.
    pub fn peer_ip(&self) -> Option<&str> {
        match self.method {
            ConnectMethod::LocalAp => Some(LOCAL_AP_ADDRESS),
            _ => self.ip.as_deref(),
        }
    }
}

// Password is redacted to keep credentials out of logs.
impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("method", &self.method)
            .field("serial", &self.serial)
            .field("ip", &self.ip)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ap_needs_nothing() {
        let opts = ConnectOptions::local_ap();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.peer_ip(), Some("192.168.12.1"));
    }

    #[test]
    fn local_sta_requires_serial_or_ip() {
        assert!(ConnectOptions::local_sta().validate().is_err());
        assert!(
            ConnectOptions::local_sta()
                .with_serial("B42D2000XXXXXXXX")
                .validate()
                .is_ok()
        );
        assert!(
            ConnectOptions::local_sta()
                .with_ip("192.168.1.34")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn remote_requires_serial() {
        let mut opts = ConnectOptions::remote("B42D2000XXXXXXXX", "user@example.com", "hunter2");
        assert!(opts.validate().is_ok());
        opts.serial = None;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn sta_peer_ip_comes_from_descriptor() {
        let opts = ConnectOptions::local_sta().with_ip("10.0.0.7");
        assert_eq!(opts.peer_ip(), Some("10.0.0.7"));
        assert_eq!(ConnectOptions::local_sta().peer_ip(), None);
    }

    #[test]
    fn password_redacted_in_debug() {
        let opts = ConnectOptions::remote("SN", "user@example.com", "super_secret");
        let debug = format!("{opts:?}");
        assert!(debug.contains("user@example.com"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super_secret"));
    }
}
