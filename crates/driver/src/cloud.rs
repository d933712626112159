//! Vendor cloud client: signed HTTPS requests for tokens, the relay public
//! key, TURN credentials, and the remote SDP exchange.

use std::time::Duration;

use chrono::Local;
use reqwest::Method;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::crypto;
use crate::error::{DriverError, Result};

pub const BASE_URL: &str = "https://global-robot-api.unitree.com/";

const APP_SIGN_SECRET: &str = "XyvkwK45hp5PHfA8";
const UM_CHANNEL_KEY: &str = "UMENG_CHANNEL";
const DEVICE_ID: &str = "Samsung/GalaxyS20/SM-G981B/s20/10/29";

const CODE_OK: i64 = 100;
const CODE_DEVICE_OFFLINE: i64 = 1000;

/// TURN relay account issued per connection attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerInfo {
    pub user: String,
    pub passwd: String,
    /// TURN URL, e.g. `turn:turn.example.com:3478`.
    pub realm: String,
}

pub struct CloudClient {
    http: reqwest::Client,
}

impl Default for CloudClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Shared request shape: form-encoded body (or query for GET), plus the
    /// signed header set the API verifies on every call.
    async fn request(
        &self,
        method: Method,
        path: &str,
        form: &[(&str, String)],
        token: &str,
    ) -> Result<Value> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = crypto::md5_hex(&timestamp);
        let sign = crypto::md5_hex(&format!("{APP_SIGN_SECRET}{timestamp}{nonce}"));

        let url = format!("{BASE_URL}{path}");
        let request = if method == Method::GET {
            self.http.get(&url).query(form)
        } else {
            self.http.post(&url).form(form)
        };

        let response = request
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("DeviceId", DEVICE_ID)
            .header("AppTimezone", local_timezone_offset())
            .header("DevicePlatform", "Android")
            .header("DeviceModel", "SM-G981B")
            .header("SystemVersion", "29")
            .header("AppVersion", "1.8.0")
            .header("AppLocale", "en_US")
            .header("AppTimestamp", &timestamp)
            .header("AppNonce", &nonce)
            .header("AppSign", &sign)
            .header("Channel", UM_CHANNEL_KEY)
            .header("Token", token)
            .header("AppName", "Go2")
            .timeout(Duration::from_secs(15))
            .send()
            .await?
            .json::<Value>()
            .await?;

        debug!(path, "cloud response received");
        Ok(response)
    }

    /// Exchange account credentials for an access token. The password is
    /// sent as its MD5 digest, never in the clear.
    pub async fn fetch_token(&self, email: &str, password: &str) -> Result<String> {
        info!("obtaining access token");
        let form = [
            ("email", email.to_string()),
            ("password", crypto::md5_hex(password)),
        ];
        let response = self.request(Method::POST, "login/email", &form, "").await?;
        if code_of(&response) != CODE_OK {
            return Err(DriverError::RemoteAuth(format!(
                "token request rejected: {response}"
            )));
        }
        response
            .pointer("/data/accessToken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::RemoteAuth("token missing from response".to_string()))
    }

    /// Fetch the relay's RSA public key. Unreachable network is a soft
    /// failure: the caller decides whether it can proceed without one.
    pub async fn fetch_public_key(&self) -> Option<RsaPublicKey> {
        info!("obtaining relay public key");
        let response = match self.request(Method::GET, "system/pubKey", &[], "").await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "public key unavailable");
                return None;
            }
        };
        if code_of(&response) != CODE_OK {
            warn!("public key request rejected: {response}");
            return None;
        }
        let pem = response.get("data").and_then(Value::as_str)?;
        match crypto::rsa_load_public_key(pem) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "public key rejected");
                None
            }
        }
    }

    /// Request TURN credentials for the given serial. The response `data` is
    /// AES-encrypted under a key we wrap with the relay's RSA key.
    pub async fn fetch_turn_server_info(
        &self,
        serial: &str,
        token: &str,
        public_key: &RsaPublicKey,
    ) -> Result<TurnServerInfo> {
        info!("obtaining TURN server info");
        let aes_key = crypto::generate_aes_key();
        let form = [
            ("sn", serial.to_string()),
            ("sk", crypto::rsa_encrypt(&aes_key, public_key)?),
        ];
        let response = self
            .request(Method::POST, "webrtc/account", &form, token)
            .await?;
        if code_of(&response) != CODE_OK {
            return Err(DriverError::RemoteSignaling(format!(
                "TURN account request rejected: {response}"
            )));
        }
        let encrypted = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::RemoteSignaling("TURN response without data".to_string()))?;
        let decrypted = crypto::aes_decrypt(encrypted, &aes_key)?;
        serde_json::from_str(&decrypted)
            .map_err(|e| DriverError::RemoteSignaling(format!("TURN info unparsable: {e}")))
    }

    /// Relay the SDP offer to the device through the cloud and return the
    /// decrypted answer. Code 1000 means the device is not online (fatal).
    pub async fn send_sdp_to_remote_peer(
        &self,
        serial: &str,
        sdp: &str,
        token: &str,
        public_key: &RsaPublicKey,
    ) -> Result<String> {
        info!("relaying SDP offer through the cloud");
        let aes_key = crypto::generate_aes_key();
        let form = [
            ("sn", serial.to_string()),
            ("sk", crypto::rsa_encrypt(&aes_key, public_key)?),
            ("data", crypto::aes_encrypt(sdp, &aes_key)?),
            ("timeout", "5".to_string()),
        ];
        let response = self
            .request(Method::POST, "webrtc/connect", &form, token)
            .await?;
        match code_of(&response) {
            CODE_OK => {
                let encrypted = response.get("data").and_then(Value::as_str).ok_or_else(|| {
                    DriverError::RemoteSignaling("SDP response without data".to_string())
                })?;
                info!("received SDP answer");
                crypto::aes_decrypt(encrypted, &aes_key)
            }
            CODE_DEVICE_OFFLINE => Err(DriverError::DeviceOffline),
            _ => Err(DriverError::RemoteSignaling(format!(
                "SDP exchange rejected: {response}"
            ))),
        }
    }
}

fn code_of(response: &Value) -> i64 {
    response.get("code").and_then(Value::as_i64).unwrap_or(-1)
}

/// Local UTC offset formatted as `GMT+HH:MM` / `GMT-HH:MM`.
fn local_timezone_offset() -> String {
    let seconds = Local::now().offset().local_minus_utc();
    let sign = if seconds >= 0 { '+' } else { '-' };
    let hours = seconds.abs() / 3600;
    let minutes = (seconds.abs() % 3600) / 60;
    format!("GMT{sign}{hours:02}:{minutes:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_header_shape() {
        let tz = local_timezone_offset();
        assert!(tz.starts_with("GMT+") || tz.starts_with("GMT-"));
        assert_eq!(tz.len(), "GMT+00:00".len());
        assert_eq!(&tz[6..7], ":");
    }

    #[test]
    fn response_code_extraction() {
        assert_eq!(code_of(&serde_json::json!({"code": 100})), 100);
        assert_eq!(code_of(&serde_json::json!({"code": 1000})), 1000);
        assert_eq!(code_of(&serde_json::json!({})), -1);
        assert_eq!(code_of(&serde_json::json!({"code": "oops"})), -1);
    }

    #[test]
    fn turn_info_parses_from_decrypted_payload() {
        let info: TurnServerInfo = serde_json::from_str(
            r#"{"user":"u-123","passwd":"p-456","realm":"turn:relay.example.com:3478"}"#,
        )
        .unwrap();
        assert_eq!(info.user, "u-123");
        assert_eq!(info.realm, "turn:relay.example.com:3478");
    }

    // The request signature is timestamp-dependent; pin the derivation so a
    // refactor cannot silently change it.
    #[test]
    fn sign_derivation() {
        let timestamp = "1700000000000";
        let nonce = crypto::md5_hex(timestamp);
        assert_eq!(nonce, crypto::md5_hex("1700000000000"));
        let sign = crypto::md5_hex(&format!("{APP_SIGN_SECRET}{timestamp}{nonce}"));
        assert_eq!(sign.len(), 32);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
