use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors surfaced to the embedding application.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no matching device found on the local network")]
    NoDeviceFound,
    #[error("cloud authentication failed: {0}")]
    RemoteAuth(String),
    #[error("cloud signaling failed: {0}")]
    RemoteSignaling(String),
    #[error("device is not online")]
    DeviceOffline,
    #[error("local signaling failed: both exchange methods were rejected")]
    LocalSignaling,
    #[error("peer is busy with another client")]
    PeerBusy,
    #[error("data channel is not open")]
    NotOpen,
    #[error("timed out waiting for the data channel to open")]
    Timeout,
    #[error("invalid chunk metadata: {0}")]
    InvalidChunk(String),
    #[error("malformed cipher text")]
    MalformedCipherText,
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Frame(#[from] go2_protocol::FrameError),
    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Fatal errors tear the session down; the rest are retried or logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Config(_)
                | DriverError::NoDeviceFound
                | DriverError::DeviceOffline
                | DriverError::PeerBusy
                | DriverError::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(DriverError::DeviceOffline.is_fatal());
        assert!(DriverError::PeerBusy.is_fatal());
        assert!(DriverError::Timeout.is_fatal());
        assert!(DriverError::NoDeviceFound.is_fatal());
        assert!(DriverError::Config("bad".into()).is_fatal());

        assert!(!DriverError::NotOpen.is_fatal());
        assert!(!DriverError::LocalSignaling.is_fatal());
        assert!(!DriverError::ConnectionClosed.is_fatal());
        assert!(!DriverError::MalformedCipherText.is_fatal());
    }
}
