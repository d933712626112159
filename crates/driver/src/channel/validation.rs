//! Data-channel handshake.
//!
//! Right after the channel opens the peer sends a VALIDATION envelope:
//! either the literal acceptance string or a challenge nonce that must be
//! answered with `base64(md5("UnitreeGo2_" + nonce))`. The peer may also
//! demand re-validation later through an ERR envelope.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use go2_protocol::MessageType;

use super::pubsub::PubSub;
use crate::crypto;
use crate::error::{DriverError, Result};

const ACCEPTED: &str = "Validation Ok.";
const REVALIDATE: &str = "Validation Needed.";
const KEY_PREFIX: &str = "UnitreeGo2_";

type Listener = Box<dyn Fn() + Send + Sync>;

/// Answer to a validation challenge.
pub fn challenge_response(nonce: &str) -> String {
    BASE64.encode(crypto::md5_raw(&format!("{KEY_PREFIX}{nonce}")))
}

pub(crate) struct Validation {
    accepted: watch::Sender<bool>,
    last_nonce: Mutex<String>,
    listeners: Mutex<Vec<Listener>>,
}

impl Validation {
    pub(crate) fn new() -> Self {
        let (accepted, _) = watch::channel(false);
        Self {
            accepted,
            last_nonce: Mutex::new(String::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.lock().await.push(Box::new(listener));
    }

    /// Handle an inbound VALIDATION envelope. Returns true when this
    /// message freshly moved the session into the accepted state.
    pub(crate) async fn handle_response(&self, msg: &Value, hub: &Arc<PubSub>) -> bool {
        match msg.get("data").and_then(Value::as_str) {
            Some(ACCEPTED) => {
                let newly = !*self.accepted.borrow();
                if newly {
                    info!("validation accepted");
                    self.accepted.send_replace(true);
                    for listener in self.listeners.lock().await.iter() {
                        listener();
                    }
                }
                newly
            }
            Some(nonce) => {
                debug!("answering validation challenge");
                *self.last_nonce.lock().await = nonce.to_string();
                self.send_answer(nonce, hub).await;
                false
            }
            None => {
                warn!("validation envelope without data");
                false
            }
        }
    }

    /// ERR envelopes asking for re-validation are answered with the last
    /// seen nonce.
    pub(crate) async fn handle_err(&self, msg: &Value, hub: &Arc<PubSub>) {
        if msg.get("info").and_then(Value::as_str) == Some(REVALIDATE) {
            let nonce = self.last_nonce.lock().await.clone();
            warn!("peer requested re-validation");
            self.send_answer(&nonce, hub).await;
        }
    }

    async fn send_answer(&self, nonce: &str, hub: &Arc<PubSub>) {
        let answer = Value::String(challenge_response(nonce));
        if let Err(e) = hub
            .publish_without_callback("", Some(answer), MessageType::Validation)
            .await
        {
            warn!(error = %e, "failed to send validation answer");
        }
    }

    pub(crate) fn is_accepted(&self) -> bool {
        *self.accepted.borrow()
    }

    /// Block until the peer accepts validation, or fail with Timeout.
    pub(crate) async fn wait_accepted(&self, limit: Duration) -> Result<()> {
        let mut accepted = self.accepted.subscribe();
        tokio::time::timeout(limit, accepted.wait_for(|accepted| *accepted))
            .await
            .map_err(|_| DriverError::Timeout)?
            .map_err(|_| DriverError::ConnectionClosed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::MockTransport;
    use serde_json::json;

    #[test]
    fn challenge_response_known_vector() {
        // md5("UnitreeGo2_abcdef") = 5fa285e1bebe0a6623e33afc04a1fbd8
        assert_eq!(challenge_response("abcdef"), "X6KF4b6+CmYj4zr8BKH72A==");
        // 16 digest bytes always encode to 24 base64 characters
        assert_eq!(challenge_response("anything").len(), 24);
    }

    #[tokio::test]
    async fn challenge_is_answered_on_the_wire() {
        let transport = MockTransport::open();
        let hub = Arc::new(PubSub::new(transport.clone()));
        let validation = Validation::new();

        let fresh = validation
            .handle_response(&json!({"type": "validation", "data": "abcdef"}), &hub)
            .await;
        assert!(!fresh);
        assert!(!validation.is_accepted());

        assert_eq!(
            transport.sent(),
            vec![r#"{"type":"validation","topic":"","data":"X6KF4b6+CmYj4zr8BKH72A=="}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn acceptance_fires_listeners_once() {
        let transport = MockTransport::open();
        let hub = Arc::new(PubSub::new(transport.clone()));
        let validation = Validation::new();

        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        validation
            .add_listener(move || {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .await;

        let ok = json!({"type": "validation", "data": "Validation Ok."});
        assert!(validation.handle_response(&ok, &hub).await);
        assert!(validation.is_accepted());
        // Duplicate acceptance is ignored
        assert!(!validation.handle_response(&ok, &hub).await);
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);

        validation
            .wait_accepted(Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn err_revalidation_resends_last_nonce() {
        let transport = MockTransport::open();
        let hub = Arc::new(PubSub::new(transport.clone()));
        let validation = Validation::new();

        validation
            .handle_response(&json!({"type": "validation", "data": "abcdef"}), &hub)
            .await;
        validation
            .handle_err(
                &json!({"type": "err", "info": "Validation Needed."}),
                &hub,
            )
            .await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);

        // Unrelated ERR envelopes are ignored
        validation
            .handle_err(&json!({"type": "err", "info": "other"}), &hub)
            .await;
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_accepted_times_out() {
        let validation = Validation::new();
        let err = validation
            .wait_accepted(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout));
    }
}
