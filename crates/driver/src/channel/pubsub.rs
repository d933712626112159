//! Topic routing and request publication over the data channel.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use go2_protocol::{
    Envelope, MessageType, RequestHeader, RequestIdentity, RequestPayload, RequestPolicy,
};

use super::Transport;
use crate::channel::correlator::{Correlator, WaiterKey};
use crate::error::{DriverError, Result};

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Options for [`PubSub::publish_request_new`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub api_id: i64,
    /// Correlation id; generated when absent.
    pub id: Option<i64>,
    /// Forwarded as-is when a string, JSON-stringified otherwise.
    pub parameter: Option<Value>,
    /// Any value requests priority scheduling on the peer.
    pub priority: Option<i32>,
}

impl RequestOptions {
    pub fn new(api_id: i64) -> Self {
        Self {
            api_id,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_parameter(mut self, parameter: Value) -> Self {
        self.parameter = Some(parameter);
        self
    }

    pub fn with_priority(mut self) -> Self {
        self.priority = Some(1);
        self
    }
}

/// Publisher/subscriber hub. Shared by the session, the background timers,
/// and host applications; all mutation funnels through the two mutexes.
pub struct PubSub {
    transport: Arc<dyn Transport>,
    correlator: Mutex<Correlator>,
    subscriptions: Mutex<HashMap<String, Handler>>,
}

impl PubSub {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            correlator: Mutex::new(Correlator::default()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.transport.ready()
    }

    /// Send an envelope and wait for the correlated reply.
    pub async fn publish(
        &self,
        topic: &str,
        data: Option<Value>,
        kind: MessageType,
    ) -> Result<Value> {
        if !self.transport.ready() {
            return Err(DriverError::NotOpen);
        }

        let key = WaiterKey::for_outbound(kind.as_str(), topic, data.as_ref());
        let (slot, reply) = oneshot::channel();
        self.correlator.lock().await.register(key, slot);

        self.send_envelope(topic, data, kind).await?;
        reply.await.map_err(|_| DriverError::ConnectionClosed)
    }

    /// Fire-and-forget variant of [`publish`](Self::publish).
    pub async fn publish_without_callback(
        &self,
        topic: &str,
        data: Option<Value>,
        kind: MessageType,
    ) -> Result<()> {
        if !self.transport.ready() {
            return Err(DriverError::NotOpen);
        }
        self.send_envelope(topic, data, kind).await
    }

    /// Build and send a well-formed REQUEST, returning the correlated reply.
    pub async fn publish_request_new(&self, topic: &str, options: RequestOptions) -> Result<Value> {
        let id = options.id.unwrap_or_else(generate_request_id);
        let parameter = match options.parameter {
            None => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        let payload = RequestPayload {
            header: RequestHeader {
                identity: RequestIdentity {
                    id,
                    api_id: options.api_id,
                },
                policy: options.priority.map(|_| RequestPolicy { priority: 1 }),
            },
            parameter,
        };
        self.publish(topic, Some(serde_json::to_value(payload)?), MessageType::Request)
            .await
    }

    /// Register a handler and tell the peer to start publishing the topic.
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<()> {
        self.subscriptions
            .lock()
            .await
            .insert(topic.to_string(), Arc::new(handler));
        self.publish_without_callback(topic, None, MessageType::Subscribe)
            .await
    }

    /// Drop the handler and tell the peer to stop publishing the topic.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().await.remove(topic);
        self.publish_without_callback(topic, None, MessageType::Unsubscribe)
            .await
    }

    async fn send_envelope(&self, topic: &str, data: Option<Value>, kind: MessageType) -> Result<()> {
        let envelope = Envelope {
            kind,
            topic: topic.to_string(),
            data,
        };
        let text = serde_json::to_string(&envelope)?;
        debug!(message = %text, "message sent");
        self.transport.send_text(text).await
    }

    /// Run one inbound message through the correlator, then the topic
    /// handler. Called only from the channel's dispatch task, which is what
    /// serializes access to the shared maps.
    pub(crate) async fn dispatch(&self, msg: Value) -> Option<Value> {
        let resolved = self.correlator.lock().await.resolve(msg);
        let msg = match resolved {
            Ok(Some(msg)) => msg,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "dropping inbound message");
                return None;
            }
        };

        if let Some(topic) = msg.get("topic").and_then(Value::as_str) {
            let handler = self.subscriptions.lock().await.get(topic).cloned();
            if let Some(handler) = handler {
                handler(&msg);
            }
        }
        Some(msg)
    }

    /// Fail every pending waiter with the closed-channel signal.
    pub(crate) async fn close(&self) {
        self.correlator.lock().await.close();
    }
}

/// Ids follow the vendor app: epoch milliseconds folded into i32 range plus
/// a small random spread.
fn generate_request_id() -> i64 {
    let millis = chrono::Utc::now().timestamp_millis();
    millis % 2_147_483_648 + rand::thread_rng().gen_range(0..=1000)
}
