//! Liveness pings over the data channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use go2_protocol::MessageType;

use super::pubsub::PubSub;

const PERIOD: Duration = Duration::from_secs(2);

pub(crate) struct Heartbeat {
    last_seen: Mutex<Option<Instant>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub(crate) fn new() -> Self {
        Self {
            last_seen: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start the 2-second ping loop. Idempotent.
    pub(crate) async fn start(&self, hub: Arc<PubSub>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(PERIOD).await;
                let now = Local::now();
                let data = json!({
                    "timeInStr": now.format("%Y-%m-%d %H:%M:%S").to_string(),
                    "timeInNum": now.timestamp(),
                });
                if let Err(e) = hub
                    .publish_without_callback("", Some(data), MessageType::Heartbeat)
                    .await
                {
                    // Channel hiccups are not fatal here; keep the cadence.
                    debug!(error = %e, "heartbeat not sent");
                }
            }
        }));
    }

    pub(crate) async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }

    /// Record an inbound HEARTBEAT from the peer.
    pub(crate) async fn on_message(&self) {
        debug!("heartbeat response received");
        *self.last_seen.lock().await = Some(Instant::now());
    }

    pub(crate) async fn last_seen(&self) -> Option<Instant> {
        *self.last_seen.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::MockTransport;
    use serde_json::Value;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_timestamped_pings_every_two_seconds() {
        let transport = MockTransport::open();
        let hub = Arc::new(PubSub::new(transport.clone()));
        let heartbeat = Heartbeat::new();
        heartbeat.start(hub).await;

        settle().await;
        tokio::time::advance(Duration::from_millis(2100)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        for raw in &sent {
            let msg: Value = serde_json::from_str(raw).unwrap();
            assert_eq!(msg["type"], "heartbeat");
            assert_eq!(msg["topic"], "");
            // "YYYY-MM-DD HH:MM:SS"
            assert_eq!(msg["data"]["timeInStr"].as_str().unwrap().len(), 19);
            assert!(msg["data"]["timeInNum"].is_i64());
        }

        heartbeat.stop().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_does_not_stop_the_loop() {
        let transport = MockTransport::closed();
        let hub = Arc::new(PubSub::new(transport.clone()));
        let heartbeat = Heartbeat::new();
        heartbeat.start(hub).await;

        settle().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert!(transport.sent().is_empty());

        // Channel comes back: pings resume on the same cadence
        transport.set_open(true);
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!transport.sent().is_empty());

        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn inbound_heartbeat_updates_last_seen() {
        let heartbeat = Heartbeat::new();
        assert!(heartbeat.last_seen().await.is_none());
        heartbeat.on_message().await;
        assert!(heartbeat.last_seen().await.is_some());
    }
}
