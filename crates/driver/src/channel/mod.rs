//! The application data channel: framing, dispatch, and the protocol
//! machinery that runs on top of it.
//!
//! Inbound traffic is funneled through one dispatch task. That task is the
//! serialization point for the correlator and subscription maps: a message
//! is parsed, run through the correlator, routed to its topic handler, and
//! only then is the next message picked up.

mod correlator;
mod errors;
mod heartbeat;
mod inner;
mod pubsub;
mod validation;

pub use errors::DeviceError;
pub use inner::{DownloadOutcome, FileDownloader, FileUploader, TransferStatus, UPLOAD_CHUNK_SIZE};
pub use pubsub::{PubSub, RequestOptions};
pub use validation::challenge_response;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use go2_protocol::{BinaryFrame, MessageType, nested};

use crate::error::{DriverError, Result};
use crate::lidar::{DecoderKind, LidarDecoder};

/// Outbound seam between the protocol machinery and the wire. The real
/// implementation wraps the WebRTC data channel; tests substitute a mock.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    fn ready(&self) -> bool;
    async fn send_text(&self, text: String) -> Result<()>;
}

struct RtcTransport {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl Transport for RtcTransport {
    fn ready(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.channel.send_text(text).await?;
        Ok(())
    }
}

type ErrorListener = Box<dyn Fn(&DeviceError) + Send + Sync>;

/// Protocol hub for the "data" channel.
pub struct DataChannel {
    hub: Arc<PubSub>,
    validation: validation::Validation,
    heartbeat: heartbeat::Heartbeat,
    network: Arc<inner::NetworkStatus>,
    decoder: RwLock<Box<dyn LidarDecoder>>,
    error_listeners: Mutex<Vec<ErrorListener>>,
}

impl DataChannel {
    /// Wrap a freshly created WebRTC data channel and start the dispatch
    /// loop feeding off its message callback.
    pub(crate) fn new(channel: Arc<RTCDataChannel>, remote: bool) -> Arc<Self> {
        let transport: Arc<dyn Transport> = Arc::new(RtcTransport {
            channel: Arc::clone(&channel),
        });
        let this = Self::with_transport(transport, remote);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<DataChannelMessage>();
        channel.on_message(Box::new(move |msg| {
            let inbound_tx = inbound_tx.clone();
            Box::pin(async move {
                let _ = inbound_tx.send(msg);
            })
        }));

        channel.on_open(Box::new(|| {
            info!("data channel opened");
            Box::pin(async {})
        }));

        let on_close = Arc::downgrade(&this);
        channel.on_close(Box::new(move || {
            let on_close = on_close.clone();
            Box::pin(async move {
                if let Some(channel) = on_close.upgrade() {
                    channel.handle_close().await;
                }
            })
        }));

        this.clone().spawn_dispatch(inbound_rx);
        this
    }

    /// Construction over an arbitrary transport; the seam the tests use.
    pub(crate) fn with_transport(transport: Arc<dyn Transport>, remote: bool) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::new(PubSub::new(transport)),
            validation: validation::Validation::new(),
            heartbeat: heartbeat::Heartbeat::new(),
            network: inner::NetworkStatus::new(remote),
            decoder: RwLock::new(DecoderKind::LibVoxel.build()),
            error_listeners: Mutex::new(Vec::new()),
        })
    }

    fn spawn_dispatch(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<DataChannelMessage>) {
        tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                self.ingest(raw.is_string, &raw.data).await;
            }
            debug!("dispatch loop ended");
        });
    }

    /// Process one raw frame: parse, correlate, route, then run the typed
    /// protocol handlers. Parse failures drop the frame.
    pub(crate) async fn ingest(&self, is_string: bool, data: &[u8]) {
        let parsed = if is_string {
            match serde_json::from_slice::<Value>(data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "dropping unparsable text frame");
                    return;
                }
            }
        } else {
            match self.decode_binary(data).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "dropping unparsable binary frame");
                    return;
                }
            }
        };

        let Some(msg) = self.hub.dispatch(parsed).await else {
            return;
        };
        self.handle_typed(&msg).await;
    }

    /// Parse a binary frame and substitute the decoded LiDAR payload into
    /// `header.data.data`.
    async fn decode_binary(&self, data: &[u8]) -> Result<Value> {
        let frame = BinaryFrame::parse(data)?;
        let mut header = frame.header;
        let metadata = header.get("data").cloned().unwrap_or(Value::Null);
        let decoded = self.decoder.read().await.decode(frame.payload, &metadata)?;
        match header.get_mut("data") {
            Some(Value::Object(data)) => {
                data.insert("data".to_string(), decoded);
            }
            _ => {
                return Err(DriverError::Protocol(
                    "binary frame header without data object".to_string(),
                ));
            }
        }
        Ok(header)
    }

    async fn handle_typed(&self, msg: &Value) {
        let Some(kind) = msg.get("type").and_then(Value::as_str) else {
            return;
        };
        match kind {
            "validation" => {
                if self.validation.handle_response(msg, &self.hub).await {
                    self.on_accepted().await;
                }
            }
            "err" => self.validation.handle_err(msg, &self.hub).await,
            "heartbeat" => self.heartbeat.on_message().await,
            "rtc_inner_req" => {
                let req_type = nested(msg, &["info", "req_type"]).and_then(Value::as_str);
                if req_type == Some(inner::PROBE_REQ_TYPE)
                    && let Some(info) = msg.get("info")
                {
                    inner::answer_probe(&self.hub, info).await;
                }
            }
            "errors" | "add_error" | "rm_error" => {
                for error in errors::parse_report(msg) {
                    warn!(
                        source = %error.source_text,
                        message = %error.message,
                        timestamp = error.timestamp,
                        "device error report"
                    );
                    for listener in self.error_listeners.lock().await.iter() {
                        listener(&error);
                    }
                }
            }
            _ => {}
        }
    }

    /// Validation acceptance starts the background timers.
    async fn on_accepted(&self) {
        self.heartbeat.start(Arc::clone(&self.hub)).await;
        self.network.start(Arc::clone(&self.hub)).await;
    }

    /// React to the channel closing underneath us: stop the timers and
    /// fail every pending waiter.
    pub(crate) async fn handle_close(&self) {
        info!("data channel closed");
        self.heartbeat.stop().await;
        self.network.stop().await;
        self.hub.close().await;
    }

    /// The publish/subscribe surface.
    pub fn pub_sub(&self) -> &Arc<PubSub> {
        &self.hub
    }

    pub fn is_open(&self) -> bool {
        self.hub.is_open()
    }

    /// Block until the peer has accepted validation.
    pub async fn wait_until_ready(&self, limit: Duration) -> Result<()> {
        self.validation.wait_accepted(limit).await
    }

    pub fn is_validated(&self) -> bool {
        self.validation.is_accepted()
    }

    /// Register a callback for validation acceptance.
    pub async fn on_validated(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.validation.add_listener(listener).await;
    }

    /// Register a callback for the device's uplink classification
    /// ("4G", "STA-T", "STA-L").
    pub async fn on_network_status(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.network.add_listener(listener).await;
    }

    pub async fn network_mode(&self) -> Option<String> {
        self.network.mode().await
    }

    /// Register a callback for device error reports.
    pub async fn on_device_error(&self, listener: impl Fn(&DeviceError) + Send + Sync + 'static) {
        self.error_listeners.lock().await.push(Box::new(listener));
    }

    pub async fn last_heartbeat(&self) -> Option<Instant> {
        self.heartbeat.last_seen().await
    }

    /// Ask the peer to stop throttling high-rate topics. Needed before
    /// subscribing to the LiDAR stream.
    pub async fn disable_traffic_saving(&self, disable: bool) -> Result<bool> {
        let data = json!({
            "req_type": "disable_traffic_saving",
            "instruction": if disable { "on" } else { "off" },
        });
        let reply = self
            .hub
            .publish("", Some(data), MessageType::RtcInnerReq)
            .await?;
        Ok(nested(&reply, &["info", "execution"]).and_then(Value::as_str) == Some("ok"))
    }

    pub async fn switch_video_channel(&self, on: bool) -> Result<()> {
        info!(on, "switching video channel");
        self.hub
            .publish_without_callback("", Some(switch_value(on)), MessageType::Vid)
            .await
    }

    pub async fn switch_audio_channel(&self, on: bool) -> Result<()> {
        info!(on, "switching audio channel");
        self.hub
            .publish_without_callback("", Some(switch_value(on)), MessageType::Aud)
            .await
    }

    /// Swap the LiDAR decoder backend.
    pub async fn set_decoder(&self, kind: DecoderKind) {
        let decoder = kind.build();
        info!(decoder = decoder.name(), "LiDAR decoder selected");
        *self.decoder.write().await = decoder;
    }

    pub fn uploader(&self) -> FileUploader {
        FileUploader::new(Arc::clone(&self.hub))
    }

    pub fn downloader(&self) -> FileDownloader {
        FileDownloader::new(Arc::clone(&self.hub))
    }
}

fn switch_value(on: bool) -> Value {
    Value::String(if on { "on" } else { "off" }.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Transport;
    use crate::error::{DriverError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory transport capturing outbound traffic.
    pub(crate) struct MockTransport {
        open: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub(crate) fn open() -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn closed() -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn ready(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: String) -> Result<()> {
            if !self.ready() {
                return Err(DriverError::NotOpen);
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use go2_protocol::topics::topic;
    use go2_protocol::{encode_lidar_frame, encode_normal_frame};
    use serde_json::json;

    fn channel(transport: &Arc<MockTransport>) -> Arc<DataChannel> {
        DataChannel::with_transport(transport.clone(), false)
    }

    #[tokio::test]
    async fn validation_challenge_then_acceptance_starts_timers() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        channel
            .ingest(true, br#"{"type":"validation","data":"abcdef"}"#)
            .await;
        assert!(!channel.is_validated());
        let sent = transport.sent();
        assert_eq!(
            sent[0],
            r#"{"type":"validation","topic":"","data":"X6KF4b6+CmYj4zr8BKH72A=="}"#
        );

        channel
            .ingest(true, br#"{"type":"validation","data":"Validation Ok."}"#)
            .await;
        assert!(channel.is_validated());
        channel
            .wait_until_ready(Duration::from_millis(10))
            .await
            .unwrap();

        channel.handle_close().await;
    }

    #[tokio::test]
    async fn lidar_frame_reaches_subscription_with_decoded_points() {
        let transport = MockTransport::open();
        let channel = channel(&transport);
        channel.set_decoder(DecoderKind::Native).await;

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        channel
            .pub_sub()
            .subscribe(topic::VOXEL_MAP_COMPRESSED, move |msg| {
                let _ = seen_tx.send(msg.clone());
            })
            .await
            .unwrap();

        let header = json!({
            "type": "msg",
            "topic": topic::VOXEL_MAP_COMPRESSED,
            "data": {
                "stamp": 1700000000.25,
                "frame_id": "odom",
                "resolution": 0.25,
                "origin": [0.0, 0.0, 0.0],
                "width": 128,
                "src_size": 6
            }
        });
        // Two occupied cells
        let frame = encode_lidar_frame(&header, &[0, 0, 0, 1, 2, 3]).unwrap();
        channel.ingest(false, &frame).await;

        let seen = seen_rx.recv().await.unwrap();
        assert_eq!(nested(&seen, &["data", "data", "point_count"]), Some(&json!(2)));
        assert_eq!(
            nested(&seen, &["data", "data", "points"]),
            Some(&json!([[0.0, 0.0, 0.0], [0.25, 0.5, 0.75]]))
        );
        // The rest of the header survives untouched
        assert_eq!(nested(&seen, &["data", "frame_id"]), Some(&json!("odom")));
    }

    #[tokio::test]
    async fn normal_binary_frame_is_decoded_and_routed() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        channel
            .pub_sub()
            .subscribe("rt/some/stream", move |msg| {
                let _ = seen_tx.send(msg.clone());
            })
            .await
            .unwrap();

        let header = json!({
            "type": "msg",
            "topic": "rt/some/stream",
            "data": {"resolution": 1.0, "origin": [0.0, 0.0, 0.0]}
        });
        let frame = encode_normal_frame(&header, &[5, 5, 5]).unwrap();
        channel.ingest(false, &frame).await;

        let seen = seen_rx.recv().await.unwrap();
        // Default decoder is libvoxel: flattened positions
        assert_eq!(
            nested(&seen, &["data", "data", "positions"]),
            Some(&json!([5.0, 5.0, 5.0]))
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_silently() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        channel.ingest(true, b"not json at all").await;
        channel.ingest(false, &[0xFF, 0xFF, 0x00]).await;
        // Nothing sent, nothing panicked
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn probe_request_is_echoed() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        channel
            .ingest(
                true,
                br#"{"type":"rtc_inner_req","topic":"","info":{"req_type":"rtt_probe_send_from_mechine","seq":3}}"#,
            )
            .await;

        let sent: Value = serde_json::from_str(&transport.sent()[0]).unwrap();
        assert_eq!(sent["type"], "rtc_inner_req");
        assert_eq!(nested(&sent, &["data", "seq"]), Some(&json!(3)));
    }

    #[tokio::test]
    async fn device_errors_reach_registered_listener() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        channel
            .on_device_error(move |error| {
                let _ = seen_tx.send(error.clone());
            })
            .await;

        channel
            .ingest(
                true,
                br#"{"type":"add_error","topic":"","data":[[1700000000,100,1]]}"#,
            )
            .await;

        let error = seen_rx.recv().await.unwrap();
        assert_eq!(error.message, "DDS message timeout");
    }

    #[tokio::test]
    async fn traffic_saving_toggle_reports_execution() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        let toggled = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.disable_traffic_saving(true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent: Value = serde_json::from_str(&transport.sent()[0]).unwrap();
        assert_eq!(
            nested(&sent, &["data", "instruction"]),
            Some(&json!("on"))
        );

        // Reply has no identifiers: the (type, topic) fallback key matches
        channel
            .ingest(
                true,
                br#"{"type":"rtc_inner_req","topic":"","info":{"execution":"ok"}}"#,
            )
            .await;
        assert!(toggled.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn vid_aud_switches_use_plain_string_payloads() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        channel.switch_video_channel(true).await.unwrap();
        channel.switch_audio_channel(false).await.unwrap();

        assert_eq!(
            transport.sent(),
            vec![
                r#"{"type":"vid","topic":"","data":"on"}"#.to_string(),
                r#"{"type":"aud","topic":"","data":"off"}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn close_fails_pending_publish() {
        let transport = MockTransport::open();
        let channel = channel(&transport);

        let pending = {
            let hub = channel.pub_sub().clone();
            tokio::spawn(async move {
                hub.publish("rt/t", Some(json!({"uuid": "w-1"})), MessageType::Msg)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        channel.handle_close().await;
        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            DriverError::ConnectionClosed
        ));
    }
}
