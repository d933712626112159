//! RTC_INNER_REQ surfaces: network-status polling, probe replies, and the
//! chunked static-file transfer protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use go2_protocol::{MessageType, nested};

use super::pubsub::PubSub;
use crate::error::{DriverError, Result};

const POLL_PERIOD: Duration = Duration::from_secs(1);
const RETRY_PERIOD: Duration = Duration::from_millis(500);

/// 60 KiB of base64 text per upload chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 60 * 1024;
const UPLOAD_YIELD_EVERY: usize = 5;
const UPLOAD_YIELD_PAUSE: Duration = Duration::from_millis(500);
const TRANSFER_BUSINESS: &str = "uslam_final_pcd";

pub(crate) const PROBE_REQ_TYPE: &str = "rtt_probe_send_from_mechine";

type StatusListener = Box<dyn Fn(&str) + Send + Sync>;

/// Polls the peer for its uplink state until it reports a connected mode.
///
/// Modes surface as `"4G"`, `"STA-T"` (wifi, reached remotely) or `"STA-L"`
/// (wifi, reached locally).
pub(crate) struct NetworkStatus {
    remote: bool,
    mode: Mutex<Option<String>>,
    listeners: Mutex<Vec<StatusListener>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkStatus {
    pub(crate) fn new(remote: bool) -> Arc<Self> {
        Arc::new(Self {
            remote,
            mode: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        })
    }

    pub(crate) async fn add_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.lock().await.push(Box::new(listener));
    }

    pub(crate) async fn mode(&self) -> Option<String> {
        self.mode.lock().await.clone()
    }

    /// Start polling. Idempotent; the loop stops itself once a connected
    /// mode is reported.
    pub(crate) async fn start(self: &Arc<Self>, hub: Arc<PubSub>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(POLL_PERIOD).await;
            loop {
                let request = json!({
                    "req_type": "public_network_status",
                    "uuid": Uuid::new_v4().to_string(),
                });
                let reply = this.publish_status_request(&hub, request).await;
                let status = reply.as_deref();
                match status {
                    Some("NetworkStatus.ON_4G_CONNECTED") => {
                        this.finish("4G").await;
                        break;
                    }
                    Some("NetworkStatus.ON_WIFI_CONNECTED") => {
                        let mode = if this.remote { "STA-T" } else { "STA-L" };
                        this.finish(mode).await;
                        break;
                    }
                    Some("Undefined") | Some("NetworkStatus.DISCONNECTED") => {
                        tokio::time::sleep(RETRY_PERIOD).await;
                    }
                    other => {
                        debug!(status = ?other, "network status pending");
                        tokio::time::sleep(POLL_PERIOD).await;
                    }
                }
            }
        }));
    }

    async fn publish_status_request(&self, hub: &Arc<PubSub>, request: Value) -> Option<String> {
        match hub
            .publish("", Some(request), MessageType::RtcInnerReq)
            .await
        {
            Ok(reply) => nested(&reply, &["info", "status"])
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                debug!(error = %e, "network status request failed");
                None
            }
        }
    }

    async fn finish(&self, mode: &str) {
        info!(mode, "device uplink classified");
        *self.mode.lock().await = Some(mode.to_string());
        for listener in self.listeners.lock().await.iter() {
            listener(mode);
        }
    }

    pub(crate) async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

/// Echo an RTT probe back to the peer.
pub(crate) async fn answer_probe(hub: &Arc<PubSub>, info: &Value) {
    if let Err(e) = hub
        .publish_without_callback("", Some(info.clone()), MessageType::RtcInnerReq)
        .await
    {
        debug!(error = %e, "probe reply not sent");
    }
}

/// Terminal state of a file transfer.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    Cancelled,
}

/// Chunked upload of a static file to the device.
pub struct FileUploader {
    hub: Arc<PubSub>,
    cancelled: AtomicBool,
}

impl FileUploader {
    pub(crate) fn new(hub: Arc<PubSub>) -> Self {
        Self {
            hub,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Push `data` to `file_path` on the device in 60 KiB base64 chunks.
    ///
    /// The cancellation flag is observed between chunks; the progress
    /// callback fires after each chunk with a 0-100 percentage.
    pub async fn upload(
        &self,
        data: &[u8],
        file_path: &str,
        progress: Option<&(dyn Fn(u8) + Send + Sync)>,
    ) -> Result<TransferStatus> {
        self.cancelled.store(false, Ordering::Relaxed);

        let encoded = BASE64.encode(data);
        let total = encoded.len().div_ceil(UPLOAD_CHUNK_SIZE);
        info!(size_after_b64 = encoded.len(), total, "starting file upload");

        for index in 0..total {
            if self.cancelled.load(Ordering::Relaxed) {
                info!("upload cancelled");
                return Ok(TransferStatus::Cancelled);
            }
            if index % UPLOAD_YIELD_EVERY == 0 {
                tokio::time::sleep(UPLOAD_YIELD_PAUSE).await;
            }

            let start = index * UPLOAD_CHUNK_SIZE;
            let end = (start + UPLOAD_CHUNK_SIZE).min(encoded.len());
            let chunk = &encoded[start..end];

            let message = json!({
                "req_type": "push_static_file",
                "req_uuid": format!("upload_req_{}", Uuid::new_v4()),
                "related_bussiness": TRANSFER_BUSINESS,
                "file_md5": "null",
                "file_path": file_path,
                "file_size_after_b64": encoded.len(),
                "file": {
                    "chunk_index": index + 1,
                    "total_chunk_num": total,
                    "chunk_data": chunk,
                    "chunk_data_size": chunk.len(),
                },
            });
            self.hub
                .publish_without_callback("", Some(message), MessageType::RtcInnerReq)
                .await?;

            if let Some(progress) = progress {
                progress((((index + 1) * 100) / total) as u8);
            }
        }

        Ok(TransferStatus::Complete)
    }

    /// Abort the transfer before the next chunk goes out.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Result of a completed download request.
#[derive(Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Data(Vec<u8>),
    Cancelled,
}

/// Chunked download of a static file from the device. The correlator
/// reassembles the reply fragments; this type decodes the final base64
/// body.
pub struct FileDownloader {
    hub: Arc<PubSub>,
    cancelled: AtomicBool,
}

impl FileDownloader {
    pub(crate) fn new(hub: Arc<PubSub>) -> Self {
        Self {
            hub,
            cancelled: AtomicBool::new(false),
        }
    }

    pub async fn download(
        &self,
        file_path: &str,
        progress: Option<&(dyn Fn(u8) + Send + Sync)>,
    ) -> Result<DownloadOutcome> {
        self.cancelled.store(false, Ordering::Relaxed);

        let request = json!({
            "req_type": "request_static_file",
            "req_uuid": format!("req_{}", Uuid::new_v4()),
            "related_bussiness": TRANSFER_BUSINESS,
            "file_md5": "null",
            "file_path": file_path,
        });
        let reply = self
            .hub
            .publish("", Some(request), MessageType::RtcInnerReq)
            .await?;

        if self.cancelled.load(Ordering::Relaxed) {
            info!("download cancelled");
            return Ok(DownloadOutcome::Cancelled);
        }

        let body = nested(&reply, &["info", "file", "data"])
            .and_then(Value::as_str)
            .ok_or_else(|| {
                warn!("download reply carried no file data");
                DriverError::Protocol("download reply carried no file data".to_string())
            })?;
        let bytes = BASE64
            .decode(body)
            .map_err(|e| DriverError::Protocol(format!("file body is not base64: {e}")))?;

        if let Some(progress) = progress {
            progress(100);
        }
        Ok(DownloadOutcome::Data(bytes))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
