//! Receive-only video channel: remote track fan-out plus the VID switch.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use webrtc::track::track_remote::TrackRemote;

use crate::channel::DataChannel;
use crate::error::Result;

type TrackHandler = Arc<dyn Fn(Arc<TrackRemote>) + Send + Sync>;

#[derive(Clone)]
pub struct VideoChannel {
    channel: Arc<DataChannel>,
    callbacks: Arc<Mutex<Vec<TrackHandler>>>,
}

impl VideoChannel {
    pub(crate) fn new(channel: Arc<DataChannel>) -> Self {
        Self {
            channel,
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn add_track_callback(
        &self,
        callback: impl Fn(Arc<TrackRemote>) + Send + Sync + 'static,
    ) {
        self.callbacks.lock().await.push(Arc::new(callback));
    }

    pub(crate) async fn handle_track(&self, track: Arc<TrackRemote>) {
        info!("video track received");
        for callback in self.callbacks.lock().await.iter() {
            callback(Arc::clone(&track));
        }
    }

    /// Toggle the device's camera stream.
    pub async fn switch(&self, on: bool) -> Result<()> {
        self.channel.switch_video_channel(on).await
    }
}
