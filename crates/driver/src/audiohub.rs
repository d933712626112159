//! Audio hub client: playback control, record management, megaphone mode,
//! and chunked audio uploads over `rt/api/audiohub/request`.
//!
//! Uploads take WAV bytes; transcoding is the host's concern.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{debug, info};

use go2_protocol::topics::{audio, topic};

use crate::channel::{DataChannel, RequestOptions};
use crate::crypto;
use crate::error::Result;

/// 4 KiB base64 blocks, the size the vendor app uses.
const BLOCK_SIZE: usize = 4096;
const BLOCK_PAUSE: Duration = Duration::from_millis(100);

pub struct AudioHub {
    channel: Arc<DataChannel>,
}

impl AudioHub {
    pub fn new(channel: Arc<DataChannel>) -> Self {
        Self { channel }
    }

    async fn request(&self, api_id: i64, parameter: Value) -> Result<Value> {
        self.channel
            .pub_sub()
            .publish_request_new(
                topic::AUDIO_HUB_REQUEST,
                RequestOptions::new(api_id).with_parameter(parameter),
            )
            .await
    }

    /// List the audio records stored on the device.
    pub async fn get_audio_list(&self) -> Result<Value> {
        self.request(audio::GET_AUDIO_LIST, json!({})).await
    }

    pub async fn play_by_uuid(&self, unique_id: &str) -> Result<Value> {
        self.request(audio::SELECT_START_PLAY, json!({"unique_id": unique_id}))
            .await
    }

    pub async fn pause(&self) -> Result<Value> {
        self.request(audio::PAUSE, json!({})).await
    }

    pub async fn resume(&self) -> Result<Value> {
        self.request(audio::UNSUSPEND, json!({})).await
    }

    /// `single_cycle`, `no_cycle` or `list_loop`.
    pub async fn set_play_mode(&self, play_mode: &str) -> Result<Value> {
        self.request(audio::SET_PLAY_MODE, json!({"play_mode": play_mode}))
            .await
    }

    pub async fn get_play_mode(&self) -> Result<Value> {
        self.request(audio::GET_PLAY_MODE, json!({})).await
    }

    pub async fn rename_record(&self, unique_id: &str, new_name: &str) -> Result<Value> {
        self.request(
            audio::SELECT_RENAME,
            json!({"unique_id": unique_id, "new_name": new_name}),
        )
        .await
    }

    pub async fn delete_record(&self, unique_id: &str) -> Result<Value> {
        self.request(audio::SELECT_DELETE, json!({"unique_id": unique_id}))
            .await
    }

    /// Upload a WAV file as a named audio record. Returns the reply to the
    /// final block.
    pub async fn upload_audio_file(&self, file_name: &str, wav: &[u8]) -> Result<Value> {
        let file_md5 = crypto::md5_hex_bytes(wav);
        let encoded = BASE64.encode(wav);
        let total = encoded.len().div_ceil(BLOCK_SIZE);
        info!(file_name, total, "uploading audio record");

        let mut reply = Value::Null;
        for index in 0..total {
            let start = index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(encoded.len());
            let block = &encoded[start..end];
            debug!(block = index + 1, total, "sending audio block");

            let parameter = json!({
                "file_name": file_name,
                "file_type": "wav",
                "file_size": wav.len(),
                "current_block_index": index + 1,
                "total_block_number": total,
                "block_content": block,
                "current_block_size": block.len(),
                "file_md5": file_md5,
                "create_time": chrono::Utc::now().timestamp_millis(),
            });
            reply = self.request(audio::UPLOAD_AUDIO_FILE, parameter).await?;
            tokio::time::sleep(BLOCK_PAUSE).await;
        }
        Ok(reply)
    }

    pub async fn enter_megaphone(&self) -> Result<Value> {
        self.request(audio::ENTER_MEGAPHONE, json!({})).await
    }

    pub async fn exit_megaphone(&self) -> Result<Value> {
        self.request(audio::EXIT_MEGAPHONE, json!({})).await
    }

    /// Stream WAV bytes into megaphone mode, pacing blocks 100 ms apart.
    pub async fn upload_megaphone(&self, wav: &[u8]) -> Result<Value> {
        let encoded = BASE64.encode(wav);
        let total = encoded.len().div_ceil(BLOCK_SIZE);
        info!(total, "streaming megaphone audio");

        let mut reply = Value::Null;
        for index in 0..total {
            let start = index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(encoded.len());
            let block = &encoded[start..end];

            let parameter = json!({
                "current_block_size": block.len(),
                "block_content": block,
                "current_block_index": index + 1,
                "total_block_number": total,
            });
            reply = self.request(audio::UPLOAD_MEGAPHONE, parameter).await?;
            tokio::time::sleep(BLOCK_PAUSE).await;
        }
        Ok(reply)
    }
}
