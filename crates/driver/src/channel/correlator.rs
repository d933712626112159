//! Reply correlation and chunked payload reassembly.
//!
//! Every in-flight request registers a one-shot completion slot under a key
//! derived from the message identifiers. Inbound messages complete all
//! waiters queued under their key (FIFO) and erase the entry. Payloads
//! flagged as chunked are buffered per key and delivered once, whole, when
//! the terminal fragment arrives.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use go2_protocol::nested;

use crate::error::{DriverError, Result};

/// Upper bound on buffered bytes per correlation key. A peer that streams
/// fragments without ever sending the terminal index is cut off here.
pub(crate) const MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

const FILE_REQUEST: &str = "request_static_file";

/// Correlation key: the message identifier when one exists, otherwise the
/// (type, topic) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum WaiterKey {
    Identifier(String),
    KindTopic { kind: String, topic: String },
}

impl WaiterKey {
    fn new(kind: &str, topic: &str, identifier: Option<String>) -> Self {
        match identifier {
            Some(id) => WaiterKey::Identifier(id),
            None => WaiterKey::KindTopic {
                kind: kind.to_string(),
                topic: topic.to_string(),
            },
        }
    }

    /// Key for a request we are about to send. Identifier preference:
    /// `data.uuid`, `data.header.identity.id`, `data.req_uuid`.
    pub(crate) fn for_outbound(kind: &str, topic: &str, data: Option<&Value>) -> Self {
        let identifier = data.and_then(|data| {
            as_identifier(data.get("uuid"))
                .or_else(|| as_identifier(nested(data, &["header", "identity", "id"])))
                .or_else(|| as_identifier(data.get("req_uuid")))
        });
        Self::new(kind, topic, identifier)
    }

    /// Key for an inbound message. Identifier preference: `data.uuid`,
    /// `data.header.identity.id`, `info.uuid`, `info.req_uuid`.
    fn for_inbound(kind: &str, topic: &str, msg: &Value) -> Self {
        let identifier = as_identifier(nested(msg, &["data", "uuid"]))
            .or_else(|| as_identifier(nested(msg, &["data", "header", "identity", "id"])))
            .or_else(|| as_identifier(nested(msg, &["info", "uuid"])))
            .or_else(|| as_identifier(nested(msg, &["info", "req_uuid"])));
        Self::new(kind, topic, identifier)
    }
}

fn as_identifier(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Default)]
struct ChunkBuffer {
    parts: Vec<Vec<u8>>,
    bytes: usize,
}

/// Pending-waiter registry plus per-key chunk buffers. All access is
/// serialized by the owning channel (one dispatch task).
#[derive(Default)]
pub(crate) struct Correlator {
    waiters: HashMap<WaiterKey, Vec<oneshot::Sender<Value>>>,
    chunks: HashMap<WaiterKey, ChunkBuffer>,
}

impl Correlator {
    pub(crate) fn register(&mut self, key: WaiterKey, slot: oneshot::Sender<Value>) {
        self.waiters.entry(key).or_default().push(slot);
    }

    /// Feed one inbound message.
    ///
    /// Returns `Ok(Some(msg))` when the message (possibly reassembled from
    /// chunks) should be delivered to subscribers, `Ok(None)` when a
    /// fragment was buffered.
    pub(crate) fn resolve(&mut self, mut msg: Value) -> Result<Option<Value>> {
        let Some(kind) = msg.get("type").and_then(Value::as_str).map(str::to_string) else {
            // Untyped frames bypass correlation but still reach handlers.
            return Ok(Some(msg));
        };
        let topic = msg
            .get("topic")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let key = WaiterKey::for_inbound(&kind, &topic, &msg);

        let is_file_reply = kind == "rtc_inner_req"
            && nested(&msg, &["info", "req_type"]).and_then(Value::as_str) == Some(FILE_REQUEST);
        let delivered = if is_file_reply {
            self.absorb_file_chunk(&key, &mut msg)?
        } else {
            self.absorb_content_chunk(&key, &mut msg)?
        };
        if !delivered {
            return Ok(None);
        }

        self.complete(&key, &msg);
        Ok(Some(msg))
    }

    /// Complete and erase every waiter queued under the key.
    fn complete(&mut self, key: &WaiterKey, msg: &Value) {
        if let Some(slots) = self.waiters.remove(key) {
            for slot in slots {
                let _ = slot.send(msg.clone());
            }
        }
    }

    /// Generic chunking path: metadata in `data.content_info`, fragments in
    /// `data.data`. Returns whether the message is ready for delivery.
    fn absorb_content_chunk(&mut self, key: &WaiterKey, msg: &mut Value) -> Result<bool> {
        let Some(content_info) = nested(msg, &["data", "content_info"]) else {
            return Ok(true);
        };
        if content_info
            .get("enable_chunking")
            .and_then(Value::as_bool)
            != Some(true)
        {
            return Ok(true);
        }
        let (index, total) = chunk_position(content_info)?;

        let fragment = fragment_bytes(nested(msg, &["data", "data"]));
        self.buffer_fragment(key, fragment)?;
        if index < total {
            return Ok(false);
        }

        let merged = self.take_merged(key);
        if let Some(Value::Object(data)) = msg.get_mut("data") {
            data.insert("data".to_string(), Value::String(merged));
        }
        Ok(true)
    }

    /// File transfer path: metadata and fragments both live in `info.file`.
    fn absorb_file_chunk(&mut self, key: &WaiterKey, msg: &mut Value) -> Result<bool> {
        let Some(file_info) = nested(msg, &["info", "file"]) else {
            return Ok(true);
        };
        // Firmware versions disagree on sending enable_chunking here; the
        // presence of chunk coordinates is treated as equivalent.
        let chunked = file_info.get("enable_chunking").and_then(Value::as_bool) == Some(true)
            || (file_info.get("chunk_index").is_some()
                && file_info.get("total_chunk_num").is_some());
        if !chunked {
            return Ok(true);
        }
        let (index, total) = chunk_position(file_info)?;

        let fragment = fragment_bytes(file_info.get("data"));
        self.buffer_fragment(key, fragment)?;
        if index < total {
            return Ok(false);
        }

        let merged = self.take_merged(key);
        if let Some(Value::Object(file)) = nested_mut(msg, &["info", "file"]) {
            file.insert("data".to_string(), Value::String(merged));
        }
        Ok(true)
    }

    /// Append a fragment under the key; an overflowing stream drops the
    /// whole buffer.
    fn buffer_fragment(&mut self, key: &WaiterKey, fragment: Vec<u8>) -> Result<()> {
        let buffer = self.chunks.entry(key.clone()).or_default();
        if buffer.bytes + fragment.len() > MAX_CHUNK_BYTES {
            self.chunks.remove(key);
            return Err(DriverError::InvalidChunk(format!(
                "chunk buffer exceeded {MAX_CHUNK_BYTES} bytes"
            )));
        }
        buffer.bytes += fragment.len();
        buffer.parts.push(fragment);
        Ok(())
    }

    fn take_merged(&mut self, key: &WaiterKey) -> String {
        let merged = self
            .chunks
            .remove(key)
            .map(|buffer| buffer.parts.concat())
            .unwrap_or_default();
        String::from_utf8_lossy(&merged).into_owned()
    }

    /// Drop all state; pending waiters observe the closed channel.
    pub(crate) fn close(&mut self) {
        self.waiters.clear();
        self.chunks.clear();
    }

    #[cfg(test)]
    fn buffered_bytes(&self, key: &WaiterKey) -> usize {
        self.chunks.get(key).map(|b| b.bytes).unwrap_or(0)
    }
}

fn chunk_position(info: &Value) -> Result<(u64, u64)> {
    let total = info
        .get("total_chunk_num")
        .and_then(Value::as_u64)
        .filter(|&t| t > 0)
        .ok_or_else(|| {
            DriverError::InvalidChunk("total_chunk_num missing or zero".to_string())
        })?;
    let index = info
        .get("chunk_index")
        .and_then(Value::as_u64)
        .ok_or_else(|| DriverError::InvalidChunk("chunk_index missing".to_string()))?;
    Ok((index, total))
}

fn fragment_bytes(value: Option<&Value>) -> Vec<u8> {
    match value {
        Some(Value::String(s)) => s.clone().into_bytes(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => other.to_string().into_bytes(),
    }
}

fn nested_mut<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    path.iter().try_fold(value, |v, key| v.get_mut(key))
}
