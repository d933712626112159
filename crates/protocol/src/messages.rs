use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message kinds carried on the "data" channel.
///
/// The wire strings are fixed by the device firmware; the serde rename
/// produces them exactly (`rtc_inner_req`, `add_error`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Validation,
    Subscribe,
    Unsubscribe,
    Msg,
    Request,
    Response,
    Vid,
    Aud,
    Err,
    Heartbeat,
    RtcInnerReq,
    RtcReport,
    AddError,
    RmError,
    Errors,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Validation => "validation",
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Msg => "msg",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Vid => "vid",
            MessageType::Aud => "aud",
            MessageType::Err => "err",
            MessageType::Heartbeat => "heartbeat",
            MessageType::RtcInnerReq => "rtc_inner_req",
            MessageType::RtcReport => "rtc_report",
            MessageType::AddError => "add_error",
            MessageType::RmError => "rm_error",
            MessageType::Errors => "errors",
        }
    }
}

/// A single outbound JSON envelope.
///
/// `data` is omitted from the serialized form when absent -- the peer
/// rejects envelopes carrying an explicit `"data": null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(kind: MessageType, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            data: None,
        }
    }

    pub fn with_data(kind: MessageType, topic: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            topic: topic.into(),
            data: Some(data),
        }
    }
}

/// Request payload sent as the `data` of a REQUEST envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub header: RequestHeader,
    /// Structured parameters are pre-serialized to a string by the caller.
    pub parameter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    pub identity: RequestIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<RequestPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Client-assigned correlation id, unique within the session.
    pub id: i64,
    pub api_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPolicy {
    pub priority: i32,
}

/// Chunking metadata attached to large inbound payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentInfo {
    #[serde(default)]
    pub enable_chunking: bool,
    /// 1-based; the terminal fragment carries `chunk_index == total_chunk_num`.
    pub chunk_index: Option<u64>,
    pub total_chunk_num: Option<u64>,
}

/// Walk a nested JSON document by key path, `None` on any miss.
pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}
