//! Binary data-channel frame codec.
//!
//! Every binary frame opens with two little-endian u16 words:
//!
//! ```text
//! LiDAR frame  (words == (2, 0)):
//!   [0..4]    magic words 2, 0
//!   [4..8]    header_length (u32)
//!   [8..12]   payload_length (u32, not used for routing)
//!   [12..]    json_header[header_length] | compressed_payload
//!
//! Normal frame (any other words):
//!   [0..2]    header_length (u16)
//!   [2..4]    reserved (u16)
//!   [4..]     json_header[header_length] | compressed_payload
//! ```
//!
//! The JSON header carries the envelope; the payload is handed to the
//! LiDAR decoder without copying.

use serde_json::Value;

/// Leading word pair that routes a frame to the LiDAR path.
pub const LIDAR_MAGIC: (u16, u16) = (2, 0);

const LIDAR_PREFIX: usize = 12;
const NORMAL_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Normal,
    Lidar,
}

/// A parsed binary frame. The payload borrows from the inbound buffer.
#[derive(Debug)]
pub struct BinaryFrame<'a> {
    pub kind: FrameKind,
    pub header: Value,
    pub payload: &'a [u8],
}

impl<'a> BinaryFrame<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, FrameError> {
        if buf.len() < NORMAL_PREFIX {
            return Err(FrameError::TooShort(buf.len()));
        }
        let w0 = u16::from_le_bytes([buf[0], buf[1]]);
        let w1 = u16::from_le_bytes([buf[2], buf[3]]);
        if (w0, w1) == LIDAR_MAGIC {
            Self::parse_lidar(buf)
        } else {
            Self::parse_normal(buf, w0 as usize)
        }
    }

    fn parse_lidar(buf: &'a [u8]) -> Result<Self, FrameError> {
        if buf.len() < LIDAR_PREFIX {
            return Err(FrameError::TooShort(buf.len()));
        }
        let header_length = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let end = LIDAR_PREFIX
            .checked_add(header_length)
            .ok_or(FrameError::HeaderOverrun {
                header_length,
                available: buf.len() - LIDAR_PREFIX,
            })?;
        if end > buf.len() {
            return Err(FrameError::HeaderOverrun {
                header_length,
                available: buf.len() - LIDAR_PREFIX,
            });
        }
        let header = serde_json::from_slice(&buf[LIDAR_PREFIX..end])?;
        Ok(Self {
            kind: FrameKind::Lidar,
            header,
            payload: &buf[end..],
        })
    }

    fn parse_normal(buf: &'a [u8], header_length: usize) -> Result<Self, FrameError> {
        let end = NORMAL_PREFIX + header_length;
        if end > buf.len() {
            return Err(FrameError::HeaderOverrun {
                header_length,
                available: buf.len() - NORMAL_PREFIX,
            });
        }
        let header = serde_json::from_slice(&buf[NORMAL_PREFIX..end])?;
        Ok(Self {
            kind: FrameKind::Normal,
            header,
            payload: &buf[end..],
        })
    }
}

/// Serialize a LiDAR frame (magic (2, 0), u32 header length).
pub fn encode_lidar_frame(header: &Value, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(header)?;
    let mut buf = Vec::with_capacity(LIDAR_PREFIX + json.len() + payload.len());
    buf.extend_from_slice(&LIDAR_MAGIC.0.to_le_bytes());
    buf.extend_from_slice(&LIDAR_MAGIC.1.to_le_bytes());
    buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Serialize a normal frame (u16 header length doubles as the first word).
pub fn encode_normal_frame(header: &Value, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(header)?;
    let mut buf = Vec::with_capacity(NORMAL_PREFIX + json.len() + payload.len());
    buf.extend_from_slice(&(json.len() as u16).to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: {0} bytes")]
    TooShort(usize),
    #[error("header length {header_length} exceeds remaining buffer ({available} bytes)")]
    HeaderOverrun {
        header_length: usize,
        available: usize,
    },
    #[error("header is not valid JSON: {0}")]
    BadHeaderJson(#[from] serde_json::Error),
}
