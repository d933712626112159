//! LiDAR voxel decoding behind a pluggable interface.
//!
//! The codec hands every compressed payload plus its JSON metadata to the
//! selected backend and substitutes the decoded result into the message
//! before delivery. Hosts treat the decoded payload as opaque structured
//! data whose shape depends on the backend.

use serde_json::{Value, json};

use crate::error::{DriverError, Result};

/// A voxel payload decoder.
pub trait LidarDecoder: Send + Sync {
    fn name(&self) -> &'static str;
    /// Turn a compressed payload and its metadata into point data.
    fn decode(&self, compressed: &[u8], metadata: &Value) -> Result<Value>;
}

/// Backend selector; the names are part of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    LibVoxel,
    Native,
}

impl DecoderKind {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "libvoxel" => Ok(DecoderKind::LibVoxel),
            "native" => Ok(DecoderKind::Native),
            other => Err(DriverError::Config(format!(
                "unknown decoder '{other}', expected 'libvoxel' or 'native'"
            ))),
        }
    }

    pub fn build(self) -> Box<dyn LidarDecoder> {
        match self {
            DecoderKind::LibVoxel => Box::new(LibVoxelDecoder),
            DecoderKind::Native => Box::new(NativeDecoder),
        }
    }
}

/// Grid geometry pulled out of the frame metadata.
struct Geometry {
    resolution: f64,
    origin: [f64; 3],
}

impl Geometry {
    fn from_metadata(metadata: &Value) -> Self {
        let resolution = metadata
            .get("resolution")
            .and_then(Value::as_f64)
            .unwrap_or(0.05);
        let mut origin = [0.0; 3];
        if let Some(values) = metadata.get("origin").and_then(Value::as_array) {
            for (slot, value) in origin.iter_mut().zip(values) {
                *slot = value.as_f64().unwrap_or(0.0);
            }
        }
        Self { resolution, origin }
    }

    fn point(&self, index: &[u8; 3]) -> [f64; 3] {
        [
            self.origin[0] + index[0] as f64 * self.resolution,
            self.origin[1] + index[1] as f64 * self.resolution,
            self.origin[2] + index[2] as f64 * self.resolution,
        ]
    }
}

/// Voxel payloads pack one occupied cell per 3-byte grid index triple.
fn decode_cells(compressed: &[u8], geometry: &Geometry) -> Vec<[f64; 3]> {
    compressed
        .chunks_exact(3)
        .map(|cell| geometry.point(&[cell[0], cell[1], cell[2]]))
        .collect()
}

/// Flat `positions` array, the layout the vendor's libvoxel module emits.
pub struct LibVoxelDecoder;

impl LidarDecoder for LibVoxelDecoder {
    fn name(&self) -> &'static str {
        "libvoxel"
    }

    fn decode(&self, compressed: &[u8], metadata: &Value) -> Result<Value> {
        let geometry = Geometry::from_metadata(metadata);
        let cells = decode_cells(compressed, &geometry);
        let positions: Vec<f64> = cells.iter().flatten().copied().collect();
        Ok(json!({
            "point_count": cells.len(),
            "positions": positions,
        }))
    }
}

/// Structured point triples.
pub struct NativeDecoder;

impl LidarDecoder for NativeDecoder {
    fn name(&self) -> &'static str {
        "native"
    }

    fn decode(&self, compressed: &[u8], metadata: &Value) -> Result<Value> {
        let geometry = Geometry::from_metadata(metadata);
        let cells = decode_cells(compressed, &geometry);
        Ok(json!({
            "point_count": cells.len(),
            "points": cells,
        }))
    }
}
