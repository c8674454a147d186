//! Decoded video frames

use crate::geometry::Rect;
use crate::FusionError;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Receive timestamp (nanoseconds since the Unix epoch)
    pub timestamp_ns: u64,
    /// Per-session frame sequence number
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Blank frame of the given size, for detector-only pipelines and tests
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(vec![0; (width * height * 3) as usize], width, height, 0, 0)
    }

    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame
    pub fn decode(bytes: &[u8], sequence: u64) -> Result<Self, FusionError> {
        if bytes.is_empty() {
            return Err(FusionError::Decode("empty frame".into()));
        }

        let img = image::load_from_memory(bytes).map_err(|e| FusionError::Decode(e.to_string()))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(FusionError::Decode("zero-sized frame".into()));
        }

        let timestamp_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Ok(Self {
            data: rgb.into_raw(),
            width,
            height,
            timestamp_ns,
            sequence,
        })
    }

    /// Frame area in pixels, never less than 1
    pub fn area(&self) -> f32 {
        (self.width as f32 * self.height as f32).max(1.0)
    }

    /// Pixel rectangle for a region given as fractions of the frame size
    pub fn fractional_rect(&self, left: f32, top: f32, right: f32, bottom: f32) -> Rect {
        let (w, h) = (self.width as f32, self.height as f32);
        Rect::new(
            (w * left).floor(),
            (h * top).floor(),
            (w * right).floor(),
            (h * bottom).floor(),
        )
    }
}
