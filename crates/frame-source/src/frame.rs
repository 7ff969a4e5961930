//! Raw and encoded frame types

use crate::CaptureError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Image encoding for outbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Jpeg,
    Png,
}

impl ImageEncoding {
    fn format(self) -> ImageFormat {
        match self {
            ImageEncoding::Jpeg => ImageFormat::Jpeg,
            ImageEncoding::Png => ImageFormat::Png,
        }
    }

    /// MIME type of the encoded payload
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }
}

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Utc::now(),
            sequence,
        }
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data
            .get(idx..idx + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Resize frame (nearest neighbour)
    pub fn resize(&self, new_width: u32, new_height: u32) -> VideoFrame {
        let mut resized = Vec::with_capacity((new_width * new_height * 3) as usize);

        let x_ratio = self.width as f32 / new_width as f32;
        let y_ratio = self.height as f32 / new_height as f32;

        for y in 0..new_height {
            for x in 0..new_width {
                let src_x = ((x as f32 * x_ratio).floor() as u32).min(self.width.saturating_sub(1));
                let src_y = ((y as f32 * y_ratio).floor() as u32).min(self.height.saturating_sub(1));
                let pixel = self.get_pixel(src_x, src_y).unwrap_or([0, 0, 0]);
                resized.extend_from_slice(&pixel);
            }
        }

        VideoFrame {
            data: resized,
            width: new_width,
            height: new_height,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }

    /// Encode the frame into a compressed image payload
    pub fn encode(&self, encoding: ImageEncoding) -> Result<EncodedFrame, CaptureError> {
        let image = RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| {
                CaptureError::Encode(format!(
                    "buffer of {} bytes does not fit {}x{}",
                    self.data.len(),
                    self.width,
                    self.height
                ))
            })?;

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), encoding.format())
            .map_err(|e| CaptureError::Encode(e.to_string()))?;

        Ok(EncodedFrame {
            bytes,
            encoding,
            width: self.width,
            height: self.height,
            captured_at: self.captured_at,
        })
    }
}

/// Opaque encoded image payload handed to the streaming session
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`
    pub encoding: ImageEncoding,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl EncodedFrame {
    /// Base64 text of the payload, as carried on the wire
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Size of the encoded payload in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 128]);
            }
        }
        VideoFrame::new(data, width, height, 0)
    }

    #[test]
    fn test_get_pixel_bounds() {
        let frame = gradient(4, 4);
        assert_eq!(frame.get_pixel(2, 3), Some([2, 3, 128]));
        assert_eq!(frame.get_pixel(4, 0), None);
    }

    #[test]
    fn test_resize() {
        let frame = gradient(8, 8).resize(4, 2);
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!(frame.get_pixel(1, 1), Some([2, 4, 128]));
    }

    #[test]
    fn test_encode_png_is_decodable() {
        let encoded = gradient(16, 8).encode(ImageEncoding::Png).unwrap();
        assert!(!encoded.is_empty());
        assert_eq!(image::guess_format(&encoded.bytes).unwrap(), ImageFormat::Png);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = VideoFrame::new(vec![0; 10], 16, 16, 0);
        assert!(matches!(
            frame.encode(ImageEncoding::Jpeg),
            Err(CaptureError::Encode(_))
        ));
    }

    #[test]
    fn test_base64_payload() {
        let encoded = EncodedFrame {
            bytes: b"abc".to_vec(),
            encoding: ImageEncoding::Jpeg,
            width: 1,
            height: 1,
            captured_at: Utc::now(),
        };
        assert_eq!(encoded.to_base64(), "YWJj");
    }
}
