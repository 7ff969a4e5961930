//! Frame Source Adapter
//!
//! Acquires raw image samples for the live detection pipeline and hands them
//! out as encoded payloads ready for transport. Supports:
//! - A camera stand-in producing test-pattern frames (development, tests)
//! - Still images read from a file or a directory of files

pub mod frame;
pub mod source;

pub use frame::{EncodedFrame, ImageEncoding, VideoFrame};
pub use source::{FileSequenceSource, FrameSource, SyntheticCamera};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Frame acquisition error types
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open frame source: {0}")]
    Open(String),

    #[error("Failed to read frame: {0}")]
    Read(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Frame source not opened")]
    NotOpened,
}

/// Kind of frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live camera
    Camera,
    /// Image file or directory of image files
    File,
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source kind
    pub kind: SourceKind,
    /// Image file or directory (file sources only)
    pub path: Option<PathBuf>,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Encoding used for outbound frames
    pub encoding: ImageEncoding,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Camera,
            path: None,
            width: 640,
            height: 480,
            encoding: ImageEncoding::Jpeg,
        }
    }
}

impl SourceConfig {
    /// Build the configured source
    pub fn build(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        match self.kind {
            SourceKind::Camera => Ok(Box::new(SyntheticCamera::new(
                self.width,
                self.height,
                self.encoding,
            ))),
            SourceKind::File => {
                let path = self.path.clone().ok_or_else(|| {
                    CaptureError::Open("file source requires a path".to_string())
                })?;
                Ok(Box::new(FileSequenceSource::new(path)))
            }
        }
    }
}
