//! Frame sources

use crate::frame::{EncodedFrame, ImageEncoding, VideoFrame};
use crate::CaptureError;
use chrono::Utc;
use image::ImageFormat;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Source of encoded frames for the sampling loop.
///
/// Capture is expected to be cheap and non-blocking; sources that touch the
/// filesystem do their I/O in `open`.
pub trait FrameSource: Send {
    /// Acquire whatever resources the source needs
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Produce one encoded frame
    fn capture(&mut self) -> Result<EncodedFrame, CaptureError>;

    /// Release resources. Safe to call when not open.
    fn release(&mut self);

    /// Whether the source is currently open
    fn is_open(&self) -> bool;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn capture(&mut self) -> Result<EncodedFrame, CaptureError> {
        (**self).capture()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Camera stand-in producing a moving test pattern
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    encoding: ImageEncoding,
    sequence: u32,
    open: bool,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, encoding: ImageEncoding) -> Self {
        Self {
            width,
            height,
            encoding,
            sequence: 0,
            open: false,
        }
    }

    fn render(&self) -> VideoFrame {
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        let shift = self.sequence.wrapping_mul(7);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x.wrapping_add(shift) & 0xFF) as u8);
                data.push((y & 0xFF) as u8);
                data.push(((x ^ y) & 0xFF) as u8);
            }
        }
        VideoFrame::new(data, self.width, self.height, self.sequence)
    }
}

impl FrameSource for SyntheticCamera {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Open(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if !self.open {
            info!("Opening synthetic camera {}x{}", self.width, self.height);
            self.open = true;
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<EncodedFrame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpened);
        }
        let frame = self.render().encode(self.encoding)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn release(&mut self) {
        if self.open {
            info!("Releasing synthetic camera");
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// A still image, or a directory of images served in name order
struct LoadedImage {
    bytes: Vec<u8>,
    encoding: ImageEncoding,
    width: u32,
    height: u32,
}

/// Serves image files from disk, cycling through them
pub struct FileSequenceSource {
    path: PathBuf,
    images: Vec<LoadedImage>,
    cursor: usize,
}

impl FileSequenceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            images: Vec::new(),
            cursor: 0,
        }
    }

    /// Number of images loaded
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn load(path: &PathBuf) -> Result<LoadedImage, CaptureError> {
        let bytes = std::fs::read(path)
            .map_err(|e| CaptureError::Read(format!("{}: {}", path.display(), e)))?;

        let encoding = match image::guess_format(&bytes) {
            Ok(ImageFormat::Jpeg) => ImageEncoding::Jpeg,
            Ok(ImageFormat::Png) => ImageEncoding::Png,
            Ok(other) => {
                return Err(CaptureError::Read(format!(
                    "{}: unsupported format {:?}",
                    path.display(),
                    other
                )))
            }
            Err(e) => return Err(CaptureError::Read(format!("{}: {}", path.display(), e))),
        };

        let (width, height) = image::load_from_memory(&bytes)
            .map(|img| (img.width(), img.height()))
            .map_err(|e| CaptureError::Read(format!("{}: {}", path.display(), e)))?;

        Ok(LoadedImage {
            bytes,
            encoding,
            width,
            height,
        })
    }
}

impl FrameSource for FileSequenceSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if !self.images.is_empty() {
            return Ok(());
        }

        let paths = if self.path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.path)
                .map_err(|e| CaptureError::Open(format!("{}: {}", self.path.display(), e)))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            entries
        } else {
            vec![self.path.clone()]
        };

        for path in &paths {
            match Self::load(path) {
                Ok(image) => self.images.push(image),
                // A directory may hold unrelated files; a single path may not.
                Err(e) if paths.len() > 1 => warn!("Skipping {}", e),
                Err(e) => return Err(e),
            }
        }

        if self.images.is_empty() {
            return Err(CaptureError::Open(format!(
                "no images found at {}",
                self.path.display()
            )));
        }

        self.cursor = 0;
        info!("Loaded {} image(s) from {}", self.images.len(), self.path.display());
        Ok(())
    }

    fn capture(&mut self) -> Result<EncodedFrame, CaptureError> {
        if self.images.is_empty() {
            return Err(CaptureError::NotOpened);
        }
        let image = &self.images[self.cursor];
        self.cursor = (self.cursor + 1) % self.images.len();
        debug!("Serving file frame {} of {}", self.cursor, self.images.len());

        Ok(EncodedFrame {
            bytes: image.bytes.clone(),
            encoding: image.encoding,
            width: image.width,
            height: image.height,
            captured_at: Utc::now(),
        })
    }

    fn release(&mut self) {
        if !self.images.is_empty() {
            info!("Releasing file source {}", self.path.display());
            self.images.clear();
            self.cursor = 0;
        }
    }

    fn is_open(&self) -> bool {
        !self.images.is_empty()
    }
}
