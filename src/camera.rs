// CLASSIFICATION: COMMUNITY
// Filename: camera.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Frame sources for the capture loop.
//!
//! A [`FrameSource`] is opened once, polled with [`FrameSource::acquire`]
//! until it runs dry or the loop stops, and released exactly once through
//! [`CameraGuard`]. The V4L2 webcam source is only built with the `webcam`
//! feature; [`DirectorySource`] replays still images from disk.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage};
use log::{debug, info};
use thiserror::Error;

/// Errors raised by a frame source. All of them end the capture loop.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("frame read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("frame decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("camera used before open")]
    NotOpen,
    #[error("unsupported capture format: {0}")]
    Unsupported(String),
}

/// One captured image plus the time it was taken.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub timestamp: DateTime<Utc>,
    /// Position of the frame in its stream, starting at zero.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: DynamicImage, timestamp: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            image,
            timestamp,
            sequence,
        }
    }

    /// Greyscale copy used for code detection.
    pub fn luma(&self) -> GrayImage {
        self.image.to_luma8()
    }
}

/// A camera-like producer of frames.
pub trait FrameSource {
    /// Acquire the underlying device.
    fn open(&mut self) -> Result<(), CameraError>;

    /// Block until the next frame is available. `Ok(None)` means the
    /// stream has ended.
    fn acquire(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Release the device. Calling this more than once is harmless.
    fn release(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<(), CameraError> {
        (**self).open()
    }

    fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
        (**self).acquire()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Owns an opened source and releases it when dropped.
pub struct CameraGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> CameraGuard<S> {
    /// Open `source`. If opening fails the source is released before the
    /// error is returned.
    pub fn open(mut source: S) -> Result<Self, CameraError> {
        if let Err(e) = source.open() {
            source.release();
            return Err(e);
        }
        Ok(Self { source })
    }

    pub fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
        self.source.acquire()
    }
}

impl<S: FrameSource> Drop for CameraGuard<S> {
    fn drop(&mut self) {
        self.source.release();
        debug!("camera released");
    }
}

#[derive(Debug, Clone)]
enum FrameClock {
    Wall,
    Fixed {
        next: DateTime<Utc>,
        step: chrono::Duration,
    },
}

/// Replays `.jpg`, `.jpeg` and `.png` files from a directory in name order.
#[derive(Debug)]
pub struct DirectorySource {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
    clock: FrameClock,
    sequence: u64,
    opened: bool,
}

impl DirectorySource {
    /// Frames are stamped with the wall clock at the time they are read.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: VecDeque::new(),
            clock: FrameClock::Wall,
            sequence: 0,
            opened: false,
        }
    }

    /// Stamp frames starting at `start`, `step` apart.
    pub fn with_fixed_clock(mut self, start: DateTime<Utc>, step: chrono::Duration) -> Self {
        self.clock = FrameClock::Fixed { next: start, step };
        self
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false)
    }

    fn stamp(&mut self) -> DateTime<Utc> {
        match &mut self.clock {
            FrameClock::Wall => Utc::now(),
            FrameClock::Fixed { next, step } => {
                let ts = *next;
                *next = ts + *step;
                ts
            }
        }
    }
}

impl FrameSource for DirectorySource {
    fn open(&mut self) -> Result<(), CameraError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| CameraError::Open {
            device: self.dir.display().to_string(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if Self::is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        info!("replaying {} frames from {}", files.len(), self.dir.display());
        self.pending = files.into();
        self.opened = true;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpen);
        }
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)?;
        let frame = Frame::new(image, self.stamp(), self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.pending.clear();
        self.opened = false;
    }
}

#[cfg(feature = "webcam")]
pub use self::v4l_source::V4lCamera;

#[cfg(feature = "webcam")]
mod v4l_source {
    use super::{CameraError, Frame, FrameSource};
    use chrono::Utc;
    use log::info;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::prelude::*;
    use v4l::video::Capture;
    use v4l::FourCC;

    /// USB webcam read through V4L2 in MJPEG mode.
    pub struct V4lCamera {
        index: usize,
        // Declared before `device` so the stream is dropped first.
        stream: Option<Stream<'static>>,
        device: Option<Device>,
        sequence: u64,
    }

    impl V4lCamera {
        pub fn new(index: usize) -> Self {
            Self {
                index,
                stream: None,
                device: None,
                sequence: 0,
            }
        }
    }

    impl FrameSource for V4lCamera {
        fn open(&mut self) -> Result<(), CameraError> {
            let path = format!("/dev/video{}", self.index);
            let dev = Device::new(self.index).map_err(|source| CameraError::Open {
                device: path.clone(),
                source,
            })?;
            let mut fmt = dev.format()?;
            fmt.fourcc = FourCC::new(b"MJPG");
            let fmt = dev.set_format(&fmt)?;
            if fmt.fourcc != FourCC::new(b"MJPG") {
                return Err(CameraError::Unsupported(fmt.fourcc.to_string()));
            }
            let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)?;
            info!("{path} opened at {}x{}", fmt.width, fmt.height);
            self.stream = Some(stream);
            self.device = Some(dev);
            Ok(())
        }

        fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
            let stream = self.stream.as_mut().ok_or(CameraError::NotOpen)?;
            let (data, _) = stream.next()?;
            let image = image::load_from_memory(data)?;
            let frame = Frame::new(image, Utc::now(), self.sequence);
            self.sequence += 1;
            Ok(Some(frame))
        }

        fn release(&mut self) {
            if self.stream.take().is_some() {
                info!("/dev/video{} released", self.index);
            }
            self.device = None;
        }
    }
}
