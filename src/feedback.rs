// CLASSIFICATION: COMMUNITY
// Filename: feedback.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Feedback boundary: what the pipeline reports for each accepted toggle,
//! and where triggering frames are saved.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use log::info;
use sha2::{Digest, Sha256};

use crate::camera::Frame;
use crate::store::EventType;

/// Emitted once per accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub identity: String,
    pub display_name: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn message(&self) -> &'static str {
        match self.event_type {
            EventType::Login => "Logged In",
            EventType::Logout => "Logged Out",
        }
    }
}

/// Consumer of feedback, typically a display.
pub trait FeedbackSink {
    fn emit(&mut self, feedback: &Feedback);
}

/// Prints one line per transition to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl FeedbackSink for ConsoleSink {
    fn emit(&mut self, feedback: &Feedback) {
        println!(
            "[{}] {} ({}) {}",
            feedback.timestamp.to_rfc3339(),
            feedback.display_name,
            feedback.identity,
            feedback.message()
        );
    }
}

/// Sends transitions to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl FeedbackSink for LogSink {
    fn emit(&mut self, feedback: &Feedback) {
        info!(
            "{} {} at {}",
            feedback.identity,
            feedback.event_type,
            feedback.timestamp.to_rfc3339()
        );
    }
}

/// Collects feedback in memory.
impl FeedbackSink for Vec<Feedback> {
    fn emit(&mut self, feedback: &Feedback) {
        self.push(feedback.clone());
    }
}

/// Saves the frame behind each transition as a JPEG.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a snapshot for `identity` at `ts` is written to.
    ///
    /// The name carries a short digest of the raw identity, so identities
    /// that sanitize to the same text still get distinct files.
    pub fn path_for(&self, identity: &str, ts: DateTime<Utc>) -> PathBuf {
        let safe: String = identity.chars().map(file_safe).collect();
        let digest = Sha256::digest(identity.as_bytes());
        let tag = hex::encode(&digest[..4]);
        self.dir.join(format!("{safe}-{tag}-{}.jpg", ts.timestamp_millis()))
    }

    pub fn write(&self, path: &Path, frame: &Frame) -> Result<(), image::ImageError> {
        fs::create_dir_all(&self.dir)?;
        let out = BufWriter::new(File::create(path)?);
        JpegEncoder::new(out).encode_image(&frame.image.to_rgb8())?;
        Ok(())
    }
}

fn file_safe(c: char) -> char {
    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        c
    } else {
        '_'
    }
}
