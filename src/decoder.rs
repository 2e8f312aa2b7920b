// CLASSIFICATION: COMMUNITY
// Filename: decoder.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! QR detection over captured frames.
//!
//! Decoding is best effort. Grids that cannot be read are dropped and the
//! next frame acts as the retry.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::debug;

use crate::camera::Frame;

/// Axis-aligned box around a detected code, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Where a code was found. Only used for overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Corner points as reported by the detector.
    pub corners: [(i32, i32); 4],
}

impl Geometry {
    pub fn from_corners(corners: [(i32, i32); 4]) -> Self {
        Self { corners }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let xs = self.corners.iter().map(|c| c.0);
        let ys = self.corners.iter().map(|c| c.1);
        let (min_x, max_x) = (xs.clone().min().unwrap_or(0), xs.max().unwrap_or(0));
        let (min_y, max_y) = (ys.clone().min().unwrap_or(0), ys.max().unwrap_or(0));
        BoundingBox {
            x: min_x,
            y: min_y,
            width: min_x.abs_diff(max_x),
            height: min_y.abs_diff(max_y),
        }
    }
}

/// One decoded payload seen in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCode {
    pub payload: String,
    pub geometry: Geometry,
    pub frame_ts: DateTime<Utc>,
}

/// Turns a frame into the codes visible in it.
pub trait CodeDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<DetectedCode>;
}

/// [`CodeDecoder`] backed by `rqrr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl CodeDecoder for QrDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<DetectedCode> {
        let luma = frame.luma();
        let (w, h) = luma.dimensions();
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            w as usize,
            h as usize,
            |x, y| luma.get_pixel(x as u32, y as u32)[0],
        );
        let mut found = Vec::new();
        for grid in prepared.detect_grids() {
            let b = &grid.bounds;
            let corners = [
                (b[0].x, b[0].y),
                (b[1].x, b[1].y),
                (b[2].x, b[2].y),
                (b[3].x, b[3].y),
            ];
            match grid.decode() {
                Ok((_, payload)) => found.push(DetectedCode {
                    payload,
                    geometry: Geometry::from_corners(corners),
                    frame_ts: frame.timestamp,
                }),
                Err(e) => debug!("frame {}: unreadable grid: {e:?}", frame.sequence),
            }
        }
        found
    }
}

/// Keep the first detection of each payload, preserving order.
///
/// A single code can be reported more than once per frame; without this a
/// frame could toggle the same user twice.
pub fn dedup_batch(detections: Vec<DetectedCode>) -> Vec<DetectedCode> {
    let mut seen = HashSet::new();
    detections
        .into_iter()
        .filter(|d| seen.insert(d.payload.clone()))
        .collect()
}
