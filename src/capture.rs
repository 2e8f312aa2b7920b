// CLASSIFICATION: COMMUNITY
// Filename: capture.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Capture loop driving frames through decoding and the toggle engine.
//!
//! The loop is strictly sequential: one frame is fully processed before the
//! next is acquired, which keeps debounce timing in frame order. The stop
//! flag is checked once per iteration; an in-flight decode or store write is
//! never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use thiserror::Error;

use crate::camera::{CameraError, CameraGuard, FrameSource};
use crate::decoder::CodeDecoder;
use crate::engine::{Decision, ToggleEngine};
use crate::feedback::FeedbackSink;
use crate::registry::CodeRegistry;
use crate::store::{SessionStore, StoreError};

/// Errors that end the capture loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera failure: {0}")]
    Camera(#[from] CameraError),
    #[error("session store unavailable after {failures} consecutive failures: {last}")]
    StoreUnavailable {
        failures: u32,
        #[source]
        last: StoreError,
    },
}

/// Counters for one run of the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub detections: u64,
    pub transitions: u64,
    pub unknown: u64,
    pub debounced: u64,
    pub store_failures: u64,
}

pub struct CaptureLoop<D, R, S, F> {
    decoder: D,
    engine: ToggleEngine<R, S>,
    sink: F,
    max_store_failures: u32,
    max_frames: Option<u64>,
}

impl<D, R, S, F> CaptureLoop<D, R, S, F>
where
    D: CodeDecoder,
    R: CodeRegistry,
    S: SessionStore,
    F: FeedbackSink,
{
    pub fn new(decoder: D, engine: ToggleEngine<R, S>, sink: F) -> Self {
        Self {
            decoder,
            engine,
            sink,
            max_store_failures: 5,
            max_frames: None,
        }
    }

    /// Stop after this many consecutive store failures. Zero is treated as one.
    pub fn with_max_store_failures(mut self, n: u32) -> Self {
        self.max_store_failures = n.max(1);
        self
    }

    /// Stop after `n` frames.
    pub fn with_max_frames(mut self, n: u64) -> Self {
        self.max_frames = Some(n);
        self
    }

    pub fn engine(&self) -> &ToggleEngine<R, S> {
        &self.engine
    }

    pub fn sink(&self) -> &F {
        &self.sink
    }

    /// Run until `stop` is set, the source ends, or a fatal error occurs.
    /// The source is released on every exit path.
    pub fn run<C: FrameSource>(
        &mut self,
        source: C,
        stop: &AtomicBool,
    ) -> Result<LoopSummary, CaptureError> {
        let mut camera = match CameraGuard::open(source) {
            Ok(camera) => camera,
            Err(e) => {
                error!("camera could not be opened: {e}");
                return Err(e.into());
            }
        };
        let mut summary = LoopSummary::default();
        let mut consecutive_failures = 0u32;
        info!("capture loop started");

        while !stop.load(Ordering::SeqCst) {
            if self.max_frames.is_some_and(|max| summary.frames >= max) {
                break;
            }
            let frame = match camera.acquire() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("frame source exhausted");
                    break;
                }
                Err(e) => {
                    error!("frame acquisition failed: {e}");
                    return Err(e.into());
                }
            };
            summary.frames += 1;

            let detections = self.decoder.decode(&frame);
            summary.detections += detections.len() as u64;
            if detections.is_empty() {
                continue;
            }

            for outcome in self.engine.process_batch(detections, Some(&frame)) {
                match outcome {
                    // Unknown codes never reach the store.
                    Ok(Decision::UnknownCode) => summary.unknown += 1,
                    Ok(Decision::Debounced { .. }) => {
                        consecutive_failures = 0;
                        summary.debounced += 1;
                    }
                    Ok(Decision::Toggled(t)) => {
                        consecutive_failures = 0;
                        summary.transitions += 1;
                        self.sink.emit(&t.feedback());
                    }
                    Err(e) => {
                        summary.store_failures += 1;
                        consecutive_failures += 1;
                        warn!("detection dropped, store failure {consecutive_failures}: {e}");
                        if consecutive_failures >= self.max_store_failures {
                            error!("giving up on session store");
                            return Err(CaptureError::StoreUnavailable {
                                failures: consecutive_failures,
                                last: e,
                            });
                        }
                    }
                }
            }
        }

        info!(
            "capture loop stopped after {} frames, {} transitions",
            summary.frames, summary.transitions
        );
        Ok(summary)
    }
}
