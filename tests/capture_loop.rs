// CLASSIFICATION: COMMUNITY
// Filename: capture_loop.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, GrayImage, Luma};
use qrlogin::camera::{CameraError, Frame, FrameSource};
use qrlogin::decoder::{CodeDecoder, DetectedCode, Geometry};
use qrlogin::feedback::{Feedback, SnapshotWriter};
use qrlogin::store::StoreError;
use qrlogin::{
    CaptureError, CaptureLoop, EventRecord, EventType, SessionState, SessionStatus,
    SessionStore, SqliteSessionStore, ToggleEngine, UserDirectory, UserRecord,
};
use tempfile::tempdir;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_689_700_000 + secs, 0).unwrap()
}

/// Yields `frames` frames one second apart, then either ends or fails.
struct ScriptedCamera {
    frames: u64,
    fail_at_end: bool,
    next: u64,
    releases: Arc<AtomicUsize>,
    stop_after: Option<(u64, Arc<AtomicBool>)>,
}

impl ScriptedCamera {
    fn new(frames: u64, releases: Arc<AtomicUsize>) -> Self {
        Self {
            frames,
            fail_at_end: false,
            next: 0,
            releases,
            stop_after: None,
        }
    }
}

impl FrameSource for ScriptedCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.next >= self.frames {
            if self.fail_at_end {
                return Err(CameraError::Read(std::io::Error::other("unplugged")));
            }
            return Ok(None);
        }
        let img = GrayImage::from_pixel(4, 4, Luma([128]));
        let frame = Frame::new(DynamicImage::ImageLuma8(img), t(self.next as i64), self.next);
        self.next += 1;
        if let Some((n, flag)) = &self.stop_after {
            if self.next >= *n {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns a fixed list of payloads per frame.
struct ScriptedDecoder {
    per_frame: VecDeque<Vec<&'static str>>,
}

impl ScriptedDecoder {
    fn new(per_frame: Vec<Vec<&'static str>>) -> Self {
        Self {
            per_frame: per_frame.into(),
        }
    }
}

impl CodeDecoder for ScriptedDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<DetectedCode> {
        self.per_frame
            .pop_front()
            .unwrap_or_default()
            .into_iter()
            .map(|p| DetectedCode {
                payload: p.to_string(),
                geometry: Geometry::from_corners([(0, 0), (1, 0), (1, 1), (0, 1)]),
                frame_ts: frame.timestamp,
            })
            .collect()
    }
}

fn directory() -> UserDirectory {
    [UserRecord {
        identity: "alice".into(),
        display_name: "Alice".into(),
        access_code: "ABC123".into(),
        email: Some("alice@example.com".into()),
    }]
    .into_iter()
    .collect()
}

fn engine() -> ToggleEngine<UserDirectory, SqliteSessionStore> {
    ToggleEngine::new(directory(), SqliteSessionStore::open_in_memory().unwrap())
}

#[test]
fn runs_to_end_of_stream_and_reports_feedback() {
    let releases = Arc::new(AtomicUsize::new(0));
    let decoder = ScriptedDecoder::new(vec![
        vec!["ABC123", "ABC123"],
        vec!["ABC123"],
        vec![],
        vec!["ZZZ999"],
        vec!["ABC123"],
    ]);
    let mut capture = CaptureLoop::new(decoder, engine(), Vec::<Feedback>::new());
    let stop = AtomicBool::new(false);

    let summary = capture
        .run(ScriptedCamera::new(5, releases.clone()), &stop)
        .unwrap();

    assert_eq!(summary.frames, 5);
    assert_eq!(summary.detections, 5);
    assert_eq!(summary.transitions, 2);
    assert_eq!(summary.debounced, 1);
    assert_eq!(summary.unknown, 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    let kinds: Vec<_> = capture.sink().iter().map(|f| f.event_type).collect();
    assert_eq!(kinds, vec![EventType::Login, EventType::Logout]);
    assert_eq!(capture.sink()[0].display_name, "Alice");
    assert_eq!(capture.sink()[1].timestamp, t(4));
}

#[test]
fn camera_failure_is_fatal_and_releases() {
    let releases = Arc::new(AtomicUsize::new(0));
    let mut cam = ScriptedCamera::new(2, releases.clone());
    cam.fail_at_end = true;
    let mut capture =
        CaptureLoop::new(ScriptedDecoder::new(vec![]), engine(), Vec::<Feedback>::new());

    let err = capture.run(cam, &AtomicBool::new(false)).unwrap_err();
    assert!(matches!(err, CaptureError::Camera(CameraError::Read(_))));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_flag_is_checked_between_frames() {
    let releases = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let mut cam = ScriptedCamera::new(100, releases.clone());
    cam.stop_after = Some((3, stop.clone()));
    let mut capture =
        CaptureLoop::new(ScriptedDecoder::new(vec![]), engine(), Vec::<Feedback>::new());

    let summary = capture.run(cam, &stop).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn max_frames_bounds_the_run() {
    let releases = Arc::new(AtomicUsize::new(0));
    let mut capture =
        CaptureLoop::new(ScriptedDecoder::new(vec![]), engine(), Vec::<Feedback>::new())
            .with_max_frames(4);
    let summary = capture
        .run(ScriptedCamera::new(100, releases.clone()), &AtomicBool::new(false))
        .unwrap();
    assert_eq!(summary.frames, 4);
}

/// Fails the first `failures` writes, then behaves like an in-memory store.
struct FlakyStore {
    failures: u32,
    inner: SqliteSessionStore,
}

impl SessionStore for FlakyStore {
    fn get_status(&self, identity: &str) -> Result<SessionState, StoreError> {
        self.inner.get_status(identity)
    }

    fn apply_transition(
        &mut self,
        identity: &str,
        new_status: SessionStatus,
        timestamp: DateTime<Utc>,
        snapshot: Option<&Path>,
    ) -> Result<EventRecord, StoreError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(StoreError::Corrupt("database is locked".into()));
        }
        self.inner
            .apply_transition(identity, new_status, timestamp, snapshot)
    }

    fn touch_last_seen(&mut self, identity: &str, ts: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.touch_last_seen(identity, ts)
    }
}

fn flaky_engine(failures: u32) -> ToggleEngine<UserDirectory, FlakyStore> {
    ToggleEngine::new(
        directory(),
        FlakyStore {
            failures,
            inner: SqliteSessionStore::open_in_memory().unwrap(),
        },
    )
}

#[test]
fn single_store_failure_does_not_stop_the_loop() {
    let releases = Arc::new(AtomicUsize::new(0));
    let decoder = ScriptedDecoder::new(vec![vec!["ABC123"], vec!["ABC123"]]);
    let mut capture = CaptureLoop::new(decoder, flaky_engine(1), Vec::<Feedback>::new());

    let summary = capture
        .run(ScriptedCamera::new(2, releases.clone()), &AtomicBool::new(false))
        .unwrap();
    assert_eq!(summary.store_failures, 1);
    assert_eq!(summary.transitions, 1);
    assert_eq!(capture.sink()[0].timestamp, t(1));
}

#[test]
fn repeated_store_failures_end_the_loop() {
    let releases = Arc::new(AtomicUsize::new(0));
    let decoder = ScriptedDecoder::new(vec![vec!["ABC123"]; 10]);
    let mut capture = CaptureLoop::new(decoder, flaky_engine(100), Vec::<Feedback>::new())
        .with_max_store_failures(3);

    let err = capture
        .run(ScriptedCamera::new(10, releases.clone()), &AtomicBool::new(false))
        .unwrap_err();
    assert!(matches!(err, CaptureError::StoreUnavailable { failures: 3, .. }));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_codes_do_not_mask_a_failing_store() {
    let releases = Arc::new(AtomicUsize::new(0));
    let decoder = ScriptedDecoder::new(vec![vec!["ABC123", "ZZZ999"]; 50]);
    let mut capture = CaptureLoop::new(decoder, flaky_engine(1_000), Vec::<Feedback>::new())
        .with_max_store_failures(3);

    let err = capture
        .run(ScriptedCamera::new(50, releases.clone()), &AtomicBool::new(false))
        .unwrap_err();
    assert!(matches!(err, CaptureError::StoreUnavailable { failures: 3, .. }));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(capture.sink().is_empty());
}

#[test]
fn snapshot_is_saved_and_referenced() {
    let dir = tempdir().unwrap();
    let snaps = dir.path().join("log_images");
    let releases = Arc::new(AtomicUsize::new(0));
    let decoder = ScriptedDecoder::new(vec![vec!["ABC123"]]);
    let engine = engine().with_snapshots(SnapshotWriter::new(&snaps));
    let mut capture = CaptureLoop::new(decoder, engine, Vec::<Feedback>::new());

    capture
        .run(ScriptedCamera::new(1, releases), &AtomicBool::new(false))
        .unwrap();

    let events = capture.engine().store().events_for("alice").unwrap();
    let snapshot = events[0].snapshot.clone().unwrap();
    assert!(snapshot.starts_with(&snaps));
    assert!(snapshot.exists());
}
