// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v1.1
// Date Modified: 2026-10-16
// Author: Lukas Bower

//! QR code login system.
//!
//! Frames from a camera are scanned for QR access codes; each recognised
//! code toggles its owner between logged in and logged out, with a debounce
//! window so a code held up to the camera only counts once.

/// Frame sources and the scoped camera guard.
pub mod camera;
/// Sequential frame → decode → toggle loop.
pub mod capture;
pub mod cli;
pub mod config;
/// QR detection and per-frame dedup.
pub mod decoder;
/// Debounced toggle state machine.
pub mod engine;
pub mod feedback;
/// Access-code → user lookup and provisioning.
pub mod registry;
/// SQLite session state and event log.
pub mod store;

pub use capture::{CaptureError, CaptureLoop, LoopSummary};
pub use engine::{Decision, ToggleEngine, Transition};
pub use registry::{CodeRegistry, UserDirectory, UserRecord};
pub use store::{
    EventRecord, EventType, SessionState, SessionStatus, SessionStore, SqliteSessionStore,
};
