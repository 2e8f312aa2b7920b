// CLASSIFICATION: COMMUNITY
// Filename: engine.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Debounced login/logout state machine.
//!
//! Each identity cycles between `LoggedOut` and `LoggedIn`. A code held in
//! front of the camera is decoded on every frame, so a detection is only
//! acted on when the identity's last transition is at least the debounce
//! window old. Identities never share a window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::camera::Frame;
use crate::decoder::{dedup_batch, DetectedCode};
use crate::feedback::{Feedback, SnapshotWriter};
use crate::registry::{CodeRegistry, UserRecord};
use crate::store::{EventRecord, SessionStore, StoreError};

/// Default minimum spacing between two transitions of one identity.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);

/// An accepted toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub user: UserRecord,
    pub event: EventRecord,
}

impl Transition {
    pub fn feedback(&self) -> Feedback {
        Feedback {
            identity: self.user.identity.clone(),
            display_name: self.user.display_name.clone(),
            event_type: self.event.event_type,
            timestamp: self.event.timestamp,
        }
    }
}

/// Outcome of one detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Payload is not a registered access code.
    UnknownCode,
    /// Known code seen inside its identity's debounce window.
    Debounced { identity: String },
    Toggled(Transition),
}

/// Applies detections to the session store.
pub struct ToggleEngine<R, S> {
    registry: R,
    store: S,
    debounce: Duration,
    refresh_last_seen: bool,
    snapshots: Option<SnapshotWriter>,
}

impl<R: CodeRegistry, S: SessionStore> ToggleEngine<R, S> {
    pub fn new(registry: R, store: S) -> Self {
        Self {
            registry,
            store,
            debounce: DEFAULT_DEBOUNCE_WINDOW,
            refresh_last_seen: false,
            snapshots: None,
        }
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Refresh `last_seen_ts` for detections dropped by the debounce gate.
    pub fn with_refresh_last_seen(mut self, enabled: bool) -> Self {
        self.refresh_last_seen = enabled;
        self
    }

    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    fn debounced(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last else {
            return false;
        };
        // A detection stamped before the last transition is never acted on.
        match now.signed_duration_since(last).to_std() {
            Ok(elapsed) => elapsed < self.debounce,
            Err(_) => true,
        }
    }

    /// Handle one detection. `frame` is only used for snapshots.
    pub fn process(
        &mut self,
        detection: &DetectedCode,
        frame: Option<&Frame>,
    ) -> Result<Decision, StoreError> {
        let Some(user) = self.registry.lookup(&detection.payload) else {
            debug!("ignoring unregistered code");
            return Ok(Decision::UnknownCode);
        };
        let now = detection.frame_ts;
        let state = self.store.get_status(&user.identity)?;

        if self.debounced(state.last_transition_ts, now) {
            if self.refresh_last_seen {
                self.store.touch_last_seen(&user.identity, now)?;
            }
            debug!("{}: inside debounce window", user.identity);
            return Ok(Decision::Debounced {
                identity: user.identity,
            });
        }

        let new_status = state.current_status.toggled();
        let snapshot = match (&self.snapshots, frame) {
            (Some(w), Some(_)) => Some(w.path_for(&user.identity, now)),
            _ => None,
        };
        let event = self
            .store
            .apply_transition(&user.identity, new_status, now, snapshot.as_deref())?;
        info!("{} -> {} ({})", user.identity, new_status, event.event_type);

        if let (Some(w), Some(f), Some(path)) = (&self.snapshots, frame, &snapshot) {
            if let Err(e) = w.write(path, f) {
                warn!("snapshot {} not written: {e}", path.display());
            }
        }
        Ok(Decision::Toggled(Transition { user, event }))
    }

    /// Dedup a frame's detections by payload, then handle each one.
    ///
    /// A store failure only affects the detection it happened on.
    pub fn process_batch(
        &mut self,
        detections: Vec<DetectedCode>,
        frame: Option<&Frame>,
    ) -> Vec<Result<Decision, StoreError>> {
        dedup_batch(detections)
            .iter()
            .map(|d| self.process(d, frame))
            .collect()
    }
}
