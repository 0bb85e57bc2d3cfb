//! Interactive key reassignment
//!
//! A caller picks a target ("the `5` key of the keypad") with
//! [`ReassignmentController::begin_capture`]; the next qualifying physical
//! key press is bound to it.
//!
//! ```text
//!            begin_capture(t)                 key press p
//!  ┌──────┐ ─────────────────► ┌────────────────┐ ──────────────► ┌──────┐
//!  │ IDLE │                    │ AWAITING_KEY(t)│   clear key     │ IDLE │
//!  └──────┘ ◄───────────────── └────────────────┘ ──────────────► └──────┘
//!             cancel key /        │    ▲          cancel key
//!             cancel() /          └────┘
//!             timeout          modifiers, releases
//! ```
//!
//! Binding `p` to `t` first unbinds whatever source held `t`, then whatever
//! target `p` held, so the controller never leaves a target bound twice or a
//! physical key bound to two targets.

use std::time::{Duration, Instant};

use evdev::Key;
use serde::{Deserialize, Serialize};

use crate::dispatcher::KeyPhase;
use crate::error::EngineError;
use crate::key::{KeyCode, Modifier};
use crate::mapping::MappingTable;

/// Keys with a fixed meaning while a capture is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureKeys {
    /// Removes the binding of the target being captured
    pub clear: KeyCode,
    /// Abandons the capture
    pub cancel: KeyCode,
}

impl Default for CaptureKeys {
    fn default() -> Self {
        Self {
            clear: Key::KEY_BACKSPACE.into(),
            cancel: Key::KEY_ESC.into(),
        }
    }
}

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "target", rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    AwaitingKey(KeyCode),
}

/// Result of feeding one key event to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Nothing pending; the event was not consumed by capture
    NotCapturing,
    /// Consumed without effect (modifier or release); still awaiting
    Ignored,
    /// `cancel` key: no table change
    Cancelled { target: KeyCode },
    /// `clear` key: the target's binding was removed
    Cleared {
        target: KeyCode,
        unbound: Option<KeyCode>,
    },
    /// `source` now maps to `target`
    Bound {
        source: KeyCode,
        target: KeyCode,
        /// Source that was mapped to `target` before
        previous_source: Option<KeyCode>,
        /// Target `source` was mapped to before
        previous_target: Option<KeyCode>,
    },
    /// The capture timed out before a key arrived
    Expired { target: KeyCode },
    /// Superseded by a capture for another target
    Replaced { target: KeyCode },
}

impl CaptureOutcome {
    /// The capture target this outcome concludes, if it concludes one
    pub fn target(&self) -> Option<KeyCode> {
        match *self {
            CaptureOutcome::NotCapturing | CaptureOutcome::Ignored => None,
            CaptureOutcome::Cancelled { target }
            | CaptureOutcome::Cleared { target, .. }
            | CaptureOutcome::Bound { target, .. }
            | CaptureOutcome::Expired { target }
            | CaptureOutcome::Replaced { target } => Some(target),
        }
    }

    /// Whether the table was modified
    pub fn changed_mapping(&self) -> bool {
        match self {
            CaptureOutcome::Bound { .. } => true,
            CaptureOutcome::Cleared { unbound, .. } => unbound.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingReassignment {
    target: KeyCode,
    started_at: Instant,
}

/// The `Idle` / `AwaitingKey(target)` state machine.
///
/// Only one capture is pending at a time; a new `begin_capture` replaces the
/// previous one without touching the table.
#[derive(Debug, Default)]
pub struct ReassignmentController {
    pending: Option<PendingReassignment>,
    keys: CaptureKeys,
    timeout: Option<Duration>,
}

impl ReassignmentController {
    pub fn new(keys: CaptureKeys, timeout: Option<Duration>) -> Self {
        Self {
            pending: None,
            keys,
            timeout,
        }
    }

    pub fn keys(&self) -> CaptureKeys {
        self.keys
    }

    pub fn state(&self) -> CaptureState {
        match self.pending {
            Some(p) => CaptureState::AwaitingKey(p.target),
            None => CaptureState::Idle,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Start awaiting a key for `target`.
    ///
    /// Returns the target of a capture that was pending and is now abandoned.
    pub fn begin_capture(
        &mut self,
        target: KeyCode,
        now: Instant,
    ) -> Result<Option<KeyCode>, EngineError> {
        target.validate()?;
        let replaced = self.pending.take().map(|p| p.target);
        self.pending = Some(PendingReassignment {
            target,
            started_at: now,
        });
        Ok(replaced.filter(|t| *t != target))
    }

    /// Abandon the pending capture, if any.
    pub fn cancel(&mut self) -> Option<KeyCode> {
        self.pending.take().map(|p| p.target)
    }

    /// Drop the pending capture if it has been waiting longer than the timeout.
    pub fn expire(&mut self, now: Instant) -> Option<KeyCode> {
        let timeout = self.timeout?;
        let pending = self.pending?;
        if now.saturating_duration_since(pending.started_at) >= timeout {
            self.pending = None;
            tracing::info!("Capture for {} timed out", pending.target);
            return Some(pending.target);
        }
        None
    }

    /// Feed one key event while a capture may be pending.
    pub fn handle_key(
        &mut self,
        table: &mut MappingTable,
        source: KeyCode,
        phase: KeyPhase,
    ) -> CaptureOutcome {
        let Some(pending) = self.pending else {
            return CaptureOutcome::NotCapturing;
        };
        let target = pending.target;

        if phase == KeyPhase::Released || Modifier::from_key(source).is_some() {
            return CaptureOutcome::Ignored;
        }

        if source == self.keys.cancel {
            self.pending = None;
            tracing::info!("Capture for {} cancelled", target);
            return CaptureOutcome::Cancelled { target };
        }

        if source == self.keys.clear {
            self.pending = None;
            let unbound = table.first_source_for(target);
            if let Some(s) = unbound {
                // s came out of the table, so it is a valid identity
                let _ = table.unset(s);
            }
            tracing::info!("Cleared binding of {} (was {:?})", target, unbound);
            return CaptureOutcome::Cleared { target, unbound };
        }

        if !source.is_valid() {
            tracing::warn!("Ignoring malformed key {:?} during capture", source);
            return CaptureOutcome::Ignored;
        }

        self.pending = None;
        let previous_source = table.first_source_for(target);
        if let Some(s) = previous_source {
            let _ = table.unset(s);
        }
        let previous_target = table.unset(source).ok().flatten();
        let _ = table.set(source, target);

        tracing::info!("Bound {} -> {}", source, target);
        CaptureOutcome::Bound {
            source,
            target,
            previous_source,
            previous_target,
        }
    }
}
