//! Key event dispatch
//!
//! [`RemapDispatcher`] is the single entry point for every key event read from
//! a grabbed keyboard. It decides whether the event is consumed (remapped or
//! swallowed by an interactive capture) or passed through untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use evdev::{EventType, InputEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::error::EngineError;
use crate::injector::{SyntheticInputEmitter, VirtualDevice};
use crate::key::KeyCode;
use crate::mapping::MappingTable;
use crate::press_state::PressStateTracker;
use crate::reassign::{CaptureKeys, CaptureOutcome, CaptureState, ReassignmentController};

/// Capacity of the notification channel; slow subscribers lag, they never block.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Dispatcher shared between device readers and IPC connections
pub type SharedDispatcher = Arc<Mutex<RemapDispatcher<VirtualDevice>>>;

/// Direction of a key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Pressed,
    Released,
}

/// A physical key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub source: KeyCode,
    pub phase: KeyPhase,
}

impl KeyEvent {
    pub fn pressed(source: impl Into<KeyCode>) -> Self {
        Self {
            source: source.into(),
            phase: KeyPhase::Pressed,
        }
    }

    pub fn released(source: impl Into<KeyCode>) -> Self {
        Self {
            source: source.into(),
            phase: KeyPhase::Released,
        }
    }

    /// Interpret an evdev event. Auto-repeat (value 2) counts as a press.
    pub fn from_input_event(event: &InputEvent) -> Option<Self> {
        if event.event_type() != EventType::KEY {
            return None;
        }
        let phase = match event.value() {
            0 => KeyPhase::Released,
            1 | 2 => KeyPhase::Pressed,
            _ => return None,
        };
        Some(Self {
            source: KeyCode::new(event.code()),
            phase,
        })
    }
}

/// Notifications for presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    MappingChanged,
    EnabledChanged {
        enabled: bool,
    },
    CaptureStarted {
        target: KeyCode,
    },
    CaptureFinished {
        target: KeyCode,
        outcome: CaptureOutcome,
    },
}

/// The remapping engine.
///
/// Owns the mapping table, the press state and the reassignment controller,
/// and injects synthetic events through `E`. Without an emitter the
/// dispatcher never consumes anything.
pub struct RemapDispatcher<E> {
    table: MappingTable,
    pressed: PressStateTracker,
    /// Sources whose press was passed through and whose release is still due
    passed: HashSet<KeyCode>,
    capture: ReassignmentController,
    emitter: Option<E>,
    enabled: bool,
    installed: bool,
    events: broadcast::Sender<EngineEvent>,
}

impl<E: SyntheticInputEmitter> RemapDispatcher<E> {
    /// Create an uninstalled, enabled dispatcher.
    pub fn new(table: MappingTable, emitter: Option<E>) -> Self {
        if emitter.is_none() {
            tracing::error!(
                "Synthetic input is unavailable; every key will pass through unmodified"
            );
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            table,
            pressed: PressStateTracker::new(),
            passed: HashSet::new(),
            capture: ReassignmentController::default(),
            emitter,
            enabled: true,
            installed: false,
            events,
        }
    }

    /// Configure the capture keys and the optional capture timeout.
    pub fn with_capture(mut self, keys: CaptureKeys, timeout: Option<Duration>) -> Self {
        self.capture = ReassignmentController::new(keys, timeout);
        self
    }

    pub fn install(&mut self) {
        if !self.installed {
            self.installed = true;
            tracing::info!("Remap dispatcher installed ({} mappings)", self.table.len());
        }
    }

    /// Stop consuming events. Held keys are released and a pending capture
    /// is cancelled.
    pub fn uninstall(&mut self) {
        if !self.installed {
            return;
        }
        self.release_all();
        if let Some(target) = self.capture.cancel() {
            self.notify(EngineEvent::CaptureFinished {
                target,
                outcome: CaptureOutcome::Cancelled { target },
            });
        }
        self.installed = false;
        tracing::info!("Remap dispatcher uninstalled");
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn injection_available(&self) -> bool {
        self.emitter.is_some()
    }

    /// Whether [`RemapDispatcher::handle`] may consume events right now
    pub fn is_active(&self) -> bool {
        self.installed && self.enabled && self.emitter.is_some()
    }

    /// Process one key event. Returns `true` if it was consumed.
    pub fn handle(&mut self, event: KeyEvent) -> bool {
        self.handle_at(event, Instant::now())
    }

    /// [`RemapDispatcher::handle`] with an explicit clock.
    ///
    /// A key that was passed through on press keeps passing through (repeats
    /// and release) until it is released, even if the mapping, the enabled
    /// flag or the capture state changed meanwhile.
    pub fn handle_at(&mut self, event: KeyEvent, now: Instant) -> bool {
        let source = event.source;
        match event.phase {
            KeyPhase::Pressed if self.passed.contains(&source) => return false,
            KeyPhase::Released if self.passed.remove(&source) => return false,
            _ => {}
        }

        let consumed = self.consume(event, now);
        if !consumed && event.phase == KeyPhase::Pressed {
            self.passed.insert(source);
        }
        consumed
    }

    fn consume(&mut self, event: KeyEvent, now: Instant) -> bool {
        if !self.is_active() {
            return false;
        }

        if let Some(target) = self.capture.expire(now) {
            self.notify(EngineEvent::CaptureFinished {
                target,
                outcome: CaptureOutcome::Expired { target },
            });
        }

        if self.capture.is_awaiting() {
            // Keys held before the capture started still get their release
            if event.phase == KeyPhase::Released {
                if let Some(target) = self.pressed.mark_up(event.source) {
                    self.emit(target, KeyPhase::Released);
                }
            }
            let outcome = self
                .capture
                .handle_key(&mut self.table, event.source, event.phase);
            self.finish_capture(outcome);
            return true;
        }

        self.dispatch(event)
    }

    fn dispatch(&mut self, event: KeyEvent) -> bool {
        let source = event.source;
        match event.phase {
            KeyPhase::Pressed => {
                let Some(target) = self.table.target_for(source) else {
                    // Repeats of a held key whose mapping was removed stay swallowed
                    return self.pressed.is_down(source);
                };
                if self.pressed.mark_down(source, target) {
                    tracing::debug!("{} -> {} pressed", source, target);
                    self.emit(target, KeyPhase::Pressed);
                }
                true
            }
            KeyPhase::Released => match self.pressed.mark_up(source) {
                Some(target) => {
                    tracing::debug!("{} -> {} released", source, target);
                    self.emit(target, KeyPhase::Released);
                    true
                }
                None => self.table.target_for(source).is_some(),
            },
        }
    }

    fn emit(&mut self, target: KeyCode, phase: KeyPhase) {
        let Some(emitter) = self.emitter.as_mut() else {
            return;
        };
        let result = match phase {
            KeyPhase::Pressed => emitter.press_key(target),
            KeyPhase::Released => emitter.release_key(target),
        };
        if let Err(e) = result {
            tracing::warn!("Dropped synthetic {:?} of {}: {}", phase, target, e);
        }
    }

    fn release_all(&mut self) {
        for (source, target) in self.pressed.clear() {
            tracing::debug!("Releasing held {} -> {}", source, target);
            self.emit(target, KeyPhase::Released);
        }
    }

    fn notify(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn finish_capture(&mut self, outcome: CaptureOutcome) {
        let Some(target) = outcome.target() else {
            return;
        };
        if outcome.changed_mapping() {
            self.notify(EngineEvent::MappingChanged);
        }
        self.notify(EngineEvent::CaptureFinished { target, outcome });
    }

    /// Turn remapping on or off.
    ///
    /// Disabling releases every held target so nothing stays stuck downstream.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        if enabled {
            self.pressed.clear();
        } else {
            self.release_all();
        }
        self.enabled = enabled;
        tracing::info!("Remapping {}", if enabled { "enabled" } else { "disabled" });
        self.notify(EngineEvent::EnabledChanged { enabled });
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn snapshot(&self) -> BTreeMap<KeyCode, KeyCode> {
        self.table.snapshot()
    }

    pub fn update_mapping(
        &mut self,
        source: KeyCode,
        target: KeyCode,
    ) -> Result<Option<KeyCode>, EngineError> {
        let previous = self.table.set(source, target)?;
        tracing::info!("Mapping {} -> {}", source, target);
        self.notify(EngineEvent::MappingChanged);
        Ok(previous)
    }

    pub fn remove_mapping(&mut self, source: KeyCode) -> Result<Option<KeyCode>, EngineError> {
        let removed = self.table.unset(source)?;
        if removed.is_some() {
            tracing::info!("Removed mapping for {}", source);
            self.notify(EngineEvent::MappingChanged);
        }
        Ok(removed)
    }

    pub fn replace_mapping(
        &mut self,
        pairs: impl IntoIterator<Item = (KeyCode, KeyCode)>,
    ) -> Result<(), EngineError> {
        self.table.replace(pairs)?;
        tracing::info!("Mapping table replaced ({} entries)", self.table.len());
        self.notify(EngineEvent::MappingChanged);
        Ok(())
    }

    /// Await the next key press and bind it to `target`.
    pub fn begin_capture(&mut self, target: KeyCode) -> Result<(), EngineError> {
        let replaced = self.capture.begin_capture(target, Instant::now())?;
        if let Some(old) = replaced {
            self.notify(EngineEvent::CaptureFinished {
                target: old,
                outcome: CaptureOutcome::Replaced { target: old },
            });
        }
        tracing::info!("Waiting for a key to bind to {}", target);
        self.notify(EngineEvent::CaptureStarted { target });
        Ok(())
    }

    pub fn cancel_capture(&mut self) -> Option<KeyCode> {
        let target = self.capture.cancel()?;
        self.finish_capture(CaptureOutcome::Cancelled { target });
        Some(target)
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn capture_keys(&self) -> CaptureKeys {
        self.capture.keys()
    }

    /// Number of sources currently held as remapped keys
    pub fn pressed_count(&self) -> usize {
        self.pressed.len()
    }

    /// Number of sources currently held as passed-through keys
    pub fn passed_count(&self) -> usize {
        self.passed.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn emitter_mut(&mut self) -> Option<&mut E> {
        self.emitter.as_mut()
    }
}
