//! Press state tracking for synthesized keys
//!
//! Keyboards deliver repeated key-down notifications while a key auto-repeats.
//! Re-emitting a synthetic press for each of them would leave the consumer
//! with presses that have no matching release, so the dispatcher records which
//! sources it has pressed and only synthesizes on genuine transitions.

use std::collections::HashMap;

use crate::key::KeyCode;

/// Sources the engine currently considers down.
///
/// A source is present iff a synthetic press was emitted for it and not yet
/// matched by a synthetic release. The target that was pressed is kept with
/// it so the release reaches the same target even if the table changed while
/// the key was held.
#[derive(Debug, Default)]
pub struct PressStateTracker {
    down: HashMap<KeyCode, KeyCode>,
}

impl PressStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `source` as down. Returns `false` if it already was (a repeat).
    pub fn mark_down(&mut self, source: KeyCode, target: KeyCode) -> bool {
        if self.down.contains_key(&source) {
            return false;
        }
        self.down.insert(source, target);
        true
    }

    /// Clear `source`. Returns the target it was pressed as, or `None` if it
    /// was already up.
    pub fn mark_up(&mut self, source: KeyCode) -> Option<KeyCode> {
        self.down.remove(&source)
    }

    pub fn is_down(&self, source: KeyCode) -> bool {
        self.down.contains_key(&source)
    }

    pub fn len(&self) -> usize {
        self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.down.is_empty()
    }

    /// Forget every held key, returning `(source, target)` pairs in source order.
    pub fn clear(&mut self) -> Vec<(KeyCode, KeyCode)> {
        let mut held: Vec<_> = self.down.drain().collect();
        held.sort();
        held
    }
}

#[cfg(test)]
mod tests {
    use evdev::Key;

    use super::*;

    #[test]
    fn test_first_press_is_genuine() {
        let mut tracker = PressStateTracker::new();
        assert!(tracker.mark_down(Key::KEY_Q.into(), Key::KEY_KP1.into()));
        assert!(tracker.is_down(Key::KEY_Q.into()));
    }

    #[test]
    fn test_repeat_press_is_not_genuine() {
        let mut tracker = PressStateTracker::new();
        assert!(tracker.mark_down(Key::KEY_Q.into(), Key::KEY_KP1.into()));
        assert!(!tracker.mark_down(Key::KEY_Q.into(), Key::KEY_KP1.into()));
        assert!(!tracker.mark_down(Key::KEY_Q.into(), Key::KEY_KP2.into()));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_release_returns_pressed_target() {
        let mut tracker = PressStateTracker::new();
        tracker.mark_down(Key::KEY_Q.into(), Key::KEY_KP1.into());

        assert_eq!(tracker.mark_up(Key::KEY_Q.into()), Some(Key::KEY_KP1.into()));
        assert_eq!(tracker.mark_up(Key::KEY_Q.into()), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut tracker = PressStateTracker::new();
        assert_eq!(tracker.mark_up(Key::KEY_W.into()), None);
    }

    #[test]
    fn test_clear_returns_held_keys() {
        let mut tracker = PressStateTracker::new();
        tracker.mark_down(Key::KEY_W.into(), Key::KEY_KP2.into());
        tracker.mark_down(Key::KEY_Q.into(), Key::KEY_KP1.into());

        let held = tracker.clear();
        let expected: Vec<(KeyCode, KeyCode)> = vec![
            (Key::KEY_Q.into(), Key::KEY_KP1.into()),
            (Key::KEY_W.into(), Key::KEY_KP2.into()),
        ];
        assert_eq!(held, expected);
        assert!(tracker.is_empty());
        assert!(tracker.clear().is_empty());
    }
}
