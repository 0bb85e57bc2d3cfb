//! Synthetic input injection via uinput
//!
//! The dispatcher only needs [`SyntheticInputEmitter`]: "make the OS believe
//! this key was pressed/released". [`VirtualDevice`] implements it on top of a
//! uinput keyboard and also re-emits pass-through events ([`EventForwarder`]),
//! since grabbed keyboards no longer reach the rest of the system directly.

use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key};
use keypad_mapper_config::keys::KEY_MAX;
use thiserror::Error;

use crate::key::KeyCode;

/// Error types for uinput operations
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("failed to create virtual device: {0}")]
    DeviceCreation(#[source] std::io::Error),

    #[error("failed to write event for {key}: {source}")]
    Write {
        key: KeyCode,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to forward event: {0}")]
    Forward(#[source] std::io::Error),

    #[error("invalid key identity {0:?}")]
    InvalidKey(KeyCode),
}

/// Capability to inject synthetic key transitions.
pub trait SyntheticInputEmitter {
    fn press_key(&mut self, target: KeyCode) -> Result<(), InjectError>;
    fn release_key(&mut self, target: KeyCode) -> Result<(), InjectError>;
}

impl<T: SyntheticInputEmitter + ?Sized> SyntheticInputEmitter for Box<T> {
    fn press_key(&mut self, target: KeyCode) -> Result<(), InjectError> {
        (**self).press_key(target)
    }

    fn release_key(&mut self, target: KeyCode) -> Result<(), InjectError> {
        (**self).release_key(target)
    }
}

/// Re-emission of events the dispatcher did not handle.
pub trait EventForwarder {
    fn forward(&mut self, event: InputEvent) -> Result<(), InjectError>;
}

/// A virtual input device for injecting events
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create a new virtual keyboard device.
    ///
    /// Fails when `/dev/uinput` cannot be opened, typically for lack of
    /// permission.
    pub fn new_keyboard(name: &str) -> Result<Self, InjectError> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=KEY_MAX {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()
            .map_err(InjectError::DeviceCreation)?
            .name(name)
            .with_keys(&keys)
            .map_err(InjectError::DeviceCreation)?
            .build()
            .map_err(InjectError::DeviceCreation)?;

        tracing::info!("Created virtual keyboard '{}'", name);
        Ok(Self { device })
    }

    fn emit_key(&mut self, key: KeyCode, value: i32) -> Result<(), InjectError> {
        if !key.is_valid() {
            return Err(InjectError::InvalidKey(key));
        }
        let event = InputEvent::new(EventType::KEY, key.code(), value);
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.device
            .emit(&[event, syn])
            .map_err(|source| InjectError::Write { key, source })
    }
}

impl SyntheticInputEmitter for VirtualDevice {
    fn press_key(&mut self, target: KeyCode) -> Result<(), InjectError> {
        self.emit_key(target, 1)
    }

    fn release_key(&mut self, target: KeyCode) -> Result<(), InjectError> {
        self.emit_key(target, 0)
    }
}

impl EventForwarder for VirtualDevice {
    fn forward(&mut self, event: InputEvent) -> Result<(), InjectError> {
        // emit() appends its own SYN_REPORT; the source's reports are dropped
        // by the caller.
        self.device.emit(&[event]).map_err(InjectError::Forward)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;

    use super::*;

    /// One recorded synthetic transition
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Emitted {
        Press(KeyCode),
        Release(KeyCode),
    }

    /// Emitter that records calls instead of touching uinput.
    #[derive(Debug, Default)]
    pub struct RecordingEmitter {
        pub emitted: Vec<Emitted>,
        pub forwarded: Vec<InputEvent>,
        /// Targets whose injection fails
        pub failing: HashSet<KeyCode>,
    }

    impl RecordingEmitter {
        pub fn take(&mut self) -> Vec<Emitted> {
            std::mem::take(&mut self.emitted)
        }
    }

    impl SyntheticInputEmitter for RecordingEmitter {
        fn press_key(&mut self, target: KeyCode) -> Result<(), InjectError> {
            if self.failing.contains(&target) {
                return Err(InjectError::InvalidKey(target));
            }
            self.emitted.push(Emitted::Press(target));
            Ok(())
        }

        fn release_key(&mut self, target: KeyCode) -> Result<(), InjectError> {
            if self.failing.contains(&target) {
                return Err(InjectError::InvalidKey(target));
            }
            self.emitted.push(Emitted::Release(target));
            Ok(())
        }
    }

    impl EventForwarder for RecordingEmitter {
        fn forward(&mut self, event: InputEvent) -> Result<(), InjectError> {
            self.forwarded.push(event);
            Ok(())
        }
    }
}
