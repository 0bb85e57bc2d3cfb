//! keypad-mapper remapping engine
//!
//! Turns keys of an ordinary keyboard into numeric keypad keys. The engine
//! ([`RemapDispatcher`]) is usable on its own with any
//! [`SyntheticInputEmitter`]; the remaining modules wire it to evdev, uinput
//! and the control socket for the `keypad-mapperd` binary.

pub mod control;
pub mod device;
pub mod device_manager;
pub mod dispatcher;
pub mod error;
pub mod injector;
pub mod ipc;
pub mod key;
pub mod mapping;
pub mod plugin;
pub mod press_state;
pub mod reassign;

pub use dispatcher::{EngineEvent, KeyEvent, KeyPhase, RemapDispatcher, SharedDispatcher};
pub use error::EngineError;
pub use injector::{EventForwarder, InjectError, SyntheticInputEmitter, VirtualDevice};
pub use key::KeyCode;
pub use mapping::MappingTable;
pub use press_state::PressStateTracker;
pub use reassign::{CaptureKeys, CaptureOutcome, CaptureState, ReassignmentController};
