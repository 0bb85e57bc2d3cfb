use thiserror::Error;

/// Errors from mutating the engine through its public contract.
///
/// These are caller errors; the engine state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid key code {0}")]
    InvalidKey(u16),

    #[error("unknown key name: {0}")]
    UnknownKeyName(String),
}
