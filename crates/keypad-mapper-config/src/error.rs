use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Which side of a mapping entry a key name was found on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPosition {
    /// The physical key (node name)
    Source,
    /// The keypad key it produces (node argument)
    Target,
}

impl fmt::Display for KeyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPosition::Source => write!(f, "source"),
            KeyPosition::Target => write!(f, "target"),
        }
    }
}

/// Position of a token in the configuration source (1-indexed line/column)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub len: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize, len: usize) -> Self {
        Self {
            line,
            column,
            offset,
            len,
        }
    }
}

/// A key name that could not be resolved, with enough context to point at it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKeyInfo {
    pub key: String,
    pub position: KeyPosition,
    /// Block the key appeared in (`mapping`, `capture`)
    pub context: String,
    pub location: SourceLocation,
}

fn format_invalid_keys(keys: &[InvalidKeyInfo]) -> String {
    keys.iter()
        .map(|k| {
            format!(
                "  {}:{}: unknown {} key '{}' in {} block",
                k.location.line, k.location.column, k.position, k.key, k.context
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(keypad_mapper::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(keypad_mapper::config::invalid))]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(keypad_mapper::config::missing_field))]
    MissingField { field: String },

    #[error("Unknown key name(s):\n{}", format_invalid_keys(.invalid_keys))]
    #[diagnostic(
        code(keypad_mapper::config::unknown_key),
        help("use names such as Q, Space, KP1, Backspace, or raw evdev names like KEY_KP1")
    )]
    InvalidKeys { invalid_keys: Vec<InvalidKeyInfo> },

    #[error("Failed to write {}", path.display())]
    #[diagnostic(code(keypad_mapper::config::write))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
