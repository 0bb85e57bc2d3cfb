//! Configuration data model

use std::path::PathBuf;

/// Built-in mapping: a QWERTY cluster laid out like a phone keypad.
///
/// `KPPLUS` stands in for the `#` key, which has no keypad equivalent.
pub const DEFAULT_MAPPING: &[(&str, &str)] = &[
    ("Q", "KP1"),
    ("W", "KP2"),
    ("E", "KP3"),
    ("A", "KP4"),
    ("S", "KP5"),
    ("D", "KP6"),
    ("Z", "KP7"),
    ("X", "KP8"),
    ("C", "KP9"),
    ("V", "KPASTERISK"),
    ("Space", "KP0"),
    ("B", "KPPLUS"),
];

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub global: GlobalConfig,
    pub capture: CaptureConfig,
    /// `None` when the file has no `mapping` block; the built-in mapping applies.
    pub mapping: Option<Vec<KeyMapping>>,
}

impl Config {
    /// The mapping to start the engine with.
    pub fn effective_mapping(&self) -> Vec<KeyMapping> {
        match &self.mapping {
            Some(mapping) => mapping.clone(),
            None => default_mapping(),
        }
    }
}

/// [`DEFAULT_MAPPING`] as owned entries
pub fn default_mapping() -> Vec<KeyMapping> {
    DEFAULT_MAPPING
        .iter()
        .map(|(source, target)| KeyMapping::new(*source, *target))
        .collect()
}

/// Global settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Name of the keyboard to grab; every keyboard when unset
    pub device: Option<String>,
    /// Whether remapping is active at startup
    pub enabled: bool,
    /// Name given to the uinput output device
    pub virtual_device_name: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            device: None,
            enabled: true,
            virtual_device_name: "keypad-mapper".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Settings of the interactive "bind the next key" mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Key that removes the binding of the target being captured
    pub clear_key: String,
    /// Key that abandons the capture
    pub cancel_key: String,
    /// Drop a pending capture after this many milliseconds of inactivity
    pub timeout_ms: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            clear_key: "Backspace".to_string(),
            cancel_key: "Escape".to_string(),
            timeout_ms: None,
        }
    }
}

/// One `source -> target` pair, by key name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    pub source: String,
    pub target: String,
}

impl KeyMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Contents of a bundle's `bundle.kdl`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleManifest {
    pub name: Option<String>,
    /// Executable, relative to the bundle directory
    pub entry: Option<PathBuf>,
    pub args: Vec<String>,
}
