//! Configuration parsing for keypad-mapper
//!
//! This crate handles reading and writing the KDL configuration file (global
//! options, capture options and the key mapping), key name resolution, and
//! bundle manifests.

mod error;
mod generator;
pub mod keys;
mod manifest;
mod model;
mod parser;

pub use error::{ConfigError, InvalidKeyInfo, KeyPosition, SourceLocation};
pub use generator::{generate_config, write_config};
pub use manifest::{parse_bundle_manifest, parse_bundle_manifest_str, MANIFEST_FILE};
pub use model::*;
pub use parser::{load_or_default, parse_config, parse_config_str};
