//! Bundle manifest (`bundle.kdl`) parsing
//!
//! ```kdl
//! name "Snake II"
//! entry "bin/snake"
//! args "--fullscreen" "--keypad"
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::BundleManifest;
use crate::parser::parse_document;

/// File name of the manifest inside a bundle directory
pub const MANIFEST_FILE: &str = "bundle.kdl";

/// Parse the manifest at `path`
pub fn parse_bundle_manifest(path: &Path) -> Result<BundleManifest, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_bundle_manifest_str(&content)
}

/// Parse manifest contents
pub fn parse_bundle_manifest_str(content: &str) -> Result<BundleManifest, ConfigError> {
    let doc = parse_document(content)?;
    let mut manifest = BundleManifest::default();

    for node in doc.nodes() {
        let first = node.entries().first().and_then(|e| e.value().as_string());
        match node.name().value() {
            "name" => manifest.name = first.map(|s| s.to_string()),
            "entry" => {
                let entry = first.ok_or_else(|| ConfigError::Invalid {
                    message: "entry expects a path string".to_string(),
                })?;
                let path = PathBuf::from(entry);
                if path.is_absolute() {
                    return Err(ConfigError::Invalid {
                        message: format!("entry must be relative to the bundle: {}", entry),
                    });
                }
                manifest.entry = Some(path);
            }
            "args" => {
                manifest.args = node
                    .entries()
                    .iter()
                    .filter_map(|e| e.value().as_string())
                    .map(|s| s.to_string())
                    .collect();
            }
            name => {
                tracing::warn!("Unknown bundle manifest node: {}", name);
            }
        }
    }

    Ok(manifest)
}
