//! KDL configuration parser

use std::path::Path;

use crate::error::{ConfigError, InvalidKeyInfo, KeyPosition, SourceLocation};
use crate::keys::{is_valid_key, parse_key};
use crate::model::*;

/// Extract source location from a KDL node's name span
fn get_node_location(node: &kdl::KdlNode, source: &str) -> SourceLocation {
    let span = node.name().span();
    let (line, column) = offset_to_line_col(source, span.offset());
    SourceLocation::new(line, column, span.offset(), span.len())
}

/// Extract source location from a KDL entry (for target values)
fn get_entry_location(entry: &kdl::KdlEntry, source: &str) -> SourceLocation {
    let span = entry.span();
    let (line, column) = offset_to_line_col(source, span.offset());
    SourceLocation::new(line, column, span.offset(), span.len())
}

/// Convert byte offset to line and column (1-indexed)
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse the configuration at `path`, or return the defaults if it does not exist.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!(
            "No configuration at {}, using built-in defaults",
            path.display()
        );
        return Ok(Config::default());
    }
    parse_config(path)
}

pub(crate) fn parse_document(content: &str) -> Result<kdl::KdlDocument, ConfigError> {
    content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so we need to extract offset/len manually
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc = parse_document(content)?;

    let mut config = Config::default();
    let mut invalid_keys = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "capture" => {
                config.capture = parse_capture(node, content, &mut invalid_keys)?;
            }
            "mapping" => {
                config.mapping = Some(parse_mapping(node, content, &mut invalid_keys));
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    if !invalid_keys.is_empty() {
        return Err(ConfigError::InvalidKeys { invalid_keys });
    }

    Ok(config)
}

fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries().first().and_then(|e| e.value().as_string())
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(val) = first_string(child) {
                        global.log_level = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                "device" => {
                    global.device = first_string(child).map(|s| s.to_string());
                }
                "virtual-device-name" => {
                    match first_string(child) {
                        Some(val) if !val.trim().is_empty() => {
                            global.virtual_device_name = val.to_string();
                        }
                        _ => {
                            return Err(ConfigError::Invalid {
                                message: "virtual-device-name must be a non-empty string"
                                    .to_string(),
                            })
                        }
                    }
                }
                "enabled" => {
                    let value = child.entries().first().and_then(|e| e.value().as_bool());
                    global.enabled = value.ok_or_else(|| ConfigError::Invalid {
                        message: "enabled expects true or false".to_string(),
                    })?;
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_capture(
    node: &kdl::KdlNode,
    source: &str,
    invalid_keys: &mut Vec<InvalidKeyInfo>,
) -> Result<CaptureConfig, ConfigError> {
    let mut capture = CaptureConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let name = child.name().value();
            match name {
                "clear-key" | "cancel-key" => {
                    let Some(entry) = child.entries().first() else {
                        return Err(ConfigError::MissingField {
                            field: format!("{} value", name),
                        });
                    };
                    let Some(key) = entry.value().as_string() else {
                        return Err(ConfigError::Invalid {
                            message: format!("{} expects a key name string", name),
                        });
                    };
                    if !is_valid_key(key) {
                        invalid_keys.push(InvalidKeyInfo {
                            key: key.to_string(),
                            position: KeyPosition::Target,
                            context: "capture".to_string(),
                            location: get_entry_location(entry, source),
                        });
                    }
                    if name == "clear-key" {
                        capture.clear_key = key.to_string();
                    } else {
                        capture.cancel_key = key.to_string();
                    }
                }
                "timeout-ms" => {
                    let value = child.entries().first().and_then(|e| e.value().as_i64());
                    match value {
                        Some(ms) if ms > 0 => capture.timeout_ms = Some(ms as u64),
                        _ => {
                            return Err(ConfigError::Invalid {
                                message: "timeout-ms expects a positive integer".to_string(),
                            })
                        }
                    }
                }
                name => {
                    tracing::warn!("Unknown capture option: {}", name);
                }
            }
        }
    }

    // Aliases count: "Esc" and "Escape" are the same key
    let clear = parse_key(&capture.clear_key);
    if clear.is_some() && clear == parse_key(&capture.cancel_key) {
        return Err(ConfigError::Invalid {
            message: format!(
                "clear-key and cancel-key must differ ('{}' and '{}' are the same key)",
                capture.clear_key, capture.cancel_key
            ),
        });
    }

    Ok(capture)
}

/// Parse the `mapping` block. Every node is `<source> "<target>"`.
///
/// A source listed twice keeps its last target, matching how the engine
/// applies `set` in order.
fn parse_mapping(
    node: &kdl::KdlNode,
    source: &str,
    invalid_keys: &mut Vec<InvalidKeyInfo>,
) -> Vec<KeyMapping> {
    let mut mapping: Vec<KeyMapping> = Vec::new();

    let Some(children) = node.children() else {
        return mapping;
    };

    for child in children.nodes() {
        let from_key = child.name().value().to_string();

        if !is_valid_key(&from_key) {
            invalid_keys.push(InvalidKeyInfo {
                key: from_key.clone(),
                position: KeyPosition::Source,
                context: "mapping".to_string(),
                location: get_node_location(child, source),
            });
        }

        let Some(entry) = child.entries().first() else {
            tracing::warn!("Mapping for '{}' has no target, ignoring", from_key);
            continue;
        };
        let Some(to_key) = entry.value().as_string() else {
            tracing::warn!("Mapping target for '{}' is not a string, ignoring", from_key);
            continue;
        };

        if !is_valid_key(to_key) {
            invalid_keys.push(InvalidKeyInfo {
                key: to_key.to_string(),
                position: KeyPosition::Target,
                context: "mapping".to_string(),
                location: get_entry_location(entry, source),
            });
        }

        if let Some(existing) = mapping
            .iter_mut()
            .find(|m| m.source.eq_ignore_ascii_case(&from_key))
        {
            tracing::warn!(
                "'{}' is mapped more than once; keeping '{}'",
                from_key,
                to_key
            );
            existing.target = to_key.to_string();
        } else {
            mapping.push(KeyMapping::new(from_key, to_key));
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_config() {
        let config = r#"
            global {
                log-level "debug"
                device "AT Translated Set 2 keyboard"
                enabled false
            }

            mapping {
                Q "KP1"
                Space "KP0"
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.global.log_level, LogLevel::Debug);
        assert_eq!(
            result.global.device.as_deref(),
            Some("AT Translated Set 2 keyboard")
        );
        assert!(!result.global.enabled);
        assert_eq!(
            result.mapping,
            Some(vec![
                KeyMapping::new("Q", "KP1"),
                KeyMapping::new("Space", "KP0"),
            ])
        );
    }

    #[test]
    fn test_minimal_valid_config() {
        let result = parse_config_str("").unwrap();
        assert_eq!(result, Config::default());
        assert_eq!(result.effective_mapping().len(), DEFAULT_MAPPING.len());
    }

    #[test]
    fn test_empty_mapping_block_means_empty_table() {
        let result = parse_config_str("mapping {\n}\n").unwrap();
        assert_eq!(result.mapping, Some(Vec::new()));
        assert!(result.effective_mapping().is_empty());
    }

    #[test]
    fn test_quoted_source_names() {
        let config = r#"
            mapping {
                "1" "KP1"
                ";" "KPENTER"
            }
        "#;

        let result = parse_config_str(config).unwrap();
        let mapping = result.mapping.unwrap();
        assert_eq!(mapping[0], KeyMapping::new("1", "KP1"));
        assert_eq!(mapping[1], KeyMapping::new(";", "KPENTER"));
    }

    #[test]
    fn test_duplicate_source_keeps_last() {
        let config = r#"
            mapping {
                Q "KP1"
                q "KP2"
            }
        "#;

        let mapping = parse_config_str(config).unwrap().mapping.unwrap();
        assert_eq!(mapping, vec![KeyMapping::new("Q", "KP2")]);
    }

    #[test]
    fn test_capture_options() {
        let config = r#"
            capture {
                clear-key "Delete"
                cancel-key "Esc"
                timeout-ms 15000
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.capture.clear_key, "Delete");
        assert_eq!(result.capture.cancel_key, "Esc");
        assert_eq!(result.capture.timeout_ms, Some(15000));
    }

    #[test]
    fn test_capture_keys_must_differ() {
        let config = r#"
            capture {
                clear-key "Escape"
                cancel-key "escape"
            }
        "#;

        match parse_config_str(config) {
            Err(ConfigError::Invalid { message }) => assert!(message.contains("must differ")),
            other => panic!("Expected Invalid error, got: {:?}", other),
        }
    }

    #[test]
    fn test_capture_keys_must_differ_across_aliases() {
        let config = r#"
            capture {
                clear-key "Esc"
                cancel-key "Escape"
            }
        "#;

        match parse_config_str(config) {
            Err(ConfigError::Invalid { message }) => assert!(message.contains("same key")),
            other => panic!("Expected Invalid error, got: {:?}", other),
        }
    }

    #[test]
    fn test_capture_timeout_must_be_positive() {
        let config = "capture {\n    timeout-ms 0\n}\n";
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_key_in_mapping_source_fails() {
        let config = r#"
            mapping {
                NotARealKey "KP1"
            }
        "#;

        match parse_config_str(config) {
            Err(ConfigError::InvalidKeys { invalid_keys }) => {
                assert_eq!(invalid_keys.len(), 1);
                assert_eq!(invalid_keys[0].key, "NotARealKey");
                assert_eq!(invalid_keys[0].position, KeyPosition::Source);
                assert_eq!(invalid_keys[0].location.line, 3);
            }
            other => panic!("Expected InvalidKeys error, got: {:?}", other),
        }
    }

    #[test]
    fn test_multiple_unknown_keys_all_reported() {
        let config = r#"
            capture {
                clear-key "Bogus"
            }
            mapping {
                Q "NotAKeypadKey"
                Nope "KP2"
            }
        "#;

        match parse_config_str(config) {
            Err(ConfigError::InvalidKeys { invalid_keys }) => {
                let names: Vec<_> = invalid_keys.iter().map(|k| k.key.as_str()).collect();
                assert_eq!(names, vec!["Bogus", "NotAKeypadKey", "Nope"]);
                assert_eq!(invalid_keys[1].position, KeyPosition::Target);
                assert_eq!(invalid_keys[0].context, "capture");
            }
            other => panic!("Expected InvalidKeys error, got: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let config = "global {\n    log-level \"loud\"\n}\n";
        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_kdl_syntax_error() {
        let result = parse_config_str("mapping {\n    Q \"KP1\n");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_or_default(&dir.path().join("absent.kdl")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_offset_to_line_col() {
        let source = "ab\ncd\nef";
        assert_eq!(offset_to_line_col(source, 0), (1, 1));
        assert_eq!(offset_to_line_col(source, 4), (2, 2));
        assert_eq!(offset_to_line_col(source, 6), (3, 1));
    }
}
