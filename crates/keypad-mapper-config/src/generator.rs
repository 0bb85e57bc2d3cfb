//! Write configuration files back out as KDL

use std::fmt::Write as _;
use std::path::Path;
use std::time::SystemTime;

use crate::error::ConfigError;
use crate::model::{Config, LogLevel};

/// Format a SystemTime as an ISO 8601 timestamp (UTC).
fn format_timestamp(time: SystemTime) -> String {
    let duration = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();

    let days = secs / 86400;
    let remaining = secs % 86400;
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;

    let mut year = 1970;
    let mut remaining_days = days as i64;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for days_in_month in days_in_months.iter() {
        if remaining_days < *days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }
    let day = remaining_days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hours, minutes, seconds
    )
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Quote a string as a KDL string literal
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a full configuration document.
///
/// Global and capture blocks only list settings that differ from the
/// defaults. The mapping block is always written when present, sources
/// quoted so names like `1` or `;` stay valid node names.
pub fn generate_config(config: &Config) -> String {
    generate_config_at(config, SystemTime::now())
}

fn generate_config_at(config: &Config, time: SystemTime) -> String {
    let defaults = Config::default();
    let mut out = String::new();

    let _ = writeln!(out, "// keypad-mapper configuration");
    let _ = writeln!(out, "// Written {}", format_timestamp(time));
    out.push('\n');

    let global = &config.global;
    if *global != defaults.global {
        out.push_str("global {\n");
        if global.log_level != LogLevel::default() {
            let _ = writeln!(out, "    log-level {}", quote(global.log_level.as_filter()));
        }
        if let Some(device) = &global.device {
            let _ = writeln!(out, "    device {}", quote(device));
        }
        if global.enabled != defaults.global.enabled {
            let _ = writeln!(out, "    enabled {}", global.enabled);
        }
        if global.virtual_device_name != defaults.global.virtual_device_name {
            let _ = writeln!(
                out,
                "    virtual-device-name {}",
                quote(&global.virtual_device_name)
            );
        }
        out.push_str("}\n\n");
    }

    let capture = &config.capture;
    if *capture != defaults.capture {
        out.push_str("capture {\n");
        let _ = writeln!(out, "    clear-key {}", quote(&capture.clear_key));
        let _ = writeln!(out, "    cancel-key {}", quote(&capture.cancel_key));
        if let Some(ms) = capture.timeout_ms {
            let _ = writeln!(out, "    timeout-ms {}", ms);
        }
        out.push_str("}\n\n");
    }

    if let Some(mapping) = &config.mapping {
        out.push_str("mapping {\n");
        for entry in mapping {
            let _ = writeln!(out, "    {} {}", quote(&entry.source), quote(&entry.target));
        }
        out.push_str("}\n");
    }

    out
}

/// Write `config` to `path`, creating the parent directory.
///
/// The file is written next to its destination and renamed into place, so
/// readers never observe a half-written configuration.
pub fn write_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let content = generate_config(config);
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp = path.with_extension("kdl.tmp");
    std::fs::write(&tmp, content).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;

    tracing::debug!("Wrote configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{default_mapping, CaptureConfig, KeyMapping};
    use crate::parser::parse_config_str;

    #[test]
    fn test_format_timestamp() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(951_782_400);
        assert_eq!(format_timestamp(time), "2000-02-29T00:00:00Z");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("KP1"), "\"KP1\"");
        assert_eq!(quote("\\"), "\"\\\\\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_default_config_writes_only_mapping() {
        let config = Config {
            mapping: Some(vec![KeyMapping::new("Q", "KP1")]),
            ..Config::default()
        };
        let out = generate_config_at(&config, SystemTime::UNIX_EPOCH);

        assert!(out.contains("// Written 1970-01-01T00:00:00Z"));
        assert!(!out.contains("global {"));
        assert!(!out.contains("capture {"));
        assert!(out.contains("mapping {\n    \"Q\" \"KP1\"\n}\n"));
    }

    #[test]
    fn test_generated_config_parses_back() {
        let mut config = Config::default();
        config.global.device = Some("Keychron \"K3\"".to_string());
        config.global.enabled = false;
        config.capture = CaptureConfig {
            clear_key: "Delete".to_string(),
            cancel_key: "Escape".to_string(),
            timeout_ms: Some(5000),
        };
        let mut mapping = default_mapping();
        mapping.push(KeyMapping::new(";", "KPENTER"));
        mapping.push(KeyMapping::new("\\", "KPDOT"));
        config.mapping = Some(mapping);

        let parsed = parse_config_str(&generate_config(&config)).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_write_config_creates_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.kdl");
        let config = Config {
            mapping: Some(default_mapping()),
            ..Config::default()
        };

        write_config(&config, &path).unwrap();

        let parsed = crate::parse_config(&path).unwrap();
        assert_eq!(parsed.mapping, config.mapping);
        assert!(!path.with_extension("kdl.tmp").exists());
    }
}
