//! Control requests applied to the dispatcher
//!
//! The socket layer in [`crate::ipc`] parses a request, locks the dispatcher,
//! calls [`apply_request`] and unlocks before writing the answer. Everything
//! here is synchronous so the dispatcher lock is never held across I/O.
//!
//! # Example Usage
//!
//! ```bash
//! # Rebind Q to keypad 1
//! echo '{"type":"update_mapping","source":"Q","target":"KP1"}' | \
//!   socat - UNIX-CONNECT:$XDG_RUNTIME_DIR/keypad-mapper.sock
//!
//! # Or use the CLI
//! keypad-mapper set Q KP1
//! ```

use std::path::PathBuf;

use keypad_mapper_config::{write_config, Config};

use crate::dispatcher::RemapDispatcher;
use crate::injector::SyntheticInputEmitter;
use crate::ipc::{DeviceStatus, IpcRequest, IpcResponse, MappingEntry};
use crate::key::KeyCode;
use crate::mapping::MappingTable;

/// Daemon state the control socket needs besides the dispatcher
#[derive(Debug, Clone, Default)]
pub struct ControlContext {
    /// Where `save` writes the configuration
    pub config_path: PathBuf,
    /// The configuration the daemon started with
    pub config: Config,
    /// Keyboards grabbed at startup
    pub devices: Vec<DeviceStatus>,
}

/// Execute one request against the dispatcher.
///
/// `watch` only gets its acknowledgement here; streaming is the connection's job.
pub fn apply_request<E: SyntheticInputEmitter>(
    dispatcher: &mut RemapDispatcher<E>,
    request: IpcRequest,
    ctx: &ControlContext,
) -> IpcResponse {
    match request {
        IpcRequest::Status => IpcResponse::Status {
            enabled: dispatcher.is_enabled(),
            installed: dispatcher.is_installed(),
            injection_available: dispatcher.injection_available(),
            mappings: dispatcher.table().len(),
            capture: dispatcher.capture_state(),
            devices: ctx.devices.clone(),
        },
        IpcRequest::Snapshot => IpcResponse::Mapping {
            entries: mapping_entries(dispatcher.table()),
        },
        IpcRequest::SetEnabled { enabled } => {
            dispatcher.set_enabled(enabled);
            IpcResponse::success(format!(
                "Remapping {}",
                if enabled { "enabled" } else { "disabled" }
            ))
        }
        IpcRequest::UpdateMapping { source, target } => {
            let result = resolve(&source).and_then(|s| {
                let t = resolve(&target)?;
                dispatcher
                    .update_mapping(s, t)
                    .map(|previous| (s, t, previous))
                    .map_err(|e| e.to_string())
            });
            match result {
                Ok((s, t, Some(previous))) => {
                    IpcResponse::success(format!("{} -> {} (was {})", s, t, previous))
                }
                Ok((s, t, None)) => IpcResponse::success(format!("{} -> {}", s, t)),
                Err(message) => IpcResponse::Error { message },
            }
        }
        IpcRequest::RemoveMapping { source } => {
            let result = resolve(&source).and_then(|s| {
                dispatcher
                    .remove_mapping(s)
                    .map(|removed| (s, removed))
                    .map_err(|e| e.to_string())
            });
            match result {
                Ok((s, Some(target))) => IpcResponse::success(format!("Removed {} -> {}", s, target)),
                Ok((s, None)) => IpcResponse::success(format!("{} was not mapped", s)),
                Err(message) => IpcResponse::Error { message },
            }
        }
        IpcRequest::BeginCapture { target } => {
            let result = resolve(&target)
                .and_then(|t| dispatcher.begin_capture(t).map(|_| t).map_err(|e| e.to_string()));
            match result {
                Ok(t) => {
                    let keys = dispatcher.capture_keys();
                    IpcResponse::success(format!(
                        "Press a key to bind to {} ({} clears, {} cancels)",
                        t, keys.clear, keys.cancel
                    ))
                }
                Err(message) => IpcResponse::Error { message },
            }
        }
        IpcRequest::CancelCapture => match dispatcher.cancel_capture() {
            Some(target) => IpcResponse::success(format!("Capture for {} cancelled", target)),
            None => IpcResponse::success("No capture pending"),
        },
        IpcRequest::ResetDefaults => {
            let defaults = MappingTable::with_defaults();
            match dispatcher.replace_mapping(defaults.iter()) {
                Ok(()) => IpcResponse::success(format!(
                    "Restored {} default mappings",
                    defaults.len()
                )),
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            }
        }
        IpcRequest::Save => save(dispatcher.table(), ctx),
        IpcRequest::Watch => IpcResponse::Success { message: None },
    }
}

fn resolve(name: &str) -> Result<KeyCode, String> {
    KeyCode::parse(name).map_err(|e| e.to_string())
}

fn mapping_entries(table: &MappingTable) -> Vec<MappingEntry> {
    table
        .iter()
        .map(|(source, target)| MappingEntry {
            source: source.name(),
            target: target.name(),
        })
        .collect()
}

/// Write the current table as the `mapping` block, keeping the rest of the
/// startup configuration.
fn save(table: &MappingTable, ctx: &ControlContext) -> IpcResponse {
    let mut config = ctx.config.clone();
    config.mapping = Some(table.to_config());

    match write_config(&config, &ctx.config_path) {
        Ok(()) => {
            tracing::info!("Saved {} mappings to {}", table.len(), ctx.config_path.display());
            IpcResponse::success(format!("Saved to {}", ctx.config_path.display()))
        }
        Err(e) => {
            tracing::warn!("Failed to save configuration: {}", e);
            IpcResponse::Error {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use evdev::Key;
    use keypad_mapper_config::{parse_config, GlobalConfig};
    use tempfile::TempDir;

    use super::*;
    use crate::injector::test_support::RecordingEmitter;
    use crate::reassign::CaptureState;

    fn dispatcher() -> RemapDispatcher<RecordingEmitter> {
        let table = MappingTable::from_pairs([(Key::KEY_Q.into(), Key::KEY_KP1.into())]).unwrap();
        let mut d = RemapDispatcher::new(table, Some(RecordingEmitter::default()));
        d.install();
        d
    }

    fn entry(source: &str, target: &str) -> MappingEntry {
        MappingEntry {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn test_snapshot_uses_key_names() {
        let mut d = dispatcher();
        let response = apply_request(&mut d, IpcRequest::Snapshot, &ControlContext::default());
        assert_eq!(
            response,
            IpcResponse::Mapping {
                entries: vec![entry("Q", "KP1")]
            }
        );
    }

    #[test]
    fn test_update_and_remove_mapping() {
        let mut d = dispatcher();
        let ctx = ControlContext::default();

        let response = apply_request(
            &mut d,
            IpcRequest::UpdateMapping {
                source: "w".to_string(),
                target: "KP2".to_string(),
            },
            &ctx,
        );
        assert!(matches!(response, IpcResponse::Success { .. }));
        assert_eq!(
            d.table().target_for(Key::KEY_W.into()),
            Some(Key::KEY_KP2.into())
        );

        let response = apply_request(
            &mut d,
            IpcRequest::RemoveMapping {
                source: "Q".to_string(),
            },
            &ctx,
        );
        assert_eq!(response, IpcResponse::success("Removed Q -> KP1"));
        assert_eq!(d.table().target_for(Key::KEY_Q.into()), None);
    }

    #[test]
    fn test_unknown_key_name_is_an_error() {
        let mut d = dispatcher();
        let before = d.snapshot();

        let response = apply_request(
            &mut d,
            IpcRequest::UpdateMapping {
                source: "Q".to_string(),
                target: "Hyper".to_string(),
            },
            &ControlContext::default(),
        );

        match response {
            IpcResponse::Error { message } => assert!(message.contains("Hyper")),
            other => panic!("Expected error, got {:?}", other),
        }
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn test_status_reports_state() {
        let mut d = dispatcher();
        d.set_enabled(false);
        d.begin_capture(Key::KEY_KP4.into()).unwrap();

        let response = apply_request(&mut d, IpcRequest::Status, &ControlContext::default());
        assert_eq!(
            response,
            IpcResponse::Status {
                enabled: false,
                installed: true,
                injection_available: true,
                mappings: 1,
                capture: CaptureState::AwaitingKey(Key::KEY_KP4.into()),
                devices: vec![],
            }
        );
    }

    #[test]
    fn test_capture_requests() {
        let mut d = dispatcher();
        let ctx = ControlContext::default();

        let response = apply_request(
            &mut d,
            IpcRequest::BeginCapture {
                target: "KP5".to_string(),
            },
            &ctx,
        );
        assert!(matches!(response, IpcResponse::Success { .. }));
        assert!(d.capture_state() != CaptureState::Idle);

        let response = apply_request(&mut d, IpcRequest::CancelCapture, &ctx);
        assert_eq!(response, IpcResponse::success("Capture for KP5 cancelled"));
        assert_eq!(d.capture_state(), CaptureState::Idle);
    }

    #[test]
    fn test_reset_defaults() {
        let mut d = dispatcher();
        d.update_mapping(Key::KEY_L.into(), Key::KEY_KPENTER.into())
            .unwrap();

        apply_request(&mut d, IpcRequest::ResetDefaults, &ControlContext::default());
        assert_eq!(d.table(), &MappingTable::with_defaults());
    }

    #[test]
    fn test_save_preserves_other_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("keypad-mapper").join("config.kdl");
        let ctx = ControlContext {
            config_path: config_path.clone(),
            config: Config {
                global: GlobalConfig {
                    device: Some("AT Translated Set 2 keyboard".to_string()),
                    ..GlobalConfig::default()
                },
                ..Config::default()
            },
            devices: vec![],
        };
        let mut d = dispatcher();
        d.update_mapping(Key::KEY_SPACE.into(), Key::KEY_KP0.into())
            .unwrap();

        let response = apply_request(&mut d, IpcRequest::Save, &ctx);
        assert!(matches!(response, IpcResponse::Success { .. }));

        let saved = parse_config(&config_path).unwrap();
        assert_eq!(
            saved.global.device.as_deref(),
            Some("AT Translated Set 2 keyboard")
        );
        let table = MappingTable::from_config(&saved.effective_mapping()).unwrap();
        assert_eq!(&table, d.table());
    }
}
