//! keypad-mapper daemon
//!
//! Grabs keyboards and turns configured keys into numeric keypad keys.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use keypad_mapper_config::Config;
use keypad_mapper_daemon::control::ControlContext;
use keypad_mapper_daemon::device::{enumerate_devices, select_keyboards};
use keypad_mapper_daemon::device_manager::DeviceManager;
use keypad_mapper_daemon::ipc::IpcServer;
use keypad_mapper_daemon::plugin::{BundleLoader, EntryPointLoader};
use keypad_mapper_daemon::{CaptureKeys, KeyCode, MappingTable, RemapDispatcher, VirtualDevice};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keypad-mapperd")]
#[command(about = "Keyboard to numeric keypad remapping daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keypad-mapper/config.kdl")]
    config: String,

    /// Only grab the keyboard with this name (overrides the config)
    #[arg(short, long)]
    device: Option<String>,

    /// Bundle or executable to run; the daemon exits when it does
    #[arg(short, long)]
    launch: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();
    let config = keypad_mapper_config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_filter())),
        )
        .init();

    tracing::info!("Loaded configuration from {}", config_path.display());

    let dispatcher = build_dispatcher(&config)?;
    let injection_available = dispatcher.injection_available();
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    let mut device_manager = DeviceManager::new();
    if injection_available {
        let devices = enumerate_devices()?;
        let wanted = args.device.as_deref().or(config.global.device.as_deref());
        let keyboards = select_keyboards(&devices, wanted, &config.global.virtual_device_name);
        if keyboards.is_empty() {
            match wanted {
                Some(name) => tracing::warn!("No keyboard named '{}' found", name),
                None => tracing::warn!("No keyboards found"),
            }
        }
        device_manager.grab_all(keyboards);
    } else {
        tracing::info!("Not grabbing any keyboard");
    }

    let ctx = Arc::new(ControlContext {
        config_path,
        config,
        devices: device_manager.statuses(),
    });
    let readers = device_manager.spawn_readers(Arc::clone(&dispatcher))?;

    let server = IpcServer::new()?;
    let mut ipc = tokio::spawn(server.serve(Arc::clone(&dispatcher), ctx));

    let mut child = match &args.launch {
        Some(bundle) => {
            let handle = BundleLoader
                .load_entry_point(bundle)
                .with_context(|| format!("Failed to load bundle {}", bundle.display()))?;
            Some(handle.spawn()?)
        }
        None => None,
    };

    tracing::info!("keypad-mapper daemon running");

    let ipc_stopped = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down...");
            false
        }
        status = wait_for_child(&mut child) => {
            match status {
                Ok(status) => tracing::info!("Launched program exited ({}), shutting down", status),
                Err(e) => tracing::warn!("Failed to wait for launched program: {}", e),
            }
            false
        }
        result = &mut ipc => {
            match result {
                Ok(Err(e)) => tracing::error!("IPC server stopped: {:#}", e),
                Ok(Ok(())) => {}
                Err(e) => tracing::error!("IPC server task failed: {}", e),
            }
            true
        }
    };

    dispatcher.lock().await.uninstall();

    for reader in &readers {
        reader.abort();
    }
    if !ipc_stopped {
        ipc.abort();
        // Dropping the server removes the socket file
        let _ = ipc.await;
    }

    Ok(())
}

fn build_dispatcher(config: &Config) -> Result<RemapDispatcher<VirtualDevice>> {
    let table = MappingTable::from_config(&config.effective_mapping())
        .context("Invalid mapping in configuration")?;

    let keys = CaptureKeys {
        clear: KeyCode::parse(&config.capture.clear_key)?,
        cancel: KeyCode::parse(&config.capture.cancel_key)?,
    };
    let timeout = config.capture.timeout_ms.map(Duration::from_millis);

    let emitter = match VirtualDevice::new_keyboard(&config.global.virtual_device_name) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("{}; is /dev/uinput writable?", e);
            None
        }
    };

    let mut dispatcher = RemapDispatcher::new(table, emitter).with_capture(keys, timeout);
    dispatcher.set_enabled(config.global.enabled);
    dispatcher.install();
    Ok(dispatcher)
}

async fn wait_for_child(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}
