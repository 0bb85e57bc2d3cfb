//! keypad-mapper CLI
//!
//! Control and configuration tool for keypad-mapper.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use keypad_mapper_config::{default_mapping, generate_config, write_config, Config};
use keypad_mapper_daemon::device::enumerate_devices;
use keypad_mapper_daemon::ipc::{self, IpcClient, IpcRequest, IpcResponse};
use keypad_mapper_daemon::{CaptureOutcome, CaptureState, EngineEvent};
use miette::IntoDiagnostic;

#[derive(Parser, Debug)]
#[command(name = "keypad-mapper")]
#[command(about = "Turn keyboard keys into numeric keypad keys")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keypad-mapper/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List available input devices
    Devices,

    /// Write a configuration file with the built-in mapping
    Init {
        /// Output path (defaults to the configuration path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show current daemon status
    Status,

    /// Print the active mapping
    Show,

    /// Map SOURCE to TARGET (e.g. `set Q KP1`)
    Set { source: String, target: String },

    /// Remove the mapping of SOURCE
    Remove { source: String },

    /// Bind the next key pressed to TARGET
    Capture { target: String },

    /// Abandon a pending capture
    CancelCapture,

    /// Resume remapping
    Enable,

    /// Pass every key through unmodified
    Disable,

    /// Restore the built-in mapping
    Reset,

    /// Write the active mapping to the configuration file
    Save,

    /// Print engine notifications as they happen
    Watch,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
        Commands::Init { output, force } => {
            let path = output.unwrap_or(config_path);
            write_default_config(&path, force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Status => cmd_status(),
        Commands::Show => cmd_show(),
        Commands::Set { source, target } => cmd_simple(IpcRequest::UpdateMapping { source, target }),
        Commands::Remove { source } => cmd_simple(IpcRequest::RemoveMapping { source }),
        Commands::Capture { target } => cmd_capture(target),
        Commands::CancelCapture => cmd_simple(IpcRequest::CancelCapture),
        Commands::Enable => cmd_simple(IpcRequest::SetEnabled { enabled: true }),
        Commands::Disable => cmd_simple(IpcRequest::SetEnabled { enabled: false }),
        Commands::Reset => cmd_simple(IpcRequest::ResetDefaults),
        Commands::Save => cmd_simple(IpcRequest::Save),
        Commands::Watch => cmd_watch(),
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = keypad_mapper_config::parse_config(config_path).map_err(miette::Report::new)?;

    println!("Configuration is valid!");
    match &config.global.device {
        Some(device) => println!("  Device: {}", device),
        None => println!("  Device: every keyboard"),
    }
    println!(
        "  Capture keys: {} clears, {} cancels",
        config.capture.clear_key, config.capture.cancel_key
    );
    if config.mapping.is_none() {
        println!("  Mapping: built-in");
    }
    let mapping = config.effective_mapping();
    println!("  Mappings: {}", mapping.len());
    for entry in &mapping {
        println!("    - {} -> {}", entry.source, entry.target);
    }
    Ok(())
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    let devices = enumerate_devices().map_err(|e| miette::miette!("{:#}", e))?;
    for device in devices {
        let device_type = if device.is_keyboard { "keyboard" } else { "other" };
        println!("  {} [{}]", device.name, device_type);
        println!("    Path: {}", device.path.display());
        println!("    ID: {}", device.vendor_product());
        println!();
    }

    Ok(())
}

/// Write the built-in mapping to `path`, refusing to replace a file unless `force`.
fn write_default_config(path: &Path, force: bool) -> miette::Result<()> {
    if path.exists() && !force {
        return Err(miette::miette!(
            help = "pass --force to overwrite it",
            "{} already exists",
            path.display()
        ));
    }
    let config = Config {
        mapping: Some(default_mapping()),
        ..Config::default()
    };
    tracing::debug!("Generated:\n{}", generate_config(&config));
    write_config(&config, path).map_err(miette::Report::new)
}

fn request(request: IpcRequest) -> miette::Result<IpcResponse> {
    tracing::debug!("Sending {:?}", request);
    let response =
        ipc::send_request(&ipc::socket_path(), &request).map_err(|e| miette::miette!("{:#}", e))?;
    match response {
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        response => Ok(response),
    }
}

fn cmd_simple(req: IpcRequest) -> miette::Result<()> {
    if let IpcResponse::Success {
        message: Some(message),
    } = request(req)?
    {
        println!("{}", message);
    }
    Ok(())
}

fn cmd_status() -> miette::Result<()> {
    let IpcResponse::Status {
        enabled,
        installed,
        injection_available,
        mappings,
        capture,
        devices,
    } = request(IpcRequest::Status)?
    else {
        return Err(miette::miette!("Unexpected response to status request"));
    };

    let state = match (installed, injection_available, enabled) {
        (_, false, _) => "unavailable (no virtual keyboard)",
        (false, _, _) => "stopped",
        (true, true, true) => "active",
        (true, true, false) => "disabled",
    };
    println!("Remapping: {}", state);
    println!("Mappings: {}", mappings);
    if let CaptureState::AwaitingKey(target) = capture {
        println!("Capture: waiting for a key for {}", target);
    }
    println!("Devices:");
    if devices.is_empty() {
        println!("  (none grabbed)");
    }
    for device in devices {
        println!("  {} ({})", device.name, device.path.display());
    }
    Ok(())
}

fn cmd_show() -> miette::Result<()> {
    let IpcResponse::Mapping { entries } = request(IpcRequest::Snapshot)? else {
        return Err(miette::miette!("Unexpected response to snapshot request"));
    };
    if entries.is_empty() {
        println!("No mappings");
    }
    for entry in entries {
        println!("{:>12} -> {}", entry.source, entry.target);
    }
    Ok(())
}

fn watch_client() -> miette::Result<IpcClient> {
    let mut client = IpcClient::connect(&ipc::socket_path()).map_err(|e| miette::miette!("{:#}", e))?;
    client
        .request(&IpcRequest::Watch)
        .map_err(|e| miette::miette!("{:#}", e))?;
    Ok(client)
}

fn next_event(client: &mut IpcClient) -> miette::Result<Option<EngineEvent>> {
    loop {
        match client.next_response().map_err(|e| miette::miette!("{:#}", e))? {
            Some(IpcResponse::Event { event }) => return Ok(Some(event)),
            Some(other) => tracing::debug!("Ignoring {:?}", other),
            None => return Ok(None),
        }
    }
}

fn cmd_capture(target: String) -> miette::Result<()> {
    // Subscribe first so the outcome cannot be missed
    let mut events = watch_client()?;
    cmd_simple(IpcRequest::BeginCapture { target })?;

    while let Some(event) = next_event(&mut events)? {
        if let EngineEvent::CaptureFinished { outcome, .. } = event {
            println!("{}", describe_outcome(&outcome));
            return Ok(());
        }
    }
    Err(miette::miette!("Daemon closed the connection"))
}

fn cmd_watch() -> miette::Result<()> {
    let mut events = watch_client()?;
    while let Some(event) = next_event(&mut events)? {
        println!("{}", serde_json::to_string(&event).into_diagnostic()?);
    }
    Ok(())
}

fn describe_outcome(outcome: &CaptureOutcome) -> String {
    match outcome {
        CaptureOutcome::Bound {
            source,
            target,
            previous_source,
            previous_target,
        } => {
            let mut text = format!("{} -> {}", source, target);
            if let Some(previous) = previous_source.filter(|p| p != source) {
                text.push_str(&format!(" ({} unbound)", previous));
            }
            if let Some(previous) = previous_target.filter(|p| p != target) {
                text.push_str(&format!(" (was {})", previous));
            }
            text
        }
        CaptureOutcome::Cleared {
            target,
            unbound: Some(source),
        } => format!("Cleared {} (was {})", target, source),
        CaptureOutcome::Cleared {
            target,
            unbound: None,
        } => format!("{} was not bound", target),
        CaptureOutcome::Cancelled { target } => format!("Capture for {} cancelled", target),
        CaptureOutcome::Expired { target } => format!("Capture for {} timed out", target),
        CaptureOutcome::Replaced { target } => {
            format!("Capture for {} replaced by another capture", target)
        }
        CaptureOutcome::NotCapturing | CaptureOutcome::Ignored => String::new(),
    }
}
