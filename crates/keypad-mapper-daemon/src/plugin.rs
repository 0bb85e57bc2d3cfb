//! Bundle loading
//!
//! A bundle is a program meant to be driven by the remapped keypad (a game, a
//! dialer). The daemon only needs to know how to start it, so loading is kept
//! behind [`EntryPointLoader`].
//!
//! Two layouts are accepted:
//! - a directory containing `bundle.kdl` with an `entry` path
//! - a single executable file

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use keypad_mapper_config::{parse_bundle_manifest, ConfigError, MANIFEST_FILE};
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Debug, Error)]
pub enum LoadError {
    /// No runnable entry point in the bundle
    #[error("no entry point found in {path}: {reason}")]
    NotFound { path: PathBuf, reason: String },

    #[error("invalid bundle manifest: {0}")]
    Manifest(#[from] ConfigError),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    fn not_found(path: &Path, reason: impl Into<String>) -> Self {
        LoadError::NotFound {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Something that can be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnableHandle {
    /// Display name
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Directory the program runs in
    pub working_dir: PathBuf,
}

impl RunnableHandle {
    /// Start the program with inherited stdio.
    pub fn spawn(&self) -> Result<Child, LoadError> {
        tracing::info!("Launching '{}' ({})", self.name, self.program.display());
        Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LoadError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

/// Resolve a bundle path to a runnable handle
pub trait EntryPointLoader {
    fn load_entry_point(&self, path: &Path) -> Result<RunnableHandle, LoadError>;
}

/// Loader for manifest directories and plain executables
#[derive(Debug, Default, Clone, Copy)]
pub struct BundleLoader;

impl EntryPointLoader for BundleLoader {
    fn load_entry_point(&self, path: &Path) -> Result<RunnableHandle, LoadError> {
        if path.is_dir() {
            return load_directory(path);
        }
        if !is_executable(path) {
            return Err(LoadError::not_found(path, "not an executable file"));
        }

        let name = file_stem(path);
        let working_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(RunnableHandle {
            name,
            program: path.to_path_buf(),
            args: Vec::new(),
            working_dir,
        })
    }
}

fn load_directory(dir: &Path) -> Result<RunnableHandle, LoadError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(LoadError::not_found(dir, format!("missing {}", MANIFEST_FILE)));
    }

    let manifest = parse_bundle_manifest(&manifest_path)?;
    let entry = manifest
        .entry
        .ok_or_else(|| LoadError::not_found(dir, "manifest has no entry"))?;

    let program = dir.join(&entry);
    if !is_executable(&program) {
        return Err(LoadError::not_found(
            dir,
            format!("entry {} is not an executable file", entry.display()),
        ));
    }

    Ok(RunnableHandle {
        name: manifest.name.unwrap_or_else(|| file_stem(dir)),
        program,
        args: manifest.args,
        working_dir: dir.to_path_buf(),
    })
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bundle")
        .to_string()
}
