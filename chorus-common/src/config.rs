//! Configuration loading and root folder resolution
//!
//! Root folder resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `CHORUS_ROOT_FOLDER`
//! 3. `root_folder` key in the TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: resolution falls
//! through to the next tier.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "CHORUS_ROOT_FOLDER";

/// Environment variable pointing at an explicit TOML config file
pub const CONFIG_FILE_ENV: &str = "CHORUS_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "chorus.db";

/// Resolves the root folder following the 4-tier priority order
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
        }
    }

    /// Supply the value of a `--root-folder` command-line argument
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Resolve the root folder; never fails
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(module = %self.module_name, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(config_path) = config_file_path() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match toml::from_str::<toml::Value>(&content) {
                    Ok(config) => {
                        if let Some(root) = config.get("root_folder").and_then(|v| v.as_str()) {
                            debug!(module = %self.module_name, "Root folder from {}", config_path.display());
                            return PathBuf::from(root);
                        }
                    }
                    Err(e) => warn!("Ignoring malformed config file {}: {}", config_path.display(), e),
                },
                Err(e) => warn!("Could not read config file {}: {}", config_path.display(), e),
            }
        }

        // Priority 4: OS-dependent compiled default
        default_root_folder()
    }
}

/// Creates the root folder and derives file locations inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if it does not exist
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    /// Path of the SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Locate the TOML config file for this platform, if one exists
///
/// `CHORUS_CONFIG` wins; otherwise `~/.config/chorus/config.toml`, then
/// `/etc/chorus/config.toml` on Linux.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_FILE_ENV) {
        let path = PathBuf::from(explicit);
        return path.exists().then_some(path);
    }

    let user_config = dirs::config_dir().map(|d| d.join("chorus").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/chorus/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/chorus (or /var/lib/chorus for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("chorus"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/chorus"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/chorus
        dirs::data_dir()
            .map(|d| d.join("chorus"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/chorus"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\chorus
        dirs::data_local_dir()
            .map(|d| d.join("chorus"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\chorus"))
    } else {
        PathBuf::from("./chorus_data")
    }
}
