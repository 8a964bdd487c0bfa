//! Configuration loading and root folder resolution
//!
//! Resolution order for the root folder:
//! 1. Command-line argument (highest priority)
//! 2. `GMNA_ROOT_FOLDER` environment variable
//! 3. `root_folder` key in the module TOML file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not an error: defaults are used and a warning is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "GMNA_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "gmna.db";

/// Directory (inside the root folder) holding emergency backup snapshots
pub const EMERGENCY_BACKUP_DIR: &str = "emergency_backups";

/// Compiled defaults used when no configuration is available
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/gmna
            dirs::data_local_dir()
                .map(|d| d.join("gmna"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/gmna"))
        } else if cfg!(target_os = "macos") {
            // ~/Library/Application Support/gmna
            dirs::data_dir()
                .map(|d| d.join("gmna"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gmna"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("gmna"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gmna"))
        } else {
            PathBuf::from("./gmna_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive for tracing-subscriber (e.g. "info", "gmna_ba=debug")
    pub level: String,
    /// Optional log file; stdout when absent
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// `[openai]` section: chat-completion endpoint used by the auditor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.7,
            max_tokens: 1500,
            timeout_secs: 60,
        }
    }
}

/// `[batch]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Pause between two consecutive audits (milliseconds)
    pub inter_item_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            inter_item_delay_ms: 1000,
        }
    }
}

/// `[persistence]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Attempts against the store before falling back to a local snapshot
    pub max_attempts: u32,
    /// Linear backoff base: delay after attempt N is N × base
    pub base_delay_ms: u64,
    /// Maximum number of local emergency snapshots kept (oldest evicted)
    pub emergency_cap: usize,
    /// Age after which non-emergency backups are deleted
    pub retention_days: u32,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            emergency_cap: 10,
            retention_days: 90,
        }
    }
}

/// Module TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub openai: OpenAiSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

/// Default TOML path for a module: `<config dir>/gmna/<module>.toml`
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gmna").join(format!("{}.toml", module_name)))
}

/// Parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load configuration, degrading to defaults when the file does not exist
///
/// A file that exists but cannot be parsed is still an error: silently
/// ignoring a typo'd credential is worse than refusing to start.
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        Some(path) if path.exists() => {
            let config = load_toml_config(path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file not found at {}, using compiled defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Resolves the root folder following the priority order in the module docs
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Command-line override (highest priority)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// `root_folder` from an already loaded TOML file
    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder from TOML: {}", path.display());
            return path.clone();
        }

        let default = CompiledDefaults::for_current_platform().root_folder;
        info!(module = %self.module_name, "Root folder from compiled default: {}", default.display());
        default
    }
}

/// Creates the root folder layout on first start
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

    /// Create the root folder and the emergency backup directory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.emergency_backup_dir())?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn emergency_backup_dir(&self) -> PathBuf {
        self.root_folder.join(EMERGENCY_BACKUP_DIR)
    }
}
