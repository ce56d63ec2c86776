use crate::VerifyError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "rverify.toml";

/// Engine-wide settings, built once at startup and passed to the managers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrency cap used for queues built without an explicit one
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Highlighter nodes deeper than this are flattened
    #[serde(default = "default_highlight_depth")]
    pub highlight_max_depth: usize,

    /// Prefix for headers generated when a table is widened
    #[serde(default = "default_column_prefix")]
    pub generated_column_prefix: String,

    /// Base64-encode highlighter values
    #[serde(default)]
    pub encode_highlight: bool,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_highlight_depth() -> usize {
    16
}

fn default_column_prefix() -> String {
    "column_".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            highlight_max_depth: default_highlight_depth(),
            generated_column_prefix: default_column_prefix(),
            encode_highlight: false,
            portable_mode: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, VerifyError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let mut loaded = load_config_from(&path)?;
    loaded.portable = portable;
    loaded.config.portable_mode = portable;
    Ok(loaded)
}

pub fn load_config_from(path: &Path) -> Result<LoadedConfig, VerifyError> {
    let exists = path.exists();

    let mut config = if exists {
        let data = fs::read_to_string(path)?;
        toml::from_str::<EngineConfig>(&data).map_err(|e| VerifyError::Serialization(e.to_string()))?
    } else {
        EngineConfig::default()
    };

    if config.default_concurrency == 0 {
        config.default_concurrency = 1;
    }

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        exists,
        portable: false,
    })
}

pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig, VerifyError> {
    let loaded = load_config(prefer_portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<(), VerifyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data =
        toml::to_string_pretty(config).map_err(|e| VerifyError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), VerifyError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "aecs4u", "rverify")
        .ok_or_else(|| VerifyError::config(0, "Unable to determine config directory"))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
