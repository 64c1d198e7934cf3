//! Editor configuration.
//!
//! Everything is optional; a missing file means defaults. Directories default
//! to the platform locations:
//! - Scratch: ~/.cache/filter-stack/scratch on Linux
//! - Exports: ~/Pictures/FilterStack on Linux
//! - Config file: ~/.config/filter-stack/config.json on Linux

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EditorError, EditorResult};
use crate::state::data::{Transform, TransformCatalog};

const APP_DIR: &str = "filter-stack";
const EXPORT_FOLDER: &str = "FilterStack";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

fn default_extension() -> String {
    "jpg".to_string()
}

fn default_timeout() -> Option<u64> {
    Some(DEFAULT_TIMEOUT_SECS)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// Where staged job files live
    pub cache_dir: Option<PathBuf>,
    /// Where exported images go
    pub export_dir: Option<PathBuf>,
    /// Extension (and so format) of transform outputs
    #[serde(default = "default_extension")]
    pub staging_extension: String,
    /// Upper bound for one engine call; `null` waits forever
    #[serde(default = "default_timeout")]
    pub engine_timeout_secs: Option<u64>,
    /// Replaces the built-in transform list when set
    pub transforms: Option<Vec<Transform>>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            export_dir: None,
            staging_extension: default_extension(),
            engine_timeout_secs: default_timeout(),
            transforms: None,
        }
    }
}

impl EditorConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(json: &str) -> EditorResult<Self> {
        serde_json::from_str(json).map_err(|e| EditorError::Config(e.to_string()))
    }

    /// Load from `path`.
    pub fn load(path: &Path) -> EditorResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EditorError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load the per-user config file if there is one, else defaults.
    pub fn load_default() -> EditorResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    pub fn resolve_cache_dir(&self) -> EditorResult<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let mut path = dirs::cache_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| EditorError::Config("could not determine cache directory".into()))?;
        path.push(APP_DIR);
        path.push("scratch");
        Ok(path)
    }

    pub fn resolve_export_dir(&self) -> EditorResult<PathBuf> {
        if let Some(dir) = &self.export_dir {
            return Ok(dir.clone());
        }
        let mut path = dirs::picture_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| EditorError::Config("could not determine pictures directory".into()))?;
        path.push(EXPORT_FOLDER);
        Ok(path)
    }

    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine_timeout_secs.map(Duration::from_secs)
    }

    pub fn catalog(&self) -> EditorResult<TransformCatalog> {
        match &self.transforms {
            None => Ok(TransformCatalog::default()),
            Some(list) if list.is_empty() => {
                Err(EditorError::Config("transform list is empty".into()))
            }
            Some(list) => Ok(TransformCatalog::new(list.clone())),
        }
    }
}
