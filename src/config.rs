use crate::storage::{default_config_path, default_store_path};
use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable that overrides `store_path`.
pub const STORE_ENV: &str = "DAYLIST_STORE";

const DEFAULT_DELETE_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store_path: Option<PathBuf>,
    pub log_level: Option<String>,
    /// How long a deleted row stays on screen before it is removed.
    pub delete_delay_ms: u64,
    pub show_pending: bool,
    pub show_completed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_path: None,
            log_level: None,
            delete_delay_ms: DEFAULT_DELETE_DELAY_MS,
            show_pending: true,
            show_completed: true,
        }
    }
}

impl Config {
    /// Loads `explicit` when given (it must exist), otherwise the default
    /// config file if there is one, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("config file {:?} does not exist", path);
            }
            return Self::from_file(path);
        }
        match default_config_path() {
            Ok(path) if path.exists() => Self::from_file(&path),
            Ok(path) => {
                debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(err) => {
                debug!(error = ?err, "no config directory; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let cfg = Self::parse(&text).with_context(|| format!("parsing {:?}", path))?;
        info!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Picks the store location: `--store`, then `DAYLIST_STORE`, then the
    /// config file, then the platform data directory.
    pub fn resolve_store_path(&self, flag: Option<&Path>, env_value: Option<PathBuf>) -> Result<PathBuf> {
        let chosen = flag
            .map(Path::to_path_buf)
            .or(env_value.filter(|p| !p.as_os_str().is_empty()))
            .or_else(|| self.store_path.clone());
        match chosen {
            Some(path) => Ok(expand_tilde(&path)),
            None => default_store_path(),
        }
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_millis(self.delete_delay_ms)
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
