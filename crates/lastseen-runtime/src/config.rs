//! Daemon configuration: optional TOML file, environment, CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use lastseen_probe_whatsapp::WhatsAppConfig;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "LASTSEEN_CONFIG";
const SEARCH_PATH: [&str; 2] = ["lastseen.toml", "/etc/lastseen.toml"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    /// Seconds between poll cycles.
    pub update_interval_secs: u64,
    pub socket_path: Option<String>,
    pub whatsapp: WhatsAppConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("lastseen.db"),
            update_interval_secs: 1800,
            socket_path: None,
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

impl Config {
    /// Load from the first configuration file found, or defaults when none exists.
    ///
    /// An explicitly named file (flag or `$LASTSEEN_CONFIG`) must exist; the
    /// fallback search path entries are skipped when missing.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let fallbacks: Vec<PathBuf> = SEARCH_PATH.iter().map(PathBuf::from).collect();

        match locate(explicit, from_env.as_deref(), &fallbacks) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read config {}", path.display()))?;
                let config = Self::from_toml_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?;
                tracing::debug!(path = %path.display(), "loaded config");
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `daemon` flags (clap has already folded in their env vars).
    pub fn apply_overrides(
        &mut self,
        interval: Option<u64>,
        database: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        if let Some(secs) = interval {
            self.update_interval_secs = secs;
        }
        if let Some(path) = database {
            self.database_path = path;
        }
        self.validate()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.update_interval_secs == 0 {
            anyhow::bail!("update_interval_secs must be greater than zero");
        }
        self.whatsapp.vocabularies()?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Socket path: --socket-path > config file > per-user default.
    pub fn socket_path(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.socket_path.clone())
            .unwrap_or_else(crate::cli::default_socket_path)
    }
}

fn locate(explicit: Option<&Path>, from_env: Option<&Path>, fallbacks: &[PathBuf]) -> Option<PathBuf> {
    explicit
        .or(from_env)
        .map(Path::to_path_buf)
        .or_else(|| fallbacks.iter().find(|p| p.is_file()).cloned())
}
