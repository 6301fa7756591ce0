//! Configuration loading: config file + environment variable overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://coordinator.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub poll_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_stale_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub no_match_timeout_seconds: u64,
    pub timeout_sweep_interval_seconds: u64,
    pub registration_gc_grace_seconds: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_seconds: 30,
            heartbeat_interval_seconds: 60,
            heartbeat_stale_seconds: 120,
            heartbeat_timeout_seconds: 300,
            no_match_timeout_seconds: 300,
            timeout_sweep_interval_seconds: 10,
            registration_gc_grace_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    None,
    Stale,
    All,
}

impl Default for RecoveryMode {
    fn default() -> Self {
        RecoveryMode::Stale
    }
}

impl std::str::FromStr for RecoveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(RecoveryMode::None),
            "stale" => Ok(RecoveryMode::Stale),
            "all" => Ok(RecoveryMode::All),
            other => anyhow::bail!("unknown recovery mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub mode: RecoveryMode,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            mode: RecoveryMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueprintsConfig {
    pub dir: PathBuf,
}

impl Default for BlueprintsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("agents"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { origins: vec![] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub dev_mode: bool,
    pub jwt_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: true,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub scheduling: SchedulingConfig,
    pub recovery: RecoveryConfig,
    pub blueprints: BlueprintsConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Loads configuration from an optional file path, then applies environment
    /// variable overrides. The spec-mandated variable names (`POLL_TIMEOUT`, etc.)
    /// are read as bare top-level overrides, since they are fixed by the wire
    /// contract rather than namespaced under this crate.
    pub fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        } else if let Some(default_path) = Self::default_path() {
            builder = builder.add_source(config::File::from(default_path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COORDINATOR")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build()?;
        let mut cfg: AppConfig = raw.try_deserialize().unwrap_or_default();

        cfg.apply_spec_env_overrides();
        Ok(cfg)
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("coordinator").join("config.toml"))
    }

    fn apply_spec_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("POLL_TIMEOUT") {
            if let Ok(v) = v.parse() {
                self.scheduling.poll_timeout_seconds = v;
            }
        }
        if let Ok(v) = std::env::var("HEARTBEAT_INTERVAL") {
            if let Ok(v) = v.parse() {
                self.scheduling.heartbeat_interval_seconds = v;
            }
        }
        if let Ok(v) = std::env::var("HEARTBEAT_TIMEOUT") {
            if let Ok(v) = v.parse() {
                self.scheduling.heartbeat_timeout_seconds = v;
            }
        }
        if let Ok(v) = std::env::var("NO_MATCH_TIMEOUT") {
            if let Ok(v) = v.parse() {
                self.scheduling.no_match_timeout_seconds = v;
            }
        }
        if let Ok(v) = std::env::var("RECOVERY_MODE") {
            if let Ok(mode) = v.parse() {
                self.recovery.mode = mode;
            }
        }
        if let Ok(v) = std::env::var("CORS_ORIGINS") {
            self.cors.origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("AGENTS_DIR") {
            self.blueprints.dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STORE_URL") {
            self.store.url = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_mode_parses_known_values() {
        assert_eq!(
            "stale".parse::<RecoveryMode>().unwrap(),
            RecoveryMode::Stale
        );
        assert!("bogus".parse::<RecoveryMode>().is_err());
    }

    #[test]
    fn default_config_has_sane_scheduling_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduling.poll_timeout_seconds, 30);
        assert_eq!(cfg.scheduling.heartbeat_timeout_seconds, 300);
    }
}
