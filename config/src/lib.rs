//! Configuration for rollout-watch.
//!
//! ```toml
//! environment = "prd"
//!
//! [deadline]
//! production_secs = 1200
//! non_production_secs = 480
//!
//! [convergence]
//! grace_secs = 60
//! poll_interval_secs = 20
//! max_attempts = 50
//!
//! [platform]
//! base_url = "https://mesh.internal"
//! token = "${ROLLOUT_PLATFORM_TOKEN}"
//!
//! [upstream]
//! base_url = "https://pms.internal"
//! token = "${ROLLOUT_UPSTREAM_TOKEN}"
//! ```
//!
//! Every section is optional. String values expand `${VAR}` references from
//! the process environment when read through the accessor methods.

use serde::Deserialize;
use std::{env, fmt, path::PathBuf, time::Duration};
use thiserror::Error;

pub const DEFAULT_PRODUCTION_DEADLINE_SECS: u64 = 20 * 60;
pub const DEFAULT_NON_PRODUCTION_DEADLINE_SECS: u64 = 8 * 60;
pub const DEFAULT_GRACE_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RESULT_PATH: &str = "/mdp/release/result";
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Run mode that selects the long deadline.
const PRODUCTION_RUN_MODE: &str = "prd";

const CONFIG_ENV_VAR: &str = "ROLLOUT_CONFIG";
const ENVIRONMENT_ENV_VAR: &str = "ROLLOUT_ENV";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RolloutConfig {
    /// Run mode name, e.g. "prd", "uat", "dev".
    pub environment: Option<String>,
    pub deadline: Option<DeadlineConfig>,
    pub convergence: Option<ConvergenceConfig>,
    pub executor: Option<ExecutorConfig>,
    pub platform: Option<PlatformConfig>,
    pub upstream: Option<UpstreamConfig>,
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeadlineConfig {
    pub production_secs: Option<u64>,
    pub non_production_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvergenceConfig {
    pub grace_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutorConfig {
    /// Pause between recording the outcome and propagating it.
    pub settle_delay_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
pub struct PlatformConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Default, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub result_path: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    pub path: Option<String>,
}

fn mask(opt: Option<&String>) -> &'static str {
    if opt.is_some() { "[REDACTED]" } else { "None" }
}

// Manual Debug impls to prevent leaking credentials in logs.
impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("base_url", &self.base_url)
            .field("token", &mask(self.token.as_ref()))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("token", &mask(self.token.as_ref()))
            .field("result_path", &self.result_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Deployment environment class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentClass {
    Production,
    NonProduction,
}

/// The environment this process runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    name: String,
    class: EnvironmentClass,
}

impl Environment {
    #[must_use]
    pub fn from_run_mode(mode: &str) -> Self {
        let class = if mode == PRODUCTION_RUN_MODE {
            EnvironmentClass::Production
        } else {
            EnvironmentClass::NonProduction
        };
        Self {
            name: mode.to_string(),
            class,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn class(&self) -> EnvironmentClass {
        self.class
    }

    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self.class, EnvironmentClass::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Resolved convergence loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceSettings {
    pub grace: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(DEFAULT_GRACE_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Resolved upstream release-system endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamEndpoint {
    pub base_url: String,
    pub token: String,
    pub result_path: String,
    pub timeout: Duration,
}

impl fmt::Debug for UpstreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamEndpoint")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("result_path", &self.result_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Resolved orchestration platform endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformEndpoint {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for PlatformEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformEndpoint")
            .field("base_url", &self.base_url)
            .field("token", &mask(self.token.as_ref()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RolloutConfig {
    /// Load the config file, if one exists.
    ///
    /// `Ok(None)` means there is no file to read; callers fall back to defaults.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    /// Environment from `ROLLOUT_ENV`, then the config file, then the default.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment_with_override(env::var(ENVIRONMENT_ENV_VAR).ok())
    }

    fn environment_with_override(&self, override_mode: Option<String>) -> Environment {
        let mode = override_mode
            .filter(|mode| !mode.trim().is_empty())
            .or_else(|| self.environment.clone())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        Environment::from_run_mode(mode.trim())
    }

    /// Wall-clock deadline for one operation in the given environment.
    #[must_use]
    pub fn deadline_for(&self, environment: &Environment) -> Duration {
        let deadline = self.deadline.as_ref();
        let secs = match environment.class() {
            EnvironmentClass::Production => deadline
                .and_then(|d| d.production_secs)
                .unwrap_or(DEFAULT_PRODUCTION_DEADLINE_SECS),
            EnvironmentClass::NonProduction => deadline
                .and_then(|d| d.non_production_secs)
                .unwrap_or(DEFAULT_NON_PRODUCTION_DEADLINE_SECS),
        };
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn convergence(&self) -> ConvergenceSettings {
        let defaults = ConvergenceSettings::default();
        let Some(cfg) = self.convergence.as_ref() else {
            return defaults;
        };
        ConvergenceSettings {
            grace: cfg.grace_secs.map_or(defaults.grace, Duration::from_secs),
            poll_interval: cfg
                .poll_interval_secs
                .map_or(defaults.poll_interval, Duration::from_secs),
            max_attempts: cfg.max_attempts.unwrap_or(defaults.max_attempts),
        }
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        let ms = self
            .executor
            .as_ref()
            .and_then(|e| e.settle_delay_ms)
            .unwrap_or(DEFAULT_SETTLE_DELAY_MS);
        Duration::from_millis(ms)
    }

    /// Platform endpoint, or `None` when no base URL is configured.
    #[must_use]
    pub fn platform(&self) -> Option<PlatformEndpoint> {
        let cfg = self.platform.as_ref()?;
        let base_url = non_empty_expanded(cfg.base_url.as_deref())?;
        Some(PlatformEndpoint {
            base_url,
            token: non_empty_expanded(cfg.token.as_deref()),
            timeout: Duration::from_secs(
                cfg.request_timeout_secs
                    .unwrap_or(DEFAULT_PLATFORM_TIMEOUT_SECS),
            ),
        })
    }

    /// Upstream endpoint, or `None` when notifications are not configured.
    #[must_use]
    pub fn upstream(&self) -> Option<UpstreamEndpoint> {
        let cfg = self.upstream.as_ref()?;
        let base_url = non_empty_expanded(cfg.base_url.as_deref())?;
        Some(UpstreamEndpoint {
            base_url,
            token: non_empty_expanded(cfg.token.as_deref()).unwrap_or_default(),
            result_path: non_empty_expanded(cfg.result_path.as_deref())
                .unwrap_or_else(|| DEFAULT_RESULT_PATH.to_string()),
            timeout: Duration::from_secs(
                cfg.request_timeout_secs
                    .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            ),
        })
    }

    /// Database path, or `None` if neither the config nor a home dir provides one.
    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .and_then(|s| non_empty_expanded(s.path.as_deref()))
            .map(PathBuf::from)
            .or_else(|| rollout_dir().map(|dir| dir.join("rollout.db")))
    }

    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

fn non_empty_expanded(value: Option<&str>) -> Option<String> {
    let expanded = expand_env_vars(value?);
    let trimmed = expanded.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Replace `${VAR}` references with environment values (missing vars become empty).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

/// `~/.rollout`, the home of config, logs and the default database.
pub fn rollout_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".rollout"))
}

pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    rollout_dir().map(|dir| dir.join("config.toml"))
}
