use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const BASE_URL_ENV: &str = "REELCHAT_BASE_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Everything the client needs to talk to the service.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    pub token: TokenSettings,
    pub polling: PollSettings,
}

/// Timing of the token session: cache window, refresh cadence and backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub cache_window: Duration,
    pub refresh_interval: Duration,
    pub warmup_delay: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            cache_window: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(60),
            warmup_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_base: Duration::from_millis(1000),
        }
    }
}

impl TokenSettings {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base * 2u32.pow(exponent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Reelchat not configured—set REELCHAT_BASE_URL or create reelchat.yaml.")]
    Missing,
    #[error("Reelchat configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                format!("Reelchat not configured—set {BASE_URL_ENV} or create reelchat.yaml.")
            }
            Self::Invalid(detail) => format!("Reelchat not configured—{detail}. Update reelchat.yaml."),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: TokenSettings::default(),
            polling: PollSettings::default(),
        }
    }
}

impl ClientSettings {
    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }

    /// Load `.env`, then the first `reelchat.yaml` found, then apply the
    /// `REELCHAT_BASE_URL` override. Missing files fall back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(%err, "failed to read .env");
            }
        }
        let file = match locate_config_file() {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let env_url = std::env::var(BASE_URL_ENV).ok();
        resolve_settings(file, env_url.as_deref())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = read_config_file(path)?;
        resolve_settings(Some(file), None)
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base url is valid")
}

fn read_config_file(path: &Path) -> Result<ReelchatConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing);
    }
    let contents = fs::read_to_string(path).map_err(|err| {
        ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
    })?;
    if contents.trim().is_empty() {
        return Ok(ReelchatConfig::default());
    }
    serde_yaml::from_str(&contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid reelchat.yaml: {err}")))
}

fn resolve_settings(
    file: Option<ReelchatConfig>,
    env_url: Option<&str>,
) -> Result<ClientSettings, ConfigError> {
    let file = file.unwrap_or_default();
    let raw_url = env_url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .or(file.base_url);
    let base_url = match raw_url {
        Some(raw) => Url::parse(&raw)
            .map_err(|err| ConfigError::Invalid(format!("invalid base_url `{raw}`: {err}")))?,
        None => default_base_url(),
    };
    if base_url.cannot_be_a_base() {
        return Err(ConfigError::Invalid(format!(
            "base_url `{base_url}` cannot carry paths"
        )));
    }

    let defaults = TokenSettings::default();
    let token = file.token.unwrap_or_default();
    let token = TokenSettings {
        cache_window: millis_or(token.cache_window_ms, defaults.cache_window),
        refresh_interval: millis_or(token.refresh_interval_ms, defaults.refresh_interval),
        warmup_delay: millis_or(token.warmup_delay_ms, defaults.warmup_delay),
        request_timeout: millis_or(token.request_timeout_ms, defaults.request_timeout),
        max_retries: token.max_retries.unwrap_or(defaults.max_retries),
        retry_base: millis_or(token.retry_base_ms, defaults.retry_base),
    };
    if token.refresh_interval.is_zero() {
        return Err(ConfigError::Invalid(
            "token.refresh_interval_ms must be positive".to_string(),
        ));
    }

    let polling = PollSettings {
        interval: millis_or(
            file.polling.and_then(|section| section.interval_ms),
            PollSettings::default().interval,
        ),
    };
    if polling.interval.is_zero() {
        return Err(ConfigError::Invalid(
            "polling.interval_ms must be positive".to_string(),
        ));
    }

    Ok(ClientSettings {
        base_url,
        token,
        polling,
    })
}

fn millis_or(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(fallback)
}

fn locate_config_file() -> Option<PathBuf> {
    reelchat_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn reelchat_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("reelchat");
        paths.push(config_dir.join("reelchat.yaml"));
        paths.push(config_dir.join("reelchat.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".reelchat").join("reelchat.yaml"));
        paths.push(home_dir.join(".reelchat").join("reelchat.yml"));
    } else {
        paths.push(PathBuf::from("reelchat.yaml"));
        paths.push(PathBuf::from("reelchat.yml"));
    }
    paths
}

#[derive(Debug, Default, Deserialize)]
struct ReelchatConfig {
    base_url: Option<String>,
    token: Option<TokenSection>,
    polling: Option<PollingSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenSection {
    cache_window_ms: Option<u64>,
    refresh_interval_ms: Option<u64>,
    warmup_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PollingSection {
    interval_ms: Option<u64>,
}
