//! Resolver configuration

use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default location of a player script, `{version}` is substituted
pub const DEFAULT_PLAYER_URL_TEMPLATE: &str =
    "https://www.youtube.com/s/player/{version}/player_ias.vflset/en_US/base.js";

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Player script URL template
    pub player_url_template: String,
    /// Budget for fetching a player script
    #[serde(with = "humantime_serde_compat")]
    pub script_timeout: Duration,
    /// Budget for probing a chunked stream
    #[serde(with = "humantime_serde_compat")]
    pub probe_timeout: Duration,
    /// CPU budget for one sandbox invocation
    #[serde(with = "humantime_serde_compat")]
    pub eval_timeout: Duration,
    /// Maximum number of player versions kept compiled
    pub max_cached_players: u64,
    /// Maximum number of memoized n-param results per player version
    pub max_cached_n_params: u64,
    /// Maximum number of synthesized manifests kept (0 disables)
    pub max_cached_manifests: u64,
    /// User agent string
    pub user_agent: Option<String>,
    /// Proxy URL
    pub proxy_url: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            player_url_template: DEFAULT_PLAYER_URL_TEMPLATE.to_string(),
            script_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(15),
            eval_timeout: Duration::from_secs(2),
            max_cached_players: 8,
            max_cached_n_params: 512,
            max_cached_manifests: 0,
            user_agent: None,
            proxy_url: None,
        }
    }
}

impl ResolverConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration overlaid with `RYT_*` environment variables
    pub fn from_env() -> Result<Self, ResolveError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values from a key lookup (environment-style names)
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ResolveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(template) = lookup("RYT_PLAYER_URL_TEMPLATE") {
            self.player_url_template = template;
        }
        if let Some(value) = lookup("RYT_SCRIPT_TIMEOUT") {
            self.script_timeout = parse_duration("RYT_SCRIPT_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("RYT_PROBE_TIMEOUT") {
            self.probe_timeout = parse_duration("RYT_PROBE_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("RYT_EVAL_TIMEOUT") {
            self.eval_timeout = parse_duration("RYT_EVAL_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("RYT_MAX_CACHED_PLAYERS") {
            self.max_cached_players = parse_count("RYT_MAX_CACHED_PLAYERS", &value)?;
        }
        if let Some(value) = lookup("RYT_MAX_CACHED_N_PARAMS") {
            self.max_cached_n_params = parse_count("RYT_MAX_CACHED_N_PARAMS", &value)?;
        }
        if let Some(value) = lookup("RYT_MAX_CACHED_MANIFESTS") {
            self.max_cached_manifests = parse_count("RYT_MAX_CACHED_MANIFESTS", &value)?;
        }
        if let Some(value) = lookup("RYT_USER_AGENT") {
            self.user_agent = Some(value);
        }
        if let Some(value) = lookup("RYT_PROXY") {
            self.proxy_url = Some(value);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants the resolver relies on
    pub fn validate(&self) -> Result<(), ResolveError> {
        if !self.player_url_template.contains("{version}") {
            return Err(ResolveError::Config(
                "player_url_template must contain {version}".to_string(),
            ));
        }
        if self.max_cached_players == 0 {
            return Err(ResolveError::Config(
                "max_cached_players must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Player script URL for a version
    pub fn player_url(&self, version: &str) -> String {
        self.player_url_template.replace("{version}", version)
    }

    pub fn with_player_url_template(mut self, template: &str) -> Self {
        self.player_url_template = template.to_string();
        self
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = timeout;
        self
    }

    pub fn with_max_cached_players(mut self, max: u64) -> Self {
        self.max_cached_players = max;
        self
    }

    pub fn with_max_cached_n_params(mut self, max: u64) -> Self {
        self.max_cached_n_params = max;
        self
    }

    pub fn with_max_cached_manifests(mut self, max: u64) -> Self {
        self.max_cached_manifests = max;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_proxy(mut self, proxy_url: &str) -> Self {
        self.proxy_url = Some(proxy_url.to_string());
        self
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ResolveError> {
    humantime::parse_duration(value.trim())
        .map_err(|e| ResolveError::Config(format!("{}: {}", key, e)))
}

fn parse_count(key: &str, value: &str) -> Result<u64, ResolveError> {
    value
        .trim()
        .parse()
        .map_err(|e| ResolveError::Config(format!("{}: {}", key, e)))
}

/// Durations are written the way humans type them ("30s", "1m 30s")
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
