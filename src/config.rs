//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channels::discord::{DEFAULT_API_BASE, DEFAULT_TIMEOUT};
use crate::error::ConfigError;

/// Longest accepted poll interval: one day.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Monitor configuration.
///
/// Built from defaults, then environment variables, then CLI flags.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Guild the channel belongs to (only used for the channel URL).
    pub guild_id: String,
    /// Channel to watch.
    pub channel_id: String,
    /// API root.
    pub api_base: String,
    /// Application codes are typed into.
    pub target_app: String,
    /// Minimum time between fetches.
    pub poll_interval: Duration,
    /// Messages requested per fetch.
    pub page_limit: u8,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Idle sleep between loop iterations.
    pub tick: Duration,
    /// Consecutive fetch failures that force a token refresh.
    pub max_consecutive_errors: u32,
    /// Cached credential.
    pub token_file: PathBuf,
    /// Persisted ban list / whitelist.
    pub filters_file: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            guild_id: "1320757665118556160".to_string(),
            channel_id: "1321156950486028378".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            target_app: "Fellou".to_string(),
            poll_interval: Duration::from_secs(5),
            page_limit: 50,
            request_timeout: DEFAULT_TIMEOUT,
            tick: Duration::from_secs(1),
            max_consecutive_errors: 5,
            token_file: PathBuf::from("discord_token.txt"),
            filters_file: PathBuf::from("user_filters.json"),
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `CODE_RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("CODE_RELAY_GUILD_ID") {
            config.guild_id = v;
        }
        if let Some(v) = var("CODE_RELAY_CHANNEL_ID") {
            config.channel_id = v;
        }
        if let Some(v) = var("CODE_RELAY_API_BASE") {
            config.api_base = v;
        }
        if let Some(v) = var("CODE_RELAY_TARGET_APP") {
            config.target_app = v;
        }
        if let Some(v) = var("CODE_RELAY_POLL_INTERVAL_SECS") {
            let secs: u64 = parse("CODE_RELAY_POLL_INTERVAL_SECS", &v)?;
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(v) = var("CODE_RELAY_PAGE_LIMIT") {
            config.page_limit = parse("CODE_RELAY_PAGE_LIMIT", &v)?;
        }
        if let Some(v) = var("CODE_RELAY_TOKEN_FILE") {
            config.token_file = PathBuf::from(v);
        }
        if let Some(v) = var("CODE_RELAY_FILTERS_FILE") {
            config.filters_file = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval".into(),
                message: "must be at least one second".into(),
            });
        }
        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval".into(),
                message: format!(
                    "{}s exceeds the {}s maximum",
                    self.poll_interval.as_secs(),
                    MAX_POLL_INTERVAL.as_secs()
                ),
            });
        }
        if !(1..=100).contains(&self.page_limit) {
            return Err(ConfigError::InvalidValue {
                key: "page_limit".into(),
                message: format!("{} is outside 1..=100", self.page_limit),
            });
        }
        Ok(())
    }

    /// Browser URL of the watched channel.
    pub fn channel_url(&self) -> String {
        format!(
            "https://discord.com/channels/{}/{}",
            self.guild_id, self.channel_id
        )
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{value:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.max_consecutive_errors, 5);
        assert_eq!(
            config.channel_url(),
            "https://discord.com/channels/1320757665118556160/1321156950486028378"
        );
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("CODE_RELAY_CHANNEL_ID", "99"),
            ("CODE_RELAY_POLL_INTERVAL_SECS", " 12 "),
            ("CODE_RELAY_PAGE_LIMIT", "20"),
            ("CODE_RELAY_TARGET_APP", "Other App"),
            ("CODE_RELAY_TOKEN_FILE", "/tmp/t.txt"),
        ]))
        .unwrap();
        assert_eq!(config.channel_id, "99");
        assert_eq!(config.poll_interval, Duration::from_secs(12));
        assert_eq!(config.page_limit, 20);
        assert_eq!(config.target_app, "Other App");
        assert_eq!(config.token_file, PathBuf::from("/tmp/t.txt"));
    }

    #[test]
    fn blank_env_values_ignored() {
        let config = MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_CHANNEL_ID", "  ")])).unwrap();
        assert_eq!(config.channel_id, MonitorConfig::default().channel_id);
    }

    #[test]
    fn invalid_number_rejected() {
        let err = MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_POLL_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CODE_RELAY_POLL_INTERVAL_SECS"));
    }

    #[test]
    fn out_of_range_values_rejected() {
        assert!(MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_POLL_INTERVAL_SECS", "0")])).is_err());
        assert!(MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_POLL_INTERVAL_SECS", "100000")])).is_err());
        assert!(MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_POLL_INTERVAL_SECS", "86400")])).is_ok());
        assert!(MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_PAGE_LIMIT", "0")])).is_err());
        assert!(MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_PAGE_LIMIT", "101")])).is_err());
        assert!(MonitorConfig::from_lookup(lookup(&[("CODE_RELAY_PAGE_LIMIT", "300")])).is_err());
    }
}
