//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::beta::store::DEFAULT_SHARDS;
use crate::error::ConfigError;

/// Bot configuration, read from the environment.
#[derive(Debug)]
pub struct BotConfig {
    /// Enables the Telegram channel when set.
    pub telegram_token: Option<SecretString>,
    /// Usernames or numeric ids allowed to talk to the bot. `*` = everyone.
    pub allowed_users: Vec<String>,
    pub db_path: PathBuf,
    pub store_shards: usize,
    /// Evict in-progress applications idle this long. `None` keeps them forever.
    pub idle_evict: Option<Duration>,
    /// Idle time before a per-user lane task exits.
    pub lane_idle: Duration,
    pub cli_enabled: bool,
    /// Directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            allowed_users: vec!["*".to_string()],
            db_path: PathBuf::from("./data/beta-bot.db"),
            store_shards: DEFAULT_SHARDS,
            idle_evict: None,
            lane_idle: Duration::from_secs(300), // 5 minutes
            cli_enabled: true,
            log_dir: None,
        }
    }
}

impl BotConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN").map(SecretString::from);

        let allowed_users: Vec<String> = get("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let db_path = get("BETA_BOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let store_shards = match get("BETA_BOT_STORE_SHARDS") {
            Some(v) => match parse_number("BETA_BOT_STORE_SHARDS", &v)? {
                0 => {
                    return Err(ConfigError::InvalidValue {
                        key: "BETA_BOT_STORE_SHARDS".into(),
                        message: "must be at least 1".into(),
                    });
                }
                n => n as usize,
            },
            None => defaults.store_shards,
        };

        let idle_evict = match get("BETA_BOT_IDLE_EVICT_SECS") {
            Some(v) => match parse_number("BETA_BOT_IDLE_EVICT_SECS", &v)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.idle_evict,
        };

        let lane_idle = match get("BETA_BOT_LANE_IDLE_SECS") {
            Some(v) => Duration::from_secs(parse_number("BETA_BOT_LANE_IDLE_SECS", &v)?.max(1)),
            None => defaults.lane_idle,
        };

        let cli_enabled = match get("BETA_BOT_CLI") {
            Some(v) => parse_bool("BETA_BOT_CLI", &v)?,
            None => telegram_token.is_none(),
        };

        let log_dir = get("BETA_BOT_LOG_DIR").map(PathBuf::from);

        let config = Self {
            telegram_token,
            allowed_users,
            db_path,
            store_shards,
            idle_evict,
            lane_idle,
            cli_enabled,
            log_dir,
        };

        if config.telegram_token.is_none() && !config.cli_enabled {
            return Err(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()));
        }
        Ok(config)
    }

    /// Whether the allow-list admits everyone.
    pub fn allows_everyone(&self) -> bool {
        self.allowed_users.iter().any(|u| u == "*")
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value:?}: {e}"),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{other:?} is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.telegram_token.is_none());
        assert!(cfg.cli_enabled);
        assert!(cfg.allows_everyone());
        assert_eq!(cfg.db_path, PathBuf::from("./data/beta-bot.db"));
        assert_eq!(cfg.store_shards, 16);
        assert_eq!(cfg.idle_evict, None);
        assert_eq!(cfg.lane_idle, Duration::from_secs(300));
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn token_disables_cli_by_default() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "123:ABC"),
            ("TELEGRAM_ALLOWED_USERS", "alice, 42 ,,"),
        ])
        .unwrap();
        assert_eq!(
            cfg.telegram_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("123:ABC".to_string())
        );
        assert!(!cfg.cli_enabled);
        assert_eq!(cfg.allowed_users, vec!["alice", "42"]);
        assert!(!cfg.allows_everyone());
    }

    #[test]
    fn explicit_values_are_parsed() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("BETA_BOT_CLI", "true"),
            ("BETA_BOT_DB_PATH", "/tmp/x.db"),
            ("BETA_BOT_STORE_SHARDS", "4"),
            ("BETA_BOT_IDLE_EVICT_SECS", "3600"),
            ("BETA_BOT_LANE_IDLE_SECS", "10"),
            ("BETA_BOT_LOG_DIR", "/var/log/beta"),
        ])
        .unwrap();
        assert!(cfg.cli_enabled);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.store_shards, 4);
        assert_eq!(cfg.idle_evict, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.lane_idle, Duration::from_secs(10));
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/var/log/beta")));
    }

    #[test]
    fn zero_idle_evict_disables_eviction() {
        let cfg = config(&[("BETA_BOT_IDLE_EVICT_SECS", "0")]).unwrap();
        assert_eq!(cfg.idle_evict, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config(&[("BETA_BOT_STORE_SHARDS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BETA_BOT_STORE_SHARDS"));

        let err = config(&[("BETA_BOT_STORE_SHARDS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = config(&[("BETA_BOT_CLI", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BETA_BOT_CLI"));
    }

    #[test]
    fn no_channel_is_an_error() {
        let err = config(&[("BETA_BOT_CLI", "false")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "TELEGRAM_BOT_TOKEN"));
    }
}
