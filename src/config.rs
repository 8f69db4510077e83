use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::services::notifications::{RetryPolicy, TelegramSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub frontend_origin: Option<String>,
    pub scheduler_tick: Duration,
    pub notification_retry: RetryPolicy,
    pub telegram: Option<TelegramSettings>,
    pub sms_webhook_url: Option<String>,
    pub push_webhook_url: Option<String>,
    pub seed_templates_path: Option<PathBuf>,
    pub seed_directory_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let tick_ms: u64 = parse_or(&get, "SCHEDULER_TICK_MS", 60_000)?;
        let max_attempts: usize = parse_or(&get, "NOTIFY_MAX_ATTEMPTS", 3)?;
        let backoff_ms: u64 = parse_or(&get, "NOTIFY_INITIAL_BACKOFF_MS", 500)?;
        if tick_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "SCHEDULER_TICK_MS",
                value: "0".into(),
            });
        }

        let telegram = get("TELEGRAM_BOT_TOKEN")
            .map(|token| TelegramSettings::new(&token, get("TELEGRAM_API_BASE").as_deref()));

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            frontend_origin: get("FRONTEND_ORIGIN"),
            scheduler_tick: Duration::from_millis(tick_ms),
            notification_retry: RetryPolicy {
                max_attempts: max_attempts.max(1),
                initial_backoff: Duration::from_millis(backoff_ms),
            },
            telegram,
            sms_webhook_url: get("SMS_WEBHOOK_URL"),
            push_webhook_url: get("PUSH_WEBHOOK_URL"),
            seed_templates_path: get("SEED_TEMPLATES_PATH").map(PathBuf::from),
            seed_directory_path: get("SEED_DIRECTORY_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.scheduler_tick, Duration::from_secs(60));
        assert_eq!(config.notification_retry.max_attempts, 3);
        assert!(config.telegram.is_none());
        assert!(config.seed_templates_path.is_none());
    }

    #[test]
    fn reads_overrides_and_ignores_blank_values() {
        let config = config_from(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("SCHEDULER_TICK_MS", "250"),
            ("NOTIFY_MAX_ATTEMPTS", "5"),
            ("TELEGRAM_BOT_TOKEN", "abc"),
            ("SMS_WEBHOOK_URL", "  "),
            ("SEED_TEMPLATES_PATH", "seed/templates.json"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.scheduler_tick, Duration::from_millis(250));
        assert_eq!(config.notification_retry.max_attempts, 5);
        assert!(config.telegram.is_some());
        assert!(config.sms_webhook_url.is_none());
        assert_eq!(
            config.seed_templates_path,
            Some(PathBuf::from("seed/templates.json"))
        );
    }

    #[test]
    fn rejects_unparseable_values() {
        let err = config_from(&[("SCHEDULER_TICK_MS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { name: "SCHEDULER_TICK_MS", .. }
        ));
        assert!(config_from(&[("SCHEDULER_TICK_MS", "0")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "localhost")]).is_err());
    }
}
