use serde::Deserialize;
use std::{env, time::Duration};

use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub feedback: FeedbackSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSettings {
    pub url: String,
    pub timeout_secs: u64,
    /// 1 means a single attempt with no retry.
    pub max_attempts: usize,
    pub backoff_ms: u64,
}

impl FeedbackSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        let backoff = Duration::from_millis(self.backoff_ms);
        RetryConfig {
            max_attempts: self.max_attempts,
            base_backoff: backoff,
            max_backoff: backoff * 8,
            jitter_max: Some(backoff / 2),
        }
    }
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:5001".to_string(),
            timeout_secs: 30,
            max_attempts: 1,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub queue_key: String,
    pub poll_interval_ms: u64,
    pub expiry_sweep_secs: u64,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_key: "eduquest:jobs".to_string(),
            poll_interval_ms: 500,
            expiry_sweep_secs: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "eduquest".to_string(),
            feedback: FeedbackSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or(defaults.redis_uri);

        let feedback_defaults = defaults.feedback;
        let feedback = FeedbackSettings {
            url: settings
                .get_string("feedback.url")
                .or_else(|_| env::var("FEEDBACK_SERVICE_URL"))
                .unwrap_or(feedback_defaults.url),
            timeout_secs: read_u64(&settings, "feedback.timeout_secs")?
                .unwrap_or(feedback_defaults.timeout_secs),
            max_attempts: read_u64(&settings, "feedback.max_attempts")?
                .map(|value| value as usize)
                .unwrap_or(feedback_defaults.max_attempts),
            backoff_ms: read_u64(&settings, "feedback.backoff_ms")?
                .unwrap_or(feedback_defaults.backoff_ms),
        };

        let worker_defaults = defaults.worker;
        let worker = WorkerSettings {
            concurrency: read_u64(&settings, "worker.concurrency")?
                .map(|value| value as usize)
                .unwrap_or(worker_defaults.concurrency),
            queue_key: settings
                .get_string("worker.queue_key")
                .unwrap_or(worker_defaults.queue_key),
            poll_interval_ms: read_u64(&settings, "worker.poll_interval_ms")?
                .unwrap_or(worker_defaults.poll_interval_ms),
            expiry_sweep_secs: read_u64(&settings, "worker.expiry_sweep_secs")?
                .unwrap_or(worker_defaults.expiry_sweep_secs),
        };

        let config = Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            feedback,
            worker,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(config::ConfigError::Message(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        if self.feedback.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "feedback.max_attempts must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.feedback.url).map_err(|err| {
            config::ConfigError::Message(format!(
                "feedback.url is not a valid URL ({}): {}",
                self.feedback.url, err
            ))
        })?;
        Ok(())
    }
}

fn read_u64(settings: &config::Config, key: &str) -> Result<Option<u64>, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) if value < 0 => Err(config::ConfigError::Message(format!(
            "{} must not be negative",
            key
        ))),
        Ok(value) => Ok(Some(value as u64)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "APP__FEEDBACK__URL",
            "APP__FEEDBACK__MAX_ATTEMPTS",
            "APP__WORKER__CONCURRENCY",
            "FEEDBACK_SERVICE_URL",
            "MONGO_DATABASE",
        ] {
            env::remove_var(key);
        }
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP_ENV", "test-missing");
    }

    #[test]
    #[serial_test::serial]
    fn defaults_apply_without_sources() {
        clear_env();
        let config = Config::load().unwrap();
        assert_eq!(config.feedback.url, "http://localhost:5001");
        assert_eq!(config.feedback.max_attempts, 1);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.mongo_database, "eduquest");
    }

    #[test]
    #[serial_test::serial]
    fn environment_overrides_nested_keys() {
        clear_env();
        env::set_var("APP__FEEDBACK__URL", "http://feedback.internal:9000");
        env::set_var("APP__WORKER__CONCURRENCY", "8");
        let config = Config::load().unwrap();
        assert_eq!(config.feedback.url, "http://feedback.internal:9000");
        assert_eq!(config.worker.concurrency, 8);
        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn zero_concurrency_is_rejected() {
        clear_env();
        env::set_var("APP__WORKER__CONCURRENCY", "0");
        assert!(Config::load().is_err());
        clear_env();
    }

    #[test]
    fn retry_config_follows_attempts() {
        let settings = FeedbackSettings {
            max_attempts: 3,
            backoff_ms: 100,
            ..FeedbackSettings::default()
        };
        let retry = settings.retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_backoff, Duration::from_millis(100));
        assert_eq!(retry.max_backoff, Duration::from_millis(800));
    }
}
