use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tally_common::error::{TallyError, TallyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_development(self) -> bool {
        self == AppEnv::Development
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
        }
    }
}

impl FromStr for AppEnv {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "production" | "prod" => Ok(AppEnv::Production),
            other => Err(TallyError::Config(format!("invalid APP_ENV: {other}"))),
        }
    }
}

/// How aggregation handlers persist their deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStrategy {
    /// Single storage-level `get-or-create + add` statement per record.
    Atomic,
    /// get_or_create, mutate, version-checked save; retried on conflict.
    Optimistic,
}

impl FromStr for WriteStrategy {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(WriteStrategy::Atomic),
            "optimistic" => Ok(WriteStrategy::Optimistic),
            other => Err(TallyError::Config(format!("invalid WRITE_STRATEGY: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub group: String,
    pub name: String,
    pub block_ms: u64,
    pub write_strategy: WriteStrategy,
    pub max_conflict_retries: u32,
    pub shutdown_timeout_secs: u64,
}

impl ConsumerConfig {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub app_env: AppEnv,
    pub dev_seed_on_start: bool,
    pub consumer: ConsumerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> TallyResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let consumer = ConsumerConfig {
            group: get_var_or("CONSUMER_GROUP", "tally-aggregator"),
            name: env::var("CONSUMER_NAME")
                .unwrap_or_else(|_| format!("tally-{}", uuid::Uuid::new_v4().simple())),
            block_ms: parse_var("CONSUMER_BLOCK_MS", "1000")?,
            write_strategy: get_var_or("WRITE_STRATEGY", "atomic").parse()?,
            max_conflict_retries: parse_var("MAX_CONFLICT_RETRIES", "5")?,
            shutdown_timeout_secs: parse_var("SHUTDOWN_TIMEOUT_SECS", "10")?,
        };

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            redis_url: get_var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            host: get_var_or("HOST", "0.0.0.0"),
            port: parse_var("PORT", "8080")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            app_env: get_var_or("APP_ENV", "production").parse()?,
            dev_seed_on_start: parse_var("DEV_SEED_ON_START", "false")?,
            consumer,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn get_var(key: &str) -> TallyResult<String> {
    env::var(key).map_err(|_| TallyError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: &str) -> TallyResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_var_or(key, default)
        .parse()
        .map_err(|e| TallyError::Config(format!("invalid {key}: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    const OPTIONAL_VARS: &[&str] = &[
        "APP_ENV",
        "LOG_LEVEL",
        "PORT",
        "WRITE_STRATEGY",
        "CONSUMER_GROUP",
        "CONSUMER_NAME",
        "CONSUMER_BLOCK_MS",
        "MAX_CONFLICT_RETRIES",
        "SHUTDOWN_TIMEOUT_SECS",
        "DEV_SEED_ON_START",
    ];

    fn clear_optional() {
        for key in OPTIONAL_VARS {
            env::remove_var(key);
        }
    }

    #[test]
    fn config_from_env_succeeds_with_required_vars() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();

        env::set_var("DATABASE_URL", "postgres://localhost/tally_test");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(cfg.database_url, "postgres://localhost/tally_test");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.app_env, AppEnv::Production);
        assert!(!cfg.dev_seed_on_start);
        assert_eq!(cfg.consumer.group, "tally-aggregator");
        assert!(cfg.consumer.name.starts_with("tally-"));
        assert_eq!(cfg.consumer.write_strategy, WriteStrategy::Atomic);
        assert_eq!(cfg.consumer.max_conflict_retries, 5);
        assert_eq!(cfg.consumer.shutdown_timeout(), Duration::from_secs(10));

        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn config_from_env_fails_without_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();

        env::remove_var("DATABASE_URL");
        let result = AppConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn config_reads_consumer_overrides() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();

        env::set_var("DATABASE_URL", "postgres://localhost/tally_test");
        env::set_var("APP_ENV", "development");
        env::set_var("WRITE_STRATEGY", "optimistic");
        env::set_var("CONSUMER_NAME", "worker-1");
        env::set_var("CONSUMER_BLOCK_MS", "250");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert!(cfg.app_env.is_development());
        assert_eq!(cfg.consumer.write_strategy, WriteStrategy::Optimistic);
        assert_eq!(cfg.consumer.name, "worker-1");
        assert_eq!(cfg.consumer.block_timeout(), Duration::from_millis(250));

        clear_optional();
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn invalid_write_strategy_is_a_config_error() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        clear_optional();

        env::set_var("DATABASE_URL", "postgres://localhost/tally_test");
        env::set_var("WRITE_STRATEGY", "yolo");

        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));

        clear_optional();
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn bind_addr_formats_correctly() {
        let cfg = AppConfig {
            database_url: String::new(),
            redis_url: String::new(),
            host: "127.0.0.1".to_owned(),
            port: 3000,
            log_level: "debug".to_owned(),
            app_env: AppEnv::Production,
            dev_seed_on_start: false,
            consumer: ConsumerConfig {
                group: "g".to_owned(),
                name: "c".to_owned(),
                block_ms: 1000,
                write_strategy: WriteStrategy::Atomic,
                max_conflict_retries: 5,
                shutdown_timeout_secs: 10,
            },
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3000");
    }
}
