//! Application configuration, loaded once at startup from the environment.
//!
//! Mirrors the sibling service's loading style: `dotenvy` populates
//! `std::env` from a `.env` file if present, then every key is read with a
//! documented default. Numeric keys fall back to their default (logged at
//! `warn`) instead of failing startup on a malformed value.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub node_env: String,
    pub server_port: u16,
    pub metrics_port: u16,
    pub broker_url: String,
    pub mongo_database: String,
    pub mongo_url: String,
    pub monitoring_interval: Duration,
    pub nonce_diff: i64,
    pub matching_engine_url: String,
    pub consumer_group_id: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            node_env: env_or("NODE_ENV", "development"),
            server_port: env_parsed_or("SERVER_PORT", 8081),
            metrics_port: env_parsed_or("METRICS_PORT", 2114),
            broker_url: env_or("BROKER_URL", "localhost:9092"),
            mongo_database: env_or("MONGO_DATABASE", "option_exchange"),
            mongo_url: env_or("MONGO_URL", "mongodb://localhost:27017"),
            monitoring_interval: Duration::from_millis(env_parsed_or("MONITORING_INTERVAL", 1000)),
            nonce_diff: env_parsed_or("NONCE_DIFF", 20),
            matching_engine_url: env_or("MATCHING_ENGINE_URL", "http://localhost:8080"),
            consumer_group_id: env_or("CONSUMER_GROUP_ID", "pickup-group"),
        };

        tracing::info!("Environment: {}", config.node_env);
        tracing::info!("Broker url: {}", config.broker_url);
        tracing::info!("Mongo url: {}", config.mongo_url);
        tracing::info!("Matching engine url: {}", config.matching_engine_url);

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.node_env.eq_ignore_ascii_case("production")
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {key} ({raw:?}), using default {default}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default() {
        assert_eq!(env_or("PICKUP_TEST_UNSET_KEY", "fallback"), "fallback");
    }

    #[test]
    fn env_parsed_or_falls_back_on_garbage() {
        std::env::set_var("PICKUP_TEST_NONCE_DIFF", "not-a-number");
        let value: i64 = env_parsed_or("PICKUP_TEST_NONCE_DIFF", 20);
        assert_eq!(value, 20);
        std::env::remove_var("PICKUP_TEST_NONCE_DIFF");
    }
}
