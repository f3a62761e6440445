use event_bus::consumer_retry::RetryConfig;
use event_bus::Topology;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::consumer::ConsumerSettings;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: String,
    pub broker_url: String,
    pub host: String,
    pub port: u16,
    pub topology: Topology,
    pub prefetch: usize,
    pub reconnect_interval: Duration,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "nats".to_string());

        let broker_url =
            env::var("BROKER_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = parse_var("PORT", 3002)?;

        let topology = Topology::from_env()?;

        let prefetch: usize = parse_var("CONSUMER_PREFETCH", 10)?;
        if prefetch == 0 {
            return Err("CONSUMER_PREFETCH must be at least 1".to_string());
        }

        let reconnect_interval = Duration::from_millis(parse_var("RECONNECT_INTERVAL_MS", 3000)?);

        let retry = RetryConfig {
            max_attempts: parse_var("MAX_DELIVERY_ATTEMPTS", 5)?,
            initial_backoff: Duration::from_millis(parse_var("REDELIVERY_BACKOFF_MS", 1000)?),
            max_backoff: Duration::from_millis(parse_var("REDELIVERY_BACKOFF_MAX_MS", 30_000)?),
        };
        if retry.max_attempts == 0 {
            return Err("MAX_DELIVERY_ATTEMPTS must be at least 1".to_string());
        }

        Ok(Config {
            database_url,
            bus_type,
            broker_url,
            host,
            port,
            topology,
            prefetch,
            reconnect_interval,
            retry,
        })
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            prefetch: self.prefetch,
            reconnect_interval: self.reconnect_interval,
            retry: self.retry.clone(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
