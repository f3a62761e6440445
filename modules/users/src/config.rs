use event_bus::Topology;
use std::env;

/// Publisher configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus_type: String,
    pub broker_url: String,
    pub topology: Topology,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "nats".to_string());

        let broker_url =
            env::var("BROKER_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let topology = Topology::from_env()?;

        Ok(Config {
            bus_type,
            broker_url,
            topology,
        })
    }
}
