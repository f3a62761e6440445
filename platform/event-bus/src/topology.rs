//! Durable topology shared by publisher and consumer
//!
//! A queue name, optionally bound to a topic exchange through a routing key.
//! On JetStream the queue becomes a work-queue stream plus a durable pull
//! consumer, and the exchange binding becomes an extra captured subject.

use std::env;

const DEFAULT_QUEUE: &str = "user.created";
const DEFAULT_ROUTING_KEY: &str = "USER_CREATED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub queue: String,
    pub exchange: Option<String>,
    pub routing_key: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            exchange: None,
            routing_key: DEFAULT_ROUTING_KEY.to_string(),
        }
    }
}

impl Topology {
    /// Read `USER_CREATED_QUEUE`, `USER_EVENTS_EXCHANGE` and `USER_CREATED_RK`
    pub fn from_env() -> Result<Self, String> {
        let queue = env::var("USER_CREATED_QUEUE").unwrap_or_else(|_| DEFAULT_QUEUE.to_string());
        let exchange = env::var("USER_EVENTS_EXCHANGE")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let routing_key =
            env::var("USER_CREATED_RK").unwrap_or_else(|_| DEFAULT_ROUTING_KEY.to_string());

        let topology = Topology {
            queue,
            exchange,
            routing_key,
        };
        topology.validate()?;
        Ok(topology)
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_subject_part("USER_CREATED_QUEUE", &self.queue)?;
        validate_subject_part("USER_CREATED_RK", &self.routing_key)?;
        if let Some(exchange) = &self.exchange {
            validate_subject_part("USER_EVENTS_EXCHANGE", exchange)?;
        }
        Ok(())
    }

    /// Subject the publisher sends to: `exchange.routing_key` when an
    /// exchange is configured, the queue name otherwise.
    pub fn publish_subject(&self) -> String {
        match &self.exchange {
            Some(exchange) => format!("{}.{}", exchange, self.routing_key),
            None => self.queue.clone(),
        }
    }

    /// Every subject captured by the queue: the queue itself plus the
    /// exchange binding, if any.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects = vec![self.queue.clone()];
        if self.exchange.is_some() {
            subjects.push(self.publish_subject());
        }
        subjects
    }

    /// JetStream stream name (`user.created` -> `USER_CREATED`)
    pub fn stream_name(&self) -> String {
        sanitize(&self.queue).to_uppercase()
    }

    /// Durable consumer name (`user.created` -> `user_created`)
    pub fn durable_name(&self) -> String {
        sanitize(&self.queue).to_lowercase()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn validate_subject_part(var: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{var} cannot be empty"));
    }
    if value.contains(|c: char| c.is_whitespace() || c == '*' || c == '>') {
        return Err(format!("{var} must not contain whitespace or wildcards: {value:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_queue_topology() {
        let topology = Topology::default();

        assert_eq!(topology.publish_subject(), "user.created");
        assert_eq!(topology.subjects(), vec!["user.created".to_string()]);
        assert_eq!(topology.stream_name(), "USER_CREATED");
        assert_eq!(topology.durable_name(), "user_created");
    }

    #[test]
    fn test_exchange_binding() {
        let topology = Topology::default().with_exchange("user.events");

        assert_eq!(topology.publish_subject(), "user.events.USER_CREATED");
        assert_eq!(
            topology.subjects(),
            vec![
                "user.created".to_string(),
                "user.events.USER_CREATED".to_string()
            ]
        );
        assert_eq!(topology.stream_name(), "USER_CREATED");
    }

    #[test]
    fn test_validate_rejects_wildcards() {
        let topology = Topology {
            queue: "user.>".to_string(),
            ..Topology::default()
        };
        assert!(topology.validate().is_err());

        let topology = Topology {
            routing_key: " ".to_string(),
            ..Topology::default()
        };
        assert!(topology.validate().is_err());
    }
}
