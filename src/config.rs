//! # Bus Configuration
//!
//! Connection target, queue naming, durability, and acknowledgment policy,
//! with environment-variable loading for the host bootstrap layer.

use crate::error::{BusError, BusResult};

/// When a delivery is acknowledged to the broker.
///
/// The bus acknowledges on receipt, before the handler runs. This is an
/// at-most-once policy: a handler failure after acknowledgment loses the
/// message from the broker's point of view. The policy is an explicit
/// configuration value so the trade-off is visible rather than implied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum AckPolicy {
    /// Acknowledge immediately on receipt, before handler invocation.
    #[default]
    OnReceipt,
}

impl AckPolicy {
    /// Whether the broker subscription should auto-acknowledge deliveries.
    pub fn auto_ack(self) -> bool {
        match self {
            AckPolicy::OnReceipt => true,
        }
    }
}

/// Bus configuration consumed by the host bootstrap layer.
///
/// The core itself only requires a resolved connection target before
/// provisioning begins; everything else has a sensible default.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker connection target (host or connection string).
    pub connection_target: String,
    /// Optional prefix applied to every queue name, for running several
    /// instances of the same consumers against one broker.
    pub queue_prefix: Option<String>,
    /// Declare queues as durable. Off by default; topology is expected to
    /// live only as long as the broker connection.
    pub durable: bool,
    /// Acknowledgment timing policy.
    pub ack_policy: AckPolicy,
    /// Per-queue buffering capacity for undelivered messages.
    pub channel_capacity: usize,
}

/// Default per-queue buffer size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            connection_target: "amqp://localhost:5672".to_string(),
            queue_prefix: None,
            durable: false,
            ack_policy: AckPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> BusResult<Self> {
        let mut config = Self::default();

        if let Ok(target) = std::env::var("TYPEBUS_CONNECTION_TARGET") {
            config.connection_target = target;
        }

        if let Ok(prefix) = std::env::var("TYPEBUS_QUEUE_PREFIX") {
            if !prefix.is_empty() {
                config.queue_prefix = Some(prefix);
            }
        }

        if let Ok(durable) = std::env::var("TYPEBUS_DURABLE") {
            config.durable = durable.parse().map_err(|e| {
                BusError::configuration("TYPEBUS_DURABLE", format!("invalid boolean: {e}"))
            })?;
        }

        if let Ok(capacity) = std::env::var("TYPEBUS_CHANNEL_CAPACITY") {
            config.channel_capacity = capacity.parse().map_err(|e| {
                BusError::configuration("TYPEBUS_CHANNEL_CAPACITY", format!("invalid integer: {e}"))
            })?;
        }

        Ok(config)
    }

    /// Resolve the broker queue name for a consumer identity.
    pub fn queue_name(&self, consumer_name: &str) -> String {
        match &self.queue_prefix {
            Some(prefix) => format!("{prefix}.{consumer_name}"),
            None => consumer_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert!(!config.durable);
        assert!(config.queue_prefix.is_none());
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.ack_policy, AckPolicy::OnReceipt);
        assert!(config.ack_policy.auto_ack());
    }

    #[test]
    fn test_queue_name_resolution() {
        let mut config = BusConfig::default();
        assert_eq!(config.queue_name("EchoConsumer"), "EchoConsumer");

        config.queue_prefix = Some("staging".to_string());
        assert_eq!(config.queue_name("EchoConsumer"), "staging.EchoConsumer");
    }

    // Environment mutation is process-wide, so everything env-driven lives
    // in one test to avoid races under the parallel test runner.
    #[test]
    fn test_from_env() {
        std::env::set_var("TYPEBUS_CONNECTION_TARGET", "amqp://broker:5672");
        let config = BusConfig::from_env().unwrap();
        assert_eq!(config.connection_target, "amqp://broker:5672");

        std::env::set_var("TYPEBUS_CHANNEL_CAPACITY", "64");
        let config = BusConfig::from_env().unwrap();
        assert_eq!(config.channel_capacity, 64);

        std::env::set_var("TYPEBUS_CHANNEL_CAPACITY", "not-a-number");
        let result = BusConfig::from_env();
        assert!(matches!(result, Err(BusError::Configuration { .. })));
        std::env::remove_var("TYPEBUS_CHANNEL_CAPACITY");

        std::env::set_var("TYPEBUS_DURABLE", "not-a-bool");
        let result = BusConfig::from_env();
        assert!(matches!(result, Err(BusError::Configuration { .. })));

        std::env::remove_var("TYPEBUS_DURABLE");
        std::env::remove_var("TYPEBUS_CONNECTION_TARGET");
    }
}
