//! # Bus Error Types
//!
//! Structured error handling for the bus using thiserror instead of
//! `Box<dyn Error>` patterns.
//!
//! Startup-phase errors (registration, topology, connection) are fatal to the
//! whole service. Steady-state errors (decode, dispatch resolution, a single
//! handler failing) are isolated to the affected delivery and must never
//! terminate other subscriptions or the publisher.

use thiserror::Error;

/// Error type covering every bus operation.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Registration error: {subject}: {message}")]
    Registration { subject: String, message: String },

    #[error("Topology error: {operation} failed for {resource}: {message}")]
    Topology {
        resource: String,
        operation: String,
        message: String,
    },

    #[error("Publish failed on exchange {exchange}: {message}")]
    Publish { exchange: String, message: String },

    #[error("Decode error for type tag {type_tag}: {message}")]
    Decode { type_tag: String, message: String },

    #[error("Dispatch resolution failed on queue {queue}: tag {type_tag}: {message}")]
    DispatchResolution {
        queue: String,
        type_tag: String,
        message: String,
    },

    #[error("Broker connection error: {target}: {message}")]
    Connection { target: String, message: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Broker channel is closed")]
    ChannelClosed,

    #[error("Configuration error: {setting}: {message}")]
    Configuration { setting: String, message: String },

    #[error("Handler error in consumer {consumer}: {message}")]
    Handler { consumer: String, message: String },

    #[error("Internal bus error: {message}")]
    Internal { message: String },
}

impl BusError {
    /// Create a registration error
    pub fn registration(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a topology error
    pub fn topology(
        resource: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Topology {
            resource: resource.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }

    /// Create a dispatch resolution error
    pub fn dispatch_resolution(
        queue: impl Into<String>,
        type_tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DispatchResolution {
            queue: queue.into(),
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(setting: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            setting: setting.into(),
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            consumer: consumer.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for errors that must abort service startup rather than be
    /// isolated to a single delivery.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Registration { .. }
                | Self::Topology { .. }
                | Self::Connection { .. }
                | Self::Configuration { .. }
        )
    }
}

/// Conversion from serde_json::Error: deserialization problems map to decode
/// errors, serialization problems to internal errors.
impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            BusError::decode("unknown", err.to_string())
        } else {
            BusError::internal(err.to_string())
        }
    }
}

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_creation() {
        let reg_err = BusError::registration("EchoConsumer", "duplicate identity");
        assert!(matches!(reg_err, BusError::Registration { .. }));

        let topo_err = BusError::topology("orders_queue", "bind", "exchange missing");
        assert!(matches!(topo_err, BusError::Topology { .. }));

        let cancel_err = BusError::cancelled("publish");
        assert!(matches!(cancel_err, BusError::Cancelled { .. }));
    }

    #[test]
    fn test_startup_fatality_classification() {
        assert!(BusError::registration("x", "y").is_fatal_at_startup());
        assert!(BusError::topology("q", "bind", "z").is_fatal_at_startup());
        assert!(!BusError::decode("tag", "bad json").is_fatal_at_startup());
        assert!(!BusError::dispatch_resolution("q", "tag", "unknown").is_fatal_at_startup());
    }

    #[test]
    fn test_serde_json_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let bus_err: BusError = json_err.into();
        assert!(matches!(bus_err, BusError::Decode { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = BusError::dispatch_resolution("echo", "app.Unknown", "tag not registered");
        let display = format!("{err}");
        assert!(display.contains("echo"));
        assert!(display.contains("app.Unknown"));
    }
}
