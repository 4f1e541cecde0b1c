//! # Type Registry
//!
//! The explicit registration table that replaces the original design's
//! runtime type scanning. The set of message types and consumers is listed
//! once at startup through [`RegistryBuilder`]; the result is a frozen
//! [`TypeRegistry`] holding two deterministic mappings:
//!
//! - message type → exchange identity (the type's `TYPE_NAME`)
//! - consumer → (queue identity, message type consumed, dispatch entry)
//!
//! The dispatch entry is the type-erased closure table described in the
//! module docs of [`crate::dispatcher`]: bridging the runtime type tag back
//! to a statically-typed handler call is fixed here at registration time, so
//! delivery-time resolution is a plain table lookup.

pub mod builder;

pub use builder::RegistryBuilder;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::BusResult;
use crate::messaging::envelope::Envelope;

/// A registered message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTypeDescriptor {
    /// Globally unique identity; also the exchange name.
    pub type_name: &'static str,
}

/// A registered consumer and the single message type it handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerDescriptor {
    /// Consumer identity; also the queue name (modulo configured prefix).
    pub consumer_name: String,
    /// Identity of the message type this consumer handles.
    pub message_type: &'static str,
}

/// Type-erased dispatch closure: decode the envelope as the consumer's
/// message type, resolve an instance from the registered factory, invoke it.
pub(crate) type DispatchFn =
    Arc<dyn Fn(Envelope, CancellationToken) -> BoxFuture<'static, BusResult<()>> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct DispatchEntry {
    /// The message type this entry decodes; fixed at registration.
    pub message_type: &'static str,
    pub invoke: DispatchFn,
}

/// Frozen registration table. Deterministic for a fixed set of
/// registrations: iteration order is registration order, and no type appears
/// twice with different associations.
pub struct TypeRegistry {
    message_types: Vec<MessageTypeDescriptor>,
    consumers: Vec<ConsumerDescriptor>,
    entries: HashMap<String, DispatchEntry>,
}

impl TypeRegistry {
    pub(crate) fn new(
        message_types: Vec<MessageTypeDescriptor>,
        consumers: Vec<ConsumerDescriptor>,
        entries: HashMap<String, DispatchEntry>,
    ) -> Self {
        Self {
            message_types,
            consumers,
            entries,
        }
    }

    /// All registered message types, in registration order.
    pub fn message_types(&self) -> &[MessageTypeDescriptor] {
        &self.message_types
    }

    /// All registered consumers, in registration order.
    pub fn consumers(&self) -> &[ConsumerDescriptor] {
        &self.consumers
    }

    /// Whether a type tag resolves to a registered message type.
    pub fn contains_message(&self, type_name: &str) -> bool {
        self.message_types
            .iter()
            .any(|descriptor| descriptor.type_name == type_name)
    }

    pub(crate) fn dispatch_entry(&self, consumer_name: &str) -> Option<&DispatchEntry> {
        self.entries.get(consumer_name)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("message_types", &self.message_types)
            .field("consumers", &self.consumers)
            .finish()
    }
}
