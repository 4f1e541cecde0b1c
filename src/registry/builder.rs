//! # Registry Builder
//!
//! Fluent registration of message types and consumers. Validation that
//! cannot be expressed in the type system happens at [`RegistryBuilder::build`]:
//! a consumer naming a message type that was never registered, or two
//! consumer registrations sharing one identity, is a configuration error
//! reported at startup, never deferred to dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{BusError, BusResult};
use crate::messaging::message::{Consumer, Message};
use crate::registry::{
    ConsumerDescriptor, DispatchEntry, DispatchFn, MessageTypeDescriptor, TypeRegistry,
};

struct PendingConsumer {
    consumer_name: String,
    message_type: &'static str,
    invoke: DispatchFn,
}

/// Builder for the [`TypeRegistry`].
///
/// ```
/// use std::sync::Arc;
/// use typebus::RegistryBuilder;
/// # use async_trait::async_trait;
/// # use serde::{Deserialize, Serialize};
/// # use tokio_util::sync::CancellationToken;
/// # use typebus::{BusResult, Consumer, Message};
/// # #[derive(Serialize, Deserialize)]
/// # struct Hello { greeting: String }
/// # impl Message for Hello { const TYPE_NAME: &'static str = "app.Hello"; }
/// # struct EchoConsumer;
/// # #[async_trait]
/// # impl Consumer<Hello> for EchoConsumer {
/// #     async fn consume(&self, _m: Hello, _c: CancellationToken) -> BusResult<()> { Ok(()) }
/// # }
///
/// let registry = RegistryBuilder::new()
///     .message::<Hello>()
///     .consumer::<Hello, EchoConsumer, _>("EchoConsumer", || Arc::new(EchoConsumer))
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    message_types: Vec<MessageTypeDescriptor>,
    consumers: Vec<PendingConsumer>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type. Registering the same type twice is a no-op.
    pub fn message<M: Message>(mut self) -> Self {
        let descriptor = MessageTypeDescriptor {
            type_name: M::TYPE_NAME,
        };
        if !self.message_types.contains(&descriptor) {
            self.message_types.push(descriptor);
        }
        self
    }

    /// Register a consumer for message type `M` under `consumer_name`, with
    /// the factory that resolves an instance per delivery.
    ///
    /// The factory is the extension point for dependency scoping: it may
    /// return a fresh instance each call or clone a shared `Arc`, the bus is
    /// agnostic. The pairing of consumer and message type is captured here
    /// as a type-erased closure, so dispatch never constructs types
    /// dynamically.
    pub fn consumer<M, C, F>(mut self, consumer_name: impl Into<String>, factory: F) -> Self
    where
        M: Message,
        C: Consumer<M> + 'static,
        F: Fn() -> Arc<C> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let invoke: DispatchFn = Arc::new(move |envelope, cancel| {
            let factory = Arc::clone(&factory);
            Box::pin(async move {
                let message = envelope.decode::<M>()?;
                let consumer = factory();
                consumer.consume(message, cancel).await
            })
        });

        self.consumers.push(PendingConsumer {
            consumer_name: consumer_name.into(),
            message_type: M::TYPE_NAME,
            invoke,
        });
        self
    }

    /// Validate the registrations and freeze them into a [`TypeRegistry`].
    pub fn build(self) -> BusResult<TypeRegistry> {
        let mut descriptors = Vec::with_capacity(self.consumers.len());
        let mut entries = HashMap::with_capacity(self.consumers.len());

        for pending in self.consumers {
            if !self
                .message_types
                .iter()
                .any(|m| m.type_name == pending.message_type)
            {
                return Err(BusError::registration(
                    &pending.consumer_name,
                    format!(
                        "consumes message type {} which is not registered",
                        pending.message_type
                    ),
                ));
            }

            if entries.contains_key(&pending.consumer_name) {
                // A consumer identity maps to exactly one message type.
                return Err(BusError::registration(
                    &pending.consumer_name,
                    "consumer identity registered more than once",
                ));
            }

            descriptors.push(ConsumerDescriptor {
                consumer_name: pending.consumer_name.clone(),
                message_type: pending.message_type,
            });
            entries.insert(
                pending.consumer_name,
                DispatchEntry {
                    message_type: pending.message_type,
                    invoke: pending.invoke,
                },
            );
        }

        info!(
            message_types = self.message_types.len(),
            consumers = descriptors.len(),
            "type registry built"
        );

        Ok(TypeRegistry::new(self.message_types, descriptors, entries))
    }
}
