//! # typebus
//!
//! Typed publish/subscribe façade over a message broker.
//!
//! ## Overview
//!
//! Applications define message shapes and consumer handlers as plain types.
//! The bus then discovers which message types exist and which consumers
//! handle them from an explicit registration table, provisions the broker
//! topology to route each message type to each interested consumer,
//! serializes outbound messages with an embedded type tag, and dispatches
//! inbound deliveries to the correctly-typed handler without any
//! caller-written routing code.
//!
//! ## Architecture
//!
//! - [`registry`] - Explicit type registry: message types, consumers, and
//!   the dispatch table built at registration time
//! - [`topology`] - Idempotent provisioning: one fan-out exchange per
//!   message type, one queue per consumer, bound to its type's exchange
//! - [`messaging`] - Message/consumer traits, the envelope codec, and the
//!   broker contract with an in-memory implementation
//! - [`publisher`] - Type-checked publishing with a lazily-created shared
//!   channel
//! - [`dispatcher`] - One subscription per consumer with an all-or-nothing
//!   startup barrier and per-delivery error isolation
//! - [`service`] - The `MessageBus` façade tying it together
//! - [`config`] / [`error`] / [`logging`] - Configuration, structured
//!   errors, tracing setup
//!
//! ## Delivery semantics
//!
//! Deliveries are acknowledged on receipt, before the handler runs
//! ([`AckPolicy::OnReceipt`]). This is at-most-once: a handler failure
//! after acknowledgment loses the message. Ordering holds per queue only;
//! nothing is ordered across message types.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//! use typebus::{BusConfig, BusResult, Consumer, InMemoryBroker, Message, MessageBus};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Hello {
//!     greeting: String,
//! }
//!
//! impl Message for Hello {
//!     const TYPE_NAME: &'static str = "app.Hello";
//! }
//!
//! struct EchoConsumer;
//!
//! #[async_trait]
//! impl Consumer<Hello> for EchoConsumer {
//!     async fn consume(&self, message: Hello, _cancel: CancellationToken) -> BusResult<()> {
//!         println!("greetings from a consumer: {}", message.greeting);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> BusResult<()> {
//! let bus = MessageBus::builder(BusConfig::default(), Arc::new(InMemoryBroker::new()))
//!     .message::<Hello>()
//!     .consumer::<Hello, EchoConsumer, _>("EchoConsumer", || Arc::new(EchoConsumer))
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! bus.provision_and_start(&cancel).await?;
//! bus.publish(&Hello { greeting: "hello world".to_string() }, &cancel).await?;
//! bus.stop(&cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod topology;

pub use config::{AckPolicy, BusConfig, DEFAULT_CHANNEL_CAPACITY};
pub use dispatcher::Dispatcher;
pub use error::{BusError, BusResult};
pub use messaging::{
    BrokerChannel, BrokerConnector, Consumer, Envelope, ExchangeKind, InMemoryBroker, Message,
    TYPE_HEADER,
};
pub use publisher::Publisher;
pub use registry::{ConsumerDescriptor, MessageTypeDescriptor, RegistryBuilder, TypeRegistry};
pub use service::{MessageBus, MessageBusBuilder};
