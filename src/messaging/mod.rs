//! # Messaging Module
//!
//! Message/consumer capability traits, the envelope codec, and the broker
//! contract with its in-memory implementation.

pub mod broker;
pub mod envelope;
pub mod memory;
pub mod message;

pub use broker::{BrokerChannel, BrokerConnector, ExchangeKind};
pub use envelope::{Envelope, TYPE_HEADER};
pub use memory::InMemoryBroker;
pub use message::{Consumer, Message};
