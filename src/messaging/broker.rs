//! # Broker Contract
//!
//! The external-collaborator boundary: everything the bus needs from a
//! message broker, as object-safe async traits. The core never touches a
//! wire protocol directly; topology provisioning, publishing, and
//! subscriptions all go through a [`BrokerChannel`] obtained from a
//! [`BrokerConnector`]. The in-process implementation lives in
//! [`crate::messaging::memory`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BusResult;
use crate::messaging::envelope::Envelope;

/// Routing discipline of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Every bound queue receives every message.
    Fanout,
    /// Routing-key matched delivery.
    Direct,
}

/// Establishes broker channels from a connection target.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a channel to the broker at `target`.
    async fn connect(&self, target: &str) -> BusResult<Arc<dyn BrokerChannel>>;
}

/// A single broker channel carrying declarations, publishes, and
/// subscriptions. One channel is shared by all publish calls of a process;
/// a second is shared by all of the dispatcher's subscriptions, each an
/// independent logical stream multiplexed over it.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare an exchange. Idempotent: re-declaring with the same
    /// parameters is a no-op, not an error.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BusResult<()>;

    /// Declare a queue. Idempotent under identical parameters.
    async fn declare_queue(&self, name: &str, durable: bool) -> BusResult<()>;

    /// Bind a queue to an exchange. Binding against an undeclared exchange
    /// must fail fast, never fall through to a default exchange.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BusResult<()>;

    /// Publish an envelope to an exchange.
    async fn publish(&self, exchange: &str, routing_key: &str, envelope: Envelope)
        -> BusResult<()>;

    /// Open a subscription on a queue; deliveries arrive on the returned
    /// receiver in the broker's own per-queue order.
    async fn subscribe(&self, queue: &str, auto_ack: bool)
        -> BusResult<mpsc::Receiver<Envelope>>;

    /// Close the channel. Further operations fail with
    /// [`crate::BusError::ChannelClosed`].
    async fn close(&self) -> BusResult<()>;
}
