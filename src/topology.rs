//! # Topology Provisioner
//!
//! Turns the type registry into broker topology: one fan-out exchange per
//! message type, one queue per consumer, each queue bound to exactly the
//! exchange of the message type it consumes. Every exchange is declared
//! before any bind is attempted, so a bind can never silently land on a
//! default exchange. Provisioning must complete before any traffic flows;
//! any failure is surfaced as a startup error.

use tracing::{debug, info};

use crate::config::BusConfig;
use crate::error::BusResult;
use crate::messaging::broker::{BrokerChannel, ExchangeKind};
use crate::registry::TypeRegistry;

/// Declare exchanges, then queues, then binds. Idempotent: re-running with
/// an unchanged registration set succeeds and leaves topology unchanged.
pub async fn provision(
    channel: &dyn BrokerChannel,
    registry: &TypeRegistry,
    config: &BusConfig,
) -> BusResult<()> {
    info!(
        exchanges = registry.message_types().len(),
        queues = registry.consumers().len(),
        "provisioning broker topology"
    );

    for message_type in registry.message_types() {
        channel
            .declare_exchange(message_type.type_name, ExchangeKind::Fanout)
            .await?;
        debug!(exchange = message_type.type_name, "exchange declared");
    }

    for consumer in registry.consumers() {
        let queue = config.queue_name(&consumer.consumer_name);
        channel.declare_queue(&queue, config.durable).await?;
        debug!(queue = %queue, "queue declared");
    }

    for consumer in registry.consumers() {
        let queue = config.queue_name(&consumer.consumer_name);
        channel
            .bind_queue(&queue, consumer.message_type, "")
            .await?;
        debug!(queue = %queue, exchange = consumer.message_type, "queue bound");
    }

    info!("broker topology provisioned");
    Ok(())
}
