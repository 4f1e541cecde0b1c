//! Fan-out demo
//!
//! Two consumers registered for the same message type each get their own
//! queue bound to the type's exchange, so one publish produces exactly one
//! delivery per consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use typebus::{BusConfig, BusResult, Consumer, InMemoryBroker, Message, MessageBus};

#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Publish once, deliver to every registered consumer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Number of messages to publish
    #[arg(short, long, default_value_t = 3)]
    count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u32,
}

impl Message for OrderPlaced {
    const TYPE_NAME: &'static str = "demo.OrderPlaced";
}

struct LoggingConsumer {
    name: &'static str,
    seen: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl Consumer<OrderPlaced> for LoggingConsumer {
    async fn consume(&self, message: OrderPlaced, _cancel: CancellationToken) -> BusResult<()> {
        info!(consumer = self.name, order_id = message.order_id, "order received");
        let _ = self.seen.send(self.name);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    typebus::logging::init_logging();
    let cli = Cli::parse();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let billing_tx = seen_tx.clone();
    let shipping_tx = seen_tx;

    let config = BusConfig {
        connection_target: "mem://local".to_string(),
        ..BusConfig::default()
    };
    let broker = InMemoryBroker::with_queue_capacity(config.channel_capacity);

    let bus = MessageBus::builder(config, Arc::new(broker))
        .message::<OrderPlaced>()
        .consumer::<OrderPlaced, LoggingConsumer, _>("BillingConsumer", move || {
            Arc::new(LoggingConsumer {
                name: "billing",
                seen: billing_tx.clone(),
            })
        })
        .consumer::<OrderPlaced, LoggingConsumer, _>("ShippingConsumer", move || {
            Arc::new(LoggingConsumer {
                name: "shipping",
                seen: shipping_tx.clone(),
            })
        })
        .build()?;

    let cancel = CancellationToken::new();
    bus.provision_and_start(&cancel).await?;

    for order_id in 1..=cli.count {
        bus.publish(&OrderPlaced { order_id }, &cancel).await?;
    }

    // Each publish fans out to both consumers.
    let expected = (cli.count * 2) as usize;
    for _ in 0..expected {
        tokio::time::timeout(Duration::from_secs(5), seen_rx.recv()).await?;
    }
    info!(deliveries = expected, "all deliveries observed");

    bus.stop(&cancel).await?;
    Ok(())
}
