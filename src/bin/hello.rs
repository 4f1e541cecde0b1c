//! Hello demo
//!
//! Smallest possible bus: one message type, one consumer, one publish,
//! running against the in-memory broker.

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
#[command(name = "hello")]
#[command(about = "Publish a greeting through the bus and consume it")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Greeting to publish
    #[arg(short, long, default_value = "hello world")]
    greeting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HelloMessage {
    greeting: String,
}

impl Message for HelloMessage {
    const TYPE_NAME: &'static str = "demo.HelloMessage";
}

struct EchoConsumer {
    done: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl Consumer<HelloMessage> for EchoConsumer {
    async fn consume(&self, message: HelloMessage, _cancel: CancellationToken) -> BusResult<()> {
        info!(greeting = %message.greeting, "greetings from a consumer");
        let _ = self.done.send(());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    typebus::logging::init_logging();
    let cli = Cli::parse();

    let config = BusConfig {
        connection_target: "mem://local".to_string(),
        ..BusConfig::default()
    };
    let broker = InMemoryBroker::with_queue_capacity(config.channel_capacity);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let bus = MessageBus::builder(config, Arc::new(broker))
        .message::<HelloMessage>()
        .consumer::<HelloMessage, EchoConsumer, _>("EchoConsumer", move || {
            Arc::new(EchoConsumer {
                done: done_tx.clone(),
            })
        })
        .build()?;

    let cancel = CancellationToken::new();
    bus.provision_and_start(&cancel).await?;

    bus.publish(
        &HelloMessage {
            greeting: cli.greeting,
        },
        &cancel,
    )
    .await?;

    tokio::time::timeout(Duration::from_secs(5), done_rx.recv()).await?;
    bus.stop(&cancel).await?;
    Ok(())
}
