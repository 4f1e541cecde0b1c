//! # Dispatcher
//!
//! Opens one subscription per registered consumer and drives deliveries
//! through the registry's dispatch table. Startup is an all-or-nothing
//! readiness barrier: every subscription must open before `start` returns,
//! and any failure aborts the whole start.
//!
//! Per delivery, the type tag from the envelope headers is resolved against
//! the registry and checked against the message type this queue was
//! registered for. The pairing of consumer and message type was fixed at
//! registration, so resolution here is a table lookup followed by a direct
//! call into the captured dispatch closure; no types are constructed
//! dynamically.
//!
//! Deliveries are acknowledged on receipt ([`crate::AckPolicy::OnReceipt`]),
//! before the handler runs. Decode failures, unresolvable tags, and handler
//! errors are therefore at-most-once losses: they are logged and the
//! delivery skipped, and the subscription stays alive for the next one.

use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::messaging::broker::BrokerChannel;
use crate::messaging::envelope::Envelope;
use crate::registry::{ConsumerDescriptor, DispatchEntry, TypeRegistry};

pub struct Dispatcher {
    registry: Arc<TypeRegistry>,
    config: BusConfig,
    channel: Arc<dyn BrokerChannel>,
    stop_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TypeRegistry>,
        config: BusConfig,
        channel: Arc<dyn BrokerChannel>,
    ) -> Self {
        Self {
            registry,
            config,
            channel,
            stop_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Open every consumer subscription concurrently and begin dispatching.
    ///
    /// Returns only once all subscriptions are open; if any fails to open,
    /// startup fails as a whole.
    pub async fn start(&self, cancel: &CancellationToken) -> BusResult<()> {
        let auto_ack = self.config.ack_policy.auto_ack();

        let mut planned = Vec::with_capacity(self.registry.consumers().len());
        for consumer in self.registry.consumers() {
            let entry = self
                .registry
                .dispatch_entry(&consumer.consumer_name)
                .cloned()
                .ok_or_else(|| {
                    BusError::internal(format!(
                        "no dispatch entry for consumer {}",
                        consumer.consumer_name
                    ))
                })?;
            let queue = self.config.queue_name(&consumer.consumer_name);
            planned.push((consumer.clone(), queue, entry));
        }

        let subscribes = planned.iter().map(|(_, queue, _)| {
            let channel = Arc::clone(&self.channel);
            async move { channel.subscribe(queue, auto_ack).await }
        });

        // Readiness barrier over all subscription opens.
        let receivers = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BusError::cancelled("dispatcher start")),
            result = future::try_join_all(subscribes) => result?,
        };

        info!(
            subscriptions = receivers.len(),
            "all consumer subscriptions open"
        );

        let mut tasks = self.tasks.lock();
        for ((consumer, queue, entry), receiver) in planned.into_iter().zip(receivers) {
            tasks.push(tokio::spawn(run_subscription(
                queue,
                consumer,
                entry,
                Arc::clone(&self.registry),
                receiver,
                self.stop_token.clone(),
            )));
        }
        Ok(())
    }

    /// Stop accepting deliveries and close the channel. In-flight handler
    /// invocations are allowed to finish; no deadline is enforced here, a
    /// caller wanting one races this future against its own timer.
    pub async fn stop(&self) -> BusResult<()> {
        info!("stopping dispatcher");
        self.stop_token.cancel();
        self.channel.close().await?;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(join_error) = task.await {
                error!(%join_error, "subscription task failed during shutdown");
            }
        }
        info!("dispatcher stopped");
        Ok(())
    }
}

async fn run_subscription(
    queue: String,
    consumer: ConsumerDescriptor,
    entry: DispatchEntry,
    registry: Arc<TypeRegistry>,
    mut receiver: mpsc::Receiver<Envelope>,
    stop: CancellationToken,
) {
    info!(queue = %queue, consumer = %consumer.consumer_name, "subscription listening");

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            maybe_envelope = receiver.recv() => match maybe_envelope {
                Some(envelope) => {
                    handle_delivery(&queue, &consumer, &entry, &registry, envelope, &stop).await;
                }
                None => {
                    debug!(queue = %queue, "delivery stream closed by broker");
                    break;
                }
            }
        }
    }

    debug!(queue = %queue, "subscription stopped");
}

/// Process one delivery. The broker considers the message acknowledged
/// already; every failure path below logs, skips, and keeps the
/// subscription alive.
async fn handle_delivery(
    queue: &str,
    consumer: &ConsumerDescriptor,
    entry: &DispatchEntry,
    registry: &TypeRegistry,
    envelope: Envelope,
    stop: &CancellationToken,
) {
    let tag = match envelope.type_tag() {
        Some(tag) => tag.to_string(),
        None => {
            report_skipped(&BusError::dispatch_resolution(
                queue,
                "<missing>",
                "envelope carries no Type header",
            ));
            return;
        }
    };

    if !registry.contains_message(&tag) {
        report_skipped(&BusError::dispatch_resolution(
            queue,
            tag.as_str(),
            "tag does not resolve to a registered message type",
        ));
        return;
    }

    if tag != entry.message_type {
        report_skipped(&BusError::dispatch_resolution(
            queue,
            tag.as_str(),
            format!("queue is registered for {}", entry.message_type),
        ));
        return;
    }

    // Each handler gets a child of the stop signal, so shutdown reaches
    // in-flight invocations. The invocation is awaited inline: one delivery
    // in flight per queue at a time.
    let cancel = stop.child_token();
    if let Err(error) = (entry.invoke)(envelope, cancel).await {
        match error {
            // The payload never reached the handler.
            BusError::Decode { .. } => {
                error!(
                    queue = %queue,
                    consumer = %consumer.consumer_name,
                    %error,
                    "payload could not be decoded; delivery skipped"
                );
            }
            cause => {
                let error = BusError::handler(&consumer.consumer_name, cause.to_string());
                error!(
                    queue = %queue,
                    %error,
                    "handler failed; message was already acknowledged and is lost"
                );
            }
        }
    }
}

fn report_skipped(error: &BusError) {
    error!(%error, "delivery skipped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::broker::BrokerConnector;
    use crate::messaging::memory::InMemoryBroker;
    use crate::messaging::message::{Consumer, Message};
    use crate::registry::RegistryBuilder;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Hello {
        greeting: String,
    }

    impl Message for Hello {
        const TYPE_NAME: &'static str = "test.Hello";
    }

    struct ForwardingConsumer {
        tx: mpsc::UnboundedSender<Hello>,
    }

    #[async_trait]
    impl Consumer<Hello> for ForwardingConsumer {
        async fn consume(&self, message: Hello, _cancel: CancellationToken) -> BusResult<()> {
            self.tx.send(message).map_err(|e| BusError::internal(e.to_string()))
        }
    }

    fn registry_with_forwarder(
        tx: mpsc::UnboundedSender<Hello>,
    ) -> Arc<TypeRegistry> {
        Arc::new(
            RegistryBuilder::new()
                .message::<Hello>()
                .consumer::<Hello, ForwardingConsumer, _>("EchoConsumer", move || {
                    Arc::new(ForwardingConsumer { tx: tx.clone() })
                })
                .build()
                .unwrap(),
        )
    }

    async fn provisioned_channel(
        broker: &InMemoryBroker,
        registry: &TypeRegistry,
    ) -> Arc<dyn BrokerChannel> {
        let channel = broker.connect("mem://test").await.unwrap();
        crate::topology::provision(channel.as_ref(), registry, &BusConfig::default())
            .await
            .unwrap();
        channel
    }

    fn raw_envelope(tag: Option<&str>) -> Envelope {
        let mut headers = HashMap::new();
        if let Some(tag) = tag {
            headers.insert(crate::messaging::TYPE_HEADER.to_string(), tag.to_string());
        }
        Envelope {
            id: uuid::Uuid::new_v4(),
            headers,
            body: serde_json::to_vec(&Hello {
                greeting: "hi".to_string(),
            })
            .unwrap(),
            published_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_delivery_reaches_typed_consumer() {
        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = registry_with_forwarder(tx);
        let channel = provisioned_channel(&broker, &registry).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            BusConfig::default(),
            Arc::clone(&channel),
        );
        dispatcher.start(&CancellationToken::new()).await.unwrap();

        channel
            .publish("test.Hello", "", raw_envelope(Some("test.Hello")))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.greeting, "hi");

        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_tag_is_skipped_and_subscription_stays_alive() {
        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = registry_with_forwarder(tx);
        let channel = provisioned_channel(&broker, &registry).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            BusConfig::default(),
            Arc::clone(&channel),
        );
        dispatcher.start(&CancellationToken::new()).await.unwrap();

        // Tag resolves to nothing in the registry; then a valid delivery.
        channel
            .publish("test.Hello", "", raw_envelope(Some("test.Nonexistent")))
            .await
            .unwrap();
        channel
            .publish("test.Hello", "", raw_envelope(Some("test.Hello")))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.greeting, "hi");

        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_tag_and_malformed_body_are_isolated() {
        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = registry_with_forwarder(tx);
        let channel = provisioned_channel(&broker, &registry).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            BusConfig::default(),
            Arc::clone(&channel),
        );
        dispatcher.start(&CancellationToken::new()).await.unwrap();

        channel
            .publish("test.Hello", "", raw_envelope(None))
            .await
            .unwrap();

        let mut malformed = raw_envelope(Some("test.Hello"));
        malformed.body = b"{not json".to_vec();
        channel.publish("test.Hello", "", malformed).await.unwrap();

        channel
            .publish("test.Hello", "", raw_envelope(Some("test.Hello")))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.greeting, "hi");

        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        struct FlakyConsumer {
            tx: mpsc::UnboundedSender<Hello>,
        }

        #[async_trait]
        impl Consumer<Hello> for FlakyConsumer {
            async fn consume(&self, message: Hello, _cancel: CancellationToken) -> BusResult<()> {
                if message.greeting == "boom" {
                    return Err(BusError::internal("simulated handler failure"));
                }
                self.tx
                    .send(message)
                    .map_err(|e| BusError::internal(e.to_string()))
            }
        }

        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Arc::new(
            RegistryBuilder::new()
                .message::<Hello>()
                .consumer::<Hello, FlakyConsumer, _>("FlakyConsumer", move || {
                    Arc::new(FlakyConsumer { tx: tx.clone() })
                })
                .build()
                .unwrap(),
        );
        let channel = provisioned_channel(&broker, &registry).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            BusConfig::default(),
            Arc::clone(&channel),
        );
        dispatcher.start(&CancellationToken::new()).await.unwrap();

        // A handler error is confined to its delivery; the next one arrives.
        let mut boom = raw_envelope(Some("test.Hello"));
        boom.body = serde_json::to_vec(&Hello {
            greeting: "boom".to_string(),
        })
        .unwrap();
        channel.publish("test.Hello", "", boom).await.unwrap();
        channel
            .publish("test.Hello", "", raw_envelope(Some("test.Hello")))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.greeting, "hi");

        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_when_any_subscription_cannot_open() {
        let broker = InMemoryBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = registry_with_forwarder(tx);

        // No provisioning: the consumer queue does not exist.
        let channel = broker.connect("mem://test").await.unwrap();
        let dispatcher = Dispatcher::new(registry, BusConfig::default(), channel);

        let result = dispatcher.start(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BusError::Topology { .. })));
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_handler_finish() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct SlowConsumer {
            finished: Arc<AtomicBool>,
        }

        #[async_trait]
        impl Consumer<Hello> for SlowConsumer {
            async fn consume(&self, _message: Hello, _cancel: CancellationToken) -> BusResult<()> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let broker = InMemoryBroker::new();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_in_factory = Arc::clone(&finished);
        let registry = Arc::new(
            RegistryBuilder::new()
                .message::<Hello>()
                .consumer::<Hello, SlowConsumer, _>("SlowConsumer", move || {
                    Arc::new(SlowConsumer {
                        finished: Arc::clone(&finished_in_factory),
                    })
                })
                .build()
                .unwrap(),
        );
        let channel = provisioned_channel(&broker, &registry).await;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            BusConfig::default(),
            Arc::clone(&channel),
        );
        dispatcher.start(&CancellationToken::new()).await.unwrap();

        channel
            .publish("test.Hello", "", raw_envelope(Some("test.Hello")))
            .await
            .unwrap();

        // Give the subscription a moment to pick the delivery up, then stop.
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.stop().await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
    }
}
