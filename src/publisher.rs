//! # Publisher
//!
//! Encodes a typed message and sends it to the exchange named by the
//! message's type identity. The broker channel is established lazily on the
//! first publish and shared by every subsequent call; the one-time
//! initialization is guarded by a [`tokio::sync::OnceCell`], so concurrent
//! first-time callers agree on a single channel.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BusError, BusResult};
use crate::messaging::broker::{BrokerChannel, BrokerConnector};
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::registry::TypeRegistry;

pub struct Publisher {
    registry: Arc<TypeRegistry>,
    connector: Arc<dyn BrokerConnector>,
    connection_target: String,
    channel: OnceCell<Arc<dyn BrokerChannel>>,
}

impl Publisher {
    pub fn new(
        registry: Arc<TypeRegistry>,
        connector: Arc<dyn BrokerConnector>,
        connection_target: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            connector,
            connection_target: connection_target.into(),
            channel: OnceCell::new(),
        }
    }

    /// Publish a message to the exchange of its type.
    ///
    /// Publishing a type that was never registered is a usage error reported
    /// before any broker call. Cancellation before the broker accepts the
    /// message fails with [`BusError::Cancelled`]; the message is not
    /// guaranteed sent in that case.
    pub async fn publish<M: Message>(
        &self,
        message: &M,
        cancel: &CancellationToken,
    ) -> BusResult<()> {
        if !self.registry.contains_message(M::TYPE_NAME) {
            return Err(BusError::registration(
                M::TYPE_NAME,
                "message type is not registered; add it to the registry before publishing",
            ));
        }

        let envelope = Envelope::encode(message)?;

        // Cancellation covers the whole broker interaction, including the
        // one-time connection establishment on the first publish.
        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BusError::cancelled("publish")),
            result = self.channel() => result?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::cancelled("publish")),
            result = channel.publish(M::TYPE_NAME, "", envelope) => {
                if result.is_ok() {
                    debug!(exchange = M::TYPE_NAME, "message published");
                }
                result
            }
        }
    }

    async fn channel(&self) -> BusResult<&Arc<dyn BrokerChannel>> {
        self.channel
            .get_or_try_init(|| async {
                debug!(connection_target = %self.connection_target, "establishing publisher channel");
                self.connector.connect(&self.connection_target).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::messaging::memory::InMemoryBroker;
    use crate::messaging::message::Consumer;
    use crate::registry::RegistryBuilder;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Hello {
        greeting: String,
    }

    impl Message for Hello {
        const TYPE_NAME: &'static str = "test.Hello";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Unregistered;

    impl Message for Unregistered {
        const TYPE_NAME: &'static str = "test.Unregistered";
    }

    struct EchoConsumer;

    #[async_trait]
    impl Consumer<Hello> for EchoConsumer {
        async fn consume(&self, _message: Hello, _cancel: CancellationToken) -> BusResult<()> {
            Ok(())
        }
    }

    async fn provisioned_setup() -> (InMemoryBroker, Publisher) {
        let broker = InMemoryBroker::new();
        let registry = Arc::new(
            RegistryBuilder::new()
                .message::<Hello>()
                .consumer::<Hello, EchoConsumer, _>("EchoConsumer", || Arc::new(EchoConsumer))
                .build()
                .unwrap(),
        );

        let channel = broker.connect("mem://test").await.unwrap();
        crate::topology::provision(channel.as_ref(), &registry, &BusConfig::default())
            .await
            .unwrap();

        let publisher = Publisher::new(registry, Arc::new(broker.clone()), "mem://test");
        (broker, publisher)
    }

    #[tokio::test]
    async fn test_publish_reaches_bound_queue() {
        let (broker, publisher) = provisioned_setup().await;

        publisher
            .publish(
                &Hello {
                    greeting: "hi".to_string(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let channel = broker.connect("mem://test").await.unwrap();
        let mut rx = channel.subscribe("EchoConsumer", true).await.unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.type_tag(), Some("test.Hello"));

        let decoded: Hello = envelope.decode().unwrap();
        assert_eq!(decoded.greeting, "hi");
    }

    #[tokio::test]
    async fn test_unregistered_type_fails_before_broker_call() {
        let broker = InMemoryBroker::new();
        let registry = Arc::new(RegistryBuilder::new().message::<Hello>().build().unwrap());
        let publisher = Publisher::new(registry, Arc::new(broker.clone()), "mem://test");

        let result = publisher
            .publish(&Unregistered, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BusError::Registration { .. })));

        // No broker interaction happened at all: no exchange, no lazy channel.
        assert!(broker.exchange_names().is_empty());
    }

    struct StalledConnector;

    #[async_trait]
    impl BrokerConnector for StalledConnector {
        async fn connect(&self, _target: &str) -> BusResult<Arc<dyn BrokerChannel>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_lazy_connect() {
        let registry = Arc::new(RegistryBuilder::new().message::<Hello>().build().unwrap());
        let publisher = Publisher::new(registry, Arc::new(StalledConnector), "mem://stalled");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        // The connector never completes; the publish must still return once
        // the caller cancels, rather than hanging on connection setup.
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            publisher.publish(
                &Hello {
                    greeting: "hi".to_string(),
                },
                &cancel,
            ),
        )
        .await
        .expect("publish did not observe cancellation");
        assert!(matches!(result, Err(BusError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_publish_fails_with_cancellation() {
        let (_broker, publisher) = provisioned_setup().await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = publisher
            .publish(
                &Hello {
                    greeting: "hi".to_string(),
                },
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(BusError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_first_publishes_share_one_channel() {
        let (broker, publisher) = provisioned_setup().await;
        let publisher = Arc::new(publisher);

        let mut handles = Vec::new();
        for i in 0..8 {
            let publisher = Arc::clone(&publisher);
            handles.push(tokio::spawn(async move {
                publisher
                    .publish(
                        &Hello {
                            greeting: format!("hi-{i}"),
                        },
                        &CancellationToken::new(),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let channel = broker.connect("mem://test").await.unwrap();
        let mut rx = channel.subscribe("EchoConsumer", true).await.unwrap();
        for _ in 0..8 {
            assert!(rx.recv().await.is_some());
        }
    }
}
