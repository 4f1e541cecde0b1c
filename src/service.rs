//! # Message Bus Service
//!
//! The process-boundary façade: registration at build time, then
//! `provision_and_start`, `publish`, and `stop`. Equivalent to wiring the
//! registry, provisioner, publisher, and dispatcher by hand, with the
//! startup ordering enforced: topology is fully provisioned before any
//! subscription opens, and a failure anywhere in startup aborts the whole
//! service.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BusConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{BusError, BusResult};
use crate::messaging::broker::BrokerConnector;
use crate::messaging::message::{Consumer, Message};
use crate::publisher::Publisher;
use crate::registry::{RegistryBuilder, TypeRegistry};
use crate::topology;

/// Builder for [`MessageBus`]: supply config and a broker connector, then
/// list every message type and consumer.
pub struct MessageBusBuilder {
    config: BusConfig,
    connector: Arc<dyn BrokerConnector>,
    registry: RegistryBuilder,
}

impl MessageBusBuilder {
    /// Register a message type.
    pub fn message<M: Message>(mut self) -> Self {
        self.registry = self.registry.message::<M>();
        self
    }

    /// Register a consumer with the factory that resolves its instances.
    pub fn consumer<M, C, F>(mut self, consumer_name: impl Into<String>, factory: F) -> Self
    where
        M: Message,
        C: Consumer<M> + 'static,
        F: Fn() -> Arc<C> + Send + Sync + 'static,
    {
        self.registry = self.registry.consumer::<M, C, F>(consumer_name, factory);
        self
    }

    /// Validate registrations and build the bus. Registration errors are
    /// reported here, at startup, never at dispatch time.
    pub fn build(self) -> BusResult<MessageBus> {
        let registry = Arc::new(self.registry.build()?);
        let publisher = Publisher::new(
            Arc::clone(&registry),
            Arc::clone(&self.connector),
            self.config.connection_target.clone(),
        );

        Ok(MessageBus {
            config: self.config,
            connector: self.connector,
            registry,
            publisher,
            dispatcher: Mutex::new(DispatcherSlot::Idle),
        })
    }
}

/// Typed publish/subscribe bus over a broker.
pub struct MessageBus {
    config: BusConfig,
    connector: Arc<dyn BrokerConnector>,
    registry: Arc<TypeRegistry>,
    publisher: Publisher,
    dispatcher: Mutex<DispatcherSlot>,
}

/// Lifecycle slot for the dispatcher. `Starting` reserves the slot for the
/// duration of startup, so concurrent `provision_and_start` callers cannot
/// both pass the not-yet-running check and leak a dispatcher.
enum DispatcherSlot {
    Idle,
    Starting,
    Running(Arc<Dispatcher>),
}

impl MessageBus {
    pub fn builder(config: BusConfig, connector: Arc<dyn BrokerConnector>) -> MessageBusBuilder {
        MessageBusBuilder {
            config,
            connector,
            registry: RegistryBuilder::new(),
        }
    }

    /// The frozen registration table backing this bus.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Provision broker topology, then open every consumer subscription.
    ///
    /// Completes only once the topology exists and all subscriptions are
    /// open; partial topology or a failed subscription aborts startup with
    /// the underlying error.
    pub async fn provision_and_start(&self, cancel: &CancellationToken) -> BusResult<()> {
        {
            let mut slot = self.dispatcher.lock();
            if !matches!(*slot, DispatcherSlot::Idle) {
                return Err(BusError::internal("bus already started"));
            }
            *slot = DispatcherSlot::Starting;
        }

        info!(
            connection_target = %self.config.connection_target,
            "starting message bus"
        );

        let startup = async {
            let channel = self
                .connector
                .connect(&self.config.connection_target)
                .await?;
            topology::provision(channel.as_ref(), &self.registry, &self.config).await?;

            let dispatcher = Arc::new(Dispatcher::new(
                Arc::clone(&self.registry),
                self.config.clone(),
                channel,
            ));
            dispatcher.start(cancel).await?;
            Ok::<_, BusError>(dispatcher)
        };

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::cancelled("provision_and_start")),
            result = startup => result,
        };

        match started {
            Ok(dispatcher) => {
                *self.dispatcher.lock() = DispatcherSlot::Running(dispatcher);
                info!("message bus started");
                Ok(())
            }
            Err(error) => {
                // Release the reservation so a later start can retry.
                *self.dispatcher.lock() = DispatcherSlot::Idle;
                Err(error)
            }
        }
    }

    /// Publish a message to the exchange of its type.
    pub async fn publish<M: Message>(
        &self,
        message: &M,
        cancel: &CancellationToken,
    ) -> BusResult<()> {
        self.publisher.publish(message, cancel).await
    }

    /// Stop dispatching and close the dispatcher channel. In-flight handler
    /// invocations finish unless the caller's token fires first.
    pub async fn stop(&self, cancel: &CancellationToken) -> BusResult<()> {
        let dispatcher = {
            let mut slot = self.dispatcher.lock();
            match std::mem::replace(&mut *slot, DispatcherSlot::Idle) {
                DispatcherSlot::Running(dispatcher) => dispatcher,
                previous => {
                    *slot = previous;
                    return Err(BusError::internal("bus is not running"));
                }
            }
        };

        tokio::select! {
            biased;
            result = dispatcher.stop() => result,
            _ = cancel.cancelled() => Err(BusError::cancelled("stop")),
        }
    }
}
