//! # In-Memory Broker
//!
//! A hermetic [`BrokerConnector`]/[`BrokerChannel`] implementation used by
//! tests and the demo binaries. It honors the same contract a networked
//! broker would: idempotent declarations, fail-fast binds against undeclared
//! exchanges, fan-out delivery to every bound queue, and per-queue FIFO
//! buffering so messages published before a subscriber attaches are not
//! lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BusError, BusResult};
use crate::messaging::broker::{BrokerChannel, BrokerConnector, ExchangeKind};
use crate::messaging::envelope::Envelope;

struct ExchangeState {
    kind: ExchangeKind,
    bindings: Vec<String>,
}

struct QueueState {
    durable: bool,
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
}

struct BrokerState {
    exchanges: DashMap<String, ExchangeState>,
    queues: DashMap<String, QueueState>,
    queue_capacity: usize,
}

/// In-process broker. Cloning yields a handle to the same broker, so a
/// publisher channel and a dispatcher channel opened from clones see one
/// shared topology.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_queue_capacity(crate::config::DEFAULT_CHANNEL_CAPACITY)
    }

    /// Broker whose queues buffer at most `capacity` undelivered messages.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(BrokerState {
                exchanges: DashMap::new(),
                queues: DashMap::new(),
                queue_capacity: capacity,
            }),
        }
    }

    /// Names of all declared exchanges.
    pub fn exchange_names(&self) -> Vec<String> {
        self.state
            .exchanges
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Names of all declared queues.
    pub fn queue_names(&self) -> Vec<String> {
        self.state
            .queues
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Exchanges a queue is bound to.
    pub fn bindings_of(&self, queue: &str) -> Vec<String> {
        self.state
            .exchanges
            .iter()
            .filter(|entry| entry.value().bindings.iter().any(|q| q == queue))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self, target: &str) -> BusResult<Arc<dyn BrokerChannel>> {
        debug!(connection_target = %target, "opening in-memory broker channel");
        Ok(Arc::new(InMemoryChannel {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryChannel {
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BusResult<()> {
        self.ensure_open()?;

        match self.state.exchanges.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                // Re-declaration with identical parameters is a no-op.
                if existing.get().kind != kind {
                    return Err(BusError::topology(
                        name,
                        "declare_exchange",
                        format!(
                            "already declared with kind {:?}, requested {:?}",
                            existing.get().kind,
                            kind
                        ),
                    ));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(ExchangeState {
                    kind,
                    bindings: Vec::new(),
                });
                debug!(exchange = %name, ?kind, "declared exchange");
            }
        }
        Ok(())
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> BusResult<()> {
        self.ensure_open()?;

        match self.state.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().durable != durable {
                    return Err(BusError::topology(
                        name,
                        "declare_queue",
                        "already declared with different durability",
                    ));
                }
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(self.state.queue_capacity);
                slot.insert(QueueState {
                    durable,
                    tx,
                    rx: Mutex::new(Some(rx)),
                });
                debug!(queue = %name, durable, "declared queue");
            }
        }
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BusResult<()> {
        self.ensure_open()?;

        if !self.state.queues.contains_key(queue) {
            return Err(BusError::topology(
                queue,
                "bind_queue",
                "queue not declared",
            ));
        }

        let mut exchange_state = self.state.exchanges.get_mut(exchange).ok_or_else(|| {
            BusError::topology(exchange, "bind_queue", "exchange not declared")
        })?;

        if !exchange_state.bindings.iter().any(|q| q == queue) {
            exchange_state.bindings.push(queue.to_string());
            debug!(queue = %queue, exchange = %exchange, routing_key = %routing_key, "bound queue");
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        _routing_key: &str,
        envelope: Envelope,
    ) -> BusResult<()> {
        self.ensure_open()?;

        let bindings = {
            let exchange_state = self
                .state
                .exchanges
                .get(exchange)
                .ok_or_else(|| BusError::publish(exchange, "exchange not declared"))?;
            exchange_state.bindings.clone()
        };

        for queue in &bindings {
            let queue_state = self
                .state
                .queues
                .get(queue)
                .ok_or_else(|| BusError::publish(exchange, format!("bound queue {queue} gone")))?;

            queue_state.tx.try_send(envelope.clone()).map_err(|e| {
                BusError::publish(exchange, format!("delivery to queue {queue} failed: {e}"))
            })?;
        }

        debug!(
            exchange = %exchange,
            envelope_id = %envelope.id,
            queues = bindings.len(),
            "published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        _auto_ack: bool,
    ) -> BusResult<mpsc::Receiver<Envelope>> {
        self.ensure_open()?;

        let mut queue_state = self
            .state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::topology(queue, "subscribe", "queue not declared"))?;

        let taken = queue_state.rx.lock().take();
        if let Some(receiver) = taken {
            return Ok(receiver);
        }

        // A dropped receiver closes the sender. The previous subscriber is
        // gone, so hand out a fresh stream; anything it left unconsumed is
        // discarded with it.
        if queue_state.tx.is_closed() {
            let (tx, receiver) = mpsc::channel(self.state.queue_capacity);
            queue_state.tx = tx;
            debug!(queue = %queue, "previous subscription ended, queue stream renewed");
            return Ok(receiver);
        }

        Err(BusError::internal(format!(
            "queue {queue} already has an active subscription"
        )))
    }

    async fn close(&self) -> BusResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("in-memory broker channel closed");
        Ok(())
    }
}
