//! # Message and Consumer Traits
//!
//! The two capability markers the registry discovers: a [`Message`] is a
//! named serializable payload shape, a [`Consumer`] is a handler bound to
//! exactly one message type. Both are explicit trait implementations rather
//! than anything scanned at runtime, so the set of registered types is fixed
//! and checked at compile time.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::BusResult;

/// A named, serializable message shape.
///
/// `TYPE_NAME` is the message type's globally unique identity. It names the
/// exchange the message is published to and travels as the `Type` header tag
/// on every envelope, so it must be identical in every process that
/// publishes or consumes the type. The convention is `"crate.TypeName"`.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use typebus::Message;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl Message for OrderPlaced {
///     const TYPE_NAME: &'static str = "shop.OrderPlaced";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Globally unique identity of this message type.
    const TYPE_NAME: &'static str;
}

/// A handler for exactly one message type.
///
/// One instance is resolved from the consumer's registered factory per
/// delivery; the bus keeps no cross-message state in the handler. The
/// cancellation token is a child of the bus stop signal, so a shutdown
/// request reaches in-flight handlers.
#[async_trait]
pub trait Consumer<M: Message>: Send + Sync {
    /// Handle one decoded message.
    async fn consume(&self, message: M, cancel: CancellationToken) -> BusResult<()>;
}
