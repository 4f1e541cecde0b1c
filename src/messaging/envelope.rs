//! # Envelope Codec
//!
//! The wire unit: a type tag plus a self-describing JSON payload. The tag is
//! the only out-of-band routing hint; the codec never infers a type from
//! payload content, the caller resolves the tag through the type registry
//! and supplies the concrete type to [`Envelope::decode`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{BusError, BusResult};
use crate::messaging::message::Message;

/// Header key carrying the message type's identity.
pub const TYPE_HEADER: &str = "Type";

/// A typed message in transit: headers (always including the `Type` tag) and
/// the serialized payload, plus an id and timestamp for correlation in logs.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique id of this envelope, fresh per publish.
    pub id: Uuid,
    /// Routing metadata. Contains at least the [`TYPE_HEADER`] entry.
    pub headers: HashMap<String, String>,
    /// JSON-serialized message payload.
    pub body: Vec<u8>,
    /// When the envelope was encoded by the publisher.
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    /// Serialize a message into an envelope tagged with its type identity.
    pub fn encode<M: Message>(message: &M) -> BusResult<Self> {
        let body = serde_json::to_vec(message)
            .map_err(|e| BusError::internal(format!("failed to serialize {}: {e}", M::TYPE_NAME)))?;

        let mut headers = HashMap::new();
        headers.insert(TYPE_HEADER.to_string(), M::TYPE_NAME.to_string());

        Ok(Self {
            id: Uuid::new_v4(),
            headers,
            body,
            published_at: Utc::now(),
        })
    }

    /// Deserialize the payload as the given concrete type.
    ///
    /// The caller is responsible for resolving the type from the tag first;
    /// a payload that does not parse as `M` is a [`BusError::Decode`].
    pub fn decode<M: Message>(&self) -> BusResult<M> {
        serde_json::from_slice(&self.body)
            .map_err(|e| BusError::decode(self.type_tag().unwrap_or("<missing>"), e.to_string()))
    }

    /// The type tag carried in the headers, if present.
    pub fn type_tag(&self) -> Option<&str> {
        self.headers.get(TYPE_HEADER).map(String::as_str)
    }
}
