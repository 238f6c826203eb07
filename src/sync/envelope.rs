//! Push message envelope and how it lands in local state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::models::Entity;
use crate::rows::RowCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEvent {
    Created,
    Updated,
    Deleted,
}

/// `{topic, event, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: PushEvent,
    #[serde(default)]
    pub payload: Value,
}

/// What applying one message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Upserted(String),
    Deleted(String),
    /// Message for another topic on a shared transport
    ForeignTopic,
    /// Undecodable, or payload without a usable key
    Dropped,
}

/// Destination of one topic's events: its row collection plus, for topics
/// whose rows double as cross-referenced entities, the entity cache.
#[derive(Clone)]
pub struct TopicSink {
    pub topic: String,
    pub rows: RowCollection,
    pub cache: Option<EntityCache>,
}

impl TopicSink {
    pub fn new(topic: impl Into<String>, rows: RowCollection, cache: Option<EntityCache>) -> Self {
        Self {
            topic: topic.into(),
            rows,
            cache,
        }
    }

    pub fn apply_text(&self, text: &str) -> Applied {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.apply(envelope),
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Failed to decode push message");
                Applied::Dropped
            }
        }
    }

    pub fn apply(&self, envelope: Envelope) -> Applied {
        if envelope.topic != self.topic {
            return Applied::ForeignTopic;
        }

        let key_field = self.rows.key_field();
        let payload = match envelope.payload {
            // Bare key is accepted for deletes
            Value::String(key) if envelope.event == PushEvent::Deleted => {
                Entity::new().with(key_field, key)
            }
            other => match Entity::from_value(other) {
                Some(entity) => entity,
                None => {
                    warn!(topic = %self.topic, "Push payload is not an object");
                    return Applied::Dropped;
                }
            },
        };
        let Some(key) = payload.key_of(key_field) else {
            warn!(topic = %self.topic, "Push payload has no key");
            return Applied::Dropped;
        };

        match envelope.event {
            PushEvent::Created | PushEvent::Updated => {
                let change = self.rows.upsert(payload.clone());
                if let Some(cache) = &self.cache {
                    cache.upsert(payload);
                }
                debug!(topic = %self.topic, key = %key, ?change, "Applied push upsert");
                Applied::Upserted(key)
            }
            PushEvent::Deleted => {
                self.rows.remove(&key);
                if let Some(cache) = &self.cache {
                    cache.delete(&key);
                }
                debug!(topic = %self.topic, key = %key, "Applied push delete");
                Applied::Deleted(key)
            }
        }
    }
}
