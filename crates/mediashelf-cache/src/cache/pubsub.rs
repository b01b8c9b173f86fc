//! Redis Pub/Sub for cross-instance L1 invalidation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::local::LocalCache;

/// What another instance asked us to evict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum InvalidationTarget {
    Key(String),
    Pattern(String),
    All,
}

/// Payload published on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Instance id of the publisher; an instance ignores its own messages.
    pub origin: String,
    pub target: InvalidationTarget,
}

impl InvalidationMessage {
    pub fn new(origin: impl Into<String>, target: InvalidationTarget) -> Self {
        Self {
            origin: origin.into(),
            target,
        }
    }

    pub fn encode(&self) -> String {
        // Two string fields and a tagged enum cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

/// Cache invalidation listener that subscribes to Redis Pub/Sub.
///
/// ## Example Flow
///
/// ```text
/// Instance 1: facade.delete("series:1")
///   ↓
/// Redis Pub/Sub: PUBLISH mediashelf:cache:invalidate {"origin":"i1","target":{"type":"key","value":"series:1"}}
///   ↓
/// Instance 2: listener receives it → removes "series:1" from L1
/// ```
pub struct InvalidationListener {
    redis_url: String,
    channel: String,
    origin: String,
    local: Arc<LocalCache>,
}

impl InvalidationListener {
    pub fn new(
        redis_url: impl Into<String>,
        channel: impl Into<String>,
        origin: impl Into<String>,
        local: Arc<LocalCache>,
    ) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
            origin: origin.into(),
            local,
        }
    }

    /// Spawns the listener. Reconnects with exponential backoff if the
    /// subscription drops.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match self.run().await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "cache invalidation listener error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        let client = redis::Client::open(self.redis_url.clone())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = %self.channel, "subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    self.handle_payload(&payload);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read invalidation message payload");
                }
            }
        }
        Err("pub/sub connection closed".to_string())
    }

    /// Applies one message to the local cache. Returns the number of entries evicted.
    pub fn handle_payload(&self, payload: &str) -> usize {
        let Some(message) = InvalidationMessage::decode(payload) else {
            tracing::warn!(payload = %payload, "ignoring malformed invalidation message");
            return 0;
        };
        if message.origin == self.origin {
            return 0;
        }

        let evicted = match &message.target {
            InvalidationTarget::Key(key) => usize::from(self.local.delete(key)),
            InvalidationTarget::Pattern(pattern) => self.local.invalidate_pattern(pattern),
            InvalidationTarget::All => self.local.clear(),
        };
        tracing::debug!(invalidation = ?message.target, evicted, "applied remote cache invalidation");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(local: Arc<LocalCache>) -> InvalidationListener {
        InvalidationListener::new("redis://127.0.0.1:6379", "test:cache:invalidate", "me", local)
    }

    #[test]
    fn test_message_encoding() {
        let message = InvalidationMessage::new("i1", InvalidationTarget::Key("series:1".into()));
        let encoded = message.encode();
        assert_eq!(
            encoded,
            r#"{"origin":"i1","target":{"type":"key","value":"series:1"}}"#
        );
        assert_eq!(InvalidationMessage::decode(&encoded), Some(message));
        assert_eq!(InvalidationMessage::decode("series:1"), None);
    }

    #[test]
    fn test_handle_payload_evicts_from_local() {
        let local = Arc::new(LocalCache::new(100));
        for key in ["series:1", "count:series:a", "count:series:b", "other"] {
            local.set(key, vec![1], Duration::from_secs(60));
        }
        let listener = listener(local.clone());

        let key = InvalidationMessage::new("peer", InvalidationTarget::Key("series:1".into()));
        assert_eq!(listener.handle_payload(&key.encode()), 1);

        let pattern =
            InvalidationMessage::new("peer", InvalidationTarget::Pattern("count:series:".into()));
        assert_eq!(listener.handle_payload(&pattern.encode()), 2);
        assert_eq!(local.len(), 1);

        let all = InvalidationMessage::new("peer", InvalidationTarget::All);
        assert_eq!(listener.handle_payload(&all.encode()), 1);
        assert!(local.is_empty());
    }

    #[test]
    fn test_own_messages_are_ignored() {
        let local = Arc::new(LocalCache::new(10));
        local.set("k", vec![1], Duration::from_secs(60));
        let listener = listener(local.clone());

        let own = InvalidationMessage::new("me", InvalidationTarget::Key("k".into()));
        assert_eq!(listener.handle_payload(&own.encode()), 0);
        assert!(local.exists("k"));
    }
}
