//! Redis reliable-list transport
//!
//! Producers `LPUSH` envelopes onto `<queue>`. Each consumer atomically moves
//! the next envelope into its own `<queue>:processing:<consumer>` list with
//! `BLMOVE`, so a message is never lost while it is being handled:
//!
//! - ack: `LREM` from the processing list
//! - requeue: `LREM` + `LPUSH <queue>` of the envelope with `attempt + 1` (one transaction)
//! - reject: `LREM` + `LPUSH <queue>:dead` (one transaction)
//!
//! Subscribing first moves anything left in the consumer's processing list back
//! onto the queue, which is how deliveries in flight during a crash come back.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use qgate_core::{
    Acknowledger, Delivery, Disposition, JobQueue, JobReceiver, QueueError, UtcDateTime,
};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    id: String,
    attempt: u32,
    /// Base64 of the opaque payload
    payload: String,
    published_at: UtcDateTime,
}

impl Envelope {
    fn new(payload: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            attempt: 1,
            payload: BASE64.encode(payload),
            published_at: Utc::now(),
        }
    }

    fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::InvalidData(e.to_string()))
    }

    fn decode(raw: &[u8]) -> Result<(Self, Vec<u8>), QueueError> {
        let envelope: Envelope =
            serde_json::from_slice(raw).map_err(|e| QueueError::InvalidData(e.to_string()))?;
        let payload = BASE64
            .decode(&envelope.payload)
            .map_err(|e| QueueError::InvalidData(e.to_string()))?;
        Ok((envelope, payload))
    }

    fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    pub url: String,
    pub queue_name: String,
    /// Distinguishes processing lists of consumers sharing one queue
    pub consumer_name: String,
    /// How long one `BLMOVE` blocks before polling again
    pub block_timeout: Duration,
}

impl RedisQueueConfig {
    pub fn new(url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
            consumer_name: unique_consumer_name(),
            block_timeout: Duration::from_secs(1),
        }
    }

    pub fn processing_key(&self) -> String {
        format!("{}:processing:{}", self.queue_name, self.consumer_name)
    }

    pub fn dead_letter_key(&self) -> String {
        format!("{}:dead", self.queue_name)
    }
}

/// Fresh per-process consumer name
///
/// A processing list is recovered only by a consumer with the same name, so a
/// generated name never steals another process's in-flight messages but also
/// leaves its own leftovers behind after a crash. Workers that need recovery
/// must be given a stable name that is unique among running consumers.
pub fn unique_consumer_name() -> String {
    format!("consumer-{}", Uuid::new_v4().simple())
}

fn redis_err(context: &str, e: redis::RedisError) -> QueueError {
    QueueError::ReceiveError(format!("{}: {}", context, e))
}

pub struct RedisQueue {
    client: Client,
    manager: ConnectionManager,
    config: RedisQueueConfig,
}

impl RedisQueue {
    pub async fn connect(config: RedisQueueConfig) -> Result<Self, QueueError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| QueueError::PublishError(format!("invalid redis url: {}", e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::PublishError(format!("redis connection failed: {}", e)))?;

        info!(
            "Connected Redis queue {} (consumer {})",
            config.queue_name, config.consumer_name
        );
        Ok(Self {
            client,
            manager,
            config,
        })
    }

    /// Move leftovers of a previous run of this consumer back onto the queue
    async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let processing = self.config.processing_key();
        let mut recovered = 0;

        loop {
            let moved: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(&self.config.queue_name)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_err("recovering processing list", e))?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            warn!(
                "Recovered {} unacknowledged messages from {}",
                recovered, processing
            );
        }
        Ok(recovered)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let envelope = Envelope::new(payload);
        let raw = envelope.encode()?;
        let mut conn = self.manager.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.config.queue_name)
            .arg(raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::PublishError(e.to_string()))?;

        debug!(
            "Published message {} to {}",
            envelope.id, self.config.queue_name
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn JobReceiver>, QueueError> {
        self.recover_processing().await?;

        // Blocking reads get their own connection so they never stall acks
        let blocking = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("opening consumer connection", e))?;

        Ok(Box::new(RedisReceiver {
            blocking,
            manager: self.manager.clone(),
            config: self.config.clone(),
        }))
    }
}

struct RedisReceiver {
    blocking: MultiplexedConnection,
    manager: ConnectionManager,
    config: RedisQueueConfig,
}

#[async_trait]
impl JobReceiver for RedisReceiver {
    async fn recv(&mut self) -> Result<Option<Delivery>, QueueError> {
        let processing = self.config.processing_key();

        loop {
            let raw: Option<Vec<u8>> = redis::cmd("BLMOVE")
                .arg(&self.config.queue_name)
                .arg(&processing)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(self.config.block_timeout.as_secs_f64())
                .query_async(&mut self.blocking)
                .await
                .map_err(|e| redis_err("BLMOVE", e))?;

            let Some(raw) = raw else {
                continue;
            };

            let acker = RedisAcker {
                manager: self.manager.clone(),
                config: self.config.clone(),
                raw: raw.clone(),
            };

            match Envelope::decode(&raw) {
                Ok((envelope, payload)) => {
                    debug!(
                        "Received message {} (attempt {})",
                        envelope.id, envelope.attempt
                    );
                    return Ok(Some(Delivery::new(
                        payload,
                        envelope.attempt,
                        Box::new(acker),
                    )));
                }
                Err(e) => {
                    warn!("Dead-lettering undecodable envelope: {}", e);
                    Box::new(acker).settle(Disposition::Reject).await?;
                }
            }
        }
    }
}

struct RedisAcker {
    manager: ConnectionManager,
    config: RedisQueueConfig,
    raw: Vec<u8>,
}

#[async_trait]
impl Acknowledger for RedisAcker {
    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let processing = self.config.processing_key();

        let result: redis::RedisResult<()> = match disposition {
            Disposition::Ack => redis::cmd("LREM")
                .arg(&processing)
                .arg(1)
                .arg(&self.raw)
                .query_async(&mut conn)
                .await,
            Disposition::Requeue => {
                let (envelope, _) = Envelope::decode(&self.raw)?;
                let next = envelope.redelivery().encode()?;
                redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&processing)
                    .arg(1)
                    .arg(&self.raw)
                    .ignore()
                    .cmd("LPUSH")
                    .arg(&self.config.queue_name)
                    .arg(next)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            }
            Disposition::Reject => {
                redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&processing)
                    .arg(1)
                    .arg(&self.raw)
                    .ignore()
                    .cmd("LPUSH")
                    .arg(self.config.dead_letter_key())
                    .arg(&self.raw)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            }
        };

        result.map_err(|e| QueueError::SettleError(format!("{}: {}", disposition, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        let mut config = RedisQueueConfig::new("redis://localhost", "qgate:jobs");
        config.consumer_name = "worker-1".into();
        assert_eq!(config.processing_key(), "qgate:jobs:processing:worker-1");
        assert_eq!(config.dead_letter_key(), "qgate:jobs:dead");
    }

    #[test]
    fn test_default_consumer_names_do_not_collide() {
        let first = RedisQueueConfig::new("redis://localhost", "qgate:jobs");
        let second = RedisQueueConfig::new("redis://localhost", "qgate:jobs");

        assert!(first.consumer_name.starts_with("consumer-"));
        assert_ne!(first.consumer_name, second.consumer_name);
        assert_ne!(first.processing_key(), second.processing_key());
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope::new(br#"{"id":"job-1"}"#);
        let raw = envelope.encode().unwrap();

        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["attempt"], 1);
        assert!(json["publishedAt"].is_string());
        assert!(json["id"].is_string());

        let (decoded, payload) = Envelope::decode(raw.as_bytes()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(payload, br#"{"id":"job-1"}"#.to_vec());
    }

    #[test]
    fn test_redelivery_keeps_identity() {
        let envelope = Envelope::new(b"x");
        let next = envelope.redelivery();
        assert_eq!(next.id, envelope.id);
        assert_eq!(next.payload, envelope.payload);
        assert_eq!(next.attempt, 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(b"not json").is_err());
        let bad = r#"{"id":"a","attempt":1,"payload":"%%%","publishedAt":"2024-01-01T00:00:00Z"}"#;
        assert!(Envelope::decode(bad.as_bytes()).is_err());
    }
}
