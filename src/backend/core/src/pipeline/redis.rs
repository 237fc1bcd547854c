//! Redis Streams transport.
//!
//! Each topic is a stream. Consumer groups give every service a durable
//! cursor: messages are read with `XREADGROUP` and acknowledged with `XACK`.
//! On subscribe the group's pending entries for this consumer are
//! redelivered first, so a crash between read and ack does not lose them.

use async_trait::async_trait;
use redis::streams::StreamReadReply;
use std::collections::VecDeque;
use std::time::Duration;

use super::broker::{Broker, BrokerMessage, Subscription};
use crate::config::BrokerConfig;
use crate::error::{ErrorCode, ErrorContext, PopugError, Result};

const KEY_FIELD: &str = "key";
const PAYLOAD_FIELD: &str = "payload";

/// Broker backed by Redis Streams.
#[derive(Clone)]
pub struct RedisStreamBroker {
    client: redis::Client,
    consumer_name: String,
    block: Duration,
    batch_size: usize,
}

impl RedisStreamBroker {
    /// Create a broker from configuration. Connections are opened lazily.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .with_error_code(ErrorCode::BrokerConnectionFailed)?;
        Ok(Self {
            client,
            consumer_name: config.consumer_name.clone(),
            block: config.block,
            batch_size: config.batch_size,
        })
    }

    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(|e| {
            PopugError::with_internal(
                ErrorCode::BrokerConnectionFailed,
                "Failed to get Redis connection for the broker",
                e.to_string(),
            )
            .with_source(e)
        })
    }

    /// Create `group` on `topic` (and the stream itself) unless it exists.
    async fn ensure_group(
        conn: &mut redis::aio::MultiplexedConnection,
        topic: &str,
        group: &str,
    ) -> Result<()> {
        let created = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async::<_, ()>(conn)
            .await;

        match created {
            Ok(_) => {
                tracing::info!(topic, group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(PopugError::with_internal(
                ErrorCode::BrokerError,
                format!("Failed to create consumer group {} on {}", group, topic),
                e.to_string(),
            )),
        }
    }
}

#[async_trait]
impl Broker for RedisStreamBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(KEY_FIELD)
            .arg(key)
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| PopugError::publish_failed(topic, e.to_string()))?;

        tracing::trace!(topic, key, stream_id = %id, "Message appended");
        Ok(())
    }

    async fn subscribe(&self, group: &str, topics: &[String]) -> Result<Box<dyn Subscription>> {
        let mut conn = self.get_conn().await?;
        for topic in topics {
            Self::ensure_group(&mut conn, topic, group).await?;
        }

        tracing::info!(group, consumer = %self.consumer_name, topics = ?topics, "Subscribed to streams");
        Ok(Box::new(RedisSubscription {
            conn,
            group: group.to_string(),
            consumer: self.consumer_name.clone(),
            topics: topics.to_vec(),
            block: self.block,
            batch_size: self.batch_size,
            backlog: Some(vec!["0".to_string(); topics.len()]),
            buffer: VecDeque::new(),
        }))
    }
}

struct RedisSubscription {
    conn: redis::aio::MultiplexedConnection,
    group: String,
    consumer: String,
    topics: Vec<String>,
    block: Duration,
    batch_size: usize,
    /// Per-topic position in this consumer's pending entries while they are being drained.
    backlog: Option<Vec<String>>,
    buffer: VecDeque<BrokerMessage>,
}

impl RedisSubscription {
    async fn read_batch(&mut self) -> Result<()> {
        let start_ids = self
            .backlog
            .clone()
            .unwrap_or_else(|| vec![">".to_string(); self.topics.len()]);

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch_size);
        if self.backlog.is_none() {
            cmd.arg("BLOCK").arg(self.block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.topics);
        cmd.arg(&start_ids);

        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| PopugError::broker_read_failed(e.to_string()))?;

        let mut read = 0usize;
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                read += 1;
                if let Some(cursors) = self.backlog.as_mut() {
                    if let Some(i) = self.topics.iter().position(|t| *t == stream.key) {
                        cursors[i] = entry.id.clone();
                    }
                }
                let Some(payload) = entry.get::<Vec<u8>>(PAYLOAD_FIELD) else {
                    tracing::warn!(topic = %stream.key, stream_id = %entry.id, "Stream entry without payload");
                    continue;
                };
                self.buffer.push_back(BrokerMessage {
                    topic: stream.key.clone(),
                    key: entry.get::<String>(KEY_FIELD).unwrap_or_default(),
                    payload,
                    offset: entry.id.clone(),
                });
            }
        }

        if self.backlog.is_some() && read == 0 {
            tracing::debug!(group = %self.group, "Pending entries drained");
            self.backlog = None;
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next(&mut self) -> Result<Option<BrokerMessage>> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(Some(message));
            }
            self.read_batch().await?;
        }
    }

    async fn commit(&mut self, message: &BrokerMessage) -> Result<()> {
        redis::cmd("XACK")
            .arg(&message.topic)
            .arg(&self.group)
            .arg(&message.offset)
            .query_async::<_, i64>(&mut self.conn)
            .await
            .map_err(|e| {
                PopugError::with_internal(
                    ErrorCode::BrokerError,
                    format!("Failed to acknowledge {} on {}", message.offset, message.topic),
                    e.to_string(),
                )
                .with_source(e)
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        let config = BrokerConfig {
            redis_url: "not a url".into(),
            ..Default::default()
        };
        let err = RedisStreamBroker::new(&config).err().unwrap();
        assert_eq!(err.code(), ErrorCode::BrokerConnectionFailed);
    }

    #[test]
    fn test_builds_from_default_config() {
        let broker = RedisStreamBroker::new(&BrokerConfig::default()).unwrap();
        assert_eq!(broker.batch_size, BrokerConfig::default().batch_size);
    }
}
