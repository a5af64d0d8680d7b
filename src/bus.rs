//! Message bus abstraction (component E collaborator, §6).
//!
//! The pipeline depends on a narrow subscribe/commit/publish contract, not
//! on `rdkafka` directly — mirroring the Go source's `datasources/kafka`
//! package, which wraps a `kafka.Reader`/`kafka.Writer` pair behind
//! `Subscribe`/`Commit`/`Publish`. [`KafkaBus`] is the real implementation;
//! [`memory::InMemoryBus`] is an in-process fake for the pipeline's tests.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::TopicPartitionList;
use std::time::Duration;
use thiserror::Error;

pub const TOPIC_ENGINE: &str = "ENGINE";
pub const TOPIC_CANCELLED_ORDER: &str = "CANCELLED_ORDER";
pub const TOPIC_ENGINE_SAVED: &str = "ENGINE_SAVED";
pub const TOPIC_CANCELLED_ORDER_SAVED: &str = "CANCELLED_ORDER_SAVED";

/// One fetched bus message, already detached from the underlying client's
/// borrowed representation so it can be handed to the pipeline and,
/// on commit, handed back.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Acknowledges `msg` as durably processed. Manual-commit semantics:
    /// nothing before this call advances the consumer group's offset.
    async fn commit(&self, msg: &BusMessage) -> Result<(), BusError>;

    /// Publishes `payload` to `topic`, byte-for-byte identical to whatever
    /// the caller passes — the pipeline always forwards the original
    /// message value verbatim (§6).
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// Owns the consumer and producer handles and auto-creates the four topics
/// this service cares about on connect, exactly like
/// `datasources/kafka.InitConnection` in the Go source.
pub struct KafkaBus {
    consumer: StreamConsumer,
    producer: FutureProducer,
}

impl KafkaBus {
    pub async fn connect(broker_url: &str, consumer_group_id: &str) -> Result<Self, BusError> {
        ensure_topics(
            broker_url,
            &[
                TOPIC_ENGINE,
                TOPIC_CANCELLED_ORDER,
                TOPIC_ENGINE_SAVED,
                TOPIC_CANCELLED_ORDER_SAVED,
            ],
        )
        .await?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", broker_url)
            .set("group.id", consumer_group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[TOPIC_ENGINE, TOPIC_CANCELLED_ORDER])?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", broker_url)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { consumer, producer })
    }

    /// Blocks until the next message is available and returns it as an
    /// owned [`BusMessage`]. Errors are logged by the caller and retried —
    /// a single fetch failure must never bring the subscription loop down.
    pub async fn recv(&self) -> Result<BusMessage, BusError> {
        let borrowed = self.consumer.recv().await?;
        Ok(BusMessage {
            topic: borrowed.topic().to_string(),
            partition: borrowed.partition(),
            offset: borrowed.offset(),
            value: borrowed.payload().unwrap_or_default().to_vec(),
        })
    }

    pub async fn close(&self) {
        // `StreamConsumer`/`FutureProducer` flush and disconnect on drop;
        // this just gives in-flight commits a moment to land first.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[async_trait]
impl Bus for KafkaBus {
    async fn commit(&self, msg: &BusMessage) -> Result<(), BusError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &msg.topic,
            msg.partition,
            rdkafka::Offset::Offset(msg.offset + 1),
        )
        .map_err(BusError::Kafka)?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(topic).payload(payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| BusError::Kafka(e))?;
        Ok(())
    }
}

async fn ensure_topics(broker_url: &str, topics: &[&str]) -> Result<(), BusError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", broker_url)
        .create()?;

    let new_topics: Vec<NewTopic> = topics
        .iter()
        .map(|t| NewTopic::new(t, 1, TopicReplication::Fixed(1)))
        .collect();

    // Topics that already exist come back as individual errors in the
    // response; we don't treat that as fatal, matching the Go source's
    // best-effort `CreateTopics` call.
    let _ = admin
        .create_topics(&new_topics, &AdminOptions::new())
        .await;

    Ok(())
}

/// In-memory fake bus for unit tests.
pub mod memory {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct InMemoryBus {
        pub committed: Mutex<Vec<BusMessage>>,
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub fail_commit: Mutex<bool>,
        pub fail_publish: Mutex<bool>,
    }

    impl InMemoryBus {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Bus for InMemoryBus {
        async fn commit(&self, msg: &BusMessage) -> Result<(), BusError> {
            if *self.fail_commit.lock() {
                return Err(BusError::Kafka(rdkafka::error::KafkaError::Canceled));
            }
            self.committed.lock().push(msg.clone());
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
            if *self.fail_publish.lock() {
                return Err(BusError::Kafka(rdkafka::error::KafkaError::Canceled));
            }
            self.published
                .lock()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }
}
