//! Kafka transport on top of `rdkafka`.
//!
//! [`KafkaSource`] runs a background pump that keeps the group session
//! polled (joins, heartbeats and rebalances all happen inside polls) and
//! hands records to the consumer through a bounded channel. A backlogged
//! partition is paused rather than left to stall that channel, so the pump
//! keeps polling. Offsets are stored on acknowledgement and committed by the
//! client's auto-commit timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, MessageSink, MessageSource};
use crate::config::KafkaConfig;
use crate::utils::ScanError;

const INBOX_CAPACITY: usize = 64;
const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn transport(e: KafkaError) -> ScanError {
    ScanError::Transport(e.to_string())
}

fn describe(tpl: &TopicPartitionList) -> String {
    tpl.elements()
        .iter()
        .map(|e| format!("{}[{}]", e.topic(), e.partition()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tracks how many partitions the group currently assigns to us.
pub struct GroupContext {
    assigned: watch::Sender<usize>,
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            info!("Partitions revoked: {}", describe(tpl));
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!("Partitions assigned: {}", describe(tpl));
                self.assigned.send_replace(tpl.count());
            }
            Rebalance::Revoke(_) => {
                self.assigned.send_replace(0);
            }
            Rebalance::Error(e) => warn!("Rebalance error: {}", e),
        }
    }
}

type GroupConsumer = StreamConsumer<GroupContext>;

pub struct KafkaSource {
    consumer: Arc<GroupConsumer>,
    topic: String,
    assigned: watch::Receiver<usize>,
    inbox: Mutex<mpsc::Receiver<Result<InboundMessage, ScanError>>>,
    stop: CancellationToken,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl KafkaSource {
    /// Create the group consumer, subscribe to the input topic and start
    /// polling. Must be called inside a Tokio runtime.
    pub fn new(config: &KafkaConfig) -> Result<Self, ScanError> {
        let (assigned_tx, assigned) = watch::channel(0usize);

        let consumer: GroupConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.consumer.group_id)
            .set("auto.offset.reset", &config.consumer.auto_offset_reset)
            .set("partition.assignment.strategy", "roundrobin")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set_log_level(RDKafkaLogLevel::Warning)
            .create_with_context(GroupContext {
                assigned: assigned_tx,
            })
            .map_err(transport)?;

        consumer
            .subscribe(&[config.consumer.topic.as_str()])
            .map_err(transport)?;
        info!(
            "Joining group {} on topic {} ({})",
            config.consumer.group_id,
            config.consumer.topic,
            config.brokers.join(",")
        );

        let consumer = Arc::new(consumer);
        let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let stop = CancellationToken::new();
        let pump = tokio::spawn(poll_pump(Arc::clone(&consumer), inbox_tx, stop.clone()));

        Ok(KafkaSource {
            consumer,
            topic: config.consumer.topic.clone(),
            assigned,
            inbox: Mutex::new(inbox),
            stop,
            pump: std::sync::Mutex::new(Some(pump)),
        })
    }

    fn partition_list(&self, partition: i32) -> TopicPartitionList {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&self.topic, partition);
        tpl
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

async fn poll_pump(
    consumer: Arc<GroupConsumer>,
    inbox: mpsc::Sender<Result<InboundMessage, ScanError>>,
    stop: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = stop.cancelled() => break,
            received = consumer.recv() => match received {
                Ok(message) => Ok(to_inbound(&message)),
                Err(e) => Err(transport(e)),
            },
        };
        if inbox.send(item).await.is_err() {
            break;
        }
    }
    debug!("Kafka poll pump stopped");
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<bool, ScanError> {
        let mut assigned = self.assigned.clone();
        loop {
            if *assigned.borrow_and_update() > 0 {
                return Ok(true);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                changed = assigned.changed() => {
                    if changed.is_err() {
                        return Err(ScanError::Transport("consumer context dropped".to_string()));
                    }
                }
            }
        }
    }

    async fn recv(&self) -> Result<Option<InboundMessage>, ScanError> {
        match self.inbox.lock().await.recv().await {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }

    fn pause(&self, partition: i32) -> Result<(), ScanError> {
        self.consumer
            .pause(&self.partition_list(partition))
            .map_err(transport)
    }

    fn resume(&self, partition: i32) -> Result<(), ScanError> {
        self.consumer
            .resume(&self.partition_list(partition))
            .map_err(transport)
    }

    fn acknowledge(&self, message: &InboundMessage) -> Result<(), ScanError> {
        // The committed position is the next offset to read
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)
            .map_err(transport)
    }

    fn close(&self) -> Result<(), ScanError> {
        self.stop.cancel();
        if let Some(pump) = self.pump.lock().ok().and_then(|mut p| p.take()) {
            pump.abort();
        }

        let committed = self.consumer.commit_consumer_state(CommitMode::Sync);
        self.consumer.unsubscribe();

        match committed {
            Ok(()) => Ok(()),
            // Nothing stored since the last auto-commit
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {
                debug!("Final commit skipped: nothing stored");
                Ok(())
            }
            Err(e) => Err(transport(e)),
        }
    }
}

/// Producer waiting for acknowledgement from all in-sync replicas.
pub struct KafkaSink {
    producer: FutureProducer,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> Result<Self, ScanError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("acks", "all")
            .set("message.send.max.retries", "5")
            .set("compression.type", "snappy")
            .set_log_level(RDKafkaLogLevel::Warning)
            .create()
            .map_err(transport)?;

        Ok(KafkaSink { producer })
    }

    /// Wait for queued records to be delivered.
    pub fn flush(&self) -> Result<(), ScanError> {
        self.producer
            .flush(Timeout::After(FLUSH_TIMEOUT))
            .map_err(transport)
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64), ScanError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record, Timeout::After(SEND_QUEUE_TIMEOUT))
            .await
            .map_err(|(e, _)| transport(e))
    }
}
