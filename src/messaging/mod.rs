//! Broker-facing side of the service: the partitioned consumer loop, result
//! publishing and the transport seams they run on.
//!
//! [`MessageSource`] and [`MessageSink`] are the only points where a concrete
//! broker client plugs in. The Kafka implementation lives in [`kafka`] behind
//! the `kafka` feature.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::utils::ScanError;

pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod publisher;
#[cfg(test)]
pub(crate) mod testing;

pub use consumer::{ConsumerState, FailurePolicy, QueueConsumer};
pub use publisher::{DeadLetterPublisher, ResultPublisher};

/// One record pulled from the input topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Consumer-group membership plus an ordered stream of records.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait until the group session is established and partitions are
    /// assigned. Returns `Ok(false)` when `cancel` fires first.
    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<bool, ScanError>;

    /// Next record from any assigned partition; `Ok(None)` once the stream
    /// has ended for good. Must be cancel safe.
    async fn recv(&self) -> Result<Option<InboundMessage>, ScanError>;

    /// Stop fetching from `partition` until [`MessageSource::resume`].
    /// Records already fetched may still arrive.
    fn pause(&self, partition: i32) -> Result<(), ScanError>;

    fn resume(&self, partition: i32) -> Result<(), ScanError>;

    /// Mark `message` processed so it is not redelivered after a restart.
    fn acknowledge(&self, message: &InboundMessage) -> Result<(), ScanError>;

    /// Leave the group, committing whatever has been acknowledged.
    fn close(&self) -> Result<(), ScanError>;
}

/// Synchronous, acknowledged delivery of one keyed record.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Returns the `(partition, offset)` the broker stored the record at.
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64), ScanError>;
}
