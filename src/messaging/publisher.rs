use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::{InboundMessage, MessageSink};
use crate::models::ScanResponse;
use crate::utils::ScanError;

/// Sends scan responses to the result topic, keyed by request id.
pub struct ResultPublisher {
    sink: Arc<dyn MessageSink>,
    topic: String,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>) -> Self {
        ResultPublisher {
            sink,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize and send one response, waiting for the broker's acknowledgement.
    pub async fn publish(&self, response: &ScanResponse) -> Result<(i32, i64), ScanError> {
        let payload = serde_json::to_vec(response)?;

        match self.sink.send(&self.topic, &response.request_id, &payload).await {
            Ok((partition, offset)) => {
                info!(
                    "Message sent successfully: partition={}, offset={}",
                    partition, offset
                );
                Ok((partition, offset))
            }
            Err(e) => {
                error!("Failed to send result for {}: {}", response.request_id, e);
                Err(e)
            }
        }
    }
}

/// Envelope written to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub error: String,
    /// Original payload, lossily decoded as UTF-8
    pub payload: String,
}

/// Forwards inbound records that could not be processed.
#[derive(Clone)]
pub struct DeadLetterPublisher {
    sink: Arc<dyn MessageSink>,
    topic: String,
}

impl DeadLetterPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>) -> Self {
        DeadLetterPublisher {
            sink,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn forward(&self, message: &InboundMessage, reason: &str) -> Result<(i32, i64), ScanError> {
        let record = DeadLetterRecord {
            source_topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            error: reason.to_string(),
            payload: String::from_utf8_lossy(message.payload.as_deref().unwrap_or_default())
                .into_owned(),
        };
        let key = format!("{}-{}-{}", message.topic, message.partition, message.offset);
        let payload = serde_json::to_vec(&record)?;

        let delivered = self.sink.send(&self.topic, &key, &payload).await;
        match &delivered {
            Ok((partition, offset)) => warn!(
                "Dead-lettered {} to {} (partition={}, offset={}): {}",
                key, self.topic, partition, offset, reason
            ),
            Err(e) => error!("Failed to dead-letter {}: {}", key, e),
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::testing::MemorySink;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_publish_keys_by_request_id() {
        let sink = Arc::new(MemorySink::new());
        let publisher = ResultPublisher::new(sink.clone(), "id-scan-results");

        let response = ScanResponse::failure("req-9", "OCR failed: bad image");
        let position = publisher.publish(&response).await.unwrap();
        assert_eq!(position, (0, 0));

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "id-scan-results");
        assert_eq!(sent[0].key, "req-9");
        let decoded: ScanResponse = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(decoded, response);
    }

    #[tokio::test]
    async fn test_publish_surfaces_transport_errors() {
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let publisher = ResultPublisher::new(sink.clone(), "results");

        let err = publisher
            .publish(&ScanResponse::failure("req-1", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_wraps_original_payload() {
        let sink = Arc::new(MemorySink::new());
        let dlq = DeadLetterPublisher::new(sink.clone(), "id-scan-dlq");
        let message = InboundMessage {
            topic: "id-scan-requests".to_string(),
            partition: 3,
            offset: 41,
            key: None,
            payload: Some(b"{broken".to_vec()),
        };

        dlq.forward(&message, "Deserialization error: eof").await.unwrap();

        let sent = sink.sent();
        assert_eq!(sent[0].topic, "id-scan-dlq");
        assert_eq!(sent[0].key, "id-scan-requests-3-41");
        let record: DeadLetterRecord = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(record.payload, "{broken");
        assert_eq!(record.offset, 41);
        assert_eq!(record.error, "Deserialization error: eof");
    }
}
