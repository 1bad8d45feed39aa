// In-memory broker doubles for consumer and publisher tests
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, MessageSink, MessageSource};
use crate::utils::ScanError;

pub const INPUT_TOPIC: &str = "id-scan-requests";

pub struct MemorySource {
    sender: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    acked: Mutex<Vec<(i32, i64)>>,
    pauses: Mutex<Vec<i32>>,
    resumes: Mutex<Vec<i32>>,
    closed: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        MemorySource {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            acked: Mutex::new(Vec::new()),
            pauses: Mutex::new(Vec::new()),
            resumes: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, partition: i32, offset: i64, payload: &[u8]) {
        let message = InboundMessage {
            topic: INPUT_TOPIC.to_string(),
            partition,
            offset,
            key: None,
            payload: Some(payload.to_vec()),
        };
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.send(message).unwrap();
        }
    }

    /// End the stream once queued messages are consumed.
    pub fn finish(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn acked(&self) -> Vec<(i32, i64)> {
        self.acked.lock().unwrap().clone()
    }

    /// Partitions passed to `pause`, in call order.
    pub fn pauses(&self) -> Vec<i32> {
        self.pauses.lock().unwrap().clone()
    }

    pub fn resumes(&self) -> Vec<i32> {
        self.resumes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<bool, ScanError> {
        Ok(!cancel.is_cancelled())
    }

    async fn recv(&self) -> Result<Option<InboundMessage>, ScanError> {
        Ok(self.receiver.lock().await.recv().await)
    }

    fn pause(&self, partition: i32) -> Result<(), ScanError> {
        self.pauses.lock().unwrap().push(partition);
        Ok(())
    }

    fn resume(&self, partition: i32) -> Result<(), ScanError> {
        self.resumes.lock().unwrap().push(partition);
        Ok(())
    }

    fn acknowledge(&self, message: &InboundMessage) -> Result<(), ScanError> {
        self.acked.lock().unwrap().push((message.partition, message.offset));
        Ok(())
    }

    fn close(&self) -> Result<(), ScanError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

pub struct MemorySink {
    sent: Mutex<Vec<SentRecord>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<SentRecord> {
        self.sent().into_iter().filter(|r| r.topic == topic).collect()
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64), ScanError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ScanError::Transport("broker unavailable".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        let offset = sent.iter().filter(|r| r.topic == topic).count() as i64;
        sent.push(SentRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok((0, offset))
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
