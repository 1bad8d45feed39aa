//! Consumer-group claim loop.
//!
//! One dispatcher pulls records from the [`MessageSource`] and routes each to
//! a task owned by its partition. A partition task handles its records one at
//! a time, in offset order; different partitions run in parallel.
//!
//! The dispatcher never waits on a partition task. When a partition's backlog
//! reaches [`PAUSE_THRESHOLD`] the source is asked to stop fetching it, and
//! fetching resumes once the task has worked the backlog down to
//! [`RESUME_THRESHOLD`]. A slow partition therefore never holds back the others.
//!
//! Every record is acknowledged once it has been handled, whether or not
//! handling succeeded. Records that fail go nowhere under
//! [`FailurePolicy::Acknowledge`], or to a dead-letter topic under
//! [`FailurePolicy::DeadLetter`]. A crash between handing a record to the
//! handler and publishing its result therefore loses that record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{DeadLetterPublisher, InboundMessage, MessageSource, ResultPublisher};
use crate::models::{ScanRequest, ScanResponse};
use crate::scan_handler::ScanHandler;
use crate::utils::ScanError;

/// Queued records at which a partition is paused at the source.
pub const PAUSE_THRESHOLD: usize = 16;

/// Queued records at which a paused partition is resumed.
pub const RESUME_THRESHOLD: usize = 4;

/// Pause after a failed receive before polling again.
const RECV_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Joining,
    Ready,
    Claiming,
    Draining,
    Closed,
}

/// What happens to a record that could not be turned into a published result.
#[derive(Clone)]
pub enum FailurePolicy {
    /// Log and acknowledge. The record is dropped.
    Acknowledge,
    /// Forward the original record to a dead-letter topic, then acknowledge.
    DeadLetter(DeadLetterPublisher),
}

struct Pipeline {
    source: Arc<dyn MessageSource>,
    handler: Arc<dyn ScanHandler>,
    publisher: Arc<ResultPublisher>,
    policy: FailurePolicy,
}

/// Backlog bookkeeping shared by the dispatcher and one partition task.
struct PartitionLoad {
    partition: i32,
    state: Mutex<LoadState>,
}

#[derive(Default)]
struct LoadState {
    queued: usize,
    paused: bool,
}

impl PartitionLoad {
    fn new(partition: i32) -> Self {
        PartitionLoad {
            partition,
            state: Mutex::new(LoadState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PartitionTask {
    sender: mpsc::UnboundedSender<InboundMessage>,
    load: Arc<PartitionLoad>,
    handle: JoinHandle<()>,
}

pub struct QueueConsumer {
    pipeline: Arc<Pipeline>,
    state: watch::Sender<ConsumerState>,
}

impl QueueConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        handler: Arc<dyn ScanHandler>,
        publisher: Arc<ResultPublisher>,
        policy: FailurePolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Closed);
        QueueConsumer {
            pipeline: Arc::new(Pipeline {
                source,
                handler,
                publisher,
                policy,
            }),
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Join the group and claim records until `cancel` fires or the stream ends.
    ///
    /// Returns after every partition task has finished its in-flight record.
    /// Records still queued at cancellation are left unacknowledged.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ScanError> {
        self.set_state(ConsumerState::Joining);

        let joined = match self.pipeline.source.wait_ready(&cancel).await {
            Ok(joined) => joined,
            Err(e) => {
                self.set_state(ConsumerState::Closed);
                return Err(e);
            }
        };

        let mut partitions: HashMap<i32, PartitionTask> = HashMap::new();

        if joined {
            self.set_state(ConsumerState::Ready);
            info!("Consumer started and ready");

            self.set_state(ConsumerState::Claiming);
            self.claim(&cancel, &mut partitions).await;
        }

        self.set_state(ConsumerState::Draining);
        info!("Terminating consumer...");

        for (partition, task) in partitions.drain() {
            drop(task.sender);
            if let Err(e) = task.handle.await {
                error!("Claim loop for partition {} aborted: {}", partition, e);
            }
        }

        let closed = self.pipeline.source.close();
        self.set_state(ConsumerState::Closed);
        info!("Consumer closed");
        closed
    }

    async fn claim(&self, cancel: &CancellationToken, partitions: &mut HashMap<i32, PartitionTask>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.pipeline.source.recv() => next,
            };

            match next {
                Ok(Some(message)) => self.dispatch(partitions, message, cancel),
                Ok(None) => {
                    info!("Message stream ended");
                    break;
                }
                Err(e) => {
                    error!("Error from consumer: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECV_BACKOFF) => {}
                    }
                }
            }
        }
    }

    /// Queue `message` on its partition task without waiting.
    fn dispatch(
        &self,
        partitions: &mut HashMap<i32, PartitionTask>,
        message: InboundMessage,
        cancel: &CancellationToken,
    ) {
        let partition = message.partition;
        let task = partitions
            .entry(partition)
            .or_insert_with(|| self.spawn_partition(partition, cancel.clone()));

        self.pipeline.queued(&task.load);
        if let Err(mpsc::error::SendError(message)) = task.sender.send(message) {
            if cancel.is_cancelled() {
                return;
            }
            // The partition task died; replace it so the record is not lost
            warn!("Claim loop for partition {} is gone, restarting it", partition);
            self.pipeline.release(&task.load);

            let task = self.spawn_partition(partition, cancel.clone());
            self.pipeline.queued(&task.load);
            if task.sender.send(message).is_err() {
                error!("Could not hand record to partition {}", partition);
            }
            partitions.insert(partition, task);
        }
    }

    fn spawn_partition(&self, partition: i32, cancel: CancellationToken) -> PartitionTask {
        let (sender, mut receiver) = mpsc::unbounded_channel::<InboundMessage>();
        let load = Arc::new(PartitionLoad::new(partition));
        let pipeline = Arc::clone(&self.pipeline);
        let task_load = Arc::clone(&load);

        let handle = tokio::spawn(async move {
            debug!("Claim loop started for partition {}", partition);
            loop {
                let message = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    message = receiver.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                pipeline.process(&message).await;
                pipeline.done(&task_load);
            }
            debug!("Claim loop stopped for partition {}", partition);
        });

        PartitionTask {
            sender,
            load,
            handle,
        }
    }

    fn set_state(&self, state: ConsumerState) {
        debug!("Consumer state: {:?}", state);
        self.state.send_replace(state);
    }
}

impl Pipeline {
    fn queued(&self, load: &PartitionLoad) {
        let mut state = load.lock();
        state.queued += 1;
        if !state.paused && state.queued >= PAUSE_THRESHOLD {
            match self.source.pause(load.partition) {
                Ok(()) => {
                    debug!(
                        "Paused partition {} with {} records queued",
                        load.partition, state.queued
                    );
                    state.paused = true;
                }
                Err(e) => warn!("Failed to pause partition {}: {}", load.partition, e),
            }
        }
    }

    fn done(&self, load: &PartitionLoad) {
        let mut state = load.lock();
        state.queued = state.queued.saturating_sub(1);
        if state.paused && state.queued <= RESUME_THRESHOLD {
            self.resume(load.partition, &mut state);
        }
    }

    /// Resume a partition whose task is being replaced.
    fn release(&self, load: &PartitionLoad) {
        let mut state = load.lock();
        if state.paused {
            self.resume(load.partition, &mut state);
        }
    }

    fn resume(&self, partition: i32, state: &mut LoadState) {
        match self.source.resume(partition) {
            Ok(()) => {
                debug!("Resumed partition {}", partition);
                state.paused = false;
            }
            Err(e) => warn!("Failed to resume partition {}: {}", partition, e),
        }
    }

    async fn process(&self, message: &InboundMessage) {
        info!(
            "Received message: offset={}, partition={}",
            message.offset, message.partition
        );

        let payload = message.payload.as_deref().unwrap_or_default();
        let request: ScanRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                let err = ScanError::Deserialization(e.to_string());
                error!("Failed to unmarshal message: {}", err);
                self.reject(message, &err.to_string()).await;
                self.acknowledge(message);
                return;
            }
        };

        let response = self.handle(request).await;

        let mut failure = response.error.clone();
        if let Err(e) = self.publisher.publish(&response).await {
            failure.get_or_insert_with(|| e.to_string());
        }

        if let Some(reason) = failure {
            self.reject(message, &reason).await;
        }
        self.acknowledge(message);
    }

    async fn handle(&self, request: ScanRequest) -> ScanResponse {
        let request_id = request.request_id.clone();
        let response = self.handler.handle(request).await;

        if let Some(err) = &response.error {
            error!("Failed to process message {}: {}", request_id, err);
        }
        if let Ok(json) = serde_json::to_string(&response) {
            debug!("Processing result: {}", json);
        }
        response
    }

    async fn reject(&self, message: &InboundMessage, reason: &str) {
        if let FailurePolicy::DeadLetter(dead_letter) = &self.policy {
            // forward() logs its own outcome
            let _ = dead_letter.forward(message, reason).await;
        }
    }

    fn acknowledge(&self, message: &InboundMessage) {
        if let Err(e) = self.source.acknowledge(message) {
            warn!(
                "Failed to acknowledge offset={} partition={}: {}",
                message.offset, message.partition, e
            );
        }
    }
}
