//! Change processor: decode, classify, publish, and defer to the outbox.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use patient_events_core::{ChangeKind, DeletionNotice, DomainEvent, MutationRecord};
use patient_events_storage::{DynOutboxStore, StorageError};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{OutboxConfig, ProcessorConfig};
use crate::feed::{ChangeBatch, ChangeFeed, DeletionQueue};
use crate::metrics;
use crate::outbox::{self, Backoff};
use crate::publisher::EventPublisher;

/// Counts for one processed batch.
///
/// `created` and `updated` count every classified document; `deferred` is the
/// subset that went to the outbox instead of reaching every sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub rejected: usize,
    pub deferred: usize,
}

/// How far a batch has been made durable.
///
/// After an error `next` is the document that failed. Its event is kept, so
/// resuming reuses the event id and leaves earlier documents alone.
#[derive(Debug, Default)]
pub struct BatchProgress {
    pub next: usize,
    pub report: BatchReport,
    pending: Option<(ChangeKind, DomainEvent)>,
}

/// How an event left the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Published,
    Deferred,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The event reached neither every sink nor the outbox.
    #[error("failed to store event {event_id} in the outbox: {source}")]
    Outbox {
        event_id: String,
        #[source]
        source: StorageError,
    },
}

pub struct ChangeProcessor {
    publisher: Arc<EventPublisher>,
    outbox: DynOutboxStore,
    backoff: Backoff,
    partition_queue_depth: usize,
    retry_delay: Duration,
}

impl ChangeProcessor {
    pub fn new(
        publisher: Arc<EventPublisher>,
        outbox: DynOutboxStore,
        processor: &ProcessorConfig,
        outbox_config: &OutboxConfig,
    ) -> Self {
        Self {
            publisher,
            outbox,
            backoff: Backoff::from_config(outbox_config),
            partition_queue_depth: processor.partition_queue_depth,
            retry_delay: processor.retry_delay(),
        }
    }

    /// Process every document in `batch`.
    ///
    /// Undecodable documents are counted as rejected and skipped. An error
    /// means some event is neither published nor in the outbox, so the batch
    /// must not be checkpointed.
    pub async fn process_batch(&self, batch: &ChangeBatch) -> Result<BatchReport, ProcessorError> {
        let mut progress = BatchProgress::default();
        self.resume_batch(batch, &mut progress).await?;
        Ok(progress.report)
    }

    /// Continue `batch` from `progress`.
    ///
    /// Call again with the same `progress` after an error; documents already
    /// published or deferred are not sent twice.
    pub async fn resume_batch(
        &self,
        batch: &ChangeBatch,
        progress: &mut BatchProgress,
    ) -> Result<(), ProcessorError> {
        while let Some(doc) = batch.documents.get(progress.next) {
            let (kind, event) = match progress.pending.take() {
                Some(pending) => pending,
                None => match classify(&batch.partition, doc) {
                    Some(classified) => classified,
                    None => {
                        progress.report.rejected += 1;
                        progress.next += 1;
                        continue;
                    }
                },
            };

            match self.publish_or_defer(&event).await {
                Ok(disposition) => {
                    match kind {
                        ChangeKind::Created => progress.report.created += 1,
                        ChangeKind::Updated => progress.report.updated += 1,
                    }
                    if disposition == Disposition::Deferred {
                        progress.report.deferred += 1;
                    }
                    progress.next += 1;
                }
                Err(e) => {
                    progress.pending = Some((kind, event));
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Publish the deletion event for a removed patient.
    pub async fn process_deletion(
        &self,
        notice: DeletionNotice,
    ) -> Result<Disposition, ProcessorError> {
        info!(patient_id = notice.patient_id, "processing patient deletion");
        self.publish_or_defer(&notice.into_event()).await
    }

    async fn publish_or_defer(&self, event: &DomainEvent) -> Result<Disposition, ProcessorError> {
        match self.publisher.publish(event).await {
            Ok(()) => Ok(Disposition::Published),
            Err(failure) => {
                outbox::defer(&self.outbox, event.clone(), &failure, self.backoff)
                    .await
                    .map_err(|source| ProcessorError::Outbox {
                        event_id: event.event_id().to_string(),
                        source,
                    })?;
                Ok(Disposition::Deferred)
            }
        }
    }

    /// Drain `feed` and `deletions` until the feed closes or `cancel` fires.
    ///
    /// Each partition gets its own worker, so batches of one partition run in
    /// order while different partitions run concurrently. A partition whose
    /// queue is full holds its batches back without stopping the others.
    pub async fn run(
        self: Arc<Self>,
        feed: Arc<dyn ChangeFeed>,
        deletions: DeletionQueue,
        cancel: CancellationToken,
    ) {
        info!("Change processor started");

        let deletion_task = tokio::spawn(deletion_worker(self.clone(), deletions, cancel.clone()));
        let mut dispatcher = Dispatcher::new(self.clone(), feed.clone(), cancel.clone());
        let mut feed_open = true;

        loop {
            dispatcher.flush();
            if !feed_open && !dispatcher.has_backlog() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                next = feed.next_batch(&cancel), if feed_open => match next {
                    Some(batch) => dispatcher.dispatch(batch),
                    None => feed_open = false,
                },
                _ = tokio::time::sleep(self.retry_delay), if dispatcher.has_backlog() => {}
            }
        }

        dispatcher.join().await;
        if let Err(e) = deletion_task.await {
            error!(error = %e, "deletion worker panicked");
        }

        info!("Change processor shutting down");
    }
}

/// Decode and classify one feed document; `None` if it is rejected.
fn classify(partition: &str, doc: &Value) -> Option<(ChangeKind, DomainEvent)> {
    let record = match MutationRecord::decode(doc) {
        Ok(record) => record,
        Err(e) => {
            metrics::record_feed_rejected(partition);
            warn!(
                partition = %partition,
                field = e.field().unwrap_or(""),
                error = %e,
                "rejecting undecodable change document"
            );
            return None;
        }
    };

    let kind = record.classify();
    debug!(
        partition = %partition,
        patient_id = record.patient_id,
        kind = %kind,
        "classified change"
    );
    Some((kind, record.into_event(kind)))
}

/// Routes feed batches to per-partition workers.
struct Dispatcher {
    processor: Arc<ChangeProcessor>,
    feed: Arc<dyn ChangeFeed>,
    cancel: CancellationToken,
    workers: HashMap<String, mpsc::Sender<ChangeBatch>>,
    /// Batches of partitions whose worker queue is full, in feed order
    backlog: HashMap<String, VecDeque<ChangeBatch>>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    fn new(
        processor: Arc<ChangeProcessor>,
        feed: Arc<dyn ChangeFeed>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor,
            feed,
            cancel,
            workers: HashMap::new(),
            backlog: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    fn dispatch(&mut self, batch: ChangeBatch) {
        let partition = batch.partition.clone();
        if let Some(queue) = self.backlog.get_mut(&partition) {
            queue.push_back(batch);
            return;
        }

        let sent = self.worker(&partition).try_send(batch);
        match sent {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                debug!(partition = %partition, "partition queue full; holding batch");
                self.backlog.entry(partition).or_default().push_back(batch);
            }
            Err(TrySendError::Closed(_)) => {
                warn!(partition = %partition, "partition worker stopped; dropping batch");
                self.workers.remove(&partition);
            }
        }
    }

    /// Move held batches into worker queues that have room again.
    fn flush(&mut self) {
        let workers = &self.workers;
        self.backlog.retain(|partition, queue| {
            let Some(sender) = workers.get(partition) else {
                return false;
            };
            while let Some(batch) = queue.pop_front() {
                match sender.try_send(batch) {
                    Ok(()) => {}
                    Err(TrySendError::Full(batch)) => {
                        queue.push_front(batch);
                        return true;
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(
                            partition = %partition,
                            dropped = queue.len() + 1,
                            "partition worker stopped; dropping held batches"
                        );
                        return false;
                    }
                }
            }
            false
        });
    }

    fn worker(&mut self, partition: &str) -> &mpsc::Sender<ChangeBatch> {
        if !self.workers.contains_key(partition) {
            let (tx, rx) = mpsc::channel(self.processor.partition_queue_depth);
            self.tasks.spawn(partition_worker(
                self.processor.clone(),
                self.feed.clone(),
                partition.to_string(),
                rx,
                self.cancel.clone(),
            ));
            self.workers.insert(partition.to_string(), tx);
        }
        &self.workers[partition]
    }

    /// Close every worker queue and wait for the workers to finish.
    async fn join(mut self) {
        self.workers.clear();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "partition worker panicked");
            }
        }
    }
}

async fn partition_worker(
    processor: Arc<ChangeProcessor>,
    feed: Arc<dyn ChangeFeed>,
    partition: String,
    mut batches: mpsc::Receiver<ChangeBatch>,
    cancel: CancellationToken,
) {
    debug!(partition = %partition, "partition worker started");

    while let Some(batch) = batches.recv().await {
        // The same batch is retried until it is durable; later batches of
        // this partition wait behind it.
        let mut progress = BatchProgress::default();
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match processor.resume_batch(&batch, &mut progress).await {
                Ok(()) => {
                    let report = progress.report;
                    info!(
                        partition = %partition,
                        continuation = %batch.continuation,
                        created = report.created,
                        updated = report.updated,
                        rejected = report.rejected,
                        deferred = report.deferred,
                        "batch processed"
                    );
                    if let Err(e) = feed.checkpoint(&batch).await {
                        error!(partition = %partition, error = %e, "checkpoint failed");
                    }
                    break;
                }
                Err(e) => {
                    error!(
                        partition = %partition,
                        continuation = %batch.continuation,
                        document = progress.next,
                        error = %e,
                        "batch not durable; retrying"
                    );
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(processor.retry_delay) => {}
                    }
                }
            }
        }
    }
}

async fn deletion_worker(
    processor: Arc<ChangeProcessor>,
    mut deletions: DeletionQueue,
    cancel: CancellationToken,
) {
    while let Some(notice) = deletions.next(&cancel).await {
        let patient_id = notice.patient_id;
        info!(patient_id, "processing patient deletion");

        // Built once so retries keep the event id.
        let event = notice.into_event();
        loop {
            match processor.publish_or_defer(&event).await {
                Ok(disposition) => {
                    debug!(
                        patient_id,
                        event_id = %event.event_id(),
                        disposition = ?disposition,
                        "deletion event sent"
                    );
                    break;
                }
                Err(e) => {
                    error!(patient_id, error = %e, "deletion not durable; retrying");
                    tokio::select! {
                        biased;

                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(processor.retry_delay) => {}
                    }
                }
            }
        }
    }
}
