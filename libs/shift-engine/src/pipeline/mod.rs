//! Migration pipelines: a source (store snapshot or change journal), a
//! decode → map → encode transform, and a sink store.
//!
//! Items are routed by key hash onto partition workers fed through bounded
//! channels. A partition applies its items strictly in arrival order, so two
//! changes to the same key are never applied out of journal order.

pub mod bulk;
pub mod tail;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shift_api::{ChangeJournal, JournalEvent, JournalPosition, KeyedStore, RecordKey};

use crate::codec::{CompactCodec, TypeRegistry};
use crate::error::{CodecError, EngineError};
use crate::mapper::RecordMapper;

// ═══════════════════════════════════════════════════════════════
//  Migration: decode → map → encode
// ═══════════════════════════════════════════════════════════════

/// A compiled transform from one type identity to another.
pub struct Migration {
    name: String,
    source: CompactCodec,
    target: CompactCodec,
    mapper: Arc<dyn RecordMapper>,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .field("source", &self.source.type_name())
            .field("target", &self.target.type_name())
            .finish()
    }
}

impl Migration {
    pub fn new(
        name: impl Into<String>,
        source: CompactCodec,
        target: CompactCodec,
        mapper: Arc<dyn RecordMapper>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            mapper,
        }
    }

    /// Build from the latest registered versions of both identities.
    pub fn from_registry(
        name: impl Into<String>,
        registry: &TypeRegistry,
        source_type: &str,
        target_type: &str,
        mapper: Arc<dyn RecordMapper>,
    ) -> Result<Self, EngineError> {
        let source = registry.codec(source_type)?.clone();
        let target = registry.codec(target_type)?.clone();
        Ok(Self::new(name, source, target, mapper))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &CompactCodec {
        &self.source
    }

    pub fn target(&self) -> &CompactCodec {
        &self.target
    }

    /// Re-encode one old-layout binary into the new layout.
    pub fn apply(&self, bytes: &[u8]) -> Result<Vec<u8>, EngineError> {
        let record = self.source.decode(bytes).map_err(|source| CodecError::Decode {
            type_name: self.source.type_name().to_string(),
            source,
        })?;
        let mapped = self.mapper.map(&record)?;
        let out = self.target.encode(&mapped).map_err(|source| CodecError::Encode {
            type_name: self.target.type_name().to_string(),
            source,
        })?;
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pipeline definition
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Finite: snapshot of the source store.
    Bulk,
    /// Unbounded: change journal of the source store.
    Tail,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Bulk => write!(f, "bulk"),
            PipelineKind::Tail => write!(f, "tail"),
        }
    }
}

/// What a worker does with a record that fails to decode, map or encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorPolicy {
    /// The job fails.
    #[default]
    Fail,
    /// The record is logged, counted and left unmigrated.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Number of partition workers.
    pub parallelism: usize,
    /// Capacity of each partition's channel.
    pub buffer: usize,
    pub on_record_error: RecordErrorPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            buffer: 256,
            on_record_error: RecordErrorPolicy::Fail,
        }
    }
}

pub enum PipelineSource {
    Snapshot(Arc<dyn KeyedStore>),
    Journal {
        journal: Arc<dyn ChangeJournal>,
        from: JournalPosition,
    },
}

/// A runnable migration pipeline. Hand it to the job coordinator to run it.
pub struct Pipeline {
    source: PipelineSource,
    migration: Arc<Migration>,
    sink: Arc<dyn KeyedStore>,
    options: PipelineOptions,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind())
            .field("migration", &self.migration)
            .field("options", &self.options)
            .finish()
    }
}

impl Pipeline {
    /// Snapshot scan of `source` → migrate → upsert into `sink`.
    pub fn bulk(source: Arc<dyn KeyedStore>, migration: Arc<Migration>, sink: Arc<dyn KeyedStore>) -> Self {
        Self {
            source: PipelineSource::Snapshot(source),
            migration,
            sink,
            options: PipelineOptions::default(),
        }
    }

    /// Journal of the source store from `from` → upsert/delete branches → `sink`.
    pub fn tail(
        journal: Arc<dyn ChangeJournal>,
        from: JournalPosition,
        migration: Arc<Migration>,
        sink: Arc<dyn KeyedStore>,
    ) -> Self {
        Self {
            source: PipelineSource::Journal { journal, from },
            migration,
            sink,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> PipelineKind {
        match self.source {
            PipelineSource::Snapshot(_) => PipelineKind::Bulk,
            PipelineSource::Journal { .. } => PipelineKind::Tail,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn migration(&self) -> &Arc<Migration> {
        &self.migration
    }

    /// Run one attempt to its end: exhaustion, cancellation or first fatal error.
    pub(crate) async fn run_attempt(&self, attempt: &Attempt<'_>) -> Result<AttemptEnd, EngineError> {
        match &self.source {
            PipelineSource::Snapshot(store) => bulk::run(self, store.as_ref(), attempt).await,
            PipelineSource::Journal { journal, from } => {
                tail::run(self, journal.as_ref(), *from, attempt).await
            }
        }
    }

    fn branches(&self) -> Arc<[Box<dyn Branch>]> {
        Arc::new([
            Box::new(UpsertBranch {
                migration: self.migration.clone(),
                sink: self.sink.clone(),
            }) as Box<dyn Branch>,
            Box::new(DeleteBranch {
                sink: self.sink.clone(),
            }),
        ])
    }
}

/// Per-attempt inputs owned by the job supervisor.
pub(crate) struct Attempt<'a> {
    pub job: &'a str,
    pub token: &'a CancellationToken,
    pub metrics: &'a Arc<JobMetrics>,
    pub watermark: &'a Arc<Watermark>,
    /// Called once a bulk source is exhausted and only draining remains.
    pub on_drain: &'a (dyn Fn() + Send + Sync),
}

/// How an attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptEnd {
    Exhausted,
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════
//  Changes and branches
// ═══════════════════════════════════════════════════════════════

/// A single source item.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Upsert { key: RecordKey, value: Vec<u8> },
    Delete { key: RecordKey },
}

impl Change {
    pub fn key(&self) -> &RecordKey {
        match self {
            Change::Upsert { key, .. } | Change::Delete { key } => key,
        }
    }
}

impl From<JournalEvent> for Change {
    fn from(event: JournalEvent) -> Self {
        if event.is_tombstone() {
            return Change::Delete { key: event.key };
        }
        Change::Upsert {
            key: event.key,
            value: event.value.unwrap_or_default(),
        }
    }
}

/// A change plus its journal sequence (`None` for snapshot items).
#[derive(Debug)]
pub(crate) struct Envelope {
    pub sequence: Option<u64>,
    pub change: Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Written,
    Deleted,
}

/// A filtered consumer of changes. The first branch that accepts a change
/// applies it.
pub(crate) trait Branch: Send + Sync {
    fn accepts(&self, change: &Change) -> bool;

    fn apply(&self, change: Change) -> Pin<Box<dyn Future<Output = Result<Applied, EngineError>> + Send + '_>>;
}

/// decode → map → encode → put, under the original key.
struct UpsertBranch {
    migration: Arc<Migration>,
    sink: Arc<dyn KeyedStore>,
}

impl Branch for UpsertBranch {
    fn accepts(&self, change: &Change) -> bool {
        matches!(change, Change::Upsert { .. })
    }

    fn apply(&self, change: Change) -> Pin<Box<dyn Future<Output = Result<Applied, EngineError>> + Send + '_>> {
        Box::pin(async move {
            let Change::Upsert { key, value } = change else {
                return Err(EngineError::Internal("upsert branch got a delete".into()));
            };
            let out = self.migration.apply(&value)?;
            let ctx = format!("put key {key}");
            self.sink
                .put(key, out)
                .await
                .map_err(|e| EngineError::Store(e.with_context(ctx)))?;
            Ok(Applied::Written)
        })
    }
}

/// Removes the original key. Never decodes or maps anything.
struct DeleteBranch {
    sink: Arc<dyn KeyedStore>,
}

impl Branch for DeleteBranch {
    fn accepts(&self, change: &Change) -> bool {
        matches!(change, Change::Delete { .. })
    }

    fn apply(&self, change: Change) -> Pin<Box<dyn Future<Output = Result<Applied, EngineError>> + Send + '_>> {
        Box::pin(async move {
            let key = change.key();
            self.sink
                .remove(key)
                .await
                .map_err(|e| EngineError::Store(e.with_context(format!("remove key {key}"))))?;
            Ok(Applied::Deleted)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Metrics
// ═══════════════════════════════════════════════════════════════

/// Live counters of one job, shared by all its attempts.
#[derive(Debug, Default)]
pub struct JobMetrics {
    read: AtomicU64,
    written: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    restarts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub read: u64,
    pub written: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub restarts: u64,
}

impl JobMetrics {
    pub(crate) fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_applied(&self, applied: Applied) {
        match applied {
            Applied::Written => self.written.fetch_add(1, Ordering::Relaxed),
            Applied::Deleted => self.deleted.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Watermark: tail checkpoint
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct WatermarkState {
    /// Every sequence `<= committed` has been applied.
    committed: Option<u64>,
    /// Highest sequence handed to a partition.
    issued: u64,
    in_flight: BTreeSet<u64>,
}

/// Tracks which journal sequences are applied.
///
/// Partitions complete out of order relative to each other, so the committed
/// position is the sequence just below the oldest one still in flight.
#[derive(Debug, Default)]
pub struct Watermark {
    state: Mutex<WatermarkState>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WatermarkState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("watermark lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Highest sequence below which everything is applied, once known.
    pub fn committed(&self) -> Option<u64> {
        self.lock().committed
    }

    /// Where a restarted reader resumes, if a previous attempt opened the journal.
    pub fn resume_from(&self) -> Option<JournalPosition> {
        self.committed().map(|c| JournalPosition::Sequence(c + 1))
    }

    /// First open of the journal: everything before `next_sequence` is
    /// outside this job's scope. Later calls are ignored.
    pub(crate) fn anchor(&self, next_sequence: u64) {
        let mut state = self.lock();
        if state.committed.is_none() {
            let base = next_sequence.saturating_sub(1);
            state.committed = Some(base);
            state.issued = base;
        }
    }

    pub(crate) fn begin(&self, sequence: u64) {
        let mut state = self.lock();
        state.in_flight.insert(sequence);
        state.issued = state.issued.max(sequence);
    }

    pub(crate) fn complete(&self, sequence: u64) {
        let mut state = self.lock();
        state.in_flight.remove(&sequence);
        let reached = match state.in_flight.first() {
            Some(oldest) => oldest.saturating_sub(1),
            None => state.issued,
        };
        state.committed = Some(state.committed.map_or(reached, |c| c.max(reached)));
    }

    /// Forget everything in flight; those sequences are re-read on restart.
    pub(crate) fn rewind(&self) {
        let mut state = self.lock();
        state.in_flight.clear();
        if let Some(committed) = state.committed {
            state.issued = committed;
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Partition workers
// ═══════════════════════════════════════════════════════════════

/// Route a key to one of `partitions` workers. Stable for the process.
pub(crate) fn partition_of(key: &RecordKey, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// First fatal error raised by any worker of an attempt.
#[derive(Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<EngineError>>>);

impl FailureSlot {
    fn set(&self, err: EngineError) {
        let mut guard = match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get_or_insert(err);
    }

    fn take(&self) -> Option<EngineError> {
        match self.0.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Senders into the partition workers of one attempt.
pub(crate) struct Partitions {
    senders: Vec<mpsc::Sender<Envelope>>,
    handles: Vec<JoinHandle<()>>,
    /// Cancelled on the first fatal worker error or on job cancellation.
    abort: CancellationToken,
    failure: FailureSlot,
}

impl Partitions {
    pub(crate) fn spawn(pipeline: &Pipeline, attempt: &Attempt<'_>, track: bool) -> Self {
        let options = pipeline.options;
        let parallelism = options.parallelism.max(1);
        let branches = pipeline.branches();
        let abort = attempt.token.child_token();
        let failure = FailureSlot::default();

        let mut senders = Vec::with_capacity(parallelism);
        let mut handles = Vec::with_capacity(parallelism);
        for partition in 0..parallelism {
            let (tx, rx) = mpsc::channel(options.buffer.max(1));
            let worker = Worker {
                job: attempt.job.to_string(),
                partition,
                branches: branches.clone(),
                policy: options.on_record_error,
                metrics: attempt.metrics.clone(),
                watermark: track.then(|| attempt.watermark.clone()),
                abort: abort.clone(),
                failure: failure.clone(),
            };
            senders.push(tx);
            handles.push(tokio::spawn(worker.run(rx)));
        }

        Self {
            senders,
            handles,
            abort,
            failure,
        }
    }

    /// Cancelled once this attempt should stop feeding items.
    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Send to the key's partition. `false` once the attempt is aborting.
    pub(crate) async fn send(&self, envelope: Envelope) -> bool {
        let tx = &self.senders[partition_of(envelope.change.key(), self.senders.len())];
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => false,
            sent = tx.send(envelope) => sent.is_ok(),
        }
    }

    /// Close the channels, wait for every worker and report the first failure.
    pub(crate) async fn finish(self) -> Option<EngineError> {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                self.failure.set(EngineError::Internal(format!("partition worker panicked: {e}")));
            }
        }
        self.failure.take()
    }
}

struct Worker {
    job: String,
    partition: usize,
    branches: Arc<[Box<dyn Branch>]>,
    policy: RecordErrorPolicy,
    metrics: Arc<JobMetrics>,
    watermark: Option<Arc<Watermark>>,
    abort: CancellationToken,
    failure: FailureSlot,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        while let Some(Envelope { sequence, change }) = rx.recv().await {
            if self.abort.is_cancelled() {
                break;
            }

            let key = change.key().clone();
            match self.branches.iter().find(|b| b.accepts(&change)) {
                None => tracing::warn!(job = %self.job, key = %key, "no branch accepts change, dropped"),
                Some(branch) => match branch.apply(change).await {
                    Ok(applied) => self.metrics.record_applied(applied),
                    Err(e) if e.is_record_error() && self.policy == RecordErrorPolicy::Skip => {
                        tracing::warn!(job = %self.job, key = %key, error = %e, "record skipped");
                        self.metrics.record_skipped();
                    }
                    Err(e) => {
                        tracing::error!(
                            job = %self.job,
                            partition = self.partition,
                            key = %key,
                            error = %e,
                            "partition failed"
                        );
                        self.failure.set(e);
                        self.abort.cancel();
                        break;
                    }
                },
            }

            if let (Some(watermark), Some(sequence)) = (&self.watermark, sequence) {
                watermark.complete(sequence);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_commits_below_oldest_in_flight() {
        let wm = Watermark::new();
        assert_eq!(wm.resume_from(), None);

        wm.anchor(5);
        assert_eq!(wm.committed(), Some(4));
        wm.anchor(100);
        assert_eq!(wm.committed(), Some(4));

        for seq in 5..=8 {
            wm.begin(seq);
        }
        wm.complete(7);
        wm.complete(8);
        assert_eq!(wm.committed(), Some(4));
        wm.complete(5);
        assert_eq!(wm.committed(), Some(5));
        wm.complete(6);
        assert_eq!(wm.committed(), Some(8));
        assert_eq!(wm.resume_from(), Some(JournalPosition::Sequence(9)));
    }

    #[test]
    fn watermark_rewind_drops_in_flight() {
        let wm = Watermark::new();
        wm.anchor(1);
        wm.begin(1);
        wm.begin(2);
        wm.complete(2);
        wm.rewind();
        assert_eq!(wm.committed(), Some(0));

        wm.begin(1);
        wm.complete(1);
        assert_eq!(wm.committed(), Some(1));
    }

    #[test]
    fn partition_routing_is_stable() {
        let key = RecordKey::from("order-17");
        let first = partition_of(&key, 8);
        assert!(first < 8);
        assert_eq!(partition_of(&key, 8), first);
        assert_eq!(partition_of(&RecordKey::Int(3), 1), 0);
        assert_eq!(partition_of(&RecordKey::Int(3), 0), 0);
    }

    #[test]
    fn tombstone_becomes_delete() {
        let event = JournalEvent {
            sequence: 3,
            key: RecordKey::Int(1),
            value: None,
            ingestion_ms: 0,
        };
        assert_eq!(Change::from(event), Change::Delete { key: RecordKey::Int(1) });
    }
}
