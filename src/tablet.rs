//! Tablet-level delta tracking.
//!
//! A `DeltaTracker` owns the live store set of one rowset: the active
//! delta memstore plus every flushed delta file, together with the log
//! anchor registry that keeps the write-ahead log from truncating entries
//! the memstore still depends on.
//!
//! # Write path
//!
//! A write is accepted only while this replica holds leadership for the
//! term the caller claims (established by a won election, see
//! [`crate::consensus`]). The operation's log index goes into the
//! memstore's anchor; the mutated columns go into the memstore keyed by
//! row ordinal and timestamp.
//!
//! # Flush
//!
//! When the memstore grows past its threshold it is swapped out for a
//! fresh one and written to an immutable delta file. The store being
//! flushed stays visible to scans until the file has replaced it; its log
//! anchor is released only after the file is durable, so a crash before
//! that point replays the mutations from the log. No locks are held
//! across file I/O.
//!
//! # Read path
//!
//! A scan merges the delta iterators of every store that intersects its
//! snapshot: flushed files oldest-first, then the store being flushed (if
//! any), then the active memstore, preserving REDO timestamp order.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::anchors::LogAnchorRegistry;
use crate::cache::Cache;
use crate::config::TabletConfig;
use crate::consensus::{
    DecisionCallback, ElectionResult, ElectionVote, LeaderElection, PeerProxyFactory, RaftConfig,
    VoteCounter, VoteRequest,
};
use crate::delta::file::{BlockCache, DeltaFileReader, DeltaFileWriter};
use crate::delta::memstore::DeltaMemStore;
use crate::delta::merger::DeltaIteratorMerger;
use crate::delta::{DeltaIterator, DeltaStore, RowChangeList};
use crate::error::{Error, Result};
use crate::mvcc::MvccSnapshot;
use crate::rowblock::{IoContext, RowIteratorOptions};
use crate::scheduler::{BackgroundTask, Context};
use crate::types::{OpId, RowId, Timestamp};

/// Term value meaning "not the leader".
const NO_TERM: u64 = 0;

pub struct DeltaTracker {
    tablet_id: String,
    rowset_id: i64,
    config: TabletConfig,
    registry: Arc<LogAnchorRegistry>,
    cache: Arc<BlockCache>,

    /// Active memstore, swapped atomically at flush rotation.
    dms: RwLock<Arc<DeltaMemStore>>,
    /// Store rotated out but not yet durably flushed. Still part of the
    /// read path; survives here if a flush attempt fails.
    flushing: RwLock<Option<Arc<DeltaMemStore>>>,
    /// Flushed files, oldest first.
    delta_files: RwLock<Vec<Arc<DeltaFileReader>>>,

    next_store_id: AtomicI64,
    next_file_id: AtomicU64,
    flush_pending: AtomicBool,

    /// Term this replica leads, or `NO_TERM`.
    leader_term: AtomicU64,
}

impl DeltaTracker {
    pub fn open(
        tablet_id: impl Into<String>,
        rowset_id: i64,
        config: TabletConfig,
    ) -> Result<Arc<Self>> {
        let tablet_id = tablet_id.into();
        std::fs::create_dir_all(&config.dir)?;
        let registry = LogAnchorRegistry::new();
        let cache: Arc<BlockCache> = Arc::new(Cache::new(config.block_cache_capacity, None));
        let dms = DeltaMemStore::create(0, rowset_id, registry.clone());

        Ok(Arc::new(Self {
            tablet_id,
            rowset_id,
            config,
            registry,
            cache,
            dms: RwLock::new(dms),
            flushing: RwLock::new(None),
            delta_files: RwLock::new(Vec::new()),
            next_store_id: AtomicI64::new(1),
            next_file_id: AtomicU64::new(1),
            flush_pending: AtomicBool::new(false),
            leader_term: AtomicU64::new(NO_TERM),
        }))
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    pub fn rowset_id(&self) -> i64 {
        self.rowset_id
    }

    pub fn anchor_registry(&self) -> &Arc<LogAnchorRegistry> {
        &self.registry
    }

    // ----- leadership -------------------------------------------------

    /// Feed the outcome of an election round into the write gate.
    /// Pre-election results never change leadership.
    pub fn handle_election_result(&self, result: &ElectionResult) {
        if result.vote_request.is_pre_election {
            return;
        }
        match result.decision {
            ElectionVote::Granted => {
                let term = result.vote_request.candidate_term;
                self.leader_term.store(term, Ordering::SeqCst);
                tracing::info!(
                    tablet_id = %self.tablet_id,
                    term = term,
                    "assumed leadership"
                );
            }
            ElectionVote::Denied => {
                // A lost election never revokes an existing, older
                // leadership; a higher term observed elsewhere does.
                if result.highest_voter_term > self.leader_term.load(Ordering::SeqCst) {
                    self.step_down();
                }
            }
        }
    }

    /// Start one election round for `term` with this replica as the
    /// candidate, seeding the self-vote. The decision drives the write
    /// gate before being forwarded to `callback`. Must run inside a tokio
    /// runtime.
    pub fn start_election(
        self: &Arc<Self>,
        candidate_uuid: &str,
        term: u64,
        raft_config: RaftConfig,
        proxy_factory: Arc<dyn PeerProxyFactory>,
        callback: DecisionCallback,
    ) -> Result<Arc<LeaderElection>> {
        let mut counter =
            VoteCounter::new(raft_config.voter_count(), raft_config.majority_size())?;
        counter.register_vote(candidate_uuid, ElectionVote::Granted)?;
        let request = VoteRequest::new(candidate_uuid, term, self.tablet_id.clone());

        let tracker = Arc::clone(self);
        let election = LeaderElection::new(
            raft_config,
            proxy_factory,
            request,
            counter,
            self.config.election.rpc_timeout,
            Box::new(move |result| {
                tracker.handle_election_result(&result);
                callback(result);
            }),
        );
        election.run()?;
        Ok(election)
    }

    /// Relinquish leadership, e.g. on observing a higher term.
    pub fn step_down(&self) {
        let prior = self.leader_term.swap(NO_TERM, Ordering::SeqCst);
        if prior != NO_TERM {
            tracing::info!(
                tablet_id = %self.tablet_id,
                term = prior,
                "stepped down from leadership"
            );
        }
    }

    pub fn leader_term(&self) -> Option<u64> {
        match self.leader_term.load(Ordering::SeqCst) {
            NO_TERM => None,
            term => Some(term),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader_term().is_some()
    }

    // ----- write path -------------------------------------------------

    /// Apply one row mutation under `term`. Rejected unless this replica
    /// currently leads that exact term.
    pub fn update(
        &self,
        term: u64,
        timestamp: Timestamp,
        row: RowId,
        changes: RowChangeList,
        op_id: OpId,
    ) -> Result<()> {
        let current = self.leader_term.load(Ordering::SeqCst);
        if current == NO_TERM {
            return Err(Error::IllegalState(format!(
                "replica is not leader of tablet {}",
                self.tablet_id
            )));
        }
        if current != term {
            return Err(Error::IllegalState(format!(
                "write for term {term} but replica leads term {current}"
            )));
        }
        let dms = self.dms.read()?.clone();
        dms.update(timestamp, row, changes, op_id)
    }

    // ----- flush ------------------------------------------------------

    /// Whether the active memstore has outgrown its threshold.
    pub fn needs_flush(&self) -> Result<bool> {
        let size = self.dms.read()?.estimate_size();
        Ok(size >= self.config.max_dms_size && !self.flush_pending.load(Ordering::SeqCst))
    }

    /// Flush the active memstore (or retry one left over from a failed
    /// attempt) into a delta file. Returns false when there was nothing
    /// to flush.
    pub fn flush(&self) -> Result<bool> {
        if self.flush_pending.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let outcome = self.flush_locked();
        self.flush_pending.store(false, Ordering::SeqCst);
        outcome
    }

    fn flush_locked(&self) -> Result<bool> {
        // Reuse a store from a failed attempt before rotating a new one.
        let to_flush = {
            let mut flushing = self.flushing.write()?;
            match flushing.take() {
                Some(dms) => dms,
                None => {
                    let current = self.dms.read()?.clone();
                    if current.is_empty() {
                        return Ok(false);
                    }
                    let fresh = DeltaMemStore::create(
                        self.next_store_id.fetch_add(1, Ordering::SeqCst),
                        self.rowset_id,
                        self.registry.clone(),
                    );
                    let old = std::mem::replace(&mut *self.dms.write()?, fresh);
                    *flushing = Some(old.clone());
                    old
                }
            }
        };

        // File I/O happens with no locks held; the store being flushed
        // remains in the read path through the `flushing` slot.
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let path = self.config.dir.join(format!("{:08}.delta", file_id));
        let mut writer = DeltaFileWriter::create(&path)?;
        to_flush.flush_to_file(&mut writer)?;

        let reader = DeltaFileReader::open(&path, file_id, Some(self.cache.clone()))?;
        {
            let mut files = self.delta_files.write()?;
            let mut flushing = self.flushing.write()?;
            files.push(reader);
            *flushing = None;
        }
        tracing::info!(
            tablet_id = %self.tablet_id,
            file_id = file_id,
            deltas = to_flush.count(),
            "flushed delta memstore to file"
        );
        Ok(true)
    }

    // ----- read path --------------------------------------------------

    /// Snapshot of the live store set: files oldest-first, then the store
    /// being flushed, then the active memstore.
    fn store_set(&self) -> Result<Vec<Arc<dyn DeltaStore>>> {
        let mut stores: Vec<Arc<dyn DeltaStore>> = Vec::new();
        for file in self.delta_files.read()?.iter() {
            stores.push(file.clone());
        }
        if let Some(flushing) = self.flushing.read()?.as_ref() {
            stores.push(flushing.clone());
        }
        stores.push(self.dms.read()?.clone());
        Ok(stores)
    }

    /// Build the merged delta iterator for a scan.
    pub fn new_delta_iterator(&self, opts: &RowIteratorOptions) -> Result<Box<dyn DeltaIterator>> {
        let stores = self.store_set()?;
        DeltaIteratorMerger::create(&stores, opts)
    }

    /// MVCC-consistent deleted-ness of one row across all stores. With
    /// REDO deltas a deleted row stays deleted, so any store reporting a
    /// visible delete decides.
    pub fn check_row_deleted(
        &self,
        row: RowId,
        io: &IoContext,
        snapshot: &MvccSnapshot,
    ) -> Result<bool> {
        for store in self.store_set()? {
            if store.check_row_deleted(row, io, snapshot)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ----- log retention ----------------------------------------------

    /// Earliest log index still needed by an in-memory store, or `None`
    /// when everything is flushed and the log may truncate freely.
    pub fn earliest_needed_log_index(&self) -> Option<i64> {
        match self.registry.earliest_registered_log_index() {
            Ok(index) => Some(index),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!(error = %e, "anchor registry lookup failed");
                None
            }
        }
    }

    /// Metrics snapshot for the metrics task and for tests. A poisoned
    /// lock surfaces as an error rather than a healthy-looking zero.
    pub fn metrics(&self) -> Result<TrackerMetrics> {
        let dms = self.dms.read()?.clone();
        Ok(TrackerMetrics {
            dms_deltas: dms.count(),
            dms_size_bytes: dms.estimate_size(),
            delta_file_count: self.delta_files.read()?.len(),
            anchored_log_indexes: self.registry.anchor_count(),
            leader_term: self.leader_term(),
        })
    }
}

/// Point-in-time view of a tracker's state.
#[derive(Clone, Debug)]
pub struct TrackerMetrics {
    pub dms_deltas: usize,
    pub dms_size_bytes: usize,
    pub delta_file_count: usize,
    pub anchored_log_indexes: usize,
    pub leader_term: Option<u64>,
}

/// Size-triggered flush of the active memstore.
pub struct DeltaFlushTask {
    tracker: Arc<DeltaTracker>,
    interval: std::time::Duration,
}

impl DeltaFlushTask {
    pub fn new(tracker: Arc<DeltaTracker>) -> Arc<Self> {
        let interval = tracker.config.scheduler.flush_interval;
        Arc::new(Self { tracker, interval })
    }
}

#[async_trait::async_trait]
impl BackgroundTask for DeltaFlushTask {
    fn name(&self) -> &'static str {
        "delta-flush"
    }

    fn interval(&self) -> std::time::Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        if self.tracker.needs_flush()? {
            self.tracker.flush()?;
        }
        Ok(())
    }
}

/// Periodic metrics logging.
pub struct MetricsTask {
    tracker: Arc<DeltaTracker>,
    interval: std::time::Duration,
}

impl MetricsTask {
    pub fn new(tracker: Arc<DeltaTracker>) -> Arc<Self> {
        let interval = tracker.config.scheduler.metrics_interval;
        Arc::new(Self { tracker, interval })
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "tracker-metrics"
    }

    fn interval(&self) -> std::time::Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        let m = self.tracker.metrics()?;
        tracing::info!(
            tablet_id = %self.tracker.tablet_id,
            dms_deltas = m.dms_deltas,
            dms_size_bytes = m.dms_size_bytes,
            delta_files = m.delta_file_count,
            anchored_log_indexes = m.anchored_log_indexes,
            leader_term = ?m.leader_term,
            "tracker metrics"
        );
        Ok(())
    }
}
