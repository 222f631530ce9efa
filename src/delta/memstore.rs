//! In-memory delta store.
//!
//! Recently applied row mutations live here before they are flushed to an
//! immutable delta file. The store is an ordered concurrent map from
//! encoded [`DeltaKey`] to change-list bytes, backed by a lock-free skip
//! list: any number of writers insert concurrently while readers iterate
//! without blocking. Entries are immutable once inserted, so readers
//! always see stable bytes; MVCC snapshots make concurrent insertions
//! (which carry newer timestamps) invisible to in-flight scans.
//!
//! Each memstore owns a [`MinLogIndexAnchorer`] pinning the write-ahead
//! log entry of its earliest mutation. The anchor is released when (and
//! only when) a flush succeeds, at which point the log may truncate past
//! those entries.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_skiplist::SkipMap;

use crate::anchors::{LogAnchorRegistry, MinLogIndexAnchorer};
use crate::delta::file::DeltaFileWriter;
use crate::delta::key::{DeltaKey, ENCODED_KEY_LEN};
use crate::delta::preparer::DeltaPreparer;
use crate::delta::{
    DeltaIterator, DeltaKeyAndUpdate, DeltaStore, Mutation, PrepareFlags, RowChangeList,
    SelectedDeltas,
};
use crate::error::{Error, Result};
use crate::mvcc::MvccSnapshot;
use crate::rowblock::{ColumnBlock, IoContext, RowIteratorOptions, SelectionVector};
use crate::types::{ColumnId, OpId, RowId, Timestamp};

/// Value stored in the tree. The insertion id is unique per `update` call
/// and lets a writer detect that it lost a key race to a concurrent writer.
#[derive(Clone, Debug)]
struct DeltaPayload {
    insert_id: u64,
    changes: RowChangeList,
}

/// Concurrent in-memory store of row deltas, ordered by delta key.
pub struct DeltaMemStore {
    id: i64,
    rowset_id: i64,
    creation_time: Instant,
    tree: SkipMap<Vec<u8>, DeltaPayload>,
    /// Bytes owned by the tree: encoded keys plus change-list payloads.
    size_bytes: AtomicUsize,
    /// Lowest and highest timestamp ever inserted; `None` until the first
    /// insert.
    ts_bounds: Mutex<Option<(Timestamp, Timestamp)>>,
    anchorer: MinLogIndexAnchorer,
    /// Source of disambiguator values for keys colliding on
    /// `(row, timestamp)`. Only consulted on collision, so the first
    /// mutation of a pair always keeps disambiguator 0.
    disambiguator_seq: AtomicU32,
    insert_seq: AtomicU64,
    deleted_row_count: AtomicI64,
    closed: AtomicBool,
}

impl DeltaMemStore {
    /// Construct a new store and hand out a shared handle. Iterators hold
    /// clones of the handle, so the tree outlives every outstanding reader.
    pub fn create(id: i64, rowset_id: i64, registry: Arc<LogAnchorRegistry>) -> Arc<Self> {
        let owner = format!("dms-{rowset_id}.{id}");
        Arc::new(Self {
            id,
            rowset_id,
            creation_time: Instant::now(),
            tree: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
            ts_bounds: Mutex::new(None),
            anchorer: MinLogIndexAnchorer::new(registry, owner),
            disambiguator_seq: AtomicU32::new(0),
            insert_seq: AtomicU64::new(0),
            deleted_row_count: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Record one mutation. The change list is copied into the store; the
    /// caller's buffer need not outlive the call.
    pub fn update(
        &self,
        timestamp: Timestamp,
        row: RowId,
        changes: RowChangeList,
        op_id: OpId,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ReadOnly);
        }

        let insert_id = self.insert_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let is_delete = changes.is_delete();
        let entry_size = ENCODED_KEY_LEN + changes.len();
        let payload = DeltaPayload { insert_id, changes };

        // Try disambiguator 0 first; on a collision with an existing entry
        // (same row mutated twice at one timestamp, or a concurrent writer
        // that won the race) retry with a fresh value from the sequence
        // until the key is unique.
        let mut disambiguator = 0;
        loop {
            let key = DeltaKey::new(row, timestamp, disambiguator).encode().to_vec();
            let entry = self.tree.get_or_insert(key, payload.clone());
            if entry.value().insert_id == insert_id {
                break;
            }
            disambiguator = self.disambiguator_seq.fetch_add(1, Ordering::SeqCst) + 1;
        }

        self.size_bytes.fetch_add(entry_size, Ordering::SeqCst);
        {
            let mut bounds = self.ts_bounds.lock()?;
            *bounds = Some(match *bounds {
                None => (timestamp, timestamp),
                Some((lo, hi)) => (lo.min(timestamp), hi.max(timestamp)),
            });
        }
        self.anchorer.anchor_if_minimum(op_id.index)?;
        if is_delete {
            self.deleted_row_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Number of deltas in the store.
    pub fn count(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn rowset_id(&self) -> i64 {
        self.rowset_id
    }

    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    /// The minimum log index pinned by this store, or `INVALID_LOG_INDEX`
    /// if nothing was inserted yet.
    pub fn min_log_index(&self) -> i64 {
        self.anchorer.minimum_log_index()
    }

    /// Highest timestamp of any insert, or `None` when empty.
    pub fn highest_timestamp(&self) -> Option<Timestamp> {
        self.ts_bounds
            .lock()
            .ok()
            .and_then(|b| b.map(|(_, hi)| hi))
    }

    /// Lowest timestamp of any insert, or `None` when empty.
    pub fn lowest_timestamp(&self) -> Option<Timestamp> {
        self.ts_bounds
            .lock()
            .ok()
            .and_then(|b| b.map(|(lo, _)| lo))
    }

    /// Number of delete markers inserted.
    pub fn deleted_row_count(&self) -> i64 {
        self.deleted_row_count.load(Ordering::SeqCst)
    }

    /// Whether the store has been closed to writers by a flush.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flush every delta, in key order, to `writer`, finish the file, and
    /// release the log anchor. On failure the anchor is left intact so the
    /// log keeps the entries needed to rebuild this store.
    ///
    /// Closes the store to writers; concurrent readers are unaffected and
    /// may keep their handles until they are done.
    pub fn flush_to_file(&self, writer: &mut DeltaFileWriter) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.tree.iter() {
            let key = DeltaKey::decode(entry.key())?;
            writer.append(key, &entry.value().changes)?;
        }
        writer.finish()?;
        self.anchorer.release_anchor()?;
        tracing::info!(
            dms_id = self.id,
            rowset_id = self.rowset_id,
            deltas = self.count(),
            "flushed delta memstore"
        );
        Ok(())
    }
}

impl std::fmt::Debug for DeltaMemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaMemStore")
            .field("id", &self.id)
            .field("rowset_id", &self.rowset_id)
            .field("count", &self.count())
            .finish()
    }
}

impl DeltaStore for DeltaMemStore {
    fn new_delta_iterator(
        self: Arc<Self>,
        opts: &RowIteratorOptions,
    ) -> Result<Box<dyn DeltaIterator>> {
        // If the snapshot's bound is at or below every timestamp present,
        // no delta here can be visible and the caller may skip this store.
        if let Some(lowest) = self.lowest_timestamp() {
            if opts.snapshot.upper_bound() <= lowest {
                return Err(Error::NotFound(format!(
                    "snapshot excludes all deltas in {}",
                    self.debug_name()
                )));
            }
        }
        Ok(Box::new(DmsIterator::new(self, opts.clone())))
    }

    fn check_row_deleted(
        &self,
        row: RowId,
        _io: &IoContext,
        snapshot: &MvccSnapshot,
    ) -> Result<bool> {
        let start = DeltaKey::lower_bound(row).encode().to_vec();
        let mut deleted = false;
        for entry in self.tree.range(start..) {
            let key = DeltaKey::decode(entry.key())?;
            if key.row != row {
                break;
            }
            if !snapshot.is_visible(key.timestamp) {
                continue;
            }
            // Key order is timestamp order, so the last visible delta wins.
            deleted = entry.value().changes.is_delete();
        }
        Ok(deleted)
    }

    fn estimate_size(&self) -> usize {
        self.size_bytes.load(Ordering::SeqCst)
    }

    fn debug_name(&self) -> String {
        format!("DMS({}.{})", self.rowset_id, self.id)
    }
}

/// Iterator over the deltas currently in a memstore.
///
/// Wraps range scans of the underlying tree, snapshotting deltas one
/// prepared batch at a time so the caller can apply them column by column.
pub struct DmsIterator {
    dms: Arc<DeltaMemStore>,
    preparer: DeltaPreparer,
    initted: bool,
    seeked: bool,
    /// Start of the next batch window.
    cursor: RowId,
    /// Set when a prepare window has passed the last key in the tree.
    exhausted: bool,
}

impl DmsIterator {
    fn new(dms: Arc<DeltaMemStore>, opts: RowIteratorOptions) -> Self {
        Self {
            dms,
            preparer: DeltaPreparer::new(opts),
            initted: false,
            seeked: false,
            cursor: RowId(0),
            exhausted: false,
        }
    }

    /// Whether any key at or past `row` exists in the tree.
    fn tree_has_rows_from(&self, row: RowId) -> bool {
        let start = DeltaKey::lower_bound(row).encode().to_vec();
        self.dms.tree.range(start..).next().is_some()
    }
}

impl DeltaIterator for DmsIterator {
    fn init(&mut self) -> Result<()> {
        self.initted = true;
        Ok(())
    }

    fn seek_to_ordinal(&mut self, row: RowId) -> Result<()> {
        if !self.initted {
            return Err(Error::IllegalState(
                "seek_to_ordinal called before init".to_string(),
            ));
        }
        self.cursor = row;
        self.exhausted = !self.tree_has_rows_from(row);
        self.seeked = true;
        self.preparer.reset();
        Ok(())
    }

    fn prepare_batch(&mut self, nrows: usize, flags: PrepareFlags) -> Result<()> {
        if !self.seeked {
            return Err(Error::IllegalState(
                "prepare_batch called before seek_to_ordinal".to_string(),
            ));
        }
        let start = self.cursor;
        let end = (start.0 as u64).saturating_add(nrows as u64);

        self.preparer.start_batch(start, nrows, flags);
        let from = DeltaKey::lower_bound(start).encode().to_vec();
        if end > u32::MAX as u64 {
            for entry in self.dms.tree.range(from..) {
                let key = DeltaKey::decode(entry.key())?;
                self.preparer.add_delta(key, entry.value().changes.clone());
            }
            self.exhausted = true;
            self.cursor = RowId(u32::MAX);
        } else {
            let to = DeltaKey::lower_bound(RowId(end as u32)).encode().to_vec();
            for entry in self.dms.tree.range(from..to) {
                let key = DeltaKey::decode(entry.key())?;
                self.preparer.add_delta(key, entry.value().changes.clone());
            }
            self.cursor = RowId(end as u32);
            self.exhausted = !self.tree_has_rows_from(self.cursor);
        }
        self.preparer.finish_batch();
        Ok(())
    }

    fn apply_updates(
        &mut self,
        col: ColumnId,
        dst: &mut ColumnBlock,
        filter: &SelectionVector,
    ) -> Result<()> {
        self.preparer.apply_updates(col, dst, filter)
    }

    fn apply_deletes(&mut self, sel: &mut SelectionVector) -> Result<()> {
        self.preparer.apply_deletes(sel)
    }

    fn select_deltas(&mut self, out: &mut SelectedDeltas) -> Result<()> {
        self.preparer.select_deltas(out)
    }

    fn collect_mutations(&mut self, out: &mut [Vec<Mutation>]) -> Result<()> {
        self.preparer.collect_mutations(out)
    }

    fn filter_column_ids_and_collect_deltas(
        &mut self,
        col_ids: &[ColumnId],
        out: &mut Vec<DeltaKeyAndUpdate>,
    ) -> Result<()> {
        self.preparer
            .filter_column_ids_and_collect_deltas(col_ids, out)
    }

    fn has_next(&self) -> bool {
        self.seeked && !self.exhausted
    }

    fn may_have_deltas(&self) -> bool {
        self.preparer.may_have_deltas()
    }

    fn deltas_selected(&self) -> i64 {
        self.preparer.deltas_selected()
    }

    fn set_deltas_selected(&mut self, n: i64) {
        self.preparer.set_deltas_selected(n)
    }

    fn debug_name(&self) -> String {
        format!("DmsIterator({})", self.dms.debug_name())
    }
}
