//! The delta layer: per-row mutations stacked on top of base data.
//!
//! Updates and deletes against a rowset do not rewrite base data in place.
//! They accumulate as deltas: first in the in-memory [`memstore`], then in
//! immutable [`file`]s once flushed. A scan applies the deltas visible in
//! its MVCC snapshot on top of each batch of base rows, merging across all
//! live stores with the [`merger`].

pub mod changes;
pub mod file;
pub mod key;
pub mod memstore;
pub mod merger;
pub mod preparer;

use std::sync::Arc;

use crate::error::Result;
use crate::rowblock::{ColumnBlock, RowIteratorOptions, SelectionVector};
use crate::types::{ColumnId, RowId, Timestamp};

pub use changes::{ColumnUpdate, DecodedChanges, RowChangeList, RowChangeListBuilder};
pub use key::DeltaKey;

/// What the caller intends to do with a prepared batch. Bits may be
/// combined; each apply/collect operation requires its bit to have been
/// set at prepare time.
pub type PrepareFlags = u8;

pub const PREPARE_FOR_APPLY: PrepareFlags = 1 << 0;
pub const PREPARE_FOR_COLLECT: PrepareFlags = 1 << 1;
pub const PREPARE_FOR_SELECT: PrepareFlags = 1 << 2;

/// One mutation against one row, detached from its store. Rows are
/// implicit: collection targets are indexed by row offset within a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub timestamp: Timestamp,
    pub disambiguator: u32,
    pub changes: RowChangeList,
}

/// A delta paired with its full key, as produced by column-filtered
/// collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaKeyAndUpdate {
    pub key: DeltaKey,
    pub changes: RowChangeList,
}

/// Per-batch bitmap of rows that have at least one relevant delta.
#[derive(Clone, Debug)]
pub struct SelectedDeltas {
    start_row: RowId,
    rows: Vec<bool>,
}

impl SelectedDeltas {
    pub fn new(start_row: RowId, nrows: usize) -> Self {
        Self {
            start_row,
            rows: vec![false; nrows],
        }
    }

    pub fn start_row(&self) -> RowId {
        self.start_row
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn mark_row(&mut self, row_off: usize) {
        if let Some(slot) = self.rows.get_mut(row_off) {
            *slot = true;
        }
    }

    pub fn is_row_selected(&self, row_off: usize) -> bool {
        self.rows.get(row_off).copied().unwrap_or(false)
    }

    pub fn count_selected(&self) -> usize {
        self.rows.iter().filter(|r| **r).count()
    }

    pub fn any_selected(&self) -> bool {
        self.rows.iter().any(|r| *r)
    }
}

/// A store of deltas: the in-memory memstore or one immutable delta file.
pub trait DeltaStore: Send + Sync {
    /// Construct an iterator scoped to the snapshot in `opts`. Returns
    /// NotFound when the snapshot demonstrably excludes every delta in the
    /// store, so the caller can skip it entirely.
    fn new_delta_iterator(
        self: Arc<Self>,
        opts: &RowIteratorOptions,
    ) -> Result<Box<dyn DeltaIterator>>;

    /// MVCC-consistent deleted-ness of one row within this store.
    fn check_row_deleted(
        &self,
        row: RowId,
        io: &crate::rowblock::IoContext,
        snapshot: &crate::mvcc::MvccSnapshot,
    ) -> Result<bool>;

    /// Approximate memory or disk footprint in bytes.
    fn estimate_size(&self) -> usize;

    /// Short name for logs.
    fn debug_name(&self) -> String;
}

/// Iterator over the deltas of one store (or a merger over several).
///
/// Usage follows a strict protocol: `init`, then `seek_to_ordinal`, then
/// one or more `prepare_batch` calls, each fixing a window of rows that
/// the apply/collect operations below operate on. Violations surface as
/// `IllegalState`.
pub trait DeltaIterator: Send {
    fn init(&mut self) -> Result<()>;

    fn seek_to_ordinal(&mut self, row: RowId) -> Result<()>;

    /// Fix the window `[current, current + nrows)` for subsequent apply
    /// and collect calls, then advance the cursor past it.
    fn prepare_batch(&mut self, nrows: usize, flags: PrepareFlags) -> Result<()>;

    /// Overwrite cells of `dst` with the newest visible update of the
    /// block's column, for rows selected in `filter`.
    fn apply_updates(
        &mut self,
        col: ColumnId,
        dst: &mut ColumnBlock,
        filter: &SelectionVector,
    ) -> Result<()>;

    /// Clear the selection bit of rows whose newest visible delta is a
    /// delete.
    fn apply_deletes(&mut self, sel: &mut SelectionVector) -> Result<()>;

    /// Mark rows that have any visible delta in the prepared window.
    fn select_deltas(&mut self, out: &mut SelectedDeltas) -> Result<()>;

    /// Append every delta of the prepared window (regardless of snapshot)
    /// to the per-row lists in `out`. `out` must span the window.
    fn collect_mutations(&mut self, out: &mut [Vec<Mutation>]) -> Result<()>;

    /// Append deltas touching any of `col_ids` (deletes always qualify)
    /// to `out`.
    fn filter_column_ids_and_collect_deltas(
        &mut self,
        col_ids: &[ColumnId],
        out: &mut Vec<DeltaKeyAndUpdate>,
    ) -> Result<()>;

    /// Whether further batches may yield deltas.
    fn has_next(&self) -> bool;

    /// Whether the prepared window holds any deltas.
    fn may_have_deltas(&self) -> bool;

    /// Running count of deltas selected across prepared batches; the
    /// merger threads this through its children to enforce a global cap.
    fn deltas_selected(&self) -> i64;

    fn set_deltas_selected(&mut self, n: i64);

    /// Short name for logs.
    fn debug_name(&self) -> String;
}
