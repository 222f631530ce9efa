//! Batch preparation shared by the memstore and delta file iterators.
//!
//! Both iterator kinds walk their store in key order and hand every delta
//! falling inside the prepared row window to a `DeltaPreparer`. The
//! preparer owns the window bookkeeping and implements the apply/collect
//! operations against the buffered deltas, so the two iterators differ
//! only in how they fetch deltas.

use crate::delta::changes::DecodedChanges;
use crate::delta::key::DeltaKey;
use crate::delta::{
    DeltaKeyAndUpdate, Mutation, PrepareFlags, RowChangeList, SelectedDeltas, PREPARE_FOR_APPLY,
    PREPARE_FOR_COLLECT, PREPARE_FOR_SELECT,
};
use crate::error::{Error, Result};
use crate::rowblock::{ColumnBlock, RowIteratorOptions, SelectionVector};
use crate::types::{ColumnId, RowId};

pub struct DeltaPreparer {
    opts: RowIteratorOptions,
    /// Deltas of the current window, in key (REDO) order.
    deltas: Vec<(DeltaKey, RowChangeList)>,
    batch_start: RowId,
    batch_rows: usize,
    flags: PrepareFlags,
    prepared: bool,
    deltas_selected: i64,
}

impl DeltaPreparer {
    pub fn new(opts: RowIteratorOptions) -> Self {
        Self {
            opts,
            deltas: Vec::new(),
            batch_start: RowId(0),
            batch_rows: 0,
            flags: 0,
            prepared: false,
            deltas_selected: 0,
        }
    }

    pub fn opts(&self) -> &RowIteratorOptions {
        &self.opts
    }

    /// Drop any prepared window, e.g. after a seek.
    pub fn reset(&mut self) {
        self.deltas.clear();
        self.prepared = false;
        self.batch_rows = 0;
        self.flags = 0;
    }

    /// Open a new window. Deltas are then fed in via `add_delta` and the
    /// window closed with `finish_batch`.
    pub fn start_batch(&mut self, start_row: RowId, nrows: usize, flags: PrepareFlags) {
        self.deltas.clear();
        self.batch_start = start_row;
        self.batch_rows = nrows;
        self.flags = flags;
        self.prepared = false;
    }

    /// Buffer one delta of the open window. Must be called in key order.
    pub fn add_delta(&mut self, key: DeltaKey, changes: RowChangeList) {
        debug_assert!(
            self.deltas.last().map_or(true, |(last, _)| *last <= key),
            "deltas added out of order: {} after {:?}",
            key,
            self.deltas.last().map(|(k, _)| *k)
        );
        self.deltas.push((key, changes));
    }

    pub fn finish_batch(&mut self) {
        if self.flags & PREPARE_FOR_SELECT != 0 {
            let visible = self
                .deltas
                .iter()
                .filter(|(k, _)| self.opts.snapshot.is_visible(k.timestamp))
                .count() as i64;
            self.deltas_selected += visible;
        }
        self.prepared = true;
    }

    pub fn batch_start(&self) -> RowId {
        self.batch_start
    }

    pub fn batch_rows(&self) -> usize {
        self.batch_rows
    }

    pub fn may_have_deltas(&self) -> bool {
        !self.deltas.is_empty()
    }

    pub fn deltas_selected(&self) -> i64 {
        self.deltas_selected
    }

    pub fn set_deltas_selected(&mut self, n: i64) {
        self.deltas_selected = n;
    }

    pub fn apply_updates(
        &self,
        col: ColumnId,
        dst: &mut ColumnBlock,
        filter: &SelectionVector,
    ) -> Result<()> {
        self.check_prepared_for(PREPARE_FOR_APPLY, "apply_updates")?;
        for (key, changes) in &self.deltas {
            if !self.opts.snapshot.is_visible(key.timestamp) {
                continue;
            }
            let row_off = self.row_offset(key.row)?;
            if !filter.is_selected(row_off) {
                continue;
            }
            match changes.decode()? {
                DecodedChanges::Delete => {}
                DecodedChanges::Update(updates) => {
                    // Deltas arrive in timestamp order, so a later visible
                    // update overwrites an earlier one.
                    for update in updates {
                        if update.column == col {
                            dst.set_cell(row_off, update.value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn apply_deletes(&self, sel: &mut SelectionVector) -> Result<()> {
        self.check_prepared_for(PREPARE_FOR_APPLY, "apply_deletes")?;
        for (key, changes) in &self.deltas {
            if !self.opts.snapshot.is_visible(key.timestamp) {
                continue;
            }
            if changes.is_delete() {
                let row_off = self.row_offset(key.row)?;
                sel.clear_selected(row_off);
            }
        }
        Ok(())
    }

    pub fn select_deltas(&self, out: &mut SelectedDeltas) -> Result<()> {
        self.check_prepared_for(PREPARE_FOR_SELECT, "select_deltas")?;
        if out.start_row() != self.batch_start || out.nrows() != self.batch_rows {
            return Err(Error::InvalidArgument(format!(
                "selection target spans rows {}+{}, prepared window is {}+{}",
                out.start_row(),
                out.nrows(),
                self.batch_start,
                self.batch_rows
            )));
        }
        for (key, _) in &self.deltas {
            if self.opts.snapshot.is_visible(key.timestamp) {
                let row_off = self.row_offset(key.row)?;
                out.mark_row(row_off);
            }
        }
        Ok(())
    }

    pub fn collect_mutations(&self, out: &mut [Vec<Mutation>]) -> Result<()> {
        self.check_prepared_for(PREPARE_FOR_COLLECT, "collect_mutations")?;
        if out.len() != self.batch_rows {
            return Err(Error::InvalidArgument(format!(
                "collection target has {} rows, prepared window has {}",
                out.len(),
                self.batch_rows
            )));
        }
        for (key, changes) in &self.deltas {
            let row_off = self.row_offset(key.row)?;
            out[row_off].push(Mutation {
                timestamp: key.timestamp,
                disambiguator: key.disambiguator,
                changes: changes.clone(),
            });
        }
        Ok(())
    }

    pub fn filter_column_ids_and_collect_deltas(
        &self,
        col_ids: &[ColumnId],
        out: &mut Vec<DeltaKeyAndUpdate>,
    ) -> Result<()> {
        self.check_prepared_for(PREPARE_FOR_COLLECT, "filter_column_ids_and_collect_deltas")?;
        for (key, changes) in &self.deltas {
            if changes.affects_columns(col_ids)? {
                out.push(DeltaKeyAndUpdate {
                    key: *key,
                    changes: changes.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_prepared_for(&self, flag: PrepareFlags, op: &str) -> Result<()> {
        if !self.prepared {
            return Err(Error::IllegalState(format!(
                "{op} called without a prepared batch"
            )));
        }
        if self.flags & flag == 0 {
            return Err(Error::IllegalState(format!(
                "{op} requires prepare flag {flag:#04b}, batch was prepared with {:#04b}",
                self.flags
            )));
        }
        Ok(())
    }

    fn row_offset(&self, row: RowId) -> Result<usize> {
        let off = (row.0 as u64).checked_sub(self.batch_start.0 as u64);
        match off {
            Some(off) if (off as usize) < self.batch_rows => Ok(off as usize),
            _ => Err(Error::IllegalState(format!(
                "delta for row {} outside prepared window {}+{}",
                row, self.batch_start, self.batch_rows
            ))),
        }
    }
}
