//! Row-block sinks for the delta apply path.
//!
//! Scans materialize rows a batch at a time. The delta layer treats these
//! structures as opaque: a `ColumnBlock` receives updated cell values for
//! one projected column, and a `SelectionVector` tracks which rows in the
//! batch are still live after deletes are applied.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mvcc::MvccSnapshot;
use crate::types::ColumnId;

/// One column of a projection schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    pub id: ColumnId,
    pub name: String,
}

/// An ordered projection of columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }
}

/// A single column's cells for one batch of rows. Cells are opaque byte
/// values; `None` means the base value was not overwritten.
#[derive(Clone, Debug)]
pub struct ColumnBlock {
    column_id: ColumnId,
    cells: Vec<Option<Vec<u8>>>,
}

impl ColumnBlock {
    pub fn new(column_id: ColumnId, nrows: usize) -> Self {
        Self {
            column_id,
            cells: vec![None; nrows],
        }
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    pub fn nrows(&self) -> usize {
        self.cells.len()
    }

    /// Overwrite the cell at `row_off` with an updated value.
    pub fn set_cell(&mut self, row_off: usize, value: Vec<u8>) -> Result<()> {
        if row_off >= self.cells.len() {
            return Err(Error::InvalidArgument(format!(
                "row offset {} out of range for block of {} rows",
                row_off,
                self.cells.len()
            )));
        }
        self.cells[row_off] = Some(value);
        Ok(())
    }

    pub fn cell(&self, row_off: usize) -> Option<&[u8]> {
        self.cells.get(row_off).and_then(|c| c.as_deref())
    }
}

/// A bit per row in a batch; a cleared bit means the row is dead (deleted
/// or filtered) and must not be returned to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionVector {
    bits: Vec<u8>,
    nrows: usize,
}

impl SelectionVector {
    /// All rows selected.
    pub fn all_selected(nrows: usize) -> Self {
        let mut sv = Self {
            bits: vec![0xff; nrows.div_ceil(8)],
            nrows,
        };
        sv.clear_trailing_bits();
        sv
    }

    /// No rows selected.
    pub fn none_selected(nrows: usize) -> Self {
        Self {
            bits: vec![0; nrows.div_ceil(8)],
            nrows,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn is_selected(&self, row_off: usize) -> bool {
        debug_assert!(row_off < self.nrows);
        self.bits[row_off / 8] & (1 << (row_off % 8)) != 0
    }

    pub fn set_selected(&mut self, row_off: usize) {
        debug_assert!(row_off < self.nrows);
        self.bits[row_off / 8] |= 1 << (row_off % 8);
    }

    pub fn clear_selected(&mut self, row_off: usize) {
        debug_assert!(row_off < self.nrows);
        self.bits[row_off / 8] &= !(1 << (row_off % 8));
    }

    pub fn count_selected(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn any_selected(&self) -> bool {
        self.bits.iter().any(|b| *b != 0)
    }

    fn clear_trailing_bits(&mut self) {
        let tail = self.nrows % 8;
        if tail != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= (1 << tail) - 1;
            }
        }
    }
}

/// Identifies the operation performing I/O, threaded through read paths for
/// diagnostics and cancellation bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct IoContext {
    pub tablet_id: String,
}

impl IoContext {
    pub fn for_tablet(tablet_id: impl Into<String>) -> Self {
        Self {
            tablet_id: tablet_id.into(),
        }
    }
}

/// Everything a delta iterator needs to scope a scan: the MVCC snapshot
/// bounding visibility, the projection, and the I/O context. Owned and
/// cheaply cloneable so that iterators never outlive their inputs.
#[derive(Clone, Debug)]
pub struct RowIteratorOptions {
    pub snapshot: MvccSnapshot,
    pub projection: Arc<Schema>,
    pub io: IoContext,
}

impl RowIteratorOptions {
    pub fn new(snapshot: MvccSnapshot, projection: Arc<Schema>, io: IoContext) -> Self {
        Self {
            snapshot,
            projection,
            io,
        }
    }
}
