//! Merging iteration across multiple delta stores.
//!
//! A scan sees one virtual delta iterator even when the row range is
//! covered by several stores (the active memstore plus any number of
//! flushed delta files). The merger broadcasts the positioning calls to
//! every child and runs the apply/collect operations in child insertion
//! order; since children are ordered oldest-file-first with the memstore
//! last, REDO timestamp order within a row is preserved.

use std::sync::Arc;

use itertools::Itertools;

use crate::delta::{
    DeltaIterator, DeltaKeyAndUpdate, DeltaStore, Mutation, PrepareFlags, SelectedDeltas,
};
use crate::error::Result;
use crate::rowblock::{ColumnBlock, RowIteratorOptions, SelectionVector};
use crate::types::{ColumnId, RowId};

pub struct DeltaIteratorMerger {
    iters: Vec<Box<dyn DeltaIterator>>,
    total_deltas_selected_in_prepare: i64,
}

impl DeltaIteratorMerger {
    /// Build a merged iterator over `stores`. Stores whose snapshot check
    /// reports NotFound are skipped; if exactly one child remains, it is
    /// returned directly and the merger is bypassed.
    pub fn create(
        stores: &[Arc<dyn DeltaStore>],
        opts: &RowIteratorOptions,
    ) -> Result<Box<dyn DeltaIterator>> {
        let mut iters = Vec::with_capacity(stores.len());
        for store in stores {
            match store.clone().new_delta_iterator(opts) {
                Ok(iter) => iters.push(iter),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        if iters.len() == 1 {
            return Ok(iters.pop().unwrap());
        }
        Ok(Box::new(DeltaIteratorMerger {
            iters,
            total_deltas_selected_in_prepare: 0,
        }))
    }
}

impl DeltaIterator for DeltaIteratorMerger {
    fn init(&mut self) -> Result<()> {
        for iter in &mut self.iters {
            iter.init()?;
        }
        Ok(())
    }

    fn seek_to_ordinal(&mut self, row: RowId) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek_to_ordinal(row)?;
        }
        Ok(())
    }

    fn prepare_batch(&mut self, nrows: usize, flags: PrepareFlags) -> Result<()> {
        // Thread the running selected-delta count through every child so a
        // global cap applies across the whole store set.
        for iter in &mut self.iters {
            iter.set_deltas_selected(self.total_deltas_selected_in_prepare);
            iter.prepare_batch(nrows, flags)?;
            self.total_deltas_selected_in_prepare = iter.deltas_selected();
        }
        Ok(())
    }

    fn apply_updates(
        &mut self,
        col: ColumnId,
        dst: &mut ColumnBlock,
        filter: &SelectionVector,
    ) -> Result<()> {
        for iter in &mut self.iters {
            iter.apply_updates(col, dst, filter)?;
        }
        Ok(())
    }

    fn apply_deletes(&mut self, sel: &mut SelectionVector) -> Result<()> {
        for iter in &mut self.iters {
            iter.apply_deletes(sel)?;
        }
        Ok(())
    }

    fn select_deltas(&mut self, out: &mut SelectedDeltas) -> Result<()> {
        for iter in &mut self.iters {
            iter.select_deltas(out)?;
        }
        Ok(())
    }

    fn collect_mutations(&mut self, out: &mut [Vec<Mutation>]) -> Result<()> {
        for iter in &mut self.iters {
            iter.collect_mutations(out)?;
        }
        // Children contribute in store order, not time order. Sort each
        // row's list so collection is deterministic regardless of which
        // store held which mutation; stable to preserve the intra-batch
        // order of mutations sharing a timestamp.
        for row in out.iter_mut() {
            row.sort_by_key(|m| (m.timestamp, m.disambiguator));
        }
        Ok(())
    }

    fn filter_column_ids_and_collect_deltas(
        &mut self,
        col_ids: &[ColumnId],
        out: &mut Vec<DeltaKeyAndUpdate>,
    ) -> Result<()> {
        for iter in &mut self.iters {
            iter.filter_column_ids_and_collect_deltas(col_ids, out)?;
        }
        // Stable sort: an input may carry several deltas for one row at
        // one timestamp (a batch with repeated mutations), and their
        // original order must survive.
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.iters.iter().any(|iter| iter.has_next())
    }

    fn may_have_deltas(&self) -> bool {
        self.iters.iter().any(|iter| iter.may_have_deltas())
    }

    fn deltas_selected(&self) -> i64 {
        self.total_deltas_selected_in_prepare
    }

    fn set_deltas_selected(&mut self, n: i64) {
        self.total_deltas_selected_in_prepare = n;
    }

    fn debug_name(&self) -> String {
        format!(
            "DeltaIteratorMerger({})",
            self.iters.iter().map(|i| i.debug_name()).join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::LogAnchorRegistry;
    use crate::delta::file::{DeltaFileReader, DeltaFileWriter};
    use crate::delta::key::DeltaKey;
    use crate::delta::memstore::DeltaMemStore;
    use crate::delta::{
        RowChangeList, RowChangeListBuilder, PREPARE_FOR_APPLY, PREPARE_FOR_COLLECT,
        PREPARE_FOR_SELECT,
    };
    use crate::mvcc::MvccSnapshot;
    use crate::rowblock::{IoContext, Schema};
    use crate::tmpfs::TempDir;
    use crate::types::{OpId, Timestamp};

    fn update_for(col: u32, value: &[u8]) -> RowChangeList {
        RowChangeListBuilder::new()
            .set_column(ColumnId(col), value)
            .build()
            .expect("build failed")
    }

    fn opts(upper: u64) -> RowIteratorOptions {
        RowIteratorOptions::new(
            MvccSnapshot::visible_before(Timestamp(upper)),
            Arc::new(Schema::default()),
            IoContext::for_tablet("test"),
        )
    }

    /// One flushed file with old deltas plus a memstore with newer ones.
    fn two_store_fixture(dir: &TempDir) -> Vec<Arc<dyn DeltaStore>> {
        let path = dir.path().join("old.delta");
        let mut writer = DeltaFileWriter::create(&path).expect("create failed");
        writer
            .append(
                DeltaKey::new(RowId(1), Timestamp(5), 0),
                &update_for(1, b"file-row1"),
            )
            .unwrap();
        writer
            .append(
                DeltaKey::new(RowId(3), Timestamp(6), 0),
                &RowChangeList::delete(),
            )
            .unwrap();
        writer.finish().unwrap();
        let file = DeltaFileReader::open(&path, 1, None).expect("open failed");

        let dms = DeltaMemStore::create(0, 1, LogAnchorRegistry::new());
        dms.update(
            Timestamp(10),
            RowId(1),
            update_for(1, b"dms-row1"),
            OpId::new(1, 1),
        )
        .unwrap();
        dms.update(
            Timestamp(11),
            RowId(2),
            update_for(1, b"dms-row2"),
            OpId::new(1, 2),
        )
        .unwrap();

        vec![file as Arc<dyn DeltaStore>, dms as Arc<dyn DeltaStore>]
    }

    #[test]
    fn test_single_child_bypasses_merger() {
        let dms = DeltaMemStore::create(0, 1, LogAnchorRegistry::new());
        dms.update(Timestamp(1), RowId(0), update_for(1, b"x"), OpId::new(1, 1))
            .unwrap();
        let stores = vec![dms as Arc<dyn DeltaStore>];

        let iter = DeltaIteratorMerger::create(&stores, &opts(100)).unwrap();
        assert!(iter.debug_name().starts_with("DmsIterator"));
    }

    #[test]
    fn test_excluded_stores_are_skipped() {
        let dir = TempDir::new().expect("tempdir failed");
        let stores = two_store_fixture(&dir);

        // Upper bound 7 sees the file's deltas (ts 5 and 6) but nothing in
        // the memstore (ts >= 10), so the memstore is skipped and the file
        // iterator comes back alone.
        let iter = DeltaIteratorMerger::create(&stores, &opts(7)).unwrap();
        assert!(iter.debug_name().starts_with("DeltaFileIterator"));
    }

    #[test]
    fn test_merged_apply_newest_wins() {
        let dir = TempDir::new().expect("tempdir failed");
        let stores = two_store_fixture(&dir);

        let mut iter = DeltaIteratorMerger::create(&stores, &opts(100)).unwrap();
        assert!(iter.debug_name().starts_with("DeltaIteratorMerger"));
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        iter.prepare_batch(8, PREPARE_FOR_APPLY).unwrap();
        assert!(iter.may_have_deltas());

        // The memstore's ts=10 update must override the file's ts=5 one:
        // files are ordered before the memstore, so it is applied last.
        let mut block = ColumnBlock::new(ColumnId(1), 8);
        let filter = SelectionVector::all_selected(8);
        iter.apply_updates(ColumnId(1), &mut block, &filter).unwrap();
        assert_eq!(block.cell(1), Some(&b"dms-row1"[..]));
        assert_eq!(block.cell(2), Some(&b"dms-row2"[..]));

        // Row 3 was deleted in the file store.
        let mut sel = SelectionVector::all_selected(8);
        iter.apply_deletes(&mut sel).unwrap();
        assert!(!sel.is_selected(3));
        assert!(sel.is_selected(1));
    }

    #[test]
    fn test_merged_collect_sorts_by_time() {
        let dir = TempDir::new().expect("tempdir failed");
        let stores = two_store_fixture(&dir);

        let mut iter = DeltaIteratorMerger::create(&stores, &opts(100)).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        iter.prepare_batch(8, PREPARE_FOR_COLLECT).unwrap();

        let mut out = vec![Vec::new(); 8];
        iter.collect_mutations(&mut out).unwrap();
        // Row 1 has deltas in both stores; collection must come out in
        // timestamp order even though the file child ran first.
        assert_eq!(out[1].len(), 2);
        assert_eq!(out[1][0].timestamp, Timestamp(5));
        assert_eq!(out[1][1].timestamp, Timestamp(10));
    }

    #[test]
    fn test_merged_filter_collect_stable_sorted() {
        let dir = TempDir::new().expect("tempdir failed");
        let stores = two_store_fixture(&dir);

        let mut iter = DeltaIteratorMerger::create(&stores, &opts(100)).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        iter.prepare_batch(8, PREPARE_FOR_COLLECT).unwrap();

        let mut out = Vec::new();
        iter.filter_column_ids_and_collect_deltas(&[ColumnId(1)], &mut out)
            .unwrap();
        // All four deltas touch column 1 (the delete affects everything).
        assert_eq!(out.len(), 4);
        for pair in out.windows(2) {
            assert!(pair[0].key <= pair[1].key, "output not key-sorted");
        }
    }

    #[test]
    fn test_deltas_selected_threaded_across_children() {
        let dir = TempDir::new().expect("tempdir failed");
        let stores = two_store_fixture(&dir);

        let mut iter = DeltaIteratorMerger::create(&stores, &opts(100)).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        iter.prepare_batch(8, PREPARE_FOR_SELECT).unwrap();

        // Two visible deltas in the file, two in the memstore.
        assert_eq!(iter.deltas_selected(), 4);

        let mut selected = SelectedDeltas::new(RowId(0), 8);
        iter.select_deltas(&mut selected).unwrap();
        assert_eq!(selected.count_selected(), 3); // rows 1, 2, 3
    }

    #[test]
    fn test_has_next_is_disjunction() {
        let dir = TempDir::new().expect("tempdir failed");
        let stores = two_store_fixture(&dir);

        let mut iter = DeltaIteratorMerger::create(&stores, &opts(100)).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        assert!(iter.has_next());
        iter.prepare_batch(8, PREPARE_FOR_APPLY).unwrap();
        // Both stores top out at row 3; nothing left past the batch.
        assert!(!iter.has_next());
    }
}
