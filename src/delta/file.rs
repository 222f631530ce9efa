//! Immutable delta files.
//!
//! A flushed delta memstore becomes one of these. The file holds deltas in
//! key order, split into checksummed data blocks, followed by a footer
//! carrying a sparse first-key index and the file's delta statistics, and
//! a trailing offset locating the footer:
//!
//! ```text
//! +--------------------+
//! | Data Block 1       |   entry_count:u32 | entries | crc32:u32
//! +--------------------+
//! | ...                |
//! +--------------------+
//! | Footer (bincode)   |   index entries + DeltaStats
//! +--------------------+
//! | Footer Offset (u64)|
//! +--------------------+
//!
//! entry: key (16 bytes) | changes_len:u32 | changes bytes
//! ```
//!
//! Integers are big-endian; the CRC covers the count and entry bytes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::delta::key::{DeltaKey, ENCODED_KEY_LEN};
use crate::delta::preparer::DeltaPreparer;
use crate::delta::{
    DeltaIterator, DeltaKeyAndUpdate, DeltaStore, Mutation, PrepareFlags, RowChangeList,
    SelectedDeltas,
};
use crate::error::{Error, Result};
use crate::mvcc::MvccSnapshot;
use crate::rowblock::{ColumnBlock, IoContext, RowIteratorOptions, SelectionVector};
use crate::types::{ColumnId, RowId, Timestamp};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Target maximum size for one data block. A block may run slightly over
/// to fit its last delta.
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Cache key for one data block: (file id, block offset).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub file_id: u64,
    pub offset: u64,
}

/// A decoded data block shared through the cache.
pub type CachedBlock = Arc<Vec<(DeltaKey, RowChangeList)>>;

/// Cache shared by the delta file readers of one tablet.
pub type BlockCache = Cache<BlockKey, CachedBlock>;

/// Summary statistics of a delta file, persisted in its footer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaStats {
    pub delta_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub min_timestamp: Timestamp,
    pub max_timestamp: Timestamp,
    pub min_row: RowId,
    pub max_row: RowId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IndexEntry {
    /// Encoded first key of the block.
    first_key: Vec<u8>,
    offset: u64,
    len: u64,
}

#[derive(Serialize, Deserialize)]
struct Footer {
    index: Vec<IndexEntry>,
    stats: DeltaStats,
}

/// Writes a delta file. Deltas must arrive in strictly increasing key
/// order, which is exactly the order a memstore flush emits.
pub struct DeltaFileWriter {
    file: File,
    path: PathBuf,
    block: Vec<u8>,
    block_entry_count: u32,
    block_first_key: Option<DeltaKey>,
    index: Vec<IndexEntry>,
    offset: u64,
    last_key: Option<DeltaKey>,
    stats: DeltaStats,
    finished: bool,
}

impl DeltaFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            block: Vec::new(),
            block_entry_count: 0,
            block_first_key: None,
            index: Vec::new(),
            offset: 0,
            last_key: None,
            stats: DeltaStats::default(),
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one delta. Keys must be strictly increasing.
    pub fn append(&mut self, key: DeltaKey, changes: &RowChangeList) -> Result<()> {
        if self.finished {
            return Err(Error::ReadOnly);
        }
        if let Some(last) = self.last_key {
            if key <= last {
                return Err(Error::IllegalState(format!(
                    "delta keys out of order: {key} appended after {last}"
                )));
            }
        }
        self.last_key = Some(key);

        if self.block_first_key.is_none() {
            self.block_first_key = Some(key);
        }
        self.block.extend_from_slice(&key.encode());
        self.block
            .write_u32::<BigEndian>(changes.len() as u32)
            .unwrap();
        self.block.extend_from_slice(changes.as_bytes());
        self.block_entry_count += 1;

        if self.stats.delta_count == 0 {
            self.stats.min_timestamp = key.timestamp;
            self.stats.max_timestamp = key.timestamp;
            self.stats.min_row = key.row;
            self.stats.max_row = key.row;
        } else {
            self.stats.min_timestamp = self.stats.min_timestamp.min(key.timestamp);
            self.stats.max_timestamp = self.stats.max_timestamp.max(key.timestamp);
            self.stats.min_row = self.stats.min_row.min(key.row);
            self.stats.max_row = self.stats.max_row.max(key.row);
        }
        self.stats.delta_count += 1;
        if changes.is_delete() {
            self.stats.delete_count += 1;
        } else {
            self.stats.update_count += 1;
        }

        if self.block.len() >= MAX_BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Write the final block, footer, and trailer, then sync. The writer
    /// accepts no further appends.
    pub fn finish(&mut self) -> Result<DeltaStats> {
        if self.finished {
            return Err(Error::ReadOnly);
        }
        if self.block_entry_count > 0 {
            self.flush_block()?;
        }
        let footer = Footer {
            index: std::mem::take(&mut self.index),
            stats: self.stats.clone(),
        };
        let footer_offset = self.offset;
        let footer_bytes = bincode::serialize(&footer)?;
        self.file.write_all(&footer_bytes)?;
        self.file.write_u64::<BigEndian>(footer_offset)?;
        self.file.sync_all()?;
        self.finished = true;
        Ok(self.stats.clone())
    }

    pub fn written_stats(&self) -> &DeltaStats {
        &self.stats
    }

    fn flush_block(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(self.block.len() + 8);
        buf.write_u32::<BigEndian>(self.block_entry_count).unwrap();
        buf.extend_from_slice(&self.block);
        let crc = CRC32.checksum(&buf);
        buf.write_u32::<BigEndian>(crc).unwrap();

        self.file.write_all(&buf)?;
        let first_key = self
            .block_first_key
            .take()
            .expect("flushing a block with no entries");
        self.index.push(IndexEntry {
            first_key: first_key.encode().to_vec(),
            offset: self.offset,
            len: buf.len() as u64,
        });
        self.offset += buf.len() as u64;
        self.block.clear();
        self.block_entry_count = 0;
        Ok(())
    }
}

/// Reads a delta file. Blocks are fetched through the shared cache when
/// one is configured.
pub struct DeltaFileReader {
    file: Mutex<File>,
    file_id: u64,
    path: PathBuf,
    index: Vec<IndexEntry>,
    stats: DeltaStats,
    size_bytes: usize,
    cache: Option<Arc<BlockCache>>,
}

impl DeltaFileReader {
    pub fn open(path: &Path, file_id: u64, cache: Option<Arc<BlockCache>>) -> Result<Arc<Self>> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < 8 {
            return Err(Error::Corruption(format!(
                "delta file {} too short: {} bytes",
                path.display(),
                file_size
            )));
        }

        file.seek(SeekFrom::End(-8))?;
        let footer_offset = file.read_u64::<BigEndian>()?;
        if footer_offset > file_size - 8 {
            return Err(Error::Corruption(format!(
                "footer offset {} past end of {}-byte delta file",
                footer_offset, file_size
            )));
        }
        let mut footer_bytes = vec![0u8; (file_size - 8 - footer_offset) as usize];
        file.seek(SeekFrom::Start(footer_offset))?;
        file.read_exact(&mut footer_bytes)?;
        let footer: Footer = bincode::deserialize(&footer_bytes)?;

        Ok(Arc::new(Self {
            file: Mutex::new(file),
            file_id,
            path: path.to_path_buf(),
            index: footer.index,
            stats: footer.stats,
            size_bytes: file_size as usize,
            cache,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn stats(&self) -> &DeltaStats {
        &self.stats
    }

    pub fn delta_count(&self) -> u64 {
        self.stats.delta_count
    }

    /// Fetch and decode block `idx`, consulting the cache first.
    fn read_block(&self, idx: usize) -> Result<CachedBlock> {
        let entry = self.index.get(idx).ok_or_else(|| {
            Error::InvalidArgument(format!("block {idx} out of range"))
        })?;
        let key = BlockKey {
            file_id: self.file_id,
            offset: entry.offset,
        };
        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
        }

        let mut buf = vec![0u8; entry.len as usize];
        {
            let mut file = self.file.lock()?;
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut buf)?;
        }
        let block = Arc::new(Self::decode_block(&buf, &self.path)?);
        if let Some(cache) = &self.cache {
            cache.insert(key, block.clone());
        }
        Ok(block)
    }

    fn decode_block(buf: &[u8], path: &Path) -> Result<Vec<(DeltaKey, RowChangeList)>> {
        if buf.len() < 8 {
            return Err(Error::Corruption(format!(
                "block in {} too short: {} bytes",
                path.display(),
                buf.len()
            )));
        }
        let (payload, crc_bytes) = buf.split_at(buf.len() - 4);
        let expected_crc = BigEndian::read_u32(crc_bytes);
        let actual_crc = CRC32.checksum(payload);
        if expected_crc != actual_crc {
            return Err(Error::Corruption(format!(
                "block checksum mismatch in {}: expected {expected_crc:#010x}, got {actual_crc:#010x}",
                path.display()
            )));
        }

        let entry_count = BigEndian::read_u32(&payload[0..4]) as usize;
        let mut rest = &payload[4..];
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            if rest.len() < ENCODED_KEY_LEN + 4 {
                return Err(Error::Corruption(format!(
                    "truncated delta entry in {}",
                    path.display()
                )));
            }
            let key = DeltaKey::decode(&rest[..ENCODED_KEY_LEN])?;
            let changes_len = BigEndian::read_u32(&rest[ENCODED_KEY_LEN..ENCODED_KEY_LEN + 4]) as usize;
            rest = &rest[ENCODED_KEY_LEN + 4..];
            if rest.len() < changes_len {
                return Err(Error::Corruption(format!(
                    "delta entry in {} claims {} change bytes, {} left",
                    path.display(),
                    changes_len,
                    rest.len()
                )));
            }
            let changes = RowChangeList::from_encoded(rest[..changes_len].to_vec())?;
            entries.push((key, changes));
            rest = &rest[changes_len..];
        }
        if !rest.is_empty() {
            return Err(Error::Corruption(format!(
                "{} trailing bytes after last delta entry in {}",
                rest.len(),
                path.display()
            )));
        }
        Ok(entries)
    }

    /// Index of the first block that may contain keys at or above `key`.
    fn first_block_for(&self, key: &DeltaKey) -> usize {
        let encoded = key.encode().to_vec();
        // partition_point: blocks whose first key is <= the target.
        let covering = self
            .index
            .partition_point(|entry| entry.first_key <= encoded);
        covering.saturating_sub(1)
    }
}

impl DeltaStore for DeltaFileReader {
    fn new_delta_iterator(
        self: Arc<Self>,
        opts: &RowIteratorOptions,
    ) -> Result<Box<dyn DeltaIterator>> {
        if self.stats.delta_count > 0 && opts.snapshot.upper_bound() <= self.stats.min_timestamp {
            return Err(Error::NotFound(format!(
                "snapshot excludes all deltas in {}",
                self.debug_name()
            )));
        }
        Ok(Box::new(DeltaFileIterator::new(self, opts.clone())))
    }

    fn check_row_deleted(
        &self,
        row: RowId,
        _io: &IoContext,
        snapshot: &MvccSnapshot,
    ) -> Result<bool> {
        if self.stats.delta_count == 0 || row < self.stats.min_row || row > self.stats.max_row {
            return Ok(false);
        }
        let target = DeltaKey::lower_bound(row);
        let mut deleted = false;
        'blocks: for idx in self.first_block_for(&target)..self.index.len() {
            let block = self.read_block(idx)?;
            for (key, changes) in block.iter() {
                if key.row > row {
                    break 'blocks;
                }
                if key.row == row && snapshot.is_visible(key.timestamp) {
                    deleted = changes.is_delete();
                }
            }
        }
        Ok(deleted)
    }

    fn estimate_size(&self) -> usize {
        self.size_bytes
    }

    fn debug_name(&self) -> String {
        format!("DeltaFile({})", self.file_id)
    }
}

/// Iterator over one delta file, sharing its batch mechanics with the
/// memstore iterator through [`DeltaPreparer`].
pub struct DeltaFileIterator {
    reader: Arc<DeltaFileReader>,
    preparer: DeltaPreparer,
    initted: bool,
    seeked: bool,
    cursor: RowId,
    exhausted: bool,
}

impl DeltaFileIterator {
    fn new(reader: Arc<DeltaFileReader>, opts: RowIteratorOptions) -> Self {
        Self {
            reader,
            preparer: DeltaPreparer::new(opts),
            initted: false,
            seeked: false,
            cursor: RowId(0),
            exhausted: false,
        }
    }

    fn past_last_row(&self, row: RowId) -> bool {
        self.reader.stats.delta_count == 0 || row > self.reader.stats.max_row
    }
}

impl DeltaIterator for DeltaFileIterator {
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
        self.exhausted = self.past_last_row(row);
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
        if !self.exhausted {
            let target = DeltaKey::lower_bound(start);
            'blocks: for idx in self.reader.first_block_for(&target)..self.reader.index.len() {
                let block = self.reader.read_block(idx)?;
                for (key, changes) in block.iter() {
                    if (key.row.0 as u64) >= end {
                        break 'blocks;
                    }
                    if key.row >= start {
                        self.preparer.add_delta(*key, changes.clone());
                    }
                }
            }
        }
        self.preparer.finish_batch();

        self.cursor = RowId(end.min(u32::MAX as u64) as u32);
        self.exhausted = end > u32::MAX as u64 || self.past_last_row(self.cursor);
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
        format!("DeltaFileIterator({})", self.reader.debug_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{RowChangeListBuilder, PREPARE_FOR_APPLY, PREPARE_FOR_COLLECT};
    use crate::rowblock::Schema;
    use crate::tmpfs::TempDir;

    fn update_for(col: u32, value: &[u8]) -> RowChangeList {
        RowChangeListBuilder::new()
            .set_column(ColumnId(col), value)
            .build()
            .expect("build failed")
    }

    fn opts(upper: u64) -> RowIteratorOptions {
        RowIteratorOptions::new(
            MvccSnapshot::visible_before(Timestamp(upper)),
            std::sync::Arc::new(Schema::default()),
            IoContext::for_tablet("test"),
        )
    }

    fn write_file(dir: &TempDir, deltas: &[(u32, u64, RowChangeList)]) -> PathBuf {
        let path = dir.path().join("test.delta");
        let mut writer = DeltaFileWriter::create(&path).expect("create failed");
        for (row, ts, changes) in deltas {
            writer
                .append(DeltaKey::new(RowId(*row), Timestamp(*ts), 0), changes)
                .expect("append failed");
        }
        writer.finish().expect("finish failed");
        path
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().expect("tempdir failed");
        let deltas: Vec<(u32, u64, RowChangeList)> = (0..500)
            .map(|i| (i, 10 + i as u64, update_for(1, format!("value-{i}").as_bytes())))
            .collect();
        let path = write_file(&dir, &deltas);

        let reader = DeltaFileReader::open(&path, 1, None).expect("open failed");
        assert_eq!(reader.stats().delta_count, 500);
        assert_eq!(reader.stats().min_row, RowId(0));
        assert_eq!(reader.stats().max_row, RowId(499));
        assert_eq!(reader.stats().min_timestamp, Timestamp(10));

        // Re-read everything through the iterator and compare.
        let mut iter = reader.new_delta_iterator(&opts(u64::MAX)).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        iter.prepare_batch(500, PREPARE_FOR_COLLECT).unwrap();
        let mut out = vec![Vec::new(); 500];
        iter.collect_mutations(&mut out).unwrap();
        for (i, muts) in out.iter().enumerate() {
            assert_eq!(muts.len(), 1, "row {i}");
            assert_eq!(muts[0].timestamp, Timestamp(10 + i as u64));
            assert_eq!(muts[0].changes, deltas[i].2);
        }
        assert!(!iter.has_next());
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("bad.delta");
        let mut writer = DeltaFileWriter::create(&path).expect("create failed");
        writer
            .append(DeltaKey::new(RowId(5), Timestamp(1), 0), &update_for(1, b"x"))
            .unwrap();
        let err = writer
            .append(DeltaKey::new(RowId(4), Timestamp(1), 0), &update_for(1, b"y"))
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
        // Equal keys are rejected too.
        let err = writer
            .append(DeltaKey::new(RowId(5), Timestamp(1), 0), &update_for(1, b"z"))
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }

    #[test]
    fn test_append_after_finish_rejected() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("done.delta");
        let mut writer = DeltaFileWriter::create(&path).expect("create failed");
        writer
            .append(DeltaKey::new(RowId(0), Timestamp(1), 0), &update_for(1, b"x"))
            .unwrap();
        writer.finish().unwrap();
        assert!(matches!(
            writer.append(DeltaKey::new(RowId(1), Timestamp(1), 0), &update_for(1, b"y")),
            Err(Error::ReadOnly)
        ));
    }

    #[test]
    fn test_snapshot_exclusion() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = write_file(&dir, &[(0, 100, update_for(1, b"x"))]);
        let reader = DeltaFileReader::open(&path, 1, None).expect("open failed");

        let err = reader
            .clone()
            .new_delta_iterator(&opts(100))
            .err()
            .expect("expected NotFound");
        assert!(err.is_not_found());
        assert!(reader.new_delta_iterator(&opts(101)).is_ok());
    }

    #[test]
    fn test_check_row_deleted() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = write_file(
            &dir,
            &[
                (3, 5, update_for(1, b"x")),
                (3, 9, RowChangeList::delete()),
                (4, 2, update_for(1, b"y")),
            ],
        );
        let reader = DeltaFileReader::open(&path, 1, None).expect("open failed");
        let io = IoContext::for_tablet("test");

        let snap = MvccSnapshot::visible_before(Timestamp(100));
        assert!(reader.check_row_deleted(RowId(3), &io, &snap).unwrap());
        assert!(!reader.check_row_deleted(RowId(4), &io, &snap).unwrap());
        assert!(!reader.check_row_deleted(RowId(9), &io, &snap).unwrap());

        let old_snap = MvccSnapshot::visible_before(Timestamp(9));
        assert!(!reader.check_row_deleted(RowId(3), &io, &old_snap).unwrap());
    }

    #[test]
    fn test_apply_through_iterator_with_snapshot() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = write_file(
            &dir,
            &[
                (1, 5, update_for(7, b"old")),
                (1, 8, update_for(7, b"new")),
                (2, 50, update_for(7, b"future")),
            ],
        );
        let reader = DeltaFileReader::open(&path, 1, None).expect("open failed");

        let mut iter = reader.new_delta_iterator(&opts(10)).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(RowId(0)).unwrap();
        iter.prepare_batch(10, PREPARE_FOR_APPLY).unwrap();
        assert!(iter.may_have_deltas());

        let mut block = ColumnBlock::new(ColumnId(7), 10);
        let filter = SelectionVector::all_selected(10);
        iter.apply_updates(ColumnId(7), &mut block, &filter).unwrap();
        assert_eq!(block.cell(1), Some(&b"new"[..]));
        assert_eq!(block.cell(2), None); // ts=50 invisible at upper bound 10
    }

    #[test]
    fn test_blocks_flow_through_cache() {
        let dir = TempDir::new().expect("tempdir failed");
        // Enough deltas to span several 4 KiB blocks.
        let deltas: Vec<(u32, u64, RowChangeList)> = (0..2000)
            .map(|i| (i, 1, update_for(1, &[0u8; 32])))
            .collect();
        let path = write_file(&dir, &deltas);

        let cache: Arc<BlockCache> = Arc::new(Cache::new(64, None));
        let reader = DeltaFileReader::open(&path, 9, Some(cache.clone())).expect("open failed");
        let io = IoContext::for_tablet("test");
        let snap = MvccSnapshot::all_visible();

        reader.check_row_deleted(RowId(100), &io, &snap).unwrap();
        reader.check_row_deleted(RowId(100), &io, &snap).unwrap();
        let (hits, misses) = cache.stats();
        assert!(misses > 0, "expected cold misses");
        assert!(hits > 0, "expected warm hits on the second scan");
    }

    #[test]
    fn test_corrupt_block_detected() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = write_file(&dir, &[(0, 1, update_for(1, b"x"))]);

        // Flip a byte inside the first data block.
        let mut bytes = std::fs::read(&path).expect("read failed");
        bytes[6] ^= 0xff;
        std::fs::write(&path, &bytes).expect("write failed");

        let reader = DeltaFileReader::open(&path, 1, None).expect("open failed");
        let io = IoContext::for_tablet("test");
        let snap = MvccSnapshot::all_visible();
        let err = reader.check_row_deleted(RowId(0), &io, &snap).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)), "got {err:?}");
    }
}
