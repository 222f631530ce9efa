//! Row change lists.
//!
//! A change list is the wire form of one mutation against one row: either
//! a set of column updates or a delete marker. It is treated as an opaque,
//! immutable blob once built; readers decode it on the apply path.
//!
//! Layout:
//!
//! ```text
//! +--------+------------------------------------------+
//! | tag:u8 | updates (UPDATE only)                    |
//! +--------+------------------------------------------+
//!
//! update:  col_id:u32 | value_len:u32 | value bytes
//! ```
//!
//! All integers big-endian. A DELETE is the tag alone.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{Error, Result};
use crate::types::ColumnId;

const TAG_UPDATE: u8 = 1;
const TAG_DELETE: u8 = 2;

/// An opaque encoded mutation: column updates or a delete marker.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RowChangeList(Vec<u8>);

impl RowChangeList {
    /// Wrap already-encoded bytes; validates the structure.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self> {
        let list = Self(bytes);
        list.decode()?;
        Ok(list)
    }

    /// A delete marker.
    pub fn delete() -> Self {
        Self(vec![TAG_DELETE])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this change list encodes a delete, without a full decode.
    pub fn is_delete(&self) -> bool {
        self.0.first() == Some(&TAG_DELETE)
    }

    pub fn decode(&self) -> Result<DecodedChanges> {
        let Some((&tag, mut rest)) = self.0.split_first() else {
            return Err(Error::Corruption("empty row change list".to_string()));
        };
        match tag {
            TAG_DELETE => {
                if !rest.is_empty() {
                    return Err(Error::Corruption(
                        "trailing bytes after delete marker".to_string(),
                    ));
                }
                Ok(DecodedChanges::Delete)
            }
            TAG_UPDATE => {
                let mut updates = Vec::new();
                while !rest.is_empty() {
                    if rest.len() < 8 {
                        return Err(Error::Corruption(format!(
                            "truncated column update header: {} bytes left",
                            rest.len()
                        )));
                    }
                    let col = ColumnId(BigEndian::read_u32(&rest[0..4]));
                    let len = BigEndian::read_u32(&rest[4..8]) as usize;
                    rest = &rest[8..];
                    if rest.len() < len {
                        return Err(Error::Corruption(format!(
                            "column {} update claims {} value bytes, {} left",
                            col,
                            len,
                            rest.len()
                        )));
                    }
                    updates.push(ColumnUpdate {
                        column: col,
                        value: rest[..len].to_vec(),
                    });
                    rest = &rest[len..];
                }
                if updates.is_empty() {
                    return Err(Error::Corruption("update list with no columns".to_string()));
                }
                Ok(DecodedChanges::Update(updates))
            }
            other => Err(Error::Corruption(format!(
                "unknown row change tag {other}"
            ))),
        }
    }

    /// Whether this mutation touches any of `col_ids`. Deletes affect every
    /// column.
    pub fn affects_columns(&self, col_ids: &[ColumnId]) -> Result<bool> {
        match self.decode()? {
            DecodedChanges::Delete => Ok(true),
            DecodedChanges::Update(updates) => {
                Ok(updates.iter().any(|u| col_ids.contains(&u.column)))
            }
        }
    }
}

impl fmt::Debug for RowChangeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(DecodedChanges::Delete) => write!(f, "DELETE"),
            Ok(DecodedChanges::Update(updates)) => {
                write!(f, "SET ")?;
                for (i, u) in updates.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "col{}=<{} bytes>", u.column, u.value.len())?;
                }
                Ok(())
            }
            Err(_) => write!(f, "<malformed change list, {} bytes>", self.0.len()),
        }
    }
}

/// One decoded column assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub column: ColumnId,
    pub value: Vec<u8>,
}

/// Decoded form of a change list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedChanges {
    Update(Vec<ColumnUpdate>),
    Delete,
}

/// Accumulates column updates into an encoded change list.
#[derive(Default)]
pub struct RowChangeListBuilder {
    buf: Vec<u8>,
}

impl RowChangeListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_column(mut self, column: ColumnId, value: &[u8]) -> Self {
        if self.buf.is_empty() {
            self.buf.push(TAG_UPDATE);
        }
        self.buf.write_u32::<BigEndian>(column.0).unwrap();
        self.buf.write_u32::<BigEndian>(value.len() as u32).unwrap();
        self.buf.extend_from_slice(value);
        self
    }

    pub fn build(self) -> Result<RowChangeList> {
        if self.buf.is_empty() {
            return Err(Error::InvalidArgument(
                "change list must set at least one column".to_string(),
            ));
        }
        Ok(RowChangeList(self.buf))
    }
}
