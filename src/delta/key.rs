//! Delta keys and their order-preserving encoding.
//!
//! A delta key addresses one mutation: the row it applies to, the commit
//! timestamp, and a disambiguator that separates mutations landing on the
//! same `(row, timestamp)` pair (e.g. one batch updating a row twice).
//!
//! Keys are stored in the delta memstore's ordered map as byte strings, so
//! the encoding must sort byte-wise exactly as the logical key sorts:
//! row ascending, timestamp ascending, disambiguator ascending. All fields
//! are fixed-width big-endian, which preserves that order.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::types::{RowId, Timestamp};

/// Encoded size: u32 row + u64 timestamp + u32 disambiguator.
pub const ENCODED_KEY_LEN: usize = 16;

/// Key of a single row mutation. The derived ordering is the REDO
/// (forward-in-time) ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeltaKey {
    pub row: RowId,
    pub timestamp: Timestamp,
    pub disambiguator: u32,
}

impl DeltaKey {
    pub fn new(row: RowId, timestamp: Timestamp, disambiguator: u32) -> Self {
        Self {
            row,
            timestamp,
            disambiguator,
        }
    }

    /// The smallest possible key for `row`: seek target for row-scoped
    /// scans.
    pub fn lower_bound(row: RowId) -> Self {
        Self::new(row, Timestamp::MIN, 0)
    }

    pub fn encode(&self) -> [u8; ENCODED_KEY_LEN] {
        let mut buf = [0u8; ENCODED_KEY_LEN];
        BigEndian::write_u32(&mut buf[0..4], self.row.0);
        BigEndian::write_u64(&mut buf[4..12], self.timestamp.0);
        BigEndian::write_u32(&mut buf[12..16], self.disambiguator);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENCODED_KEY_LEN {
            return Err(Error::Corruption(format!(
                "delta key must be {} bytes, got {}",
                ENCODED_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            row: RowId(BigEndian::read_u32(&bytes[0..4])),
            timestamp: Timestamp(BigEndian::read_u64(&bytes[4..12])),
            disambiguator: BigEndian::read_u32(&bytes[12..16]),
        })
    }
}

impl fmt::Display for DeltaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(row {} @ ts {} #{})",
            self.row, self.timestamp, self.disambiguator
        )
    }
}
