use std::collections::HashMap;
use std::fmt;

use super::{BinaryCursor, IndexEntry, Unit, Zoom};
use crate::error::Result;

/// Canonical chromosome-pair key of a matrix.
///
/// The lower chromosome index always comes first, so `(2, 1)` and `(1, 2)`
/// address the same matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatrixKey {
    chr1: u32,
    chr2: u32,
}
impl MatrixKey {
    #[must_use]
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            chr1: a.min(b),
            chr2: a.max(b),
        }
    }

    /// Parses the master-index form `<chr1>_<chr2>`
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (a, b) = key.split_once('_')?;
        Some(Self::new(a.parse().ok()?, b.parse().ok()?))
    }

    #[must_use]
    pub fn chr1(&self) -> u32 {
        self.chr1
    }

    #[must_use]
    pub fn chr2(&self) -> u32 {
        self.chr2
    }

    #[must_use]
    pub fn is_intra(&self) -> bool {
        self.chr1 == self.chr2
    }
}
impl fmt::Display for MatrixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.chr1, self.chr2)
    }
}

/// Block geometry and block index of one matrix at one resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ZoomMeta {
    pub zoom: Zoom,
    /// Sum of all counts at this resolution
    pub sum_counts: f32,
    /// Bins per block edge
    pub block_bin_count: u32,
    /// Blocks per row
    pub block_column_count: u32,
    /// Block number -> payload location
    pub block_index: HashMap<u32, IndexEntry>,
}
impl ZoomMeta {
    fn read<R: std::io::BufRead>(cursor: &mut BinaryCursor<R>) -> Result<Self> {
        let unit: Unit = cursor.read_string()?.parse()?;
        cursor.read_int()?; // legacy zoom index
        let sum_counts = cursor.read_float()?;
        // occupied-cell statistics, unused
        for _ in 0..3 {
            cursor.read_float()?;
        }
        let bin_size = cursor.read_count("bin size")?;
        let block_bin_count = cursor.read_count("block bin count")?;
        let block_column_count = cursor.read_count("block column count")?;

        let num_blocks = cursor.read_count("block count")?;
        let mut block_index = HashMap::with_capacity(num_blocks.min(1 << 16));
        for _ in 0..num_blocks {
            let block_number = cursor.read_count("block number")?;
            let entry = IndexEntry::read(cursor)?;
            block_index.insert(block_number as u32, entry);
        }

        Ok(Self {
            zoom: Zoom::new(unit, bin_size as u32),
            sum_counts,
            block_bin_count: block_bin_count as u32,
            block_column_count: block_column_count as u32,
            block_index,
        })
    }

    /// Stored block numbers in ascending order
    #[must_use]
    pub fn block_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.block_index.keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }
}

/// A matrix record as stored on disk: a chromosome pair and its resolutions
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRecord {
    /// Chromosome index on the X axis, as written
    pub chr1: i32,
    /// Chromosome index on the Y axis, as written
    pub chr2: i32,
    pub zooms: Vec<ZoomMeta>,
}
impl MatrixRecord {
    /// Decodes a matrix record read through a master-index entry
    pub fn decode(bytes: &[u8], position: u64) -> Result<Self> {
        let mut cursor = BinaryCursor::with_position(bytes, position);
        let chr1 = cursor.read_int()?;
        let chr2 = cursor.read_int()?;
        let num_resolutions = cursor.read_count("resolution count")?;
        let zooms = (0..num_resolutions)
            .map(|_| ZoomMeta::read(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chr1, chr2, zooms })
    }
}
