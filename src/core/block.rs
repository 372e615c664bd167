use std::io::Read;

use flate2::read::ZlibDecoder;

use super::{BinaryCursor, NormalizationVector};
use crate::error::{BlockError, Result};

/// Upper bound on records preallocated from an untrusted count
const MAX_PREALLOC_RECORDS: usize = 1 << 16;

/// Sentinel marking an empty cell in a short-count dense grid
const EMPTY_SHORT_CELL: i16 = i16::MIN;

/// One non-zero cell of a contact matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactRecord {
    /// Bin on the X axis (first chromosome)
    pub bin_x: i32,
    /// Bin on the Y axis (second chromosome)
    pub bin_y: i32,
    pub count: f32,
}
impl ContactRecord {
    #[must_use]
    pub fn new(bin_x: i32, bin_y: i32, count: f32) -> Self {
        Self {
            bin_x,
            bin_y,
            count,
        }
    }

    /// Distance from the diagonal in bins
    #[must_use]
    pub fn distance(&self) -> usize {
        (i64::from(self.bin_y) - i64::from(self.bin_x)).unsigned_abs() as usize
    }

    /// The same cell mirrored across the diagonal
    #[must_use]
    pub fn transposed(&self) -> Self {
        Self::new(self.bin_y, self.bin_x, self.count)
    }
}

/// A decoded tile of contact records.
///
/// Blocks are immutable once decoded and shared through the block cache.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    number: u32,
    records: Vec<ContactRecord>,
}
impl Block {
    #[must_use]
    pub fn new(number: u32, records: Vec<ContactRecord>) -> Self {
        Self { number, records }
    }

    /// A block with no records, used for block numbers absent from the index
    #[must_use]
    pub fn empty(number: u32) -> Self {
        Self::new(number, Vec::new())
    }

    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub fn records(&self) -> &[ContactRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Applies per-bin factors: `count / (x_factors[bin_x] * y_factors[bin_y])`.
    ///
    /// Cells whose factors are missing, zero or non-finite become `NaN`.
    #[must_use]
    pub fn normalized(&self, x_factors: &NormalizationVector, y_factors: &NormalizationVector) -> Self {
        let records = self
            .records
            .iter()
            .map(|record| {
                let fx = x_factors.factor(record.bin_x);
                let fy = y_factors.factor(record.bin_y);
                let count = if fx.is_finite() && fy.is_finite() && fx != 0.0 && fy != 0.0 {
                    (f64::from(record.count) / (fx * fy)) as f32
                } else {
                    f32::NAN
                };
                ContactRecord::new(record.bin_x, record.bin_y, count)
            })
            .collect();
        Self::new(self.number, records)
    }
}

/// Record layout inside a decompressed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLayout {
    /// Versions before 7: a flat list of `(int32, int32, float32)` triples
    Flat,
    /// Version 7 and later: offset-relative rows or a dense grid
    Packed,
}
impl BlockLayout {
    #[must_use]
    pub fn for_version(version: i32) -> Self {
        if version < 7 {
            Self::Flat
        } else {
            Self::Packed
        }
    }
}

/// Encoding type byte of a packed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackedEncoding {
    Rows,
    Grid,
}
impl PackedEncoding {
    fn from_byte(block: u32, byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Rows),
            2 => Ok(Self::Grid),
            encoding => Err(BlockError::UnknownEncoding { block, encoding }.into()),
        }
    }
}

/// Inflates and decodes compressed block payloads
#[derive(Debug, Clone, Copy)]
pub struct BlockCodec {
    layout: BlockLayout,
}
impl BlockCodec {
    #[must_use]
    pub fn new(layout: BlockLayout) -> Self {
        Self { layout }
    }

    #[must_use]
    pub fn for_version(version: i32) -> Self {
        Self::new(BlockLayout::for_version(version))
    }

    #[must_use]
    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    /// Decodes the zlib-compressed payload of block `number`
    pub fn decode(&self, number: u32, compressed: &[u8]) -> Result<Block> {
        let payload = inflate(number, compressed)?;
        let mut cursor = BinaryCursor::new(payload.as_slice());
        let records = match self.layout {
            BlockLayout::Flat => decode_flat(&mut cursor)?,
            BlockLayout::Packed => decode_packed(number, &mut cursor)?,
        };
        Ok(Block::new(number, records))
    }
}

fn inflate(number: u32, compressed: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(compressed.len() * 4);
    ZlibDecoder::new(compressed)
        .read_to_end(&mut payload)
        .map_err(|source| BlockError::Decompression {
            block: number,
            source,
        })?;
    Ok(payload)
}

fn decode_flat(cursor: &mut BinaryCursor<&[u8]>) -> Result<Vec<ContactRecord>> {
    let num_records = cursor.read_count("block record count")?;
    let mut records = Vec::with_capacity(num_records.min(MAX_PREALLOC_RECORDS));
    for _ in 0..num_records {
        let bin_x = cursor.read_int()?;
        let bin_y = cursor.read_int()?;
        let count = cursor.read_float()?;
        records.push(ContactRecord::new(bin_x, bin_y, count));
    }
    Ok(records)
}

/// Adds a stored delta to a block offset, rejecting bins outside `i32`
fn offset_bin(number: u32, offset: i32, delta: i32) -> Result<i32> {
    offset.checked_add(delta).ok_or_else(|| {
        BlockError::Malformed {
            block: number,
            reason: "bin offset overflows",
        }
        .into()
    })
}

fn decode_packed(number: u32, cursor: &mut BinaryCursor<&[u8]>) -> Result<Vec<ContactRecord>> {
    let num_records = cursor.read_count("block record count")?;
    let x_offset = cursor.read_int()?;
    let y_offset = cursor.read_int()?;
    let short_counts = cursor.read_byte()? == 0;
    let encoding = PackedEncoding::from_byte(number, cursor.read_byte()?)?;

    let mut records = Vec::with_capacity(num_records.min(MAX_PREALLOC_RECORDS));
    match encoding {
        PackedEncoding::Rows => {
            let num_rows = cursor.read_short()?;
            for _ in 0..num_rows {
                let bin_y = offset_bin(number, y_offset, i32::from(cursor.read_short()?))?;
                let num_cols = cursor.read_short()?;
                for _ in 0..num_cols {
                    let bin_x = offset_bin(number, x_offset, i32::from(cursor.read_short()?))?;
                    let count = if short_counts {
                        f32::from(cursor.read_short()?)
                    } else {
                        cursor.read_float()?
                    };
                    records.push(ContactRecord::new(bin_x, bin_y, count));
                }
            }
        }
        PackedEncoding::Grid => {
            let num_points = cursor.read_count("grid point count")?;
            let width = i32::from(cursor.read_short()?);
            if width <= 0 && num_points > 0 {
                return Err(BlockError::Malformed {
                    block: number,
                    reason: "dense grid has non-positive width",
                }
                .into());
            }
            for i in 0..num_points as i32 {
                let row = i / width;
                let col = i % width;
                let count = if short_counts {
                    let value = cursor.read_short()?;
                    if value == EMPTY_SHORT_CELL {
                        continue;
                    }
                    f32::from(value)
                } else {
                    let value = cursor.read_float()?;
                    if value.is_nan() {
                        continue;
                    }
                    value
                };
                records.push(ContactRecord::new(
                    offset_bin(number, x_offset, col)?,
                    offset_bin(number, y_offset, row)?,
                    count,
                ));
            }
        }
    }
    Ok(records)
}
