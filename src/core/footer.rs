use std::collections::HashMap;

use log::info;

use super::{
    BinaryCursor, ByteSource, MatrixKey, NormVectorKey, NormalizationType, SourceReader, Unit,
    Zoom,
};
use crate::error::{HeaderError, Result};

/// A byte range in the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    /// Absolute file offset
    pub position: u64,
    /// Number of bytes
    pub size: u32,
}
impl IndexEntry {
    #[must_use]
    pub fn new(position: u64, size: u32) -> Self {
        Self { position, size }
    }

    pub(crate) fn read<R: std::io::BufRead>(cursor: &mut BinaryCursor<R>) -> Result<Self> {
        let position = cursor.read_offset("index entry position")?;
        let size = cursor.read_count("index entry size")?;
        Ok(Self::new(position, size as u32))
    }
}

/// Expected contact count as a function of diagonal distance.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedValueFunction {
    pub norm: NormalizationType,
    pub zoom: Zoom,
    /// Genome-wide expected value per distance in bins
    pub values: Vec<f64>,
    /// Per-chromosome divisors applied on top of `values`
    pub norm_factors: HashMap<u32, f64>,
}
impl ExpectedValueFunction {
    /// Expected count for `chr_index` at `distance` bins off the diagonal.
    ///
    /// Distances past the end of the table use the last value. Returns `NaN`
    /// for an empty table.
    #[must_use]
    pub fn expected_value(&self, chr_index: u32, distance: usize) -> f64 {
        let Some(last) = self.values.len().checked_sub(1) else {
            return f64::NAN;
        };
        let factor = self.norm_factors.get(&chr_index).copied().unwrap_or(1.0);
        self.values[distance.min(last)] / factor
    }

    fn read<R: std::io::BufRead>(
        cursor: &mut BinaryCursor<R>,
        norm: NormalizationType,
    ) -> Result<Self> {
        let unit: Unit = cursor.read_string()?.parse()?;
        let bin_size = cursor.read_count("expected value bin size")?;

        let num_values = cursor.read_count("expected value count")?;
        let mut values = Vec::with_capacity(num_values.min(1 << 20));
        for _ in 0..num_values {
            values.push(cursor.read_double()?);
        }

        let num_factors = cursor.read_count("normalization factor count")?;
        let mut norm_factors = HashMap::with_capacity(num_factors.min(4096));
        for _ in 0..num_factors {
            let chr_index = cursor.read_count("normalization factor chromosome")?;
            let factor = cursor.read_double()?;
            norm_factors.insert(chr_index as u32, factor);
        }

        Ok(Self {
            norm,
            zoom: Zoom::new(unit, bin_size as u32),
            values,
            norm_factors,
        })
    }
}

/// The decoded footer: master index, expected values and the
/// normalization-vector index.
#[derive(Debug, Clone, Default)]
pub struct Footer {
    /// Chromosome pair -> matrix record location
    pub master_index: HashMap<MatrixKey, IndexEntry>,
    /// `(zoom, normalization)` -> expected-value function
    pub expected_values: HashMap<(Zoom, NormalizationType), ExpectedValueFunction>,
    /// Stored normalization vectors
    pub norm_vector_index: HashMap<NormVectorKey, IndexEntry>,
    /// Normalization types with at least one stored vector, in file order
    pub normalization_types: Vec<NormalizationType>,
}
impl Footer {
    /// Decodes the footer located at `position`.
    ///
    /// For version 6 and later an end of file right after the length-prefixed
    /// section means the file carries no normalization data.
    pub fn read<S: ByteSource + ?Sized>(source: &S, position: u64, version: i32) -> Result<Self> {
        let mut footer = Self::default();

        // the v5-compatible section is length-prefixed and read in one go
        let prefix = source.read_at(position, 4)?;
        let num_bytes = BinaryCursor::with_position(prefix.as_slice(), position)
            .read_count("footer size")?;
        let section_start = position + 4;
        let section = source.read_at(section_start, num_bytes)?;
        let mut cursor = BinaryCursor::with_position(section.as_slice(), section_start);

        let num_entries = cursor.read_count("master index size")?;
        for _ in 0..num_entries {
            let key = cursor.read_string()?;
            let entry = IndexEntry::read(&mut cursor)?;
            let key = MatrixKey::parse(&key).ok_or(HeaderError::InvalidMatrixKey(key))?;
            footer.master_index.insert(key, entry);
        }

        let num_expected = cursor.read_count("expected value table size")?;
        for _ in 0..num_expected {
            let function = ExpectedValueFunction::read(&mut cursor, NormalizationType::None)?;
            footer
                .expected_values
                .insert((function.zoom, function.norm.clone()), function);
        }

        if version < 6 {
            return Ok(footer);
        }

        let normalized_start = section_start + num_bytes as u64;
        let mut cursor = BinaryCursor::with_position(
            SourceReader::new(source, normalized_start).buffered(),
            normalized_start,
        );
        let num_expected = match cursor.read_count("normalized expected value table size") {
            Ok(n) => n,
            Err(e) if e.is_truncation() => {
                info!("No normalization vectors");
                return Ok(footer);
            }
            Err(e) => return Err(e),
        };
        for _ in 0..num_expected {
            let norm = NormalizationType::from(cursor.read_string()?);
            let function = ExpectedValueFunction::read(&mut cursor, norm)?;
            footer
                .expected_values
                .insert((function.zoom, function.norm.clone()), function);
        }

        let num_vectors = cursor.read_count("normalization vector index size")?;
        for _ in 0..num_vectors {
            let norm = NormalizationType::from(cursor.read_string()?);
            let chr_index = cursor.read_count("normalization vector chromosome")?;
            let unit: Unit = cursor.read_string()?.parse()?;
            let bin_size = cursor.read_count("normalization vector resolution")?;
            let entry = IndexEntry::read(&mut cursor)?;

            if !footer.normalization_types.contains(&norm) {
                footer.normalization_types.push(norm.clone());
            }
            let key = NormVectorKey::new(norm, chr_index as u32, Zoom::new(unit, bin_size as u32));
            footer.norm_vector_index.insert(key, entry);
        }

        Ok(footer)
    }

    /// Expected-value function for `zoom` under `norm`
    #[must_use]
    pub fn expected(&self, zoom: Zoom, norm: &NormalizationType) -> Option<&ExpectedValueFunction> {
        self.expected_values.get(&(zoom, norm.clone()))
    }
}
