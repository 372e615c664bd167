//! Per-resolution access to one matrix: block numbering and range queries

use std::collections::BTreeSet;
use std::sync::Arc;

use log::warn;

use crate::cache::CacheKey;
use crate::core::{
    Block, Chromosome, ContactRecord, ExpectedValueFunction, MatrixKey, NormalizationType,
    NormalizationVector, Zoom, ZoomMeta,
};
use crate::dataset::Shared;
use crate::error::{BlockFailure, QueryError, Result};
use crate::parallel::fork_join;

/// A rectangle of bins, bounds inclusive on both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinRegion {
    pub x_start: i32,
    pub x_end: i32,
    pub y_start: i32,
    pub y_end: i32,
}
impl BinRegion {
    #[must_use]
    pub fn new(x_start: i32, x_end: i32, y_start: i32, y_end: i32) -> Self {
        Self {
            x_start,
            x_end,
            y_start,
            y_end,
        }
    }

    /// Converts genomic coordinates to the bins containing them
    #[must_use]
    pub fn from_genome(x_start: u32, x_end: u32, y_start: u32, y_end: u32, bin_size: u32) -> Self {
        let bin = |pos: u32| (pos / bin_size.max(1)) as i32;
        Self::new(bin(x_start), bin(x_end), bin(y_start), bin(y_end))
    }

    /// The region mirrored across the diagonal
    #[must_use]
    pub fn transpose(&self) -> Self {
        Self::new(self.y_start, self.y_end, self.x_start, self.x_end)
    }

    #[must_use]
    pub fn contains(&self, bin_x: i32, bin_y: i32) -> bool {
        (self.x_start..=self.x_end).contains(&bin_x) && (self.y_start..=self.y_end).contains(&bin_y)
    }
}

type FactorPair = (Arc<NormalizationVector>, Arc<NormalizationVector>);

/// One matrix at one resolution.
///
/// Intrachromosomal matrices store only the `bin_x <= bin_y` triangle, so
/// region lookups on them also cover the transposed region.
pub struct MatrixZoomData {
    key: MatrixKey,
    chr1: Chromosome,
    chr2: Chromosome,
    meta: ZoomMeta,
    shared: Arc<Shared>,
}
impl MatrixZoomData {
    pub(crate) fn new(
        key: MatrixKey,
        chr1: Chromosome,
        chr2: Chromosome,
        meta: ZoomMeta,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            key,
            chr1,
            chr2,
            meta,
            shared,
        }
    }

    #[must_use]
    pub fn key(&self) -> MatrixKey {
        self.key
    }

    #[must_use]
    pub fn zoom(&self) -> Zoom {
        self.meta.zoom
    }

    /// Chromosome on the X axis
    #[must_use]
    pub fn chr1(&self) -> &Chromosome {
        &self.chr1
    }

    /// Chromosome on the Y axis
    #[must_use]
    pub fn chr2(&self) -> &Chromosome {
        &self.chr2
    }

    #[must_use]
    pub fn is_intra(&self) -> bool {
        self.key.is_intra()
    }

    #[must_use]
    pub fn meta(&self) -> &ZoomMeta {
        &self.meta
    }

    #[must_use]
    pub fn block_bin_count(&self) -> u32 {
        self.meta.block_bin_count
    }

    #[must_use]
    pub fn block_column_count(&self) -> u32 {
        self.meta.block_column_count
    }

    #[must_use]
    pub fn sum_counts(&self) -> f32 {
        self.meta.sum_counts
    }

    /// Number of the block holding the cell `(bin_x, bin_y)`, or `None` when
    /// the cell lies outside the matrix
    #[must_use]
    pub fn block_number(&self, bin_x: i32, bin_y: i32) -> Option<u32> {
        let bbc = self.meta.block_bin_count.max(1);
        let col = u32::try_from(bin_x).ok()? / bbc;
        let row = u32::try_from(bin_y).ok()? / bbc;
        if col >= self.meta.block_column_count || row > self.last_row() {
            return None;
        }
        row.checked_mul(self.meta.block_column_count)?.checked_add(col)
    }

    /// Last block row that can hold data: the end of the Y chromosome, or
    /// the row of the highest stored block if that lies further out
    fn last_row(&self) -> u32 {
        let bbc = self.meta.block_bin_count.max(1);
        let chr_rows = self.chr2.bin_count(self.meta.zoom.bin_size).saturating_sub(1) / bbc;
        let stored_rows = self
            .meta
            .block_index
            .keys()
            .max()
            .map_or(0, |&number| number / self.meta.block_column_count.max(1));
        chr_rows.max(stored_rows)
    }

    /// Every stored block number, ascending
    #[must_use]
    pub fn block_numbers(&self) -> Vec<u32> {
        self.meta.block_numbers()
    }

    /// Block numbers covering `region`, ascending.
    ///
    /// Numbers of blocks that hold no data are included; they load as empty.
    #[must_use]
    pub fn block_numbers_for_region(&self, region: &BinRegion) -> Vec<u32> {
        let mut numbers = BTreeSet::new();
        self.collect_block_numbers(region, &mut numbers);
        if self.is_intra() {
            self.collect_block_numbers(&region.transpose(), &mut numbers);
        }
        numbers.into_iter().collect()
    }

    /// Block numbers covering a region given in genomic coordinates
    #[must_use]
    pub fn block_numbers_for_genome_region(
        &self,
        x_start: u32,
        x_end: u32,
        y_start: u32,
        y_end: u32,
    ) -> Vec<u32> {
        let region = BinRegion::from_genome(x_start, x_end, y_start, y_end, self.meta.zoom.bin_size);
        self.block_numbers_for_region(&region)
    }

    fn collect_block_numbers(&self, region: &BinRegion, numbers: &mut BTreeSet<u32>) {
        if region.x_end < region.x_start || region.y_end < region.y_start {
            return;
        }
        let bbc = self.meta.block_bin_count.max(1);
        let cols = self.meta.block_column_count;
        let col_start = region.x_start.max(0) as u32 / bbc;
        let col_end = (region.x_end.max(0) as u32 / bbc).min(cols.saturating_sub(1));
        let row_start = region.y_start.max(0) as u32 / bbc;
        let row_end = (region.y_end.max(0) as u32 / bbc).min(self.last_row());
        if cols == 0 || col_start > col_end || row_start > row_end {
            return;
        }
        for row in row_start..=row_end {
            for col in col_start..=col_end {
                if let Some(number) = row.checked_mul(cols).and_then(|n| n.checked_add(col)) {
                    numbers.insert(number);
                }
            }
        }
    }

    fn cache_key(&self, block_number: u32, norm: &NormalizationType) -> CacheKey {
        CacheKey::new(self.key, self.meta.zoom, block_number, norm.clone())
    }

    /// Reads and decodes one raw block without touching the cache.
    ///
    /// A block number absent from the index yields an empty block.
    pub fn read_block(&self, block_number: u32) -> Result<Arc<Block>> {
        let Some(entry) = self.meta.block_index.get(&block_number) else {
            return Ok(Arc::new(Block::empty(block_number)));
        };
        let compressed = self
            .shared
            .source
            .read_at(entry.position, entry.size as usize)?;
        let block = self.shared.codec.decode(block_number, &compressed)?;
        Ok(Arc::new(block))
    }

    /// Resolves the X and Y normalization vectors, `None` for raw counts
    fn factors(&self, norm: &NormalizationType) -> Result<Option<FactorPair>> {
        if norm.is_none() {
            return Ok(None);
        }
        let store = &self.shared.normalization;
        let source = self.shared.source.as_ref();
        let x = store.require(source, norm, self.chr1.index, self.meta.zoom)?;
        let y = store.require(source, norm, self.chr2.index, self.meta.zoom)?;
        Ok(Some((x, y)))
    }

    fn fetch_block(
        &self,
        block_number: u32,
        norm: &NormalizationType,
        factors: Option<&FactorPair>,
    ) -> Result<Arc<Block>> {
        let raw = self.read_block(block_number)?;
        let block = match factors {
            Some((x, y)) => Arc::new(raw.normalized(x, y)),
            None => raw,
        };
        self.shared
            .block_cache
            .put(self.cache_key(block_number, norm), block.clone());
        Ok(block)
    }

    /// Reads one block with `norm` applied, through the cache
    pub fn read_normalized_block(
        &self,
        block_number: u32,
        norm: &NormalizationType,
    ) -> Result<Arc<Block>> {
        let mut blocks = self.normalized_blocks(&[block_number], norm)?;
        Ok(blocks.pop().unwrap_or_else(|| Arc::new(Block::empty(block_number))))
    }

    /// Loads the given blocks with `norm` applied, in ascending block order.
    ///
    /// Blocks missing from the cache are fetched concurrently. If any of them
    /// fails the whole call fails with [`QueryError::BlockFailures`].
    pub fn normalized_blocks(
        &self,
        block_numbers: &[u32],
        norm: &NormalizationType,
    ) -> Result<Vec<Arc<Block>>> {
        let mut blocks = Vec::with_capacity(block_numbers.len());
        let mut missing = Vec::new();
        for &number in block_numbers {
            match self.shared.block_cache.get(&self.cache_key(number, norm)) {
                Some(block) => blocks.push(block),
                None => missing.push(number),
            }
        }

        if !missing.is_empty() {
            let factors = self.factors(norm)?;
            let results = fork_join(&missing, self.shared.num_threads(), |&number| {
                self.fetch_block(number, norm, factors.as_ref())
            });

            let mut failures = Vec::new();
            for (&block_number, result) in missing.iter().zip(results) {
                match result {
                    Ok(block) => blocks.push(block),
                    Err(e) => {
                        warn!(
                            "Failed to load block {block_number} of matrix {} at {}: {e}",
                            self.key, self.meta.zoom
                        );
                        failures.push(BlockFailure {
                            block_number,
                            message: e.to_string(),
                        });
                    }
                }
            }
            if !failures.is_empty() {
                return Err(QueryError::BlockFailures(failures).into());
            }
        }

        blocks.sort_by_key(|block| block.number());
        Ok(blocks)
    }

    /// Blocks covering `region` with `norm` applied
    pub fn normalized_blocks_for_region(
        &self,
        region: &BinRegion,
        norm: &NormalizationType,
    ) -> Result<Vec<Arc<Block>>> {
        self.normalized_blocks(&self.block_numbers_for_region(region), norm)
    }

    /// Every record of the blocks covering `region`, with `norm` applied.
    ///
    /// Records are block-granular: cells of a covering block that fall
    /// outside the region are included. See [`Self::region_records`] for an
    /// exact cut.
    pub fn normalized_records(
        &self,
        region: &BinRegion,
        norm: &NormalizationType,
    ) -> Result<Vec<ContactRecord>> {
        Ok(self
            .normalized_blocks_for_region(region, norm)?
            .iter()
            .flat_map(|block| block.records().iter().copied())
            .collect())
    }

    /// Records inside `region` (or, for intrachromosomal matrices, inside its
    /// transpose), with `norm` applied, in stored coordinates
    pub fn region_records(
        &self,
        region: &BinRegion,
        norm: &NormalizationType,
    ) -> Result<Vec<ContactRecord>> {
        let transposed = region.transpose();
        let intra = self.is_intra();
        Ok(self
            .normalized_records(region, norm)?
            .into_iter()
            .filter(|r| {
                region.contains(r.bin_x, r.bin_y) || (intra && transposed.contains(r.bin_x, r.bin_y))
            })
            .collect())
    }

    /// Value of a single cell, `0.0` when nothing is stored there
    pub fn observed_value(&self, bin_x: i32, bin_y: i32, norm: &NormalizationType) -> Result<f32> {
        let (bin_x, bin_y) = if self.is_intra() && bin_x > bin_y {
            (bin_y, bin_x)
        } else {
            (bin_x, bin_y)
        };
        let Some(number) = self.block_number(bin_x, bin_y) else {
            return Ok(0.0);
        };
        let block = self.read_normalized_block(number, norm)?;
        Ok(block
            .records()
            .iter()
            .find(|r| r.bin_x == bin_x && r.bin_y == bin_y)
            .map_or(0.0, |r| r.count))
    }

    /// Observed over expected ratio of a record at its diagonal distance
    #[must_use]
    pub fn observed_over_expected(&self, record: &ContactRecord, expected: &ExpectedValueFunction) -> f64 {
        f64::from(record.count) / expected.expected_value(self.chr1.index, record.distance())
    }

    /// Lazy single-pass iterator over every raw record, block by block in
    /// ascending block order
    #[must_use]
    pub fn iter(&self) -> ContactRecordIter<'_> {
        ContactRecordIter {
            zoom_data: self,
            block_numbers: self.block_numbers(),
            next_block: 0,
            current: None,
            position: 0,
            finished: false,
        }
    }
}
impl<'a> IntoIterator for &'a MatrixZoomData {
    type Item = Result<ContactRecord>;
    type IntoIter = ContactRecordIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`MatrixZoomData::iter`].
///
/// Cached raw blocks are reused, but blocks read here are not added to the
/// cache. The iterator stops after yielding the first error.
pub struct ContactRecordIter<'a> {
    zoom_data: &'a MatrixZoomData,
    block_numbers: Vec<u32>,
    next_block: usize,
    current: Option<Arc<Block>>,
    position: usize,
    finished: bool,
}
impl ContactRecordIter<'_> {
    fn load_next_block(&mut self) -> Result<bool> {
        let Some(&number) = self.block_numbers.get(self.next_block) else {
            return Ok(false);
        };
        self.next_block += 1;
        let zd = self.zoom_data;
        let cached = zd
            .shared
            .block_cache
            .get(&zd.cache_key(number, &NormalizationType::None));
        let block = match cached {
            Some(block) => block,
            None => zd.read_block(number)?,
        };
        self.current = Some(block);
        self.position = 0;
        Ok(true)
    }
}
impl Iterator for ContactRecordIter<'_> {
    type Item = Result<ContactRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(block) = &self.current {
                if let Some(record) = block.records().get(self.position) {
                    self.position += 1;
                    return Some(Ok(*record));
                }
            }
            match self.load_next_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
impl std::iter::FusedIterator for ContactRecordIter<'_> {}
