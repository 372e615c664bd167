//! # hicseek
//!
//! A random-access reader for `.hic` contact-matrix files: a symmetric,
//! chromosome-pair indexed sparse matrix stored as compressed square blocks at
//! multiple resolutions.
//!
//! The reader decodes the header and footer once at [`open`], then serves
//! matrices, resolution levels and contact records lazily. Range queries fetch
//! the covering blocks concurrently, apply per-chromosome normalization vectors
//! and cache the decoded blocks in a small LRU.
//!
//! ```no_run
//! use hicseek::{BinRegion, NormalizationType, Unit, Zoom};
//!
//! fn main() -> hicseek::Result<()> {
//!     let dataset = hicseek::open("./data/sample.hic")?;
//!     let chr1 = dataset.chromosome("1").expect("chromosome 1");
//!     if let Some(matrix) = dataset.get_matrix(chr1, chr1) {
//!         if let Some(zd) = matrix.zoom_data(&Zoom::new(Unit::Bp, 1_000_000)) {
//!             let region = BinRegion::new(0, 10, 0, 10);
//!             for record in zd.normalized_records(&region, &NormalizationType::Kr)? {
//!                 println!("{}\t{}\t{}", record.bin_x, record.bin_y, record.count);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod cache;
mod config;
mod core;
mod dataset;
pub mod error;
mod parallel;
mod zoom;

#[cfg(test)]
mod testing;

use std::path::Path;

pub use crate::cache::{BlockCache, BoundedCache, CacheKey};
pub use crate::config::ReaderConfig;
pub use crate::core::{
    BinaryCursor, Block, BlockCodec, BlockLayout, ByteSource, Chromosome, ContactRecord,
    ExpectedValueFunction, FileHeader, Footer, FragmentSiteEntry, IndexEntry, MatrixKey,
    MatrixRecord, MmapSource, NormVectorKey, NormalizationStore, NormalizationType,
    NormalizationVector, SeekableSource, SourceReader, Unit, Zoom, ZoomMeta,
};
pub use crate::dataset::{Dataset, Matrix};
pub use crate::parallel::fork_join;
pub use error::{Error, Result};
pub use zoom::{BinRegion, ContactRecordIter, MatrixZoomData};

/// Null-terminated magic string at the start of every file
pub const FILE_MAGIC: &[u8; 4] = b"HIC\0";

/// Lowest format version this reader understands
pub const MIN_SUPPORTED_VERSION: i32 = 1;

/// Highest format version this reader understands
pub const MAX_SUPPORTED_VERSION: i32 = 8;

/// Number of decoded blocks kept by the block cache
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 20;

/// Name of the whole-genome pseudo-chromosome
pub const CHR_ALL: &str = "All";

/// Opens a `.hic` file with the default [`ReaderConfig`].
pub fn open<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    Dataset::open(path)
}
