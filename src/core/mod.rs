mod block;
mod cursor;
mod footer;
mod header;
mod matrix;
mod normalization;
mod source;

pub use block::{Block, BlockCodec, BlockLayout, ContactRecord};
pub use cursor::BinaryCursor;
pub use footer::{ExpectedValueFunction, Footer, IndexEntry};
pub(crate) use header::read_fragment_sites;
pub use header::{Chromosome, FileHeader, FragmentSiteEntry, Unit, Zoom};
pub use matrix::{MatrixKey, MatrixRecord, ZoomMeta};
pub use normalization::{NormVectorKey, NormalizationStore, NormalizationType, NormalizationVector};
pub use source::{ByteSource, MmapSource, SeekableSource, SourceReader};

use super::{FILE_MAGIC, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION};
