use std::error::Error as StdError;

use crate::core::{NormalizationType, Zoom};

/// Custom Result type for hicseek operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the hicseek library, encompassing all possible error cases
/// that can occur while reading a contact-matrix file.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to the file header and footer
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// Errors that occur during read operations
    #[error("Error reading file: {0}")]
    ReadError(#[from] ReadError),

    /// Errors that occur while decompressing or decoding a block
    #[error("Error decoding block: {0}")]
    BlockError(#[from] BlockError),

    /// Errors related to normalization vectors
    #[error("Error resolving normalization: {0}")]
    NormalizationError(#[from] NormalizationError),

    /// Errors raised by region queries
    #[error("Error querying matrix: {0}")]
    QueryError(#[from] QueryError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error was caused by running out of input
    ///
    /// Callers use this to tell an optional section that is simply absent
    /// (end of file at a record boundary) from a corrupt one.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::ReadError(ReadError::TruncatedInput { .. }))
    }

    /// Checks if the error is a missing normalization vector
    ///
    /// Callers may fall back to [`NormalizationType::None`] on this error.
    #[must_use]
    pub fn is_missing_normalization(&self) -> bool {
        matches!(
            self,
            Self::NormalizationError(NormalizationError::Missing { .. })
        )
    }

    /// Checks if the error is the magic-string mismatch of a foreign file
    #[must_use]
    pub fn is_not_this_format(&self) -> bool {
        matches!(self, Self::HeaderError(HeaderError::NotThisFormat(_)))
    }
}

/// Errors specific to decoding the file header, footer and matrix records
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic string does not match `HIC`
    #[error("Magic string is not HIC ({0:?}), this does not appear to be a hic file")]
    NotThisFormat(String),

    /// The format version is outside the supported range
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(i32),

    /// A resolution unit other than `BP` or `FRAG`
    #[error("Unknown resolution unit: {0}")]
    UnknownUnit(String),

    /// A count or size field holds a negative value
    #[error("Invalid {field}: {value}")]
    InvalidCount { field: &'static str, value: i64 },

    /// A master-index key that is not `<chr1>_<chr2>`
    #[error("Invalid matrix key in master index: {0}")]
    InvalidMatrixKey(String),

    /// A matrix record references a chromosome missing from the dictionary
    #[error("Matrix references unknown chromosome index: {0}")]
    UnknownChromosome(i32),
}

/// Errors that can occur while reading bytes from the backing store
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file being opened is not a regular file
    #[error("File is not regular")]
    IncompatibleFile,

    /// Fewer bytes were available than a fixed-width field required
    #[error("Truncated input: {requested} bytes requested at byte position {position}")]
    TruncatedInput { position: u64, requested: usize },
}

/// Errors that can occur while decoding a single block
#[derive(thiserror::Error, Debug)]
pub enum BlockError {
    /// The block payload could not be inflated
    #[error("Block {block} could not be decompressed: {source}")]
    Decompression {
        block: u32,
        #[source]
        source: std::io::Error,
    },

    /// The encoding type byte is neither the row list (1) nor the dense grid (2)
    #[error("Block {block} has unknown encoding type: {encoding}")]
    UnknownEncoding { block: u32, encoding: u8 },

    /// The decoded payload is structurally impossible
    #[error("Block {block} is malformed: {reason}")]
    Malformed { block: u32, reason: &'static str },
}

/// Errors related to normalization vectors
#[derive(thiserror::Error, Debug)]
pub enum NormalizationError {
    /// No usable vector is stored for the requested combination
    #[error("Normalization {norm} missing for chromosome {chr_index} at {zoom}")]
    Missing {
        norm: NormalizationType,
        chr_index: u32,
        zoom: Zoom,
    },
}

/// A single block that failed inside a concurrent range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFailure {
    /// Number of the failed block
    pub block_number: u32,
    /// Rendered cause of the failure
    pub message: String,
}

/// Errors raised while answering a range query
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// One or more blocks of the query failed to load
    #[error("{} block(s) failed to load: {}", .0.len(), render_failures(.0))]
    BlockFailures(Vec<BlockFailure>),

    /// The matrix has no data at the requested resolution
    #[error("Unknown resolution: {0}")]
    UnknownZoom(Zoom),
}
impl QueryError {
    /// Returns the per-block failure detail, if any
    #[must_use]
    pub fn failures(&self) -> &[BlockFailure] {
        match self {
            Self::BlockFailures(failures) => failures,
            Self::UnknownZoom(_) => &[],
        }
    }
}

fn render_failures(failures: &[BlockFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[block {}: {}]", f.block_number, f.message))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoHicError {
    fn into_hic_error(self) -> Error;
}

impl<E> IntoHicError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_hic_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
