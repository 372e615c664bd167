//! Random-access backing stores
//!
//! Every read from the file goes through [`ByteSource::read_at`], which fetches a
//! byte range at an absolute offset. Sources that keep a cursor internally
//! serialize the seek and the read so concurrent callers never observe each
//! other's position.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use auto_impl::auto_impl;
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::error::{ReadError, Result};

/// Default chunk size used when streaming from a [`ByteSource`]
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A seekable, randomly-addressable byte source.
#[auto_impl(&, Box, Arc)]
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes
    fn len(&self) -> u64;

    /// Reads exactly `len` bytes starting at the absolute `offset`
    ///
    /// Fails with [`ReadError::TruncatedInput`] if the range extends past the
    /// end of the source.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_bounds(total: u64, offset: u64, len: usize) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= total => Ok(()),
        _ => Err(ReadError::TruncatedInput {
            position: offset,
            requested: len,
        }
        .into()),
    }
}

/// A memory-mapped local file.
///
/// Reads are plain slice copies, so no locking is required.
pub struct MmapSource {
    mmap: Mmap,
}
impl MmapSource {
    /// Memory-maps the file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is not a regular file,
    /// or cannot be mapped.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Verify input file is a file before attempting to map
        let file = File::open(path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }

        // Safety: the file is open and won't be modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    /// Borrows a range of the mapping without copying
    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        check_bounds(self.mmap.len() as u64, offset, len)?;
        let start = offset as usize;
        Ok(&self.mmap[start..start + len])
    }
}
impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.slice(offset, len).map(<[u8]>::to_vec)
    }
}

/// Any `Read + Seek` stream behind a mutex.
///
/// The seek and the read of one [`ByteSource::read_at`] call happen under the
/// same lock, making the pair atomic with respect to other callers.
pub struct SeekableSource<R> {
    inner: Mutex<R>,
    len: u64,
}
impl<R: Read + Seek> SeekableSource<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: Mutex::new(inner),
            len,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
impl SeekableSource<BufReader<File>> {
    /// Opens a local file with buffered, mutex-guarded access
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }
        Self::new(BufReader::new(file))
    }
}
impl<R: Read + Seek + Send> ByteSource for SeekableSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_bounds(self.len, offset, len)?;
        let mut buf = vec![0u8; len];
        {
            let mut inner = self.inner.lock();
            inner.seek(SeekFrom::Start(offset))?;
            inner.read_exact(&mut buf).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    ReadError::TruncatedInput {
                        position: offset,
                        requested: len,
                    }
                    .into()
                } else {
                    crate::Error::from(e)
                }
            })?;
        }
        Ok(buf)
    }
}

/// Sequential [`Read`] adapter over a [`ByteSource`] starting at an offset.
///
/// Used for sections whose length is not known before decoding them. Reaching
/// the end of the source is reported as a regular end-of-stream.
pub struct SourceReader<'a, S: ?Sized> {
    source: &'a S,
    position: u64,
    chunk_size: usize,
}
impl<'a, S: ByteSource + ?Sized> SourceReader<'a, S> {
    pub fn new(source: &'a S, position: u64) -> Self {
        Self {
            source,
            position,
            chunk_size: STREAM_CHUNK_SIZE,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Wraps the reader in a buffer sized to its chunk size
    pub fn buffered(self) -> BufReader<Self> {
        let capacity = self.chunk_size;
        BufReader::with_capacity(capacity, self)
    }
}
impl<S: ByteSource + ?Sized> Read for SourceReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.source.len().saturating_sub(self.position);
        let n = (buf.len().min(self.chunk_size) as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        let bytes = self
            .source
            .read_at(self.position, n)
            .map_err(io::Error::other)?;
        buf[..n].copy_from_slice(&bytes);
        self.position += n as u64;
        Ok(n)
    }
}
