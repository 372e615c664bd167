use std::io::{self, BufRead, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{HeaderError, ReadError, Result};

/// Little-endian primitive decoding over a buffered byte stream.
///
/// The cursor tracks the absolute position of the next unread byte so that
/// truncation errors and lazily-read sections (fragment sites) can refer to
/// file offsets. Any short read fails with [`ReadError::TruncatedInput`];
/// whether that is fatal is up to the caller.
pub struct BinaryCursor<R> {
    inner: R,
    position: u64,
}
impl<R: BufRead> BinaryCursor<R> {
    pub fn new(inner: R) -> Self {
        Self::with_position(inner, 0)
    }

    /// Creates a cursor whose first byte sits at `position` in the file
    pub fn with_position(inner: R, position: u64) -> Self {
        Self { inner, position }
    }

    /// Absolute position of the next unread byte
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn truncated(&self, err: io::Error, requested: usize) -> crate::Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ReadError::TruncatedInput {
                position: self.position,
                requested,
            }
            .into()
        } else {
            err.into()
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let value = self.inner.read_u8().map_err(|e| self.truncated(e, 1))?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_short(&mut self) -> Result<i16> {
        let value = self
            .inner
            .read_i16::<LittleEndian>()
            .map_err(|e| self.truncated(e, 2))?;
        self.position += 2;
        Ok(value)
    }

    pub fn read_int(&mut self) -> Result<i32> {
        let value = self
            .inner
            .read_i32::<LittleEndian>()
            .map_err(|e| self.truncated(e, 4))?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_long(&mut self) -> Result<i64> {
        let value = self
            .inner
            .read_i64::<LittleEndian>()
            .map_err(|e| self.truncated(e, 8))?;
        self.position += 8;
        Ok(value)
    }

    pub fn read_float(&mut self) -> Result<f32> {
        let value = self
            .inner
            .read_f32::<LittleEndian>()
            .map_err(|e| self.truncated(e, 4))?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_double(&mut self) -> Result<f64> {
        let value = self
            .inner
            .read_f64::<LittleEndian>()
            .map_err(|e| self.truncated(e, 8))?;
        self.position += 8;
        Ok(value)
    }

    /// Reads exactly `buf.len()` bytes
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| self.truncated(e, buf.len()))?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Reads an `int32` that must be non-negative (a count or a size)
    pub fn read_count(&mut self, field: &'static str) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value).map_err(|_| {
            HeaderError::InvalidCount {
                field,
                value: i64::from(value),
            }
            .into()
        })
    }

    /// Reads an `int64` file offset that must be non-negative
    pub fn read_offset(&mut self, field: &'static str) -> Result<u64> {
        let value = self.read_long()?;
        u64::try_from(value).map_err(|_| HeaderError::InvalidCount { field, value }.into())
    }

    /// Reads bytes up to a `0` terminator and decodes them as UTF-8.
    ///
    /// The terminator is consumed but not part of the returned string.
    pub fn read_string(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Err(ReadError::TruncatedInput {
                    position: self.position,
                    requested: 1,
                }
                .into());
            }
            if let Some(idx) = memchr::memchr(0, available) {
                bytes.extend_from_slice(&available[..idx]);
                self.inner.consume(idx + 1);
                self.position += (idx + 1) as u64;
                break;
            }
            let len = available.len();
            bytes.extend_from_slice(available);
            self.inner.consume(len);
            self.position += len as u64;
        }
        let string = std::str::from_utf8(&bytes)?;
        Ok(string.to_string())
    }

    /// Skips `n` bytes, failing if the stream ends first
    pub fn skip(&mut self, n: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        self.position += skipped;
        if skipped < n {
            return Err(ReadError::TruncatedInput {
                position: self.position,
                requested: (n - skipped) as usize,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn sample() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(7u8);
        buf.write_i16::<LittleEndian>(-3).unwrap();
        buf.write_i32::<LittleEndian>(123_456).unwrap();
        buf.write_i64::<LittleEndian>(-9_876_543_210).unwrap();
        buf.write_f32::<LittleEndian>(1.5).unwrap();
        buf.write_f64::<LittleEndian>(-0.25).unwrap();
        buf.extend_from_slice(b"chr1\0");
        buf
    }

    #[test]
    fn test_reads_little_endian_primitives() -> Result<()> {
        let bytes = sample();
        let mut cursor = BinaryCursor::new(bytes.as_slice());
        assert_eq!(cursor.read_byte()?, 7);
        assert_eq!(cursor.read_short()?, -3);
        assert_eq!(cursor.read_int()?, 123_456);
        assert_eq!(cursor.read_long()?, -9_876_543_210);
        assert!((cursor.read_float()? - 1.5).abs() < f32::EPSILON);
        assert!((cursor.read_double()? + 0.25).abs() < f64::EPSILON);
        assert_eq!(cursor.read_string()?, "chr1");
        assert_eq!(cursor.position(), bytes.len() as u64);
        Ok(())
    }

    #[test]
    fn test_position_offset() -> Result<()> {
        let bytes = sample();
        let mut cursor = BinaryCursor::with_position(bytes.as_slice(), 100);
        cursor.read_byte()?;
        cursor.read_short()?;
        assert_eq!(cursor.position(), 103);
        Ok(())
    }

    #[test]
    fn test_truncated_field() {
        let bytes = [1u8, 2, 3];
        let mut cursor = BinaryCursor::new(&bytes[..]);
        let err = cursor.read_int().unwrap_err();
        assert!(err.is_truncation());
        match err {
            crate::Error::ReadError(ReadError::TruncatedInput {
                position,
                requested,
            }) => {
                assert_eq!(position, 0);
                assert_eq!(requested, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string() {
        let bytes = b"genome";
        let mut cursor = BinaryCursor::new(&bytes[..]);
        assert!(cursor.read_string().unwrap_err().is_truncation());
    }

    #[test]
    fn test_empty_string() -> Result<()> {
        let bytes = b"\0next\0";
        let mut cursor = BinaryCursor::new(&bytes[..]);
        assert_eq!(cursor.read_string()?, "");
        assert_eq!(cursor.read_string()?, "next");
        Ok(())
    }

    #[test]
    fn test_string_across_buffer_boundary() -> Result<()> {
        let bytes = b"a_rather_long_chromosome_name\0".to_vec();
        let reader = io::BufReader::with_capacity(4, bytes.as_slice());
        let mut cursor = BinaryCursor::new(reader);
        assert_eq!(cursor.read_string()?, "a_rather_long_chromosome_name");
        assert_eq!(cursor.position(), bytes.len() as u64);
        Ok(())
    }

    #[test]
    fn test_negative_count() {
        let mut bytes = Vec::new();
        bytes.write_i32::<LittleEndian>(-1).unwrap();
        let mut cursor = BinaryCursor::new(bytes.as_slice());
        let err = cursor.read_count("chromosome count").unwrap_err();
        assert!(format!("{err}").contains("chromosome count"));
    }

    #[test]
    fn test_skip() -> Result<()> {
        let bytes = sample();
        let mut cursor = BinaryCursor::new(bytes.as_slice());
        cursor.skip(3)?;
        assert_eq!(cursor.read_int()?, 123_456);
        assert!(cursor.skip(1_000).unwrap_err().is_truncation());
        Ok(())
    }
}
