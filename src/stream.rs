//! Byte source abstraction for random-access decoding.
//!
//! PSD parsing needs exact reads, absolute seeks and position queries, plus
//! big-endian integer helpers layered on top. The [`ByteSource`] trait
//! captures that capability set; two implementations are built in:
//!
//! - [`SliceSource`] over a caller-owned byte slice (the common case,
//!   statically dispatched)
//! - [`ReaderSource`] over any `std::io::Read + Seek` (files, cursors,
//!   custom sources), for use at the public boundary where dynamic dispatch
//!   is acceptable
//!
//! All offsets are absolute positions from the start of the source.

use crate::error::{PsdError, PsdResult};
use byteorder::{BigEndian, ByteOrder};
use std::io::{Read, Seek, SeekFrom};

/// Random-access byte source.
///
/// Implementors supply the three primitive operations; the big-endian and
/// length helpers are provided on top. The trait is object-safe, so a
/// `&mut dyn ByteSource` works where static dispatch is not wanted.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes, returning the number of bytes read.
    ///
    /// Returning 0 with a non-empty `buf` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> PsdResult<usize>;

    /// Seeks to an absolute position, returning the new position.
    fn seek(&mut self, pos: u64) -> PsdResult<u64>;

    /// Returns the current absolute position.
    fn tell(&mut self) -> PsdResult<u64>;

    /// Reads exactly `buf.len()` bytes or fails with [`PsdError::StreamEof`].
    fn read_exact(&mut self, buf: &mut [u8]) -> PsdResult<()> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                return Err(PsdError::StreamEof);
            }
            total += n;
        }
        Ok(())
    }

    /// Reads a big-endian unsigned 16-bit integer.
    fn read_u16(&mut self) -> PsdResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(BigEndian::read_u16(&buf))
    }

    /// Reads a big-endian unsigned 32-bit integer.
    fn read_u32(&mut self) -> PsdResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(BigEndian::read_u32(&buf))
    }

    /// Reads a big-endian unsigned 64-bit integer.
    fn read_u64(&mut self) -> PsdResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(BigEndian::read_u64(&buf))
    }

    /// Reads a big-endian signed 32-bit integer.
    fn read_i32(&mut self) -> PsdResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(BigEndian::read_i32(&buf))
    }

    /// Reads a single byte.
    fn read_u8(&mut self) -> PsdResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a big-endian IEEE-754 double.
    fn read_f64(&mut self) -> PsdResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Skips `count` bytes by reading and discarding them.
    fn skip(&mut self, count: u64) -> PsdResult<()> {
        let mut buf = [0u8; 4096];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            self.read_exact(&mut buf[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    /// Reads a section-length field: 32 bits in the standard format, 64 bits
    /// in the large-document format.
    ///
    /// Fails with [`PsdError::OutOfRange`] when the value cannot be used as
    /// a host size index.
    fn read_length(&mut self, is_large: bool) -> PsdResult<u64> {
        let value = if is_large {
            self.read_u64()?
        } else {
            u64::from(self.read_u32()?)
        };
        if usize::try_from(value).is_err() {
            return Err(PsdError::OutOfRange(format!(
                "length {value} exceeds addressable size"
            )));
        }
        Ok(value)
    }
}

/// Byte source over a borrowed slice.
///
/// The slice is owned by the caller and may outlive the source; nothing is
/// copied. This is the preferred source for in-memory parsing.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    /// Creates a source positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Total length of the underlying slice.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the underlying slice is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for SliceSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> PsdResult<usize> {
        let remaining = self.data.len() - self.pos;
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> PsdResult<u64> {
        let pos = usize::try_from(pos)
            .map_err(|_| PsdError::StreamSeek(format!("position {pos} out of range")))?;
        if pos > self.data.len() {
            return Err(PsdError::StreamSeek(format!(
                "position {pos} past end ({})",
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(pos as u64)
    }

    fn tell(&mut self) -> PsdResult<u64> {
        Ok(self.pos as u64)
    }
}

/// Byte source adapter over any `Read + Seek`.
///
/// Bridges files, `Cursor`s and custom reader types into the decoder.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read + Seek> ReaderSource<R> {
    /// Wraps a reader. Positions are absolute in the underlying reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Consumes the source, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> PsdResult<usize> {
        self.inner
            .read(buf)
            .map_err(|e| PsdError::StreamRead(e.to_string()))
    }

    fn seek(&mut self, pos: u64) -> PsdResult<u64> {
        self.inner
            .seek(SeekFrom::Start(pos))
            .map_err(|e| PsdError::StreamSeek(e.to_string()))
    }

    fn tell(&mut self) -> PsdResult<u64> {
        self.inner
            .stream_position()
            .map_err(|e| PsdError::StreamInvalid(e.to_string()))
    }
}
