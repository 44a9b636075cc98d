//! Random-access byte sources backing an archive.
//!
//! A source is a pure byte layer: it never interprets ZIP structures. Reads
//! are positional (`read_at`) so a shared source needs no seek state; the
//! archive layers a [`SourceCursor`] on top wherever the format requires a
//! moving position.

mod file;
mod http;
mod memory;

pub use file::FileSource;
pub use http::HttpRangeSource;
pub use memory::MemorySource;

use async_trait::async_trait;

use crate::error::{Result, ZipError};

/// Capability interface over a backing store.
///
/// All sources support positional reads; writable sources additionally
/// accept positional writes, truncation, and flushing. The default write
/// methods refuse with [`ZipError::UnwritableArchive`], which is the
/// complete behaviour of read-only sources such as [`HttpRangeSource`].
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Current length of the store in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    /// A return of zero means end-of-store.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn is_writable(&self) -> bool {
        false
    }

    async fn write_at(&self, _offset: u64, _data: &[u8]) -> Result<()> {
        Err(ZipError::UnwritableArchive)
    }

    async fn truncate(&self, _len: u64) -> Result<()> {
        Err(ZipError::UnwritableArchive)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A movable position over a [`ByteSource`].
///
/// The ZIP update protocol is cursor-shaped (write a header, stream data,
/// seek back, rewrite the header), so mutating operations drive one of
/// these rather than raw positional calls.
pub(crate) struct SourceCursor<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    pos: u64,
}

impl<'a, S: ByteSource + ?Sized> SourceCursor<'a, S> {
    pub(crate) fn new(source: &'a S, pos: u64) -> Self {
        Self { source, pos }
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read_at(self.pos, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(ZipError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "byte source ended early",
                )));
            }
            filled += n;
            self.pos += n as u64;
        }
        Ok(())
    }

    pub(crate) async fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.source.write_at(self.pos, data).await?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// Write a large buffer in `chunk`-sized slices so a single oversized
    /// buffer never reaches the source in one call.
    pub(crate) async fn write_chunked(&mut self, data: &[u8], chunk: usize) -> Result<()> {
        if chunk == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        for piece in data.chunks(chunk) {
            self.write_all(piece).await?;
        }
        Ok(())
    }
}
