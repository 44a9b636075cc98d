//! In-memory byte source over a growable buffer.

use std::sync::Mutex;

use async_trait::async_trait;

use super::ByteSource;
use crate::error::{Result, ZipError};

/// A byte source backed by a `Vec<u8>`, behaving like [`super::FileSource`]
/// for both access modes. Writes past the current end grow the buffer,
/// zero-filling any gap.
pub struct MemorySource {
    buf: Mutex<Vec<u8>>,
    writable: bool,
}

impl MemorySource {
    pub fn new(data: Vec<u8>, writable: bool) -> Self {
        Self {
            buf: Mutex::new(data),
            writable,
        }
    }

    /// Snapshot of the current buffer contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.lock().expect("memory source lock").clone()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.into_inner().expect("memory source lock")
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.buf.lock().expect("memory source lock").len() as u64
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.buf.lock().expect("memory source lock");
        let start = offset.min(data.len() as u64) as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(ZipError::UnwritableArchive);
        }
        let mut buf = self.buf.lock().expect("memory source lock");
        let end = offset as usize + data.len();
        if end > buf.len() {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn truncate(&self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(ZipError::UnwritableArchive);
        }
        let mut buf = self.buf.lock().expect("memory source lock");
        buf.truncate(len as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_roundtrip() {
        let src = MemorySource::new(Vec::new(), true);
        src.write_at(0, b"hello").await.unwrap();
        src.write_at(8, b"gap").await.unwrap();
        assert_eq!(src.len(), 11);

        let mut buf = [0u8; 5];
        src.read_at(0, &mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        // the unwritten gap reads back as zeros
        let mut gap = [0xFFu8; 3];
        src.read_at(5, &mut gap).await.unwrap();
        assert_eq!(&gap, &[0, 0, 0]);
    }

    #[tokio::test]
    async fn truncate_shrinks() {
        let src = MemorySource::new(b"0123456789".to_vec(), true);
        src.truncate(4).await.unwrap();
        assert_eq!(src.to_vec(), b"0123");
    }

    #[tokio::test]
    async fn read_only_refuses_writes() {
        let src = MemorySource::new(b"data".to_vec(), false);
        assert!(!src.is_writable());
        assert!(matches!(
            src.write_at(0, b"x").await,
            Err(ZipError::UnwritableArchive)
        ));
        assert!(matches!(
            src.truncate(0).await,
            Err(ZipError::UnwritableArchive)
        ));
    }

    #[tokio::test]
    async fn short_read_past_end() {
        let src = MemorySource::new(b"abc".to_vec(), false);
        let mut buf = [0u8; 8];
        let n = src.read_at(1, &mut buf).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(src.read_at(100, &mut buf).await.unwrap(), 0);
    }
}
