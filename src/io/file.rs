//! File-backed byte source with buffered random access.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::ByteSource;
use crate::error::Result;

/// Random-access source over a regular file.
///
/// The total length is computed at open time and tracked across writes and
/// truncation, so [`ByteSource::len`] never touches the filesystem. On unix
/// the positional read/write syscalls are used directly; elsewhere a lock
/// serializes a seek-then-access fallback.
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: AtomicU64,
    writable: bool,
    #[cfg(not(unix))]
    pos_lock: std::sync::Mutex<()>,
}

impl FileSource {
    /// Open an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self::wrap(file, path, len, false))
    }

    /// Open an existing file for reading and writing.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self::wrap(file, path, len, true))
    }

    /// Create a new file; fails if the path already exists.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self::wrap(file, path, 0, true))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wrap(file: File, path: PathBuf, len: u64, writable: bool) -> Self {
        Self {
            file,
            path,
            len: AtomicU64::new(len),
            writable,
            #[cfg(not(unix))]
            pos_lock: std::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self.pos_lock.lock().expect("file position lock");
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(crate::error::ZipError::UnwritableArchive);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_all_at(data, offset)?;
        }

        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let _guard = self.pos_lock.lock().expect("file position lock");
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
        }

        let end = offset + data.len() as u64;
        self.len.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }

    async fn truncate(&self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(crate::error::ZipError::UnwritableArchive);
        }
        self.file.set_len(len)?;
        self.len.store(len, Ordering::Release);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}
