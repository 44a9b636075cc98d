//! Streaming extraction: to a consumer, to a path, and by byte range.

use std::io::Write;
use std::ops::Range;
use std::path::Path;

use crc32fast::Hasher;

use crate::error::{Result, ZipError};
use crate::io::{ByteSource, SourceCursor};
use crate::progress::Progress;

use super::archive::{Archive, Inner, LoadedLocalHeader, DEFAULT_BUFFER_SIZE};
use super::compression;
use super::entry::{Entry, EntryType};
use super::path as zip_path;
use super::structures::CompressionMethod;

/// Knobs for extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Read chunk size.
    pub buffer_size: usize,
    /// Skip CRC32 accumulation and verification.
    pub skip_crc32: bool,
    /// Materialize symlinks whose targets resolve outside the destination.
    pub allow_uncontained_symlinks: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            skip_crc32: false,
            allow_uncontained_symlinks: false,
        }
    }
}

/// Delays each chunk by one step so the final chunk is only delivered
/// after the CRC has been verified.
struct Holdback<'f, F> {
    consumer: &'f mut F,
    pending: Option<Vec<u8>>,
}

impl<'f, F: FnMut(&[u8]) -> Result<()>> Holdback<'f, F> {
    fn new(consumer: &'f mut F) -> Self {
        Self {
            consumer,
            pending: None,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(previous) = self.pending.take() {
            (self.consumer)(&previous)?;
        }
        self.pending = Some(chunk.to_vec());
        Ok(())
    }

    fn finish(self) -> Result<()> {
        if let Some(previous) = self.pending {
            (self.consumer)(&previous)?;
        }
        Ok(())
    }
}

impl<S: ByteSource> Archive<S> {
    /// Stream an entry's content to `consumer`, one decoded chunk at a
    /// time, and return the CRC32 of the delivered bytes.
    ///
    /// Directories yield a single empty chunk; symlinks yield their target
    /// path as one chunk. Unless `skip_crc32` is set, a checksum mismatch
    /// fails the call with the final chunk withheld.
    pub async fn extract<F>(
        &self,
        entry: &Entry,
        options: &ExtractOptions,
        progress: Option<&Progress>,
        mut consumer: F,
    ) -> Result<u32>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        if options.buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        let mut inner = self.inner.lock().await;
        extract_with(
            &mut inner,
            entry,
            options,
            self.is_writable_mode(),
            progress,
            &mut consumer,
        )
        .await
    }

    /// Stream `range` (in uncompressed byte offsets) of a file entry to
    /// `consumer`. Stored entries are served by a direct seek; deflated
    /// entries decode from the start and slice the emitted chunks. No CRC
    /// is computed: a range cannot be checked against the whole-entry
    /// checksum.
    pub async fn extract_range<F>(
        &self,
        entry: &Entry,
        range: Range<u64>,
        buffer_size: usize,
        mut consumer: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        if buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        if entry.entry_type() != EntryType::File {
            return Err(ZipError::EntryIsNotAFile);
        }
        if range.start > range.end || range.end > entry.uncompressed_size() {
            return Err(ZipError::RangeOutOfBounds);
        }
        if range.start == range.end {
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        let loaded = inner
            .load_local_header(entry, self.is_writable_mode())
            .await?;

        match entry.compression_method() {
            CompressionMethod::Stored => {
                let mut cursor =
                    SourceCursor::new(&inner.source, loaded.data_offset + range.start);
                compression::copy_stored(
                    &mut cursor,
                    range.end - range.start,
                    buffer_size,
                    None,
                    None,
                    &mut consumer,
                )
                .await
            }
            CompressionMethod::Deflate => {
                let mut position = 0u64;
                let mut sliced = |chunk: &[u8]| {
                    let chunk_start = position;
                    let chunk_end = position + chunk.len() as u64;
                    position = chunk_end;
                    let lo = range.start.max(chunk_start);
                    let hi = range.end.min(chunk_end);
                    if lo < hi {
                        let from = (lo - chunk_start) as usize;
                        let to = (hi - chunk_start) as usize;
                        consumer(&chunk[from..to])?;
                    }
                    Ok(())
                };
                let mut cursor = SourceCursor::new(&inner.source, loaded.data_offset);
                compression::inflate(
                    &mut cursor,
                    entry.compressed_size(),
                    entry.uncompressed_size(),
                    Some(range.end),
                    buffer_size,
                    None,
                    None,
                    &mut sliced,
                )
                .await?;
                Ok(())
            }
            CompressionMethod::Unknown(method) => Err(ZipError::InvalidCompressionMethod(method)),
        }
    }

    /// Extract an entry to `path`, refusing to overwrite an existing
    /// target. Files receive the entry's POSIX permissions and DOS
    /// modification time; symlink targets are containment-checked against
    /// the path's parent directory.
    pub async fn extract_to_path(
        &self,
        entry: &Entry,
        path: impl AsRef<Path>,
        options: &ExtractOptions,
        progress: Option<&Progress>,
    ) -> Result<u32> {
        let path = path.as_ref();
        let root = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        self.materialize(entry, path, &root, options, progress).await
    }

    /// Extract an entry under `dest_dir` at its stored (sanitized) path.
    /// Fails with [`ZipError::InvalidEntryPath`] before any filesystem
    /// write when the stored path cannot be contained.
    pub async fn extract_into(
        &self,
        entry: &Entry,
        dest_dir: impl AsRef<Path>,
        options: &ExtractOptions,
        progress: Option<&Progress>,
    ) -> Result<u32> {
        let dest_dir = dest_dir.as_ref();
        let relative = entry.enclosed_path().ok_or(ZipError::InvalidEntryPath)?;
        let target = dest_dir.join(relative);
        self.materialize(entry, &target, dest_dir, options, progress)
            .await
    }

    async fn materialize(
        &self,
        entry: &Entry,
        path: &Path,
        root: &Path,
        options: &ExtractOptions,
        progress: Option<&Progress>,
    ) -> Result<u32> {
        if options.buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        if path.symlink_metadata().is_ok() && entry.entry_type() != EntryType::Directory {
            return Err(ZipError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "extraction target already exists",
            )));
        }

        match entry.entry_type() {
            EntryType::Directory => {
                tokio::fs::create_dir_all(path).await?;
                apply_permissions(path, entry.unix_permissions().unwrap_or(0o755))?;
                Ok(0)
            }
            EntryType::File => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let mut file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(path)?;
                let crc = {
                    let mut sink = |chunk: &[u8]| {
                        file.write_all(chunk)?;
                        Ok(())
                    };
                    self.extract(entry, options, progress, &mut sink).await?
                };
                file.flush()?;
                drop(file);
                apply_permissions(path, entry.unix_permissions().unwrap_or(0o644))?;
                apply_modification_time(path, entry)?;
                Ok(crc)
            }
            EntryType::Symlink => {
                let mut target = Vec::new();
                let crc = self
                    .extract(entry, options, progress, |chunk: &[u8]| {
                        target.extend_from_slice(chunk);
                        Ok(())
                    })
                    .await?;

                if !options.allow_uncontained_symlinks
                    && !zip_path::symlink_target_is_contained(path, &target, root)
                {
                    return Err(ZipError::UncontainedSymlink);
                }
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                materialize_symlink(path, &target)?;
                Ok(crc)
            }
        }
    }
}

/// Shared body for extraction while the archive lock is held.
pub(crate) async fn extract_with<S, F>(
    inner: &mut Inner<S>,
    entry: &Entry,
    options: &ExtractOptions,
    writable_mode: bool,
    progress: Option<&Progress>,
    consumer: &mut F,
) -> Result<u32>
where
    S: ByteSource,
    F: FnMut(&[u8]) -> Result<()>,
{
    let loaded = inner.load_local_header(entry, writable_mode).await?;

    match entry.entry_type() {
        EntryType::Directory => {
            consumer(&[])?;
            Ok(0)
        }
        EntryType::Symlink => {
            if let Some(p) = progress {
                p.set_total(entry.compressed_size());
            }
            // The payload is the link target path, read in one piece.
            let mut cursor = SourceCursor::new(&inner.source, loaded.data_offset);
            let target = cursor.read_vec(entry.compressed_size() as usize).await?;
            if let Some(p) = progress {
                p.add_completed(target.len() as u64);
            }

            if options.skip_crc32 {
                consumer(&target)?;
                return Ok(0);
            }
            let computed = crc32fast::hash(&target);
            let stored = expected_crc32(entry, &loaded);
            if computed != stored {
                return Err(ZipError::InvalidCrc32 { stored, computed });
            }
            consumer(&target)?;
            Ok(computed)
        }
        EntryType::File => {
            if let Some(p) = progress {
                p.set_total(entry.uncompressed_size());
            }
            let mut hasher = (!options.skip_crc32).then(Hasher::new);
            let mut cursor = SourceCursor::new(&inner.source, loaded.data_offset);

            let mut holdback = Holdback::new(consumer);
            let mut deliver = |chunk: &[u8]| holdback.push(chunk);

            match entry.compression_method() {
                CompressionMethod::Stored => {
                    compression::copy_stored(
                        &mut cursor,
                        entry.compressed_size(),
                        options.buffer_size,
                        hasher.as_mut(),
                        progress,
                        &mut deliver,
                    )
                    .await?;
                }
                CompressionMethod::Deflate => {
                    compression::inflate(
                        &mut cursor,
                        entry.compressed_size(),
                        entry.uncompressed_size(),
                        None,
                        options.buffer_size,
                        hasher.as_mut(),
                        progress,
                        &mut deliver,
                    )
                    .await?;
                }
                CompressionMethod::Unknown(method) => {
                    return Err(ZipError::InvalidCompressionMethod(method));
                }
            }

            let computed = match hasher {
                Some(hasher) => {
                    let computed = hasher.finalize();
                    let stored = expected_crc32(entry, &loaded);
                    if computed != stored {
                        return Err(ZipError::InvalidCrc32 { stored, computed });
                    }
                    computed
                }
                None => 0,
            };
            holdback.finish()?;
            Ok(computed)
        }
    }
}

/// The checksum an extraction must match: the data descriptor's when the
/// entry carries one, otherwise the local header's, falling back to the
/// central directory copy.
fn expected_crc32(entry: &Entry, loaded: &LoadedLocalHeader) -> u32 {
    if let Some(descriptor) = &loaded.descriptor {
        return descriptor.crc32;
    }
    if entry.uses_data_descriptor() {
        // Descriptor not loaded (read-only open): the central directory
        // carries the authoritative value.
        return entry.crc32();
    }
    loaded.header.crc32
}

#[cfg(unix)]
fn apply_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn apply_modification_time(path: &Path, entry: &Entry) -> Result<()> {
    let mtime = filetime::FileTime::from_unix_time(entry.modification().to_unix_seconds(), 0);
    filetime::set_file_mtime(path, mtime)?;
    Ok(())
}

#[cfg(unix)]
fn materialize_symlink(path: &Path, target: &[u8]) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), path)?;
    Ok(())
}

#[cfg(not(unix))]
fn materialize_symlink(path: &Path, target: &[u8]) -> Result<()> {
    // No portable symlink creation; store the target path as file content.
    std::fs::write(path, target)?;
    Ok(())
}
