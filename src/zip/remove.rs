//! Removing entries by rewriting into a sidecar archive.
//!
//! Central-directory offsets point at local headers, so entries cannot be
//! relocated in place. Removal copies every surviving `[local header,
//! data, descriptor]` block verbatim into a fresh archive, re-emits the
//! directory with recomputed offsets, and replaces the original. Failure
//! at any point discards the sidecar and leaves the original untouched.

use std::path::PathBuf;

use crate::error::{Result, ZipError};
use crate::io::{ByteSource, FileSource, MemorySource, SourceCursor};
use crate::progress::Progress;

use super::add::write_trailer;
use super::archive::{Archive, Inner};
use super::entry::Entry;
use super::structures::{strip_zip64_extra, Zip64Extra, SENTINEL_32, VERSION_ZIP64};

impl Archive<FileSource> {
    /// Remove `entry`, atomically replacing the backing file on success.
    ///
    /// A sidecar file is written next to the archive and renamed over it;
    /// on platforms without atomic rename-over this degrades to
    /// remove-then-rename, with a crash window that can lose the archive.
    pub async fn remove(
        &self,
        entry: &Entry,
        buffer_size: usize,
        progress: Option<&Progress>,
    ) -> Result<()> {
        if !self.is_writable_mode() {
            return Err(ZipError::UnwritableArchive);
        }
        if buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }

        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if !inner.source.is_writable() {
            return Err(ZipError::UnwritableArchive);
        }

        let original_path = inner.source.path().to_path_buf();
        let sidecar_path = sidecar_path_for(&original_path);

        let sidecar = FileSource::create_new(&sidecar_path)?;
        let rewritten =
            rewrite_without(inner, &sidecar, entry, buffer_size, progress).await;
        drop(sidecar);

        if let Err(error) = rewritten {
            let _ = std::fs::remove_file(&sidecar_path);
            return Err(error);
        }

        if let Err(error) = std::fs::rename(&sidecar_path, &original_path) {
            let _ = std::fs::remove_file(&sidecar_path);
            return Err(error.into());
        }

        tracing::debug!(path = %entry.path(), "removed entry");
        inner.source = FileSource::open_rw(&original_path)?;
        inner.refresh_after_mutation().await
    }
}

impl Archive<MemorySource> {
    /// Remove `entry` by rebuilding the in-memory buffer.
    pub async fn remove(
        &self,
        entry: &Entry,
        buffer_size: usize,
        progress: Option<&Progress>,
    ) -> Result<()> {
        if !self.is_writable_mode() {
            return Err(ZipError::UnwritableArchive);
        }
        if buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }

        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if !inner.source.is_writable() {
            return Err(ZipError::UnwritableArchive);
        }

        let sidecar = MemorySource::new(Vec::new(), true);
        rewrite_without(inner, &sidecar, entry, buffer_size, progress).await?;

        tracing::debug!(path = %entry.path(), "removed entry");
        inner.source = sidecar;
        inner.refresh_after_mutation().await
    }
}

fn sidecar_path_for(original: &std::path::Path) -> PathBuf {
    let mut name = original.as_os_str().to_os_string();
    name.push(".pending");
    PathBuf::from(name)
}

/// Copy every entry except `target` into `sidecar` and emit a fresh
/// directory and trailer there. The source archive is only read.
async fn rewrite_without<S: ByteSource, T: ByteSource>(
    inner: &mut Inner<S>,
    sidecar: &T,
    target: &Entry,
    buffer_size: usize,
    progress: Option<&Progress>,
) -> Result<()> {
    // Walk the raw directory: encryption-flagged entries are hidden from
    // public iteration but their bytes must survive a rewrite.
    let all = inner.walk_central_directory(true).await?;
    let thresholds = inner.thresholds;
    let comment = inner.eocd.eocd.comment.clone();

    let mut out = SourceCursor::new(sidecar, 0);
    let mut survivors = Vec::with_capacity(all.len().saturating_sub(1));

    for entry in &all {
        if entry.local_header_offset() == target.local_header_offset() {
            continue;
        }

        // The exact block span needs the local header's own tail lengths
        // (they may differ from the directory's) and the descriptor size.
        let loaded = inner.load_local_header(entry, true).await?;
        let descriptor_len = loaded
            .descriptor
            .map(|d| d.byte_len as u64)
            .unwrap_or(0);
        let block_len = (loaded.data_offset - entry.local_header_offset())
            + entry.compressed_size()
            + descriptor_len;

        let new_offset = out.position();
        let mut source_cursor =
            SourceCursor::new(&inner.source, entry.local_header_offset());
        let mut remaining = block_len;
        while remaining > 0 {
            if progress.is_some_and(Progress::is_cancelled) {
                return Err(ZipError::Cancelled);
            }
            let take = remaining.min(buffer_size as u64) as usize;
            let chunk = source_cursor.read_vec(take).await?;
            out.write_all(&chunk).await?;
            if let Some(p) = progress {
                p.add_completed(take as u64);
            }
            remaining -= take as u64;
        }

        survivors.push(relocated_record(entry, new_offset, &thresholds));
    }

    let cd_offset = out.position();
    let mut cd_size = 0u64;
    let total = survivors.len() as u64;
    for record in &survivors {
        let bytes = record.encode();
        cd_size += bytes.len() as u64;
        out.write_chunked(&bytes, buffer_size).await?;
    }

    write_trailer(&mut out, total, cd_size, cd_offset, &comment, &thresholds).await?;
    sidecar.flush().await
}

/// Rebuild an entry's directory record for its new local-header offset.
/// Size fields keep their original sentinel status (the values are
/// unchanged); only the offset is re-promoted, and foreign extra fields
/// are preserved.
fn relocated_record(
    entry: &Entry,
    new_offset: u64,
    thresholds: &super::archive::Zip64Thresholds,
) -> super::structures::CentralDirectoryEntry {
    let mut record = entry.cds().clone();
    let promote_offset = new_offset >= thresholds.offset;

    let zip64 = Zip64Extra {
        uncompressed_size: (record.uncompressed_size == SENTINEL_32)
            .then(|| entry.uncompressed_size()),
        compressed_size: (record.compressed_size == SENTINEL_32)
            .then(|| entry.compressed_size()),
        local_header_offset: promote_offset.then_some(new_offset),
        disk_number_start: None,
    };

    record.local_header_offset = if promote_offset {
        SENTINEL_32
    } else {
        new_offset as u32
    };

    let mut extra = strip_zip64_extra(&record.extra_field);
    if !zip64.is_empty() {
        extra.extend_from_slice(&zip64.to_field_bytes());
        record.version_needed = record.version_needed.max(VERSION_ZIP64);
    }
    record.extra_field = extra;
    record.zip64 = (!zip64.is_empty()).then_some(zip64);
    record
}
