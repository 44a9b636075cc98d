//! Appending entries: the two-phase local-header protocol.
//!
//! The new entry's local header lands where the central directory used to
//! start; the old directory bytes are kept in memory and reappended after
//! the data, followed by the new directory record and a fresh trailer. On
//! cancellation or failure the snapshot is written back, restoring the
//! archive byte-for-byte.

use crate::error::{Result, ZipError};
use crate::io::{ByteSource, SourceCursor};
use crate::progress::Progress;

use super::archive::{Archive, Zip64Thresholds, DEFAULT_BUFFER_SIZE};
use super::compression;
use super::datetime::DosDateTime;
use super::entry::EntryType;
use super::structures::{
    CentralDirectoryEntry, CompressionMethod, EndOfCentralDirectory, LocalFileHeader, Zip64Extra,
    Zip64EndOfCentralDirectory, Zip64EocdLocator, FLAG_UTF8, SENTINEL_16, SENTINEL_32,
    VERSION_DEFAULT, VERSION_MADE_BY_UNIX, VERSION_ZIP64,
};

const S_IFREG: u32 = 0o100_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFLNK: u32 = 0o120_000;
/// MS-DOS directory attribute, kept for readers that only look there.
const DOS_DIRECTORY: u32 = 0x10;

pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;
pub const DEFAULT_DIRECTORY_PERMISSIONS: u32 = 0o755;

/// Knobs for [`Archive::add_entry`].
#[derive(Debug, Clone)]
pub struct EntryOptions {
    /// Applies to file entries; directories and symlinks are always stored.
    pub compression_method: CompressionMethod,
    /// POSIX permission bits; defaults depend on the entry type.
    pub permissions: Option<u32>,
    /// Modification timestamp; defaults to the current time.
    pub modification: Option<DosDateTime>,
    /// Write chunk size.
    pub buffer_size: usize,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Stored,
            permissions: None,
            modification: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Everything `append_entry_bytes` needs besides the source.
struct PendingEntry {
    stored_path: String,
    entry_type: EntryType,
    method: CompressionMethod,
    uncompressed_size: u64,
    permissions: Option<u32>,
    modification: DosDateTime,
    buffer_size: usize,
}

impl<S: ByteSource> Archive<S> {
    /// Append one entry, pulling its content from `provider`.
    ///
    /// `provider` is called with `(position, chunk_len)` and must return
    /// exactly `chunk_len` bytes; for symlinks the content is the link
    /// target path. `uncompressed_size` must be known up front: it
    /// decides ZIP64 promotion before the first header byte is written,
    /// and entries written here never use data descriptors.
    pub async fn add_entry<P>(
        &self,
        path: &str,
        entry_type: EntryType,
        uncompressed_size: u64,
        options: &EntryOptions,
        progress: Option<&Progress>,
        mut provider: P,
    ) -> Result<()>
    where
        P: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        if !self.is_writable_mode() {
            return Err(ZipError::UnwritableArchive);
        }
        if options.buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        if path.is_empty() || path.contains('\0') {
            return Err(ZipError::InvalidEntryPath);
        }

        let method = match entry_type {
            EntryType::File => match options.compression_method {
                CompressionMethod::Unknown(value) => {
                    return Err(ZipError::InvalidCompressionMethod(value));
                }
                method => method,
            },
            EntryType::Directory | EntryType::Symlink => CompressionMethod::Stored,
        };
        let pending = PendingEntry {
            stored_path: match entry_type {
                EntryType::Directory if !path.ends_with('/') => format!("{path}/"),
                _ => path.to_string(),
            },
            entry_type,
            method,
            uncompressed_size: match entry_type {
                EntryType::Directory => 0,
                _ => uncompressed_size,
            },
            permissions: options.permissions,
            modification: options.modification.unwrap_or_else(DosDateTime::now),
            buffer_size: options.buffer_size,
        };

        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        if !inner.source.is_writable() {
            return Err(ZipError::UnwritableArchive);
        }

        let thresholds = inner.thresholds;
        let old_total = inner.eocd.total_entries();
        let cd_offset = inner.eocd.cd_offset();
        let cd_size = inner.eocd.cd_size();
        let comment = inner.eocd.eocd.comment.clone();

        // Snapshot the directory and trailer so failure can restore the
        // archive byte-for-byte.
        let mut cursor = SourceCursor::new(&inner.source, cd_offset);
        let cd_bytes = cursor.read_vec(cd_size as usize).await?;
        let trailer_len = inner.source.len() - (cd_offset + cd_size);
        let trailer_bytes = cursor.read_vec(trailer_len as usize).await?;

        if let Some(p) = progress {
            p.set_total(pending.uncompressed_size);
        }

        let appended = append_entry_bytes(
            &inner.source,
            &pending,
            cd_offset,
            &cd_bytes,
            old_total,
            &comment,
            &thresholds,
            progress,
            &mut provider,
        )
        .await;

        if let Err(error) = appended {
            restore_snapshot(
                &inner.source,
                cd_offset,
                &cd_bytes,
                &trailer_bytes,
                pending.buffer_size,
            )
            .await;
            return Err(error);
        }

        tracing::debug!(
            path = %pending.stored_path,
            uncompressed = pending.uncompressed_size,
            "appended entry"
        );

        inner.refresh_after_mutation().await
    }
}

/// The write half of the protocol. Every byte mutation lives here so the
/// caller can restore the snapshot when anything fails.
#[allow(clippy::too_many_arguments)]
async fn append_entry_bytes<S, P>(
    source: &S,
    pending: &PendingEntry,
    lfh_start: u64,
    old_cd_bytes: &[u8],
    old_total: u64,
    comment: &[u8],
    thresholds: &Zip64Thresholds,
    progress: Option<&Progress>,
    provider: &mut P,
) -> Result<()>
where
    S: ByteSource,
    P: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    let promote_sizes = pending.uncompressed_size >= thresholds.size;

    let mut header = LocalFileHeader {
        version_needed: if promote_sizes {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        },
        flags: FLAG_UTF8,
        compression_method: pending.method.as_u16(),
        last_mod_time: pending.modification.time,
        last_mod_date: pending.modification.date,
        crc32: 0,
        compressed_size: if promote_sizes { SENTINEL_32 } else { 0 },
        uncompressed_size: if promote_sizes {
            SENTINEL_32
        } else {
            pending.uncompressed_size as u32
        },
        file_name: pending.stored_path.clone().into_bytes(),
        extra_field: Vec::new(),
        zip64: None,
    };
    if promote_sizes {
        let extra = Zip64Extra {
            uncompressed_size: Some(pending.uncompressed_size),
            compressed_size: Some(0),
            ..Default::default()
        };
        header.extra_field = extra.to_field_bytes();
        header.zip64 = Some(extra);
    }

    // First header write: placeholder compressed size and checksum.
    let mut cursor = SourceCursor::new(source, lfh_start);
    cursor.write_all(&header.encode()).await?;

    // Stream the data region, tracking written size and checksum.
    let (written, checksum) = match (pending.entry_type, pending.method) {
        (EntryType::Directory, _) => (0, 0),
        (_, CompressionMethod::Stored) => {
            compression::store_from_provider(
                &mut cursor,
                pending.uncompressed_size,
                pending.buffer_size,
                progress,
                provider,
            )
            .await?
        }
        (_, CompressionMethod::Deflate) => {
            compression::deflate_from_provider(
                &mut cursor,
                pending.uncompressed_size,
                pending.buffer_size,
                progress,
                provider,
            )
            .await?
        }
        (_, CompressionMethod::Unknown(value)) => {
            return Err(ZipError::InvalidCompressionMethod(value));
        }
    };
    if !promote_sizes && written >= thresholds.size {
        // The compressed stream outgrew a header that was not promoted;
        // the entry cannot be represented as written.
        return Err(ZipError::InvalidEntrySize);
    }

    // Second header write: same shape, final sizes and checksum.
    let new_cd_start = cursor.position();
    header.crc32 = checksum;
    if promote_sizes {
        let extra = Zip64Extra {
            uncompressed_size: Some(pending.uncompressed_size),
            compressed_size: Some(written),
            ..Default::default()
        };
        header.extra_field = extra.to_field_bytes();
        header.zip64 = Some(extra);
    } else {
        header.compressed_size = written as u32;
    }
    cursor.seek(lfh_start);
    cursor.write_all(&header.encode()).await?;

    // Reappend the preserved directory, then the new entry's record.
    cursor.seek(new_cd_start);
    cursor.write_chunked(old_cd_bytes, pending.buffer_size).await?;

    let record = build_central_record(&header, pending, written, lfh_start, thresholds);
    let record_bytes = record.encode();
    cursor.write_all(&record_bytes).await?;

    write_trailer(
        &mut cursor,
        old_total + 1,
        old_cd_bytes.len() as u64 + record_bytes.len() as u64,
        new_cd_start,
        comment,
        thresholds,
    )
    .await?;

    let end = cursor.position();
    if end < source.len() {
        source.truncate(end).await?;
    }
    source.flush().await
}

/// Build the central-directory record for a freshly written local header.
fn build_central_record(
    header: &LocalFileHeader,
    pending: &PendingEntry,
    compressed_size: u64,
    local_header_offset: u64,
    thresholds: &Zip64Thresholds,
) -> CentralDirectoryEntry {
    let promote_sizes = header.zip64.is_some();
    let promote_offset = local_header_offset >= thresholds.offset;

    let zip64 = Zip64Extra {
        uncompressed_size: promote_sizes.then_some(pending.uncompressed_size),
        compressed_size: promote_sizes.then_some(compressed_size),
        local_header_offset: promote_offset.then_some(local_header_offset),
        disk_number_start: None,
    };

    let mode = match pending.entry_type {
        EntryType::File => S_IFREG | pending.permissions.unwrap_or(DEFAULT_FILE_PERMISSIONS),
        EntryType::Directory => {
            S_IFDIR | pending.permissions.unwrap_or(DEFAULT_DIRECTORY_PERMISSIONS)
        }
        EntryType::Symlink => {
            S_IFLNK | pending.permissions.unwrap_or(DEFAULT_DIRECTORY_PERMISSIONS)
        }
    };
    let mut external_attributes = mode << 16;
    if pending.entry_type == EntryType::Directory {
        external_attributes |= DOS_DIRECTORY;
    }

    CentralDirectoryEntry {
        version_made_by: VERSION_MADE_BY_UNIX,
        version_needed: if promote_sizes || promote_offset {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        },
        flags: header.flags,
        compression_method: header.compression_method,
        last_mod_time: header.last_mod_time,
        last_mod_date: header.last_mod_date,
        crc32: header.crc32,
        compressed_size: if promote_sizes {
            SENTINEL_32
        } else {
            compressed_size as u32
        },
        uncompressed_size: if promote_sizes {
            SENTINEL_32
        } else {
            pending.uncompressed_size as u32
        },
        disk_number_start: 0,
        internal_attributes: 0,
        external_attributes,
        local_header_offset: if promote_offset {
            SENTINEL_32
        } else {
            local_header_offset as u32
        },
        file_name: header.file_name.clone(),
        extra_field: if zip64.is_empty() {
            Vec::new()
        } else {
            zip64.to_field_bytes()
        },
        comment: Vec::new(),
        zip64: (!zip64.is_empty()).then_some(zip64),
    }
}

/// Emit the trailer at the cursor: a ZIP64 record and locator when any
/// value overflows its classic field, then the EOCD.
pub(crate) async fn write_trailer<S: ByteSource + ?Sized>(
    cursor: &mut SourceCursor<'_, S>,
    total_entries: u64,
    cd_size: u64,
    cd_offset: u64,
    comment: &[u8],
    thresholds: &Zip64Thresholds,
) -> Result<()> {
    let promote_entries = total_entries >= thresholds.entries;
    let promote_size = cd_size >= thresholds.size;
    let promote_offset = cd_offset >= thresholds.offset;

    if promote_entries || promote_size || promote_offset {
        let record_offset = cursor.position();
        let record = Zip64EndOfCentralDirectory {
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            cd_start_disk: 0,
            entries_on_disk: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        };
        cursor.write_all(&record.encode()).await?;
        let locator = Zip64EocdLocator {
            eocd64_offset: record_offset,
        };
        cursor.write_all(&locator.encode()).await?;
    }

    let eocd = EndOfCentralDirectory {
        disk_number: 0,
        cd_start_disk: 0,
        entries_on_disk: if promote_entries {
            SENTINEL_16
        } else {
            total_entries as u16
        },
        total_entries: if promote_entries {
            SENTINEL_16
        } else {
            total_entries as u16
        },
        cd_size: if promote_size {
            SENTINEL_32
        } else {
            cd_size as u32
        },
        cd_offset: if promote_offset {
            SENTINEL_32
        } else {
            cd_offset as u32
        },
        comment: comment.to_vec(),
    };
    cursor.write_all(&eocd.encode()).await
}

/// Best-effort restoration of the pre-operation bytes. The original error
/// stays primary; a failing restore is only logged.
async fn restore_snapshot<S: ByteSource>(
    source: &S,
    lfh_start: u64,
    cd_bytes: &[u8],
    trailer_bytes: &[u8],
    buffer_size: usize,
) {
    let restore = async {
        source.truncate(lfh_start).await?;
        let mut cursor = SourceCursor::new(source, lfh_start);
        cursor.write_chunked(cd_bytes, buffer_size).await?;
        cursor.write_all(trailer_bytes).await?;
        source.flush().await
    };
    if let Err(error) = restore.await {
        tracing::error!(%error, "failed to restore archive after aborted add");
    }
}
