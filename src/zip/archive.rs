//! Archive lifecycle: opening, EOCD location, and entry discovery.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Result, ZipError};
use crate::io::{ByteSource, FileSource, HttpRangeSource, MemorySource, SourceCursor};

use super::entry::Entry;
use super::structures::{
    CentralDirectoryEntry, DataDescriptor, EndOfCentralDirectory, LocalFileHeader, Zip64EocdLocator,
    Zip64EndOfCentralDirectory, FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED, SENTINEL_16, SENTINEL_32,
};

/// Default chunk size for reads and writes.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// How an archive's backing store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Existing archive, read-only operations.
    Read,
    /// New archive; the backing store must not already exist.
    Create,
    /// Existing archive opened for modification.
    Update,
}

/// Promotion thresholds for ZIP64 sentinels. Production values are the
/// format's own limits; tests lower them to exercise promotion with small
/// payloads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Zip64Thresholds {
    pub size: u64,
    pub offset: u64,
    pub entries: u64,
}

impl Default for Zip64Thresholds {
    fn default() -> Self {
        Self {
            size: SENTINEL_32 as u64,
            offset: SENTINEL_32 as u64,
            entries: SENTINEL_16 as u64,
        }
    }
}

/// The trailer state located at open time and refreshed after mutations.
#[derive(Debug, Clone)]
pub(crate) struct EocdState {
    pub eocd: EndOfCentralDirectory,
    pub eocd_offset: u64,
    pub zip64: Option<Zip64State>,
}

#[derive(Debug, Clone)]
pub(crate) struct Zip64State {
    pub record: Zip64EndOfCentralDirectory,
    pub record_offset: u64,
}

impl EocdState {
    pub(crate) fn cd_offset(&self) -> u64 {
        match &self.zip64 {
            Some(z) if self.eocd.cd_offset == SENTINEL_32 => z.record.cd_offset,
            _ => self.eocd.cd_offset as u64,
        }
    }

    pub(crate) fn cd_size(&self) -> u64 {
        match &self.zip64 {
            Some(z) if self.eocd.cd_size == SENTINEL_32 => z.record.cd_size,
            _ => self.eocd.cd_size as u64,
        }
    }

    pub(crate) fn total_entries(&self) -> u64 {
        match &self.zip64 {
            Some(z) if self.eocd.total_entries == SENTINEL_16 => z.record.total_entries,
            _ => self.eocd.total_entries as u64,
        }
    }

    /// First byte of the trailer region (ZIP64 record when present,
    /// otherwise the EOCD itself).
    pub(crate) fn trailer_offset(&self) -> u64 {
        match &self.zip64 {
            Some(z) => z.record_offset,
            None => self.eocd_offset,
        }
    }
}

/// A local file header loaded on demand, with its trailing data descriptor
/// when the entry carries one and the open mode may need to rewrite it.
#[derive(Debug, Clone)]
pub(crate) struct LoadedLocalHeader {
    pub header: LocalFileHeader,
    pub descriptor: Option<DataDescriptor>,
    pub data_offset: u64,
}

pub(crate) struct Inner<S> {
    pub source: S,
    pub eocd: EocdState,
    pub entries: Option<Arc<Vec<Entry>>>,
    pub local_headers: HashMap<u64, LoadedLocalHeader>,
    pub thresholds: Zip64Thresholds,
}

impl<S: ByteSource> Inner<S> {
    /// Drop every cache a mutation can invalidate and re-locate the
    /// trailer from the bytes now on disk.
    pub(crate) async fn refresh_after_mutation(&mut self) -> Result<()> {
        self.entries = None;
        self.local_headers.clear();
        self.eocd = scan_eocd(&self.source).await?;
        Ok(())
    }

    /// Walk the central directory. With `include_hidden` the walk also
    /// yields encryption-flagged records, which public iteration hides.
    pub(crate) async fn walk_central_directory(
        &mut self,
        include_hidden: bool,
    ) -> Result<Vec<Entry>> {
        let cd_offset = self.eocd.cd_offset();
        let cd_size = self.eocd.cd_size();
        let total = self.eocd.total_entries();

        let mut cursor = SourceCursor::new(&self.source, cd_offset);
        let cd_bytes = cursor.read_vec(cd_size as usize).await?;

        let mut records = Cursor::new(&cd_bytes[..]);
        let mut entries = Vec::with_capacity(total.min(1 << 16) as usize);
        for index in 0..total {
            let Some(cds) = CentralDirectoryEntry::parse(&mut records) else {
                tracing::warn!(
                    index,
                    total,
                    "central directory record failed to decode, stopping iteration early"
                );
                break;
            };
            if !include_hidden && cds.flags & FLAG_ENCRYPTED != 0 {
                tracing::warn!(
                    path = %String::from_utf8_lossy(&cds.file_name),
                    "omitting encrypted entry from iteration"
                );
                continue;
            }
            entries.push(Entry::new(cds));
        }
        Ok(entries)
    }

    /// Load (and cache) the local header for `entry`, reading the trailing
    /// data descriptor when the entry uses one and `load_descriptor` asks
    /// for it.
    pub(crate) async fn load_local_header(
        &mut self,
        entry: &Entry,
        load_descriptor: bool,
    ) -> Result<LoadedLocalHeader> {
        let offset = entry.local_header_offset();
        if let Some(found) = self.local_headers.get(&offset) {
            return Ok(found.clone());
        }

        if offset + LocalFileHeader::FIXED_SIZE as u64 > self.source.len() {
            return Err(ZipError::LocalHeaderNotFound(offset));
        }
        let mut cursor = SourceCursor::new(&self.source, offset);
        let fixed = cursor.read_vec(LocalFileHeader::FIXED_SIZE).await?;
        let Some((mut header, name_len, extra_len)) = LocalFileHeader::parse_fixed(&fixed) else {
            return Err(ZipError::LocalHeaderNotFound(offset));
        };

        let name = cursor.read_vec(name_len).await?;
        let extra = cursor.read_vec(extra_len).await?;
        header.attach_tail(name, extra);

        let data_offset = cursor.position();
        if data_offset + entry.compressed_size() > self.source.len() {
            return Err(ZipError::InvalidLocalHeaderDataOffset);
        }

        let descriptor = if load_descriptor && header.flags & FLAG_DATA_DESCRIPTOR != 0 {
            cursor.seek(data_offset + entry.compressed_size());
            let remaining = self.source.len() - cursor.position();
            let take = remaining.min(DataDescriptor::MAX_SIZE as u64) as usize;
            let buf = cursor.read_vec(take).await?;
            DataDescriptor::parse(&buf, entry.has_zip64_sizes())
        } else {
            None
        };

        let loaded = LoadedLocalHeader {
            header,
            descriptor,
            data_offset,
        };
        self.local_headers.insert(offset, loaded.clone());
        Ok(loaded)
    }
}

/// A ZIP archive over a random-access byte source.
///
/// One archive owns one source. Public operations serialize on an internal
/// lock, so a shared archive is safe to use from multiple tasks; calls are
/// linearized in arrival order and never interleave seeks.
///
/// ```no_run
/// use rezip::{AccessMode, Archive};
///
/// # async fn example() -> rezip::Result<()> {
/// let archive = Archive::open("backup.zip", AccessMode::Read).await?;
/// for entry in archive.entries().await?.iter() {
///     println!("{} ({} bytes)", entry.path(), entry.uncompressed_size());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Archive<S: ByteSource> {
    pub(crate) inner: Mutex<Inner<S>>,
    mode: AccessMode,
}

impl<S: ByteSource> Archive<S> {
    pub(crate) async fn from_source(source: S, mode: AccessMode) -> Result<Self> {
        let eocd = match mode {
            AccessMode::Create => {
                let record = EndOfCentralDirectory {
                    disk_number: 0,
                    cd_start_disk: 0,
                    entries_on_disk: 0,
                    total_entries: 0,
                    cd_size: 0,
                    cd_offset: 0,
                    comment: Vec::new(),
                };
                let mut cursor = SourceCursor::new(&source, 0);
                cursor.write_all(&record.encode()).await?;
                source.flush().await?;
                EocdState {
                    eocd: record,
                    eocd_offset: 0,
                    zip64: None,
                }
            }
            AccessMode::Read | AccessMode::Update => scan_eocd(&source).await?,
        };

        tracing::debug!(
            ?mode,
            entries = eocd.total_entries(),
            len = source.len(),
            "opened archive"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                source,
                eocd,
                entries: None,
                local_headers: HashMap::new(),
                thresholds: Zip64Thresholds::default(),
            }),
            mode,
        })
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// All entries in central-directory order. Encrypted entries are
    /// omitted; a corrupt record terminates the walk early rather than
    /// failing it. The list is cached until the next mutation.
    pub async fn entries(&self) -> Result<Arc<Vec<Entry>>> {
        let mut inner = self.inner.lock().await;
        if let Some(cached) = &inner.entries {
            return Ok(Arc::clone(cached));
        }
        let list = Arc::new(inner.walk_central_directory(false).await?);
        inner.entries = Some(Arc::clone(&list));
        Ok(list)
    }

    /// The first entry whose path equals `path`. Duplicate paths are legal
    /// in ZIP; the first one wins.
    pub async fn get(&self, path: &str) -> Result<Option<Entry>> {
        Ok(self
            .entries()
            .await?
            .iter()
            .find(|entry| entry.path() == path)
            .cloned())
    }

    /// Archive comment carried in the EOCD, preserved across mutations.
    pub async fn comment(&self) -> Vec<u8> {
        self.inner.lock().await.eocd.eocd.comment.clone()
    }

    pub(crate) fn is_writable_mode(&self) -> bool {
        !matches!(self.mode, AccessMode::Read)
    }

    /// Lower the ZIP64 promotion thresholds. Intended for tests that need
    /// promotion without multi-gigabyte fixtures.
    #[doc(hidden)]
    pub async fn force_zip64_thresholds(&self, size: u64, offset: u64, entries: u64) {
        let mut inner = self.inner.lock().await;
        inner.thresholds = Zip64Thresholds {
            size,
            offset,
            entries,
        };
    }
}

impl Archive<FileSource> {
    /// Open a file-backed archive.
    ///
    /// `Read` and `Update` require an existing, well-formed archive;
    /// `Create` writes a minimal empty archive and fails if the path
    /// already exists.
    pub async fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let source = match mode {
            AccessMode::Read => FileSource::open(path)?,
            AccessMode::Create => FileSource::create_new(path)?,
            AccessMode::Update => FileSource::open_rw(path)?,
        };
        Self::from_source(source, mode).await
    }
}

impl Archive<MemorySource> {
    /// Open an archive over an in-memory buffer.
    ///
    /// `data` seeds the buffer for `Read`/`Update`; `Create` starts from
    /// an empty buffer and ignores any seed.
    pub async fn open_in_memory(data: Option<Vec<u8>>, mode: AccessMode) -> Result<Self> {
        let source = match mode {
            AccessMode::Read => MemorySource::new(data.unwrap_or_default(), false),
            AccessMode::Update => MemorySource::new(data.unwrap_or_default(), true),
            AccessMode::Create => MemorySource::new(Vec::new(), true),
        };
        Self::from_source(source, mode).await
    }

    /// Snapshot of the archive bytes.
    pub async fn data(&self) -> Vec<u8> {
        self.inner.lock().await.source.to_vec()
    }

    /// Consume the archive, returning the backing buffer.
    pub async fn into_data(self) -> Vec<u8> {
        self.inner.into_inner().source.into_vec()
    }
}

impl Archive<HttpRangeSource> {
    /// Open a remote archive over HTTP Range requests, read-only.
    pub async fn open_url(url: impl Into<String>) -> Result<Self> {
        let source = HttpRangeSource::new(url.into()).await?;
        Self::from_source(source, AccessMode::Read).await
    }
}

/// Locate the EOCD (and the ZIP64 trailer chain when present) by scanning
/// backward from the end of the source.
pub(crate) async fn scan_eocd<S: ByteSource + ?Sized>(source: &S) -> Result<EocdState> {
    let len = source.len();
    if len < EndOfCentralDirectory::FIXED_SIZE as u64 {
        return Err(ZipError::MissingEndOfCentralDirectoryRecord);
    }

    // Fast path: no archive comment, so the EOCD sits exactly at the end.
    let fixed_offset = len - EndOfCentralDirectory::FIXED_SIZE as u64;
    let mut cursor = SourceCursor::new(source, fixed_offset);
    let tail = cursor.read_vec(EndOfCentralDirectory::FIXED_SIZE).await?;
    let located = match EndOfCentralDirectory::parse_fixed(&tail) {
        Some((record, 0)) => Some((record, fixed_offset)),
        _ => None,
    };

    let (eocd, eocd_offset) = match located {
        Some(found) => found,
        None => scan_eocd_with_comment(source, len).await?,
    };

    let zip64 = if eocd.needs_zip64() {
        Some(read_zip64_trailer(source, eocd_offset).await?)
    } else {
        None
    };

    let state = EocdState {
        eocd,
        eocd_offset,
        zip64,
    };

    validate_directory_bounds(&state)?;
    Ok(state)
}

/// Slow path: the comment pushes the EOCD away from the end. Search the
/// maximal window (22 + 65535 bytes) backward for a signature whose
/// comment length agrees with its position.
async fn scan_eocd_with_comment<S: ByteSource + ?Sized>(
    source: &S,
    len: u64,
) -> Result<(EndOfCentralDirectory, u64)> {
    let fixed = EndOfCentralDirectory::FIXED_SIZE;
    let window = (fixed as u64 + u16::MAX as u64).min(len);
    let start = len - window;

    let mut cursor = SourceCursor::new(source, start);
    let buf = cursor.read_vec(window as usize).await?;

    for i in (0..buf.len().saturating_sub(fixed - 1)).rev() {
        let Some((mut record, comment_len)) = EndOfCentralDirectory::parse_fixed(&buf[i..]) else {
            continue;
        };
        if comment_len == buf.len() - i - fixed {
            record.comment = buf[i + fixed..].to_vec();
            return Ok((record, start + i as u64));
        }
    }

    Err(ZipError::MissingEndOfCentralDirectoryRecord)
}

/// Read the ZIP64 locator directly before the EOCD, then the ZIP64 record
/// it points at. The record must sit exactly where the locator and its own
/// size say it does.
async fn read_zip64_trailer<S: ByteSource + ?Sized>(
    source: &S,
    eocd_offset: u64,
) -> Result<Zip64State> {
    let locator_size = Zip64EocdLocator::SIZE as u64;
    let record_size = Zip64EndOfCentralDirectory::SIZE as u64;
    if eocd_offset < locator_size + record_size {
        return Err(ZipError::MissingEndOfCentralDirectoryRecord);
    }

    let locator_offset = eocd_offset - locator_size;
    let mut cursor = SourceCursor::new(source, locator_offset);
    let locator_bytes = cursor.read_vec(Zip64EocdLocator::SIZE).await?;
    let locator = Zip64EocdLocator::parse(&locator_bytes)
        .ok_or(ZipError::MissingEndOfCentralDirectoryRecord)?;

    if locator.eocd64_offset != locator_offset - record_size {
        return Err(ZipError::MissingEndOfCentralDirectoryRecord);
    }

    cursor.seek(locator.eocd64_offset);
    let record_bytes = cursor.read_vec(Zip64EndOfCentralDirectory::SIZE).await?;
    let record = Zip64EndOfCentralDirectory::parse(&record_bytes)
        .ok_or(ZipError::MissingEndOfCentralDirectoryRecord)?;

    Ok(Zip64State {
        record,
        record_offset: locator.eocd64_offset,
    })
}

fn validate_directory_bounds(state: &EocdState) -> Result<()> {
    let cd_offset = state.cd_offset();
    let cd_size = state.cd_size();
    let total = state.total_entries();
    let trailer = state.trailer_offset();

    if cd_size > trailer {
        return Err(ZipError::InvalidCentralDirectorySize);
    }
    if cd_offset + cd_size > trailer {
        return Err(ZipError::InvalidCentralDirectoryOffset);
    }
    if total * CentralDirectoryEntry::FIXED_SIZE as u64 > cd_size {
        return Err(ZipError::InvalidCentralDirectoryEntryCount);
    }
    Ok(())
}
