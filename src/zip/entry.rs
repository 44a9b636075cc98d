//! In-memory view of one archive entry.

use std::path::PathBuf;

use super::datetime::DosDateTime;
use super::path;
use super::structures::{
    CentralDirectoryEntry, CompressionMethod, FLAG_DATA_DESCRIPTOR, SENTINEL_32,
};

/// What an entry materializes as on extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;
const UNIX_HOST: u16 = 3;

/// One logical item inside an archive.
///
/// An `Entry` aggregates a central-directory record with the derived values
/// the rest of the engine needs: effective (ZIP64-aware) sizes and offset,
/// the interpreted path, and the entry type. It is immutable; mutating
/// operations take entries by reference and never hand back stale ones,
/// because every successful mutation invalidates the archive's entry list.
#[derive(Debug, Clone)]
pub struct Entry {
    cds: CentralDirectoryEntry,
    path: String,
}

impl Entry {
    pub(crate) fn new(cds: CentralDirectoryEntry) -> Self {
        // Entries written by this engine are UTF-8 (bit 11); foreign
        // archives get a lossy interpretation, matching tolerant readers.
        let path = String::from_utf8_lossy(&cds.file_name).into_owned();
        Self { cds, path }
    }

    /// The entry path as stored, interpreted as UTF-8.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw stored path bytes.
    pub fn raw_path(&self) -> &[u8] {
        &self.cds.file_name
    }

    /// The path made safe for extraction under a destination root.
    ///
    /// `None` when the stored path is absolute, contains NUL, or climbs out
    /// of the root via `..` components.
    pub fn enclosed_path(&self) -> Option<PathBuf> {
        path::enclosed_path(&self.path)
    }

    pub fn entry_type(&self) -> EntryType {
        if self.path.ends_with('/') || self.path.ends_with('\\') {
            return EntryType::Directory;
        }
        if self.made_by_unix() && (self.cds.external_attributes >> 16) & S_IFMT == S_IFLNK {
            return EntryType::Symlink;
        }
        EntryType::File
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.cds.compression_method)
    }

    pub fn compressed_size(&self) -> u64 {
        if self.cds.compressed_size == SENTINEL_32 {
            self.cds
                .zip64
                .and_then(|z| z.compressed_size)
                .unwrap_or(SENTINEL_32 as u64)
        } else {
            self.cds.compressed_size as u64
        }
    }

    pub fn uncompressed_size(&self) -> u64 {
        if self.cds.uncompressed_size == SENTINEL_32 {
            self.cds
                .zip64
                .and_then(|z| z.uncompressed_size)
                .unwrap_or(SENTINEL_32 as u64)
        } else {
            self.cds.uncompressed_size as u64
        }
    }

    /// Effective offset of the entry's local file header.
    pub fn local_header_offset(&self) -> u64 {
        if self.cds.local_header_offset == SENTINEL_32 {
            self.cds
                .zip64
                .and_then(|z| z.local_header_offset)
                .unwrap_or(SENTINEL_32 as u64)
        } else {
            self.cds.local_header_offset as u64
        }
    }

    pub fn crc32(&self) -> u32 {
        self.cds.crc32
    }

    pub fn uses_data_descriptor(&self) -> bool {
        self.cds.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Whether any field of this entry required ZIP64 promotion.
    pub fn is_zip64(&self) -> bool {
        self.cds.zip64.is_some()
    }

    /// Whether the size fields specifically are promoted; the descriptor
    /// width depends on this, not on offset promotion.
    pub(crate) fn has_zip64_sizes(&self) -> bool {
        self.cds.compressed_size == SENTINEL_32 || self.cds.uncompressed_size == SENTINEL_32
    }

    /// POSIX permission bits, when the entry was made on a UNIX host.
    pub fn unix_permissions(&self) -> Option<u32> {
        if self.made_by_unix() {
            Some((self.cds.external_attributes >> 16) & 0o7777)
        } else {
            None
        }
    }

    pub fn modification(&self) -> DosDateTime {
        DosDateTime::new(self.cds.last_mod_date, self.cds.last_mod_time)
    }

    pub fn comment(&self) -> &[u8] {
        &self.cds.comment
    }

    pub(crate) fn cds(&self) -> &CentralDirectoryEntry {
        &self.cds
    }

    fn made_by_unix(&self) -> bool {
        self.cds.version_made_by >> 8 == UNIX_HOST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::{FLAG_UTF8, VERSION_DEFAULT, VERSION_MADE_BY_UNIX};

    fn cds_with(name: &str, external: u32) -> CentralDirectoryEntry {
        CentralDirectoryEntry {
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: VERSION_DEFAULT,
            flags: FLAG_UTF8,
            compression_method: 0,
            last_mod_time: 0,
            last_mod_date: 0x21,
            crc32: 0,
            compressed_size: 10,
            uncompressed_size: 10,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: external,
            local_header_offset: 0,
            file_name: name.as_bytes().to_vec(),
            extra_field: Vec::new(),
            comment: Vec::new(),
            zip64: None,
        }
    }

    #[test]
    fn type_derivation() {
        assert_eq!(
            Entry::new(cds_with("dir/", 0o040_755 << 16)).entry_type(),
            EntryType::Directory
        );
        assert_eq!(
            Entry::new(cds_with("file.txt", 0o100_644 << 16)).entry_type(),
            EntryType::File
        );
        assert_eq!(
            Entry::new(cds_with("link", 0o120_777 << 16)).entry_type(),
            EntryType::Symlink
        );
    }

    #[test]
    fn symlink_bit_ignored_for_foreign_hosts() {
        let mut cds = cds_with("link", 0o120_777 << 16);
        cds.version_made_by = 0x0014; // FAT host
        assert_eq!(Entry::new(cds).entry_type(), EntryType::File);
    }

    #[test]
    fn permissions_extracted() {
        let entry = Entry::new(cds_with("file", 0o100_640 << 16));
        assert_eq!(entry.unix_permissions(), Some(0o640));
    }

    #[test]
    fn effective_sizes_prefer_zip64() {
        let mut cds = cds_with("big", 0o100_644 << 16);
        cds.compressed_size = SENTINEL_32;
        cds.uncompressed_size = SENTINEL_32;
        cds.zip64 = Some(crate::zip::structures::Zip64Extra {
            uncompressed_size: Some(5_000_000_000),
            compressed_size: Some(4_000_000_000),
            ..Default::default()
        });
        let entry = Entry::new(cds);
        assert_eq!(entry.uncompressed_size(), 5_000_000_000);
        assert_eq!(entry.compressed_size(), 4_000_000_000);
        assert!(entry.is_zip64());
    }
}
