//! Error taxonomy for archive operations.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Everything that can go wrong while reading or modifying an archive.
///
/// Structural variants describe malformed on-disk state, integrity variants
/// cover checksum and decoder failures, and policy variants reject operations
/// the archive's mode or the caller's parameters do not permit. I/O errors
/// from the underlying byte source are propagated unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ZipError {
    #[error("end of central directory record not found")]
    MissingEndOfCentralDirectoryRecord,

    #[error("no local file header at offset {0}")]
    LocalHeaderNotFound(u64),

    #[error("unsupported compression method {0}")]
    InvalidCompressionMethod(u16),

    #[error("entry path is empty, malformed, or escapes the destination")]
    InvalidEntryPath,

    #[error("entry size is inconsistent with the archive layout")]
    InvalidEntrySize,

    #[error("central directory size is inconsistent")]
    InvalidCentralDirectorySize,

    #[error("central directory offset is out of bounds")]
    InvalidCentralDirectoryOffset,

    #[error("central directory entry count is inconsistent")]
    InvalidCentralDirectoryEntryCount,

    #[error("local file header is truncated or malformed")]
    InvalidLocalHeaderSize,

    #[error("local file header data offset is out of bounds")]
    InvalidLocalHeaderDataOffset,

    #[error("CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    InvalidCrc32 { stored: u32, computed: u32 },

    #[error("compressed data is corrupt")]
    CorruptedData,

    #[error("archive is not readable")]
    UnreadableArchive,

    #[error("archive is not writable")]
    UnwritableArchive,

    #[error("buffer size must be greater than zero")]
    InvalidBufferSize,

    #[error("requested range is out of bounds for the entry")]
    RangeOutOfBounds,

    #[error("entry is not a file")]
    EntryIsNotAFile,

    #[error("symlink target resolves outside the destination")]
    UncontainedSymlink,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("http transfer failed: {0}")]
    Http(#[from] reqwest::Error),
}
