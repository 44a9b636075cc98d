//! # rezip
//!
//! A random-access ZIP archive engine: read, create, update, and remove
//! entries without rewriting what doesn't change, over local files,
//! in-memory buffers, or remote files fetched with HTTP Range requests.
//!
//! ## Features
//!
//! - Faithful ZIP binary format support: local headers, central directory,
//!   data descriptors, and the ZIP64 extensions for large archives
//! - Streaming extraction with chunked DEFLATE decoding and CRC32
//!   verification, including ranged extraction of entry byte slices
//! - Transactional updates: appending rolls back byte-for-byte on failure
//!   or cancellation, removal rewrites into a sidecar that atomically
//!   replaces the original
//! - Safety policies: path containment for extracted entries and symlink
//!   targets, bounded allocation, encrypted entries never materialized
//!
//! ## Example
//!
//! ```no_run
//! use rezip::{Archive, ExtractOptions};
//!
//! #[tokio::main]
//! async fn main() -> rezip::Result<()> {
//!     // Works identically over a local file or a remote URL.
//!     let archive = Archive::open_url("https://example.com/archive.zip").await?;
//!
//!     for entry in archive.entries().await?.iter() {
//!         println!("{} ({} bytes)", entry.path(), entry.uncompressed_size());
//!     }
//!
//!     if let Some(entry) = archive.get("README.md").await? {
//!         let mut content = Vec::new();
//!         archive
//!             .extract(&entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
//!                 content.extend_from_slice(chunk);
//!                 Ok(())
//!             })
//!             .await?;
//!         println!("{}", String::from_utf8_lossy(&content));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod io;
mod progress;
mod zip;

pub use error::{Result, ZipError};
pub use io::{ByteSource, FileSource, HttpRangeSource, MemorySource};
pub use progress::Progress;
pub use zip::{
    AccessMode, Archive, CompressionMethod, DosDateTime, Entry, EntryOptions, EntryType,
    ExtractOptions, DEFAULT_BUFFER_SIZE, DEFAULT_DIRECTORY_PERMISSIONS, DEFAULT_FILE_PERMISSIONS,
};
