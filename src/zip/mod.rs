mod add;
mod archive;
mod compression;
mod datetime;
mod entry;
mod extract;
mod path;
mod remove;
mod structures;

pub use add::{EntryOptions, DEFAULT_DIRECTORY_PERMISSIONS, DEFAULT_FILE_PERMISSIONS};
pub use archive::{AccessMode, Archive, DEFAULT_BUFFER_SIZE};
pub use datetime::DosDateTime;
pub use entry::{Entry, EntryType};
pub use extract::ExtractOptions;
pub use structures::CompressionMethod;
