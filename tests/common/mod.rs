#![allow(dead_code)]

use rezip::{
    AccessMode, Archive, CompressionMethod, Entry, EntryOptions, EntryType, ExtractOptions,
    MemorySource, Result,
};

/// A provider that serves slices of an owned buffer.
pub fn provider(data: Vec<u8>) -> impl FnMut(u64, usize) -> Result<Vec<u8>> {
    move |position, len| {
        let start = position as usize;
        Ok(data[start..start + len].to_vec())
    }
}

/// Deterministic pseudo-random bytes; compresses poorly enough to be
/// interesting but reproduces across runs.
pub fn patterned(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Text-like compressible content.
pub fn compressible(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Build an in-memory archive containing the given file entries.
pub async fn memory_archive(
    entries: &[(&str, Vec<u8>, CompressionMethod)],
) -> Archive<MemorySource> {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .expect("create in-memory archive");
    for (path, data, method) in entries {
        let options = EntryOptions {
            compression_method: *method,
            ..Default::default()
        };
        archive
            .add_entry(
                path,
                EntryType::File,
                data.len() as u64,
                &options,
                None,
                provider(data.clone()),
            )
            .await
            .expect("add entry");
    }
    archive
}

/// Extract an entry fully into memory.
pub async fn extract_to_vec(archive: &Archive<MemorySource>, entry: &Entry) -> (Vec<u8>, u32) {
    let mut out = Vec::new();
    let crc = archive
        .extract(entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .expect("extract entry");
    (out, crc)
}
