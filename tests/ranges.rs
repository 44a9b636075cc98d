mod common;

use common::{memory_archive, patterned};
use rezip::{CompressionMethod, EntryType, ZipError, DEFAULT_BUFFER_SIZE};

async fn collect_range(
    archive: &rezip::Archive<rezip::MemorySource>,
    entry: &rezip::Entry,
    range: std::ops::Range<u64>,
) -> Vec<u8> {
    let mut out = Vec::new();
    archive
        .extract_range(entry, range, DEFAULT_BUFFER_SIZE, |chunk: &[u8]| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    out
}

#[tokio::test]
async fn ranged_extract_of_deflated_entry() {
    let n = 1024 * 1024u64;
    let data = patterned(n as usize);
    let archive = memory_archive(&[("big.bin", data.clone(), CompressionMethod::Deflate)]).await;
    let entry = archive.get("big.bin").await.unwrap().unwrap();

    for (lo, hi) in [(0, 100), (500_000, 500_100), (n - 10, n)] {
        let out = collect_range(&archive, &entry, lo..hi).await;
        assert_eq!(out, &data[lo as usize..hi as usize], "range {lo}..{hi}");
    }
}

#[tokio::test]
async fn ranged_extract_of_stored_entry() {
    let data = patterned(200_000);
    let archive = memory_archive(&[("raw.bin", data.clone(), CompressionMethod::Stored)]).await;
    let entry = archive.get("raw.bin").await.unwrap().unwrap();

    for (lo, hi) in [(0u64, 1u64), (77_777, 99_999), (199_990, 200_000)] {
        let out = collect_range(&archive, &entry, lo..hi).await;
        assert_eq!(out, &data[lo as usize..hi as usize], "range {lo}..{hi}");
    }
}

#[tokio::test]
async fn empty_range_yields_nothing() {
    let data = patterned(1000);
    let archive = memory_archive(&[("raw.bin", data, CompressionMethod::Stored)]).await;
    let entry = archive.get("raw.bin").await.unwrap().unwrap();
    let out = collect_range(&archive, &entry, 500..500).await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn range_bounds_are_checked() {
    let data = patterned(1000);
    let archive = memory_archive(&[("raw.bin", data, CompressionMethod::Stored)]).await;
    let entry = archive.get("raw.bin").await.unwrap().unwrap();

    let too_far = archive
        .extract_range(&entry, 900..1001, DEFAULT_BUFFER_SIZE, |_: &[u8]| Ok(()))
        .await;
    assert!(matches!(too_far, Err(ZipError::RangeOutOfBounds)));

    let inverted = archive
        .extract_range(&entry, 600..500, DEFAULT_BUFFER_SIZE, |_: &[u8]| Ok(()))
        .await;
    assert!(matches!(inverted, Err(ZipError::RangeOutOfBounds)));

    let zero_buffer = archive
        .extract_range(&entry, 0..10, 0, |_: &[u8]| Ok(()))
        .await;
    assert!(matches!(zero_buffer, Err(ZipError::InvalidBufferSize)));
}

#[tokio::test]
async fn range_of_directory_is_rejected() {
    let archive = rezip::Archive::open_in_memory(None, rezip::AccessMode::Create)
        .await
        .unwrap();
    archive
        .add_entry(
            "dir/",
            EntryType::Directory,
            0,
            &rezip::EntryOptions::default(),
            None,
            |_, _| Ok(Vec::new()),
        )
        .await
        .unwrap();
    let entry = archive.get("dir/").await.unwrap().unwrap();

    let result = archive
        .extract_range(&entry, 0..0, DEFAULT_BUFFER_SIZE, |_: &[u8]| Ok(()))
        .await;
    assert!(matches!(result, Err(ZipError::EntryIsNotAFile)));
}
