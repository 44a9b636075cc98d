mod common;

use common::{compressible, extract_to_vec, memory_archive, patterned, provider};
use rezip::{
    AccessMode, Archive, CompressionMethod, EntryOptions, EntryType, ExtractOptions, ZipError,
};

#[tokio::test]
async fn create_add_empty_file() {
    let archive = memory_archive(&[("empty.txt", Vec::new(), CompressionMethod::Stored)]).await;

    // Reopen from the serialized bytes.
    let bytes = archive.into_data().await;
    let reopened = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();

    let entry = reopened.get("empty.txt").await.unwrap().expect("entry");
    assert_eq!(entry.uncompressed_size(), 0);
    assert_eq!(entry.entry_type(), EntryType::File);

    let mut out = Vec::new();
    let crc = reopened
        .extract(&entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    assert!(out.is_empty());
    assert_eq!(crc, 0);
}

#[tokio::test]
async fn stored_roundtrip() {
    let data = patterned(100_000);
    let archive = memory_archive(&[("blob.bin", data.clone(), CompressionMethod::Stored)]).await;

    let entry = archive.get("blob.bin").await.unwrap().unwrap();
    assert_eq!(entry.compressed_size(), data.len() as u64);
    assert_eq!(entry.compression_method(), CompressionMethod::Stored);

    let (out, crc) = extract_to_vec(&archive, &entry).await;
    assert_eq!(out, data);
    assert_eq!(crc, crc32fast::hash(&data));
    assert_eq!(crc, entry.crc32());
}

#[tokio::test]
async fn deflate_roundtrip() {
    let data = compressible(256 * 1024);
    let archive = memory_archive(&[("fox.txt", data.clone(), CompressionMethod::Deflate)]).await;

    let entry = archive.get("fox.txt").await.unwrap().unwrap();
    assert!(entry.compressed_size() < data.len() as u64);
    assert_eq!(entry.uncompressed_size(), data.len() as u64);

    let (out, crc) = extract_to_vec(&archive, &entry).await;
    assert_eq!(out, data);
    assert_eq!(crc, entry.crc32());
}

#[tokio::test]
async fn large_deflate_roundtrip() {
    use rand::RngCore;

    // 20 MiB of random bytes pushes many compressor flush boundaries.
    let mut data = vec![0u8; 20 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut data);

    let archive = memory_archive(&[("large.bin", data.clone(), CompressionMethod::Deflate)]).await;
    let bytes = archive.into_data().await;

    let reopened = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entry = reopened.get("large.bin").await.unwrap().unwrap();
    assert_eq!(entry.uncompressed_size(), data.len() as u64);

    let mut out = Vec::new();
    let crc = reopened
        .extract(&entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(out.len(), data.len());
    assert_eq!(out, data);
    assert_eq!(crc, crc32fast::hash(&data));
}

#[tokio::test]
async fn consumer_chunks_respect_buffer_size() {
    let data = patterned(100_000);
    let archive = memory_archive(&[("blob.bin", data.clone(), CompressionMethod::Stored)]).await;
    let entry = archive.get("blob.bin").await.unwrap().unwrap();

    let options = ExtractOptions {
        buffer_size: 4096,
        ..Default::default()
    };
    let mut total = 0usize;
    archive
        .extract(&entry, &options, None, |chunk: &[u8]| {
            assert!(chunk.len() <= 4096);
            total += chunk.len();
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(total, data.len());
}

#[tokio::test]
async fn directory_entry_roundtrip() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    archive
        .add_entry(
            "assets",
            EntryType::Directory,
            0,
            &EntryOptions::default(),
            None,
            |_, _| Ok(Vec::new()),
        )
        .await
        .unwrap();

    // The stored path gains its trailing slash, which drives the type.
    let entry = archive.get("assets/").await.unwrap().expect("directory");
    assert_eq!(entry.entry_type(), EntryType::Directory);
    assert_eq!(entry.unix_permissions(), Some(0o755));

    let mut calls = 0;
    archive
        .extract(&entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
            calls += 1;
            assert!(chunk.is_empty());
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn duplicate_paths_first_wins() {
    let first = b"first contents".to_vec();
    let second = b"second contents".to_vec();
    let archive = memory_archive(&[
        ("dup.txt", first.clone(), CompressionMethod::Stored),
        ("dup.txt", second, CompressionMethod::Stored),
    ])
    .await;

    assert_eq!(archive.entries().await.unwrap().len(), 2);
    let entry = archive.get("dup.txt").await.unwrap().unwrap();
    let (out, _) = extract_to_vec(&archive, &entry).await;
    assert_eq!(out, first);
}

#[tokio::test]
async fn iteration_count_matches_directory() {
    let entries: Vec<(String, Vec<u8>)> = (0..25)
        .map(|i| (format!("file-{i:02}.bin"), patterned(100 + i)))
        .collect();

    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    for (path, data) in &entries {
        archive
            .add_entry(
                path,
                EntryType::File,
                data.len() as u64,
                &EntryOptions::default(),
                None,
                provider(data.clone()),
            )
            .await
            .unwrap();
    }

    let listed = archive.entries().await.unwrap();
    assert_eq!(listed.len(), entries.len());
    for (listed, (path, data)) in listed.iter().zip(&entries) {
        assert_eq!(listed.path(), path);
        assert_eq!(listed.uncompressed_size(), data.len() as u64);
    }
}

#[tokio::test]
async fn file_backed_archive_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backed.zip");
    let data = compressible(64 * 1024);

    let archive = Archive::open(&path, AccessMode::Create).await.unwrap();
    archive
        .add_entry(
            "doc.txt",
            EntryType::File,
            data.len() as u64,
            &EntryOptions {
                compression_method: CompressionMethod::Deflate,
                ..Default::default()
            },
            None,
            provider(data.clone()),
        )
        .await
        .unwrap();
    drop(archive);

    let reopened = Archive::open(&path, AccessMode::Read).await.unwrap();
    let entry = reopened.get("doc.txt").await.unwrap().unwrap();
    let mut out = Vec::new();
    reopened
        .extract(&entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn extract_to_path_writes_file_and_refuses_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let data = patterned(10_000);
    let archive = memory_archive(&[("out.bin", data.clone(), CompressionMethod::Stored)]).await;
    let entry = archive.get("out.bin").await.unwrap().unwrap();

    let target = dir.path().join("nested/dir/out.bin");
    let crc = archive
        .extract_to_path(&entry, &target, &ExtractOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(crc, entry.crc32());
    assert_eq!(std::fs::read(&target).unwrap(), data);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o644);
    }

    let again = archive
        .extract_to_path(&entry, &target, &ExtractOptions::default(), None)
        .await;
    assert!(matches!(again, Err(ZipError::Io(_))));
}

#[tokio::test]
async fn open_missing_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.zip");
    assert!(Archive::open(&missing, AccessMode::Read).await.is_err());
    assert!(Archive::open(&missing, AccessMode::Update).await.is_err());
}

#[tokio::test]
async fn create_refuses_existing_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exists.zip");
    std::fs::write(&path, b"occupied").unwrap();
    assert!(Archive::open(&path, AccessMode::Create).await.is_err());
}
