mod common;

use common::{memory_archive, patterned, provider};
use rezip::{
    AccessMode, Archive, CompressionMethod, EntryOptions, EntryType, ExtractOptions, ZipError,
};

async fn archive_with_symlink(target: &[u8]) -> Archive<rezip::MemorySource> {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    archive
        .add_entry(
            "sub/link",
            EntryType::Symlink,
            target.len() as u64,
            &EntryOptions::default(),
            None,
            provider(target.to_vec()),
        )
        .await
        .unwrap();
    archive
}

#[cfg(unix)]
#[tokio::test]
async fn uncontained_symlink_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_with_symlink(b"../../etc/passwd").await;
    let entry = archive.get("sub/link").await.unwrap().unwrap();
    assert_eq!(entry.entry_type(), EntryType::Symlink);

    let result = archive
        .extract_into(&entry, dir.path(), &ExtractOptions::default(), None)
        .await;
    assert!(matches!(result, Err(ZipError::UncontainedSymlink)));
    assert!(!dir.path().join("sub/link").exists());
    assert!(!dir.path().join("sub").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn uncontained_symlink_materializes_with_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_with_symlink(b"../../etc/passwd").await;
    let entry = archive.get("sub/link").await.unwrap().unwrap();

    let options = ExtractOptions {
        allow_uncontained_symlinks: true,
        ..Default::default()
    };
    archive
        .extract_into(&entry, dir.path(), &options, None)
        .await
        .unwrap();

    let link = dir.path().join("sub/link");
    let target = std::fs::read_link(&link).unwrap();
    assert_eq!(target, std::path::PathBuf::from("../../etc/passwd"));
}

#[cfg(unix)]
#[tokio::test]
async fn contained_symlink_is_materialized() {
    let dir = tempfile::tempdir().unwrap();
    let archive = archive_with_symlink(b"sibling.txt").await;
    let entry = archive.get("sub/link").await.unwrap().unwrap();

    let crc = archive
        .extract_into(&entry, dir.path(), &ExtractOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(crc, entry.crc32());

    let target = std::fs::read_link(dir.path().join("sub/link")).unwrap();
    assert_eq!(target, std::path::PathBuf::from("sibling.txt"));
}

#[tokio::test]
async fn traversal_path_is_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let archive = memory_archive(&[(
        "../evil.txt",
        b"gotcha".to_vec(),
        CompressionMethod::Stored,
    )])
    .await;
    let entry = archive.get("../evil.txt").await.unwrap().unwrap();
    assert!(entry.enclosed_path().is_none());

    let result = archive
        .extract_into(&entry, dir.path(), &ExtractOptions::default(), None)
        .await;
    assert!(matches!(result, Err(ZipError::InvalidEntryPath)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
}

#[tokio::test]
async fn absolute_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = memory_archive(&[(
        "/tmp/evil.txt",
        b"gotcha".to_vec(),
        CompressionMethod::Stored,
    )])
    .await;
    let entry = archive.get("/tmp/evil.txt").await.unwrap().unwrap();

    let result = archive
        .extract_into(&entry, dir.path(), &ExtractOptions::default(), None)
        .await;
    assert!(matches!(result, Err(ZipError::InvalidEntryPath)));
}

#[tokio::test]
async fn encrypted_entries_are_omitted_from_iteration() {
    let bytes = memory_archive(&[
        ("secret.bin", patterned(300), CompressionMethod::Stored),
        ("open.bin", patterned(200), CompressionMethod::Stored),
    ])
    .await
    .into_data()
    .await;

    let mut bytes = bytes;
    // Set general-purpose bit 0 on the first entry, in both its local
    // header (flags at +6) and its directory record (flags at +8).
    bytes[6] |= 0x01;
    let eocd_offset = bytes.len() - 22;
    let cd_offset =
        u32::from_le_bytes(bytes[eocd_offset + 16..eocd_offset + 20].try_into().unwrap()) as usize;
    assert_eq!(&bytes[cd_offset..cd_offset + 4], b"PK\x01\x02");
    bytes[cd_offset + 8] |= 0x01;

    let archive = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entries = archive.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path(), "open.bin");
    assert!(archive.get("secret.bin").await.unwrap().is_none());
}

#[tokio::test]
async fn crc_mismatch_fails_and_withholds_final_chunk() {
    let data = patterned(100_000);
    let mut bytes = memory_archive(&[("blob.bin", data.clone(), CompressionMethod::Stored)])
        .await
        .into_data()
        .await;

    // Corrupt one payload byte. The stored entry's data begins right
    // after its 30-byte local header and 8-byte name.
    let data_start = 30 + "blob.bin".len();
    bytes[data_start + 50_000] ^= 0xFF;

    let archive = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entry = archive.get("blob.bin").await.unwrap().unwrap();

    let mut delivered = 0usize;
    let result = archive
        .extract(&entry, &ExtractOptions::default(), None, |chunk: &[u8]| {
            delivered += chunk.len();
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(ZipError::InvalidCrc32 { .. })));
    assert!(delivered < data.len(), "final chunk must be withheld");

    // Skipping verification delivers everything, corrupt byte included.
    let mut out = Vec::new();
    let options = ExtractOptions {
        skip_crc32: true,
        ..Default::default()
    };
    archive
        .extract(&entry, &options, None, |chunk: &[u8]| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(out.len(), data.len());
    assert_ne!(out, data);
}

#[tokio::test]
async fn corrupt_directory_terminates_iteration_early() {
    let mut bytes = memory_archive(&[
        ("a.bin", patterned(100), CompressionMethod::Stored),
        ("b.bin", patterned(100), CompressionMethod::Stored),
    ])
    .await
    .into_data()
    .await;

    // Garble the second directory record's signature.
    let eocd_offset = bytes.len() - 22;
    let cd_offset =
        u32::from_le_bytes(bytes[eocd_offset + 16..eocd_offset + 20].try_into().unwrap()) as usize;
    let second_record = cd_offset + 46 + "a.bin".len();
    bytes[second_record] ^= 0xFF;

    let archive = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entries = archive.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path(), "a.bin");
}

#[tokio::test]
async fn missing_eocd_is_reported() {
    let result = Archive::open_in_memory(Some(vec![0u8; 4096]), AccessMode::Read).await;
    assert!(matches!(
        result,
        Err(ZipError::MissingEndOfCentralDirectoryRecord)
    ));

    let tiny = Archive::open_in_memory(Some(vec![1, 2, 3]), AccessMode::Read).await;
    assert!(matches!(
        tiny,
        Err(ZipError::MissingEndOfCentralDirectoryRecord)
    ));
}

#[tokio::test]
async fn unknown_compression_method_is_rejected() {
    let mut bytes = memory_archive(&[("a.bin", patterned(64), CompressionMethod::Stored)])
        .await
        .into_data()
        .await;

    // Rewrite the method field (LFH +8, CDS +10) to an unsupported value.
    bytes[8] = 99;
    let eocd_offset = bytes.len() - 22;
    let cd_offset =
        u32::from_le_bytes(bytes[eocd_offset + 16..eocd_offset + 20].try_into().unwrap()) as usize;
    bytes[cd_offset + 10] = 99;

    let archive = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entry = archive.get("a.bin").await.unwrap().unwrap();
    let result = archive
        .extract(&entry, &ExtractOptions::default(), None, |_: &[u8]| Ok(()))
        .await;
    assert!(matches!(
        result,
        Err(ZipError::InvalidCompressionMethod(99))
    ));
}
