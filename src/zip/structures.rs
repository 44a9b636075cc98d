//! Fixed-layout ZIP records and their variable tails.
//!
//! All multi-byte integers are little-endian with no padding. Decoders
//! return `None` on a signature mismatch or a short buffer so the archive
//! layer can treat a corrupt tail as early termination rather than a hard
//! error; encoders produce the exact on-disk byte sequence.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4B50;
pub(crate) const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4B50;
pub(crate) const EOCD_SIGNATURE: u32 = 0x0605_4B50;
pub(crate) const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4B50;
pub(crate) const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;

pub(crate) const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// 32-bit fields holding this value defer to the ZIP64 extra field.
pub(crate) const SENTINEL_32: u32 = u32::MAX;
/// 16-bit entry counts holding this value defer to the ZIP64 EOCD record.
pub(crate) const SENTINEL_16: u16 = u16::MAX;

pub(crate) const FLAG_ENCRYPTED: u16 = 1 << 0;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
pub(crate) const FLAG_UTF8: u16 = 1 << 11;

/// Minimum version to extract an entry without ZIP64 structures.
pub(crate) const VERSION_DEFAULT: u16 = 20;
/// Version to extract once ZIP64 promotion has occurred.
pub(crate) const VERSION_ZIP64: u16 = 45;
/// UNIX host system, tool version 2.1.
pub(crate) const VERSION_MADE_BY_UNIX: u16 = 789;

/// Compression methods the engine materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Method 0, no compression.
    Stored,
    /// Method 8, RFC 1951 DEFLATE.
    Deflate,
    /// Anything else; entries using it cannot be extracted.
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// ZIP64 extended-information extra field (header id `0x0001`).
///
/// Carries the 64-bit value for each 32-bit record field that holds its
/// sentinel, in the fixed order uncompressed size, compressed size, local
/// header offset, disk number. Only sentinel-bearing fields are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_number_start: Option<u32>,
}

impl Zip64Extra {
    /// Scan `extra` for the ZIP64 field and pull the values the owning
    /// record's sentinels call for.
    pub(crate) fn parse(
        extra: &[u8],
        need_uncompressed: bool,
        need_compressed: bool,
        need_offset: bool,
        need_disk: bool,
    ) -> Option<Self> {
        let payload = find_extra_field(extra, ZIP64_EXTRA_FIELD_ID)?;
        let mut cursor = Cursor::new(payload);
        let mut out = Self::default();
        if need_uncompressed {
            out.uncompressed_size = cursor.read_u64::<LittleEndian>().ok();
        }
        if need_compressed {
            out.compressed_size = cursor.read_u64::<LittleEndian>().ok();
        }
        if need_offset {
            out.local_header_offset = cursor.read_u64::<LittleEndian>().ok();
        }
        if need_disk {
            out.disk_number_start = cursor.read_u32::<LittleEndian>().ok();
        }
        Some(out)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_header_offset.is_none()
            && self.disk_number_start.is_none()
    }

    /// Encode as a complete extra field (header id + data size + payload).
    pub(crate) fn to_field_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        if let Some(v) = self.uncompressed_size {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.compressed_size {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.local_header_offset {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.disk_number_start {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }
}

/// Locate one extra field's payload by header id.
pub(crate) fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut rest = extra;
    while rest.len() >= 4 {
        let field_id = u16::from_le_bytes([rest[0], rest[1]]);
        let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let body = rest.get(4..4 + size)?;
        if field_id == id {
            return Some(body);
        }
        rest = &rest[4 + size..];
    }
    None
}

/// Remove the ZIP64 field from an extra-field blob, keeping foreign fields.
pub(crate) fn strip_zip64_extra(extra: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    let mut rest = extra;
    while rest.len() >= 4 {
        let field_id = u16::from_le_bytes([rest[0], rest[1]]);
        let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let end = match rest.get(..4 + size) {
            Some(_) => 4 + size,
            None => break,
        };
        if field_id != ZIP64_EXTRA_FIELD_ID {
            out.extend_from_slice(&rest[..end]);
        }
        rest = &rest[end..];
    }
    out
}

/// Local File Header: 30 fixed bytes, then file name and extra fields.
#[derive(Debug, Clone)]
pub(crate) struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub zip64: Option<Zip64Extra>,
}

impl LocalFileHeader {
    pub(crate) const FIXED_SIZE: usize = 30;

    /// Parse the fixed prefix; returns the header (with empty tails) plus
    /// the tail lengths still to be read.
    pub(crate) fn parse_fixed(buf: &[u8]) -> Option<(Self, usize, usize)> {
        if buf.len() < Self::FIXED_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(buf);
        if cursor.read_u32::<LittleEndian>().ok()? != LOCAL_FILE_HEADER_SIGNATURE {
            return None;
        }
        let version_needed = cursor.read_u16::<LittleEndian>().ok()?;
        let flags = cursor.read_u16::<LittleEndian>().ok()?;
        let compression_method = cursor.read_u16::<LittleEndian>().ok()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>().ok()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>().ok()?;
        let crc32 = cursor.read_u32::<LittleEndian>().ok()?;
        let compressed_size = cursor.read_u32::<LittleEndian>().ok()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>().ok()?;
        let name_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>().ok()? as usize;

        let header = Self {
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: Vec::new(),
            extra_field: Vec::new(),
            zip64: None,
        };
        Some((header, name_len, extra_len))
    }

    /// Attach the variable tail and derive the ZIP64 view.
    pub(crate) fn attach_tail(&mut self, file_name: Vec<u8>, extra_field: Vec<u8>) {
        self.zip64 = Zip64Extra::parse(
            &extra_field,
            self.uncompressed_size == SENTINEL_32,
            self.compressed_size == SENTINEL_32,
            false,
            false,
        );
        self.file_name = file_name;
        self.extra_field = extra_field;
    }

    pub(crate) fn byte_len(&self) -> usize {
        Self::FIXED_SIZE + self.file_name.len() + self.extra_field.len()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out
    }
}

/// Central Directory Structure: 46 fixed bytes, then name, extras, comment.
#[derive(Debug, Clone)]
pub(crate) struct CentralDirectoryEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
    pub zip64: Option<Zip64Extra>,
}

impl CentralDirectoryEntry {
    pub(crate) const FIXED_SIZE: usize = 46;

    /// Decode one record from an in-memory central directory, advancing the
    /// cursor past its tail. `None` on signature mismatch or short data.
    pub(crate) fn parse(cursor: &mut Cursor<&[u8]>) -> Option<Self> {
        if cursor.read_u32::<LittleEndian>().ok()? != CENTRAL_DIRECTORY_SIGNATURE {
            return None;
        }
        let version_made_by = cursor.read_u16::<LittleEndian>().ok()?;
        let version_needed = cursor.read_u16::<LittleEndian>().ok()?;
        let flags = cursor.read_u16::<LittleEndian>().ok()?;
        let compression_method = cursor.read_u16::<LittleEndian>().ok()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>().ok()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>().ok()?;
        let crc32 = cursor.read_u32::<LittleEndian>().ok()?;
        let compressed_size = cursor.read_u32::<LittleEndian>().ok()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>().ok()?;
        let name_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let comment_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let disk_number_start = cursor.read_u16::<LittleEndian>().ok()?;
        let internal_attributes = cursor.read_u16::<LittleEndian>().ok()?;
        let external_attributes = cursor.read_u32::<LittleEndian>().ok()?;
        let local_header_offset = cursor.read_u32::<LittleEndian>().ok()?;

        let mut file_name = vec![0u8; name_len];
        cursor.read_exact(&mut file_name).ok()?;
        let mut extra_field = vec![0u8; extra_len];
        cursor.read_exact(&mut extra_field).ok()?;
        let mut comment = vec![0u8; comment_len];
        cursor.read_exact(&mut comment).ok()?;

        let zip64 = Zip64Extra::parse(
            &extra_field,
            uncompressed_size == SENTINEL_32,
            compressed_size == SENTINEL_32,
            local_header_offset == SENTINEL_32,
            disk_number_start == SENTINEL_16,
        );

        Some(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            file_name,
            extra_field,
            comment,
            zip64,
        })
    }

    pub(crate) fn byte_len(&self) -> usize {
        Self::FIXED_SIZE + self.file_name.len() + self.extra_field.len() + self.comment.len()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        out.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out.extend_from_slice(&self.comment);
        out
    }
}

/// End of Central Directory record: 22 fixed bytes plus the archive comment.
#[derive(Debug, Clone)]
pub(crate) struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub cd_start_disk: u16,
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub(crate) const FIXED_SIZE: usize = 22;

    /// Parse the fixed prefix; the comment length tells the caller how many
    /// trailing bytes belong to this record.
    pub(crate) fn parse_fixed(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < Self::FIXED_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(buf);
        if cursor.read_u32::<LittleEndian>().ok()? != EOCD_SIGNATURE {
            return None;
        }
        let record = Self {
            disk_number: cursor.read_u16::<LittleEndian>().ok()?,
            cd_start_disk: cursor.read_u16::<LittleEndian>().ok()?,
            entries_on_disk: cursor.read_u16::<LittleEndian>().ok()?,
            total_entries: cursor.read_u16::<LittleEndian>().ok()?,
            cd_size: cursor.read_u32::<LittleEndian>().ok()?,
            cd_offset: cursor.read_u32::<LittleEndian>().ok()?,
            comment: Vec::new(),
        };
        let comment_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        Some((record, comment_len))
    }

    pub(crate) fn needs_zip64(&self) -> bool {
        self.entries_on_disk == SENTINEL_16
            || self.total_entries == SENTINEL_16
            || self.cd_size == SENTINEL_32
            || self.cd_offset == SENTINEL_32
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::FIXED_SIZE + self.comment.len());
        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.cd_start_disk.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}

/// ZIP64 End of Central Directory record, 56 bytes.
#[derive(Debug, Clone)]
pub(crate) struct Zip64EndOfCentralDirectory {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub cd_start_disk: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub(crate) const SIZE: usize = 56;

    pub(crate) fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cursor = Cursor::new(buf);
        if cursor.read_u32::<LittleEndian>().ok()? != ZIP64_EOCD_SIGNATURE {
            return None;
        }
        let _record_size = cursor.read_u64::<LittleEndian>().ok()?;
        Some(Self {
            version_made_by: cursor.read_u16::<LittleEndian>().ok()?,
            version_needed: cursor.read_u16::<LittleEndian>().ok()?,
            disk_number: cursor.read_u32::<LittleEndian>().ok()?,
            cd_start_disk: cursor.read_u32::<LittleEndian>().ok()?,
            entries_on_disk: cursor.read_u64::<LittleEndian>().ok()?,
            total_entries: cursor.read_u64::<LittleEndian>().ok()?,
            cd_size: cursor.read_u64::<LittleEndian>().ok()?,
            cd_offset: cursor.read_u64::<LittleEndian>().ok()?,
        })
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&ZIP64_EOCD_SIGNATURE.to_le_bytes());
        // size of the remainder of this record
        out.extend_from_slice(&((Self::SIZE - 12) as u64).to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.cd_start_disk.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out
    }
}

/// ZIP64 End of Central Directory locator, 20 bytes.
#[derive(Debug, Clone)]
pub(crate) struct Zip64EocdLocator {
    pub eocd64_offset: u64,
}

impl Zip64EocdLocator {
    pub(crate) const SIZE: usize = 20;

    pub(crate) fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let mut cursor = Cursor::new(buf);
        if cursor.read_u32::<LittleEndian>().ok()? != ZIP64_LOCATOR_SIGNATURE {
            return None;
        }
        let _eocd64_disk = cursor.read_u32::<LittleEndian>().ok()?;
        let eocd64_offset = cursor.read_u64::<LittleEndian>().ok()?;
        let _total_disks = cursor.read_u32::<LittleEndian>().ok()?;
        Some(Self { eocd64_offset })
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&ZIP64_LOCATOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.eocd64_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out
    }
}

/// Post-data trailer carrying CRC and sizes for general-purpose bit 3
/// entries, 12 or 20 payload bytes with an optional leading signature.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// On-disk footprint, including the signature when present.
    pub byte_len: usize,
}

impl DataDescriptor {
    /// Largest possible descriptor: signature plus two 64-bit sizes.
    pub(crate) const MAX_SIZE: usize = 24;

    pub(crate) fn parse(buf: &[u8], zip64: bool) -> Option<Self> {
        let mut cursor = Cursor::new(buf);
        let mut byte_len = if zip64 { 20 } else { 12 };

        let first = cursor.read_u32::<LittleEndian>().ok()?;
        let crc32 = if first == DATA_DESCRIPTOR_SIGNATURE {
            byte_len += 4;
            cursor.read_u32::<LittleEndian>().ok()?
        } else {
            first
        };

        let (compressed_size, uncompressed_size) = if zip64 {
            (
                cursor.read_u64::<LittleEndian>().ok()?,
                cursor.read_u64::<LittleEndian>().ok()?,
            )
        } else {
            (
                cursor.read_u32::<LittleEndian>().ok()? as u64,
                cursor.read_u32::<LittleEndian>().ok()? as u64,
            )
        };

        Some(Self {
            crc32,
            compressed_size,
            uncompressed_size,
            byte_len,
        })
    }
}
