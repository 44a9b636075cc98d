//! Chunked compression pipelines.
//!
//! Producer and consumer sides share one shape: data moves in
//! `buffer_size` slices, CRC32 accumulates over the uncompressed bytes,
//! and cancellation is polled at every chunk boundary.

use crc32fast::Hasher;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Result, ZipError};
use crate::io::{ByteSource, SourceCursor};
use crate::progress::Progress;

fn poll_cancel(progress: Option<&Progress>) -> Result<()> {
    if progress.is_some_and(Progress::is_cancelled) {
        return Err(ZipError::Cancelled);
    }
    Ok(())
}

/// Stream `len` raw bytes from the cursor to the consumer.
pub(crate) async fn copy_stored<S, F>(
    cursor: &mut SourceCursor<'_, S>,
    len: u64,
    buffer_size: usize,
    mut crc: Option<&mut Hasher>,
    progress: Option<&Progress>,
    consumer: &mut F,
) -> Result<()>
where
    S: ByteSource + ?Sized,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut remaining = len;
    while remaining > 0 {
        poll_cancel(progress)?;
        let take = remaining.min(buffer_size as u64) as usize;
        let chunk = cursor.read_vec(take).await?;
        if let Some(hasher) = crc.as_deref_mut() {
            hasher.update(&chunk);
        }
        consumer(&chunk)?;
        if let Some(p) = progress {
            p.add_completed(take as u64);
        }
        remaining -= take as u64;
    }
    Ok(())
}

/// Inflate `compressed_len` bytes from the cursor, delivering decoded
/// chunks to the consumer. Decoded output beyond `out_budget` means the
/// stream disagrees with the entry's recorded size and fails as corrupt.
/// `stop_at` short-circuits the pump once that many decoded bytes have
/// been seen (ranged extraction); the budget check still applies up to
/// that point. Returns the number of decoded bytes delivered.
pub(crate) async fn inflate<S, F>(
    cursor: &mut SourceCursor<'_, S>,
    compressed_len: u64,
    out_budget: u64,
    stop_at: Option<u64>,
    buffer_size: usize,
    mut crc: Option<&mut Hasher>,
    progress: Option<&Progress>,
    consumer: &mut F,
) -> Result<u64>
where
    S: ByteSource + ?Sized,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut inflater = Decompress::new(false);
    let mut out = vec![0u8; buffer_size];
    let mut input: Vec<u8> = Vec::new();
    let mut offset = 0usize;
    let mut in_remaining = compressed_len;
    let mut total_out = 0u64;

    loop {
        poll_cancel(progress)?;

        if offset == input.len() && in_remaining > 0 {
            let take = in_remaining.min(buffer_size as u64) as usize;
            input = cursor.read_vec(take).await?;
            in_remaining -= take as u64;
            offset = 0;
        }
        let eof = in_remaining == 0 && offset == input.len();
        let flush = if eof {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater
            .decompress(&input[offset..], &mut out, flush)
            .map_err(|_| ZipError::CorruptedData)?;
        let consumed = (inflater.total_in() - before_in) as usize;
        let produced = (inflater.total_out() - before_out) as usize;
        offset += consumed;

        if produced > 0 {
            total_out += produced as u64;
            if total_out > out_budget {
                return Err(ZipError::CorruptedData);
            }
            let chunk = &out[..produced];
            if let Some(hasher) = crc.as_deref_mut() {
                hasher.update(chunk);
            }
            consumer(chunk)?;
            if let Some(p) = progress {
                p.add_completed(produced as u64);
            }
        }

        if stop_at.is_some_and(|limit| total_out >= limit) {
            return Ok(total_out);
        }
        match status {
            Status::StreamEnd => return Ok(total_out),
            Status::Ok | Status::BufError => {
                // A finish call that neither consumes nor produces will
                // never terminate: the stream is truncated or garbled.
                if eof && consumed == 0 && produced == 0 {
                    return Err(ZipError::CorruptedData);
                }
            }
        }
    }
}

/// Pull `uncompressed_size` bytes from the provider and write them to the
/// cursor uncompressed. Returns `(bytes_written, crc32)`.
pub(crate) async fn store_from_provider<S, P>(
    cursor: &mut SourceCursor<'_, S>,
    uncompressed_size: u64,
    buffer_size: usize,
    progress: Option<&Progress>,
    provider: &mut P,
) -> Result<(u64, u32)>
where
    S: ByteSource + ?Sized,
    P: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    let mut hasher = Hasher::new();
    let mut position = 0u64;
    while position < uncompressed_size {
        poll_cancel(progress)?;
        let want = (uncompressed_size - position).min(buffer_size as u64) as usize;
        let chunk = provider(position, want)?;
        if chunk.len() != want {
            return Err(ZipError::InvalidEntrySize);
        }
        hasher.update(&chunk);
        cursor.write_all(&chunk).await?;
        position += want as u64;
        if let Some(p) = progress {
            p.add_completed(want as u64);
        }
    }
    Ok((position, hasher.finalize()))
}

/// Pull `uncompressed_size` bytes from the provider, deflate them, and
/// write the compressed stream to the cursor. Returns
/// `(compressed_bytes_written, crc32_of_uncompressed)`.
pub(crate) async fn deflate_from_provider<S, P>(
    cursor: &mut SourceCursor<'_, S>,
    uncompressed_size: u64,
    buffer_size: usize,
    progress: Option<&Progress>,
    provider: &mut P,
) -> Result<(u64, u32)>
where
    S: ByteSource + ?Sized,
    P: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    let mut deflater = Compress::new(Compression::default(), false);
    let mut hasher = Hasher::new();
    let mut out = vec![0u8; buffer_size];
    let mut position = 0u64;
    let mut written = 0u64;

    while position < uncompressed_size {
        poll_cancel(progress)?;
        let want = (uncompressed_size - position).min(buffer_size as u64) as usize;
        let chunk = provider(position, want)?;
        if chunk.len() != want {
            return Err(ZipError::InvalidEntrySize);
        }
        hasher.update(&chunk);

        let mut offset = 0usize;
        while offset < chunk.len() {
            let before_in = deflater.total_in();
            let before_out = deflater.total_out();
            deflater
                .compress(&chunk[offset..], &mut out, FlushCompress::None)
                .map_err(|_| ZipError::CorruptedData)?;
            offset += (deflater.total_in() - before_in) as usize;
            let produced = (deflater.total_out() - before_out) as usize;
            if produced > 0 {
                cursor.write_all(&out[..produced]).await?;
                written += produced as u64;
            }
        }

        position += want as u64;
        if let Some(p) = progress {
            p.add_completed(want as u64);
        }
    }

    loop {
        poll_cancel(progress)?;
        let before_out = deflater.total_out();
        let status = deflater
            .compress(&[], &mut out, FlushCompress::Finish)
            .map_err(|_| ZipError::CorruptedData)?;
        let produced = (deflater.total_out() - before_out) as usize;
        if produced > 0 {
            cursor.write_all(&out[..produced]).await?;
            written += produced as u64;
        }
        if status == Status::StreamEnd {
            break;
        }
    }

    Ok((written, hasher.finalize()))
}
