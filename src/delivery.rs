use bytes::Bytes;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::Stream;

use crate::error::ReplayError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Inclusive byte range of a clip file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Parses a single-range `Range` header against a file of `size` bytes.
///
/// `None` means the whole file should be sent. Multi-range requests are
/// answered with the first range only.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, ReplayError> {
    let Some(header) = header else {
        return Ok(None);
    };
    let invalid = || ReplayError::InvalidRange { size };

    let ranges = header.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    let first = ranges.split(',').next().unwrap_or_default().trim();
    let (start, end) = first.split_once('-').ok_or_else(invalid)?;
    let (start, end) = (start.trim(), end.trim());

    let range = if start.is_empty() {
        // Suffix form: the last N bytes.
        let suffix: u64 = end.parse().map_err(|_| invalid())?;
        if suffix == 0 || size == 0 {
            return Err(invalid());
        }
        ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        }
    } else {
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end = if end.is_empty() {
            size.saturating_sub(1)
        } else {
            end.parse::<u64>().map_err(|_| invalid())?.min(size.saturating_sub(1))
        };
        ByteRange { start, end }
    };

    if range.start >= size || range.start > range.end {
        return Err(invalid());
    }
    Ok(Some(range))
}

/// Streams `len` bytes of the file at `path`, starting at `start`.
pub fn file_stream(path: PathBuf, start: u64, len: u64) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::try_stream! {
        let mut file = tokio::fs::File::open(&path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut remaining = len;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let read = file.read(&mut buf[..want]).await?;
            if read == 0 {
                break;
            }
            remaining -= read as u64;
            yield Bytes::copy_from_slice(&buf[..read]);
        }
    }
}
