//! Range-aware file streaming and attachment downloads

use std::io::{self, ErrorKind, SeekFrom};
use std::path::Path;

use axum::{
    body::{Body, Bytes},
    http::{header, StatusCode},
    response::Response,
};
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::MediaError;
use crate::media;
use crate::paths;

/// Inclusive byte window of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes in the window
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this window
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// What a `Range` header asks for, checked against the file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    Full,
    Partial(ByteRange),
    NotSatisfiable,
}

/// Interpret a `Range` header against `file_size`
///
/// Only `bytes=<start>-<end>?` is understood. Anything else (multi-range
/// lists, suffix ranges, other units, stray characters) is treated as if no
/// header had been sent. A well-formed range outside the file is not
/// satisfiable; the end is never clamped.
pub fn parse_range(header: Option<&str>, file_size: u64) -> RangeOutcome {
    let Some(value) = header else {
        return RangeOutcome::Full;
    };
    let Some((start, end)) = value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|ranges| ranges.split_once('-'))
    else {
        return RangeOutcome::Full;
    };

    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if start.is_empty() || !is_digits(start) || !is_digits(end) {
        return RangeOutcome::Full;
    }

    // Digits only, so a parse failure means the number overflowed
    let Ok(start) = start.parse::<u64>() else {
        return RangeOutcome::NotSatisfiable;
    };
    if start >= file_size {
        return RangeOutcome::NotSatisfiable;
    }

    let end = if end.is_empty() {
        file_size - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) => end,
            Err(_) => return RangeOutcome::NotSatisfiable,
        }
    };
    if end >= file_size || start > end {
        return RangeOutcome::NotSatisfiable;
    }

    RangeOutcome::Partial(ByteRange { start, end })
}

/// Stat `path` and require a regular file
pub(crate) async fn stat_file(path: &Path) -> Result<std::fs::Metadata, MediaError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if paths::is_missing(&e) => return Err(MediaError::NotFound("File")),
        Err(e) => return Err(MediaError::io("Reading file metadata", e)),
    };
    if !metadata.is_file() {
        return Err(MediaError::NotAFile);
    }
    Ok(metadata)
}

/// Stream a media file, honouring a single byte range
///
/// Errors before the first byte (missing file, bad range, open/seek failure)
/// are returned so the caller can answer with a status code. Failures after
/// that abort the body.
pub async fn stream_file(path: &Path, range: Option<&str>) -> Result<Response, MediaError> {
    let file_size = stat_file(path).await?.len();
    let mime_type = media::mime_for(path);
    let label = path.display().to_string();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "public, max-age=0");

    let response = match parse_range(range, file_size) {
        RangeOutcome::NotSatisfiable => {
            tracing::debug!("Unsatisfiable range {:?} for {} ({} bytes)", range, label, file_size);
            return Err(MediaError::RangeNotSatisfiable { file_size });
        }
        RangeOutcome::Full => {
            let file = open(path).await?;
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, file_size)
                .body(exact_length_body(file, file_size, label))
        }
        RangeOutcome::Partial(window) => {
            let mut file = open(path).await?;
            file.seek(SeekFrom::Start(window.start))
                .await
                .map_err(|e| MediaError::io("Seeking file", e))?;
            tracing::debug!("Serving {} of {}", window.content_range(file_size), label);
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, window.content_range(file_size))
                .header(header::CONTENT_LENGTH, window.length())
                .body(exact_length_body(file, window.length(), label))
        }
    };

    response.map_err(|e| MediaError::io("Building response", io::Error::new(ErrorKind::Other, e)))
}

/// Send a whole file as an attachment
pub async fn download_file(path: &Path) -> Result<Response, MediaError> {
    let file_size = stat_file(path).await?.len();
    let file = open(path).await?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&filename)
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, file_size)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(exact_length_body(file, file_size, path.display().to_string()))
        .map_err(|e| MediaError::io("Building response", io::Error::new(ErrorKind::Other, e)))
}

async fn open(path: &Path) -> Result<File, MediaError> {
    File::open(path)
        .await
        .map_err(|e| MediaError::io("Opening file", e))
}

/// Response body that yields exactly `length` bytes from `file` or fails
fn exact_length_body(file: File, length: u64, label: String) -> Body {
    Body::from_stream(exact_length_stream(file, length, label))
}

fn exact_length_stream(
    file: File,
    length: u64,
    label: String,
) -> impl Stream<Item = io::Result<Bytes>> {
    async_stream::try_stream! {
        let mut guard = TransferGuard::new(label, length);
        let mut chunks = ReaderStream::new(file.take(length));

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            guard.sent += chunk.len() as u64;
            yield chunk;
        }

        if guard.sent < length {
            Err::<(), io::Error>(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("file ended after {} of {} bytes", guard.sent, length),
            ))?;
        }
        guard.finished = true;
    }
}

/// Logs transfers that end before the last byte
///
/// The body stream owns the guard, so it drops when the client disconnects
/// and the stream (with its file handle) is released.
struct TransferGuard {
    label: String,
    expected: u64,
    sent: u64,
    finished: bool,
}

impl TransferGuard {
    fn new(label: String, expected: u64) -> Self {
        Self {
            label,
            expected,
            sent: 0,
            finished: false,
        }
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if self.finished {
            tracing::debug!("Finished sending {} bytes of {}", self.sent, self.label);
        } else {
            tracing::warn!(
                "Transfer of {} stopped after {} of {} bytes",
                self.label,
                self.sent,
                self.expected
            );
        }
    }
}
