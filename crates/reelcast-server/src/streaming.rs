//! Range-aware video streaming.
//!
//! [`serve_video`] resolves the ID, answers the `Range` header, and then
//! drives [`stream_range`], which copies the requested bytes to the socket in
//! `chunk_size` pieces. Each piece comes from the client's prefetch window
//! when it covers the current offset and from the file otherwise; only file
//! reads are throttled.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use reelcast_core::{Error, Result, VideoId};

use crate::connection::Connection;
use crate::context::AppContext;
use crate::protocol::{Request, ResponseHead};
use crate::registry::content_type_for;
use crate::socket;

// ---------------------------------------------------------------------------
// Range parsing
// ---------------------------------------------------------------------------

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a file of `size` bytes.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

/// What part of the file a request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// No usable `Range` header: send everything with 200.
    Full,
    /// Send this slice with 206.
    Partial(ByteRange),
}

enum RawRange {
    FromTo(u64, u64),
    From(u64),
    Suffix(u64),
}

fn parse_range_syntax(value: &str) -> Option<RawRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, false) => Some(RawRange::Suffix(end.parse().ok()?)),
        (false, true) => Some(RawRange::From(start.parse().ok()?)),
        (false, false) => Some(RawRange::FromTo(start.parse().ok()?, end.parse().ok()?)),
        (true, true) => None,
    }
}

/// Interpret a `Range` header against a file of `size` bytes.
///
/// Malformed headers (including multi-range requests) are ignored. Ranges
/// that are well-formed but select nothing yield
/// [`Error::RangeNotSatisfiable`].
pub fn parse_range(header: Option<&str>, size: u64) -> Result<RangeSpec> {
    let Some(value) = header else {
        return Ok(RangeSpec::Full);
    };
    let Some(raw) = parse_range_syntax(value) else {
        tracing::debug!(range = value, "Ignoring malformed Range header");
        return Ok(RangeSpec::Full);
    };

    let unsatisfiable = Error::RangeNotSatisfiable { size };
    if size == 0 {
        return Err(unsatisfiable);
    }
    let last = size - 1;

    let range = match raw {
        RawRange::Suffix(0) => return Err(unsatisfiable),
        RawRange::Suffix(n) => ByteRange {
            start: size.saturating_sub(n),
            end: last,
        },
        RawRange::From(start) if start < size => ByteRange { start, end: last },
        RawRange::FromTo(start, end) if start < size && start <= end => ByteRange {
            start,
            end: end.min(last),
        },
        _ => return Err(unsatisfiable),
    };
    Ok(RangeSpec::Partial(range))
}

// ---------------------------------------------------------------------------
// Stream loop
// ---------------------------------------------------------------------------

/// How a [`stream_range`] call ended.
#[derive(Debug)]
pub enum StreamEnd {
    Complete,
    Cancelled,
    Disconnected(std::io::Error),
    TimedOut,
    /// The file ended before the range did.
    Truncated { at: u64 },
    Failed(std::io::Error),
}

fn classify(err: std::io::Error) -> StreamEnd {
    if socket::is_disconnect(&err) {
        StreamEnd::Disconnected(err)
    } else {
        StreamEnd::Failed(err)
    }
}

async fn write_chunk<W>(
    writer: &mut W,
    data: &[u8],
    deadline: Duration,
    cancel: &CancellationToken,
) -> Option<StreamEnd>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        result = tokio::time::timeout(deadline, writer.write_all(data)) => match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(classify(e)),
            Err(_) => Some(StreamEnd::TimedOut),
        },
        _ = cancel.cancelled() => Some(StreamEnd::Cancelled),
    }
}

/// Copy bytes `[range.start, range.end]` of `source` to `writer`.
///
/// `file` is an open handle on `source` at any position; it is repositioned
/// as needed. `file_size` bounds prefetching.
pub async fn stream_range<W>(
    writer: &mut W,
    file: &mut File,
    source: &Path,
    file_size: u64,
    range: ByteRange,
    conn: &mut Connection,
    ctx: &AppContext,
) -> StreamEnd
where
    W: AsyncWrite + Unpin,
{
    let chunk_size = ctx.config.streaming.chunk_size.max(1);
    let write_timeout = ctx.config.server.write_timeout();
    let key = conn.cache_key();
    let end = range.end + 1;

    let mut buf = vec![0u8; chunk_size];
    let mut offset = range.start;
    let mut file_pos: Option<u64> = None;

    while offset < end {
        if ctx.cancel.is_cancelled() {
            return StreamEnd::Cancelled;
        }
        let remaining = end - offset;
        let window = ctx
            .prefetch
            .lookup(&key)
            .filter(|w| w.source() == source);

        let hit = window
            .as_deref()
            .and_then(|w| w.slice_from(source, offset, remaining.min(chunk_size as u64)));

        let written = match hit {
            Some(slice) => {
                ctx.metrics.record_prefetch_hit();
                if let Some(stop) = write_chunk(writer, &slice, write_timeout, &ctx.cancel).await {
                    return stop;
                }
                slice.len()
            }
            None => {
                ctx.metrics.record_prefetch_miss();
                if file_pos != Some(offset) {
                    if let Err(e) = file.seek(SeekFrom::Start(offset)).await {
                        return StreamEnd::Failed(e);
                    }
                }
                let want = remaining.min(buf.len() as u64) as usize;
                let n = match file.read(&mut buf[..want]).await {
                    Ok(0) => return StreamEnd::Truncated { at: offset },
                    Ok(n) => n,
                    Err(e) => return StreamEnd::Failed(e),
                };
                file_pos = Some(offset + n as u64);

                tokio::select! {
                    _ = conn.limiter().acquire(n) => {}
                    _ = ctx.cancel.cancelled() => return StreamEnd::Cancelled,
                }
                if let Some(stop) = write_chunk(writer, &buf[..n], write_timeout, &ctx.cancel).await {
                    return stop;
                }
                n
            }
        };

        ctx.metrics.add_bytes(written as u64);
        offset += written as u64;
        conn.touch();

        let window_exhausted = window.as_ref().map_or(true, |w| offset >= w.end());
        if window_exhausted && offset < file_size && offset < end {
            ctx.prefetch.trigger(key, source, offset);
        }
    }

    match tokio::time::timeout(write_timeout, writer.flush()).await {
        Ok(Ok(())) => StreamEnd::Complete,
        Ok(Err(e)) => classify(e),
        Err(_) => StreamEnd::TimedOut,
    }
}

// ---------------------------------------------------------------------------
// Route handler
// ---------------------------------------------------------------------------

/// Serve `GET /videos/{id}`.
///
/// Errors are returned only before the response head is written; once
/// streaming starts, failures are logged here and the connection is closed.
pub async fn serve_video(
    stream: &mut TcpStream,
    conn: &mut Connection,
    request: &Request,
    id: &VideoId,
    ctx: &AppContext,
) -> Result<()> {
    let video = ctx
        .registry
        .resolve(id)
        .ok_or_else(|| Error::not_found("video", id))?;

    let mut file = File::open(&video.path).await.map_err(|e| {
        tracing::debug!(id = %id, path = %video.path.display(), error = %e, "Cannot open video");
        Error::not_found("video", id)
    })?;
    let size = file.metadata().await?.len();

    let spec = parse_range(request.header("range"), size)?;
    let (status, range) = match spec {
        RangeSpec::Full => (200, (size > 0).then(|| ByteRange { start: 0, end: size - 1 })),
        RangeSpec::Partial(r) => (206, Some(r)),
    };
    let content_length = range.map_or(0, |r| r.len());

    let mut head = ResponseHead::new(status)
        .header("Content-Type", content_type_for(&video.path))
        .header("Content-Length", content_length)
        .header("Accept-Ranges", "bytes");
    if let RangeSpec::Partial(r) = spec {
        head = head.header("Content-Range", r.content_range(size));
    }

    if let Err(e) = socket::set_keepalive(stream, ctx.config.streaming.keepalive()) {
        tracing::debug!(peer = %conn.peer(), error = %e, "Failed to enable keep-alive");
    }

    let write_timeout = ctx.config.server.write_timeout();
    if let Some(stop) = write_chunk(stream, &head.encode(), write_timeout, &ctx.cancel).await {
        log_stream_end(conn, id, &stop, 0);
        return Ok(());
    }

    let Some(range) = range else {
        return Ok(());
    };

    tracing::debug!(
        peer = %conn.peer(),
        id = %id,
        start = range.start,
        end = range.end,
        size,
        "Streaming video"
    );

    let stop = stream_range(stream, &mut file, &video.path, size, range, conn, ctx).await;
    log_stream_end(conn, id, &stop, range.len());
    Ok(())
}

fn log_stream_end(conn: &Connection, id: &VideoId, stop: &StreamEnd, requested: u64) {
    let peer = conn.peer();
    match stop {
        StreamEnd::Complete => {
            tracing::debug!(peer = %peer, id = %id, bytes = requested, "Stream complete")
        }
        StreamEnd::Cancelled => tracing::debug!(peer = %peer, id = %id, "Stream cancelled"),
        StreamEnd::Disconnected(e) => {
            tracing::debug!(peer = %peer, id = %id, error = %e, "Client disconnected")
        }
        StreamEnd::TimedOut => tracing::warn!(peer = %peer, id = %id, "Write deadline exceeded"),
        StreamEnd::Truncated { at } => {
            tracing::warn!(peer = %peer, id = %id, offset = at, "Video ended before range")
        }
        StreamEnd::Failed(e) => tracing::error!(peer = %peer, id = %id, error = %e, "Stream failed"),
    }
}
