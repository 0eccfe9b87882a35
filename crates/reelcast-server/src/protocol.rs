//! Minimal HTTP/1.x framing on a raw socket.
//!
//! Only what the streaming routes need: one request head per connection,
//! case-insensitive header lookup, and hand-assembled response heads. Every
//! response closes the connection.

use reelcast_core::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the request line plus headers.
pub const MAX_HEAD_BYTES: u64 = 8 * 1024;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Raw request line and headers, before the request line is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request target without its query string.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

impl RequestHead {
    /// Validate the request line: exactly three non-empty space-separated
    /// tokens once surrounding whitespace is trimmed.
    pub fn parse(self) -> Result<Request> {
        let parts: Vec<&str> = self.request_line.trim().split(' ').collect();
        match parts.as_slice() {
            [method, target, version]
                if !method.is_empty() && !target.is_empty() && !version.is_empty() =>
            {
                Ok(Request {
                    method: (*method).to_string(),
                    target: (*target).to_string(),
                    version: (*version).to_string(),
                    headers: self.headers,
                })
            }
            _ => Err(Error::BadRequest(format!(
                "malformed request line: {:?}",
                self.request_line
            ))),
        }
    }
}

/// Read the request line and headers up to the blank line.
///
/// Header lines without a colon are skipped. A peer that closes before
/// sending anything yields [`Error::BadRequest`].
pub async fn read_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(MAX_HEAD_BYTES);
    let mut line = Vec::with_capacity(256);

    let n = limited.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(Error::BadRequest("connection closed before request".into()));
    }
    let request_line = decode_line(&line)?;

    let mut headers = Vec::new();
    loop {
        line.clear();
        let n = limited.read_until(b'\n', &mut line).await?;
        if n == 0 {
            if limited.limit() == 0 {
                return Err(Error::BadRequest("request head too large".into()));
            }
            break;
        }
        let text = decode_line(&line)?;
        if text.is_empty() {
            break;
        }
        if let Some((name, value)) = text.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(RequestHead {
        request_line,
        headers,
    })
}

fn decode_line(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::BadRequest("request head is not valid UTF-8".into()))?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Reason phrase for the status codes this server emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        400 => "Bad Request",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Status line plus headers. `Connection: close` is always appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    headers: Vec<(&'static str, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl ToString) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        out.into_bytes()
    }
}

/// Write a complete response with an in-memory body.
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = ResponseHead::new(status)
        .header("Content-Type", content_type)
        .header("Content-Length", body.len());
    writer.write_all(&head.encode()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Write the plain-text response for `err`.
pub async fn write_error<W>(writer: &mut W, err: &Error) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let status = err.http_status();
    let body = match err {
        // Internal details stay in the log.
        Error::Io { .. } | Error::Tool { .. } | Error::Internal(_) | Error::Config(_) => {
            reason_phrase(status).to_string()
        }
        other => other.to_string(),
    };

    let mut head = ResponseHead::new(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Content-Length", body.len());
    if let Error::RangeNotSatisfiable { size } = err {
        head = head.header("Content-Range", format!("bytes */{size}"));
    }
    writer.write_all(&head.encode()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await
}
