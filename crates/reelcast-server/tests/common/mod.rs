//! Shared test harness for integration tests.
//!
//! [`TestServer`] creates a temp video directory, builds an [`AppContext`]
//! around it with a fake thumbnail provider, and runs the real accept loop
//! on `127.0.0.1:0`. Requests are written as raw bytes over a `TcpStream`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use reelcast_core::config::Config;
use reelcast_core::{MetricsSnapshot, VideoId};
use reelcast_server::registry::VideoFile;
use reelcast_server::thumbnails::ThumbnailProvider;
use reelcast_server::{AppContext, Server};

/// Thumbnail provider that writes a fixed fake JPEG instead of running ffmpeg.
pub struct FakeThumbnails {
    pub dir: PathBuf,
}

pub const FAKE_JPEG: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg\xFF\xD9";

#[async_trait]
impl ThumbnailProvider for FakeThumbnails {
    async fn ensure_thumbnail(&self, video: &VideoFile) -> reelcast_core::Result<PathBuf> {
        let path = self.dir.join(format!("{}.jpg", video.id));
        tokio::fs::write(&path, FAKE_JPEG).await?;
        Ok(path)
    }
}

/// Deterministic file content: byte `i` is `(i * 31 + 7) % 256`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 256) as u8).collect()
}

/// A running server over a temp video directory.
pub struct TestServer {
    pub dir: tempfile::TempDir,
    pub addr: SocketAddr,
    pub ctx: AppContext,
    handle: Option<JoinHandle<MetricsSnapshot>>,
}

impl TestServer {
    /// Start with default config and the given `(file name, content)` videos.
    pub async fn start(videos: &[(&str, Vec<u8>)]) -> Self {
        Self::start_with(videos, |_| {}).await
    }

    /// Start after letting `tweak` adjust the config.
    pub async fn start_with(videos: &[(&str, Vec<u8>)], tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let video_dir = dir.path().join("videos");
        let thumb_dir = dir.path().join("thumbnails");
        std::fs::create_dir_all(&video_dir).unwrap();
        std::fs::create_dir_all(&thumb_dir).unwrap();
        for (name, content) in videos {
            std::fs::write(video_dir.join(name), content).unwrap();
        }

        let mut config = Config::default();
        config.server.listen = "127.0.0.1:0".into();
        config.library.video_dir = video_dir;
        config.thumbnails.dir = thumb_dir.clone();
        config.streaming.rate_limit_bytes_per_sec = 64 * 1024 * 1024;
        tweak(&mut config);

        let ctx = AppContext::with_thumbnails(config, Arc::new(FakeThumbnails { dir: thumb_dir }));
        ctx.registry.rescan().expect("initial scan failed");

        let server = Server::bind(ctx.clone()).await.expect("failed to bind");
        let addr = server.local_addr().expect("failed to get local addr");
        let handle = tokio::spawn(server.run());

        Self {
            dir,
            addr,
            ctx,
            handle: Some(handle),
        }
    }

    pub fn video_dir(&self) -> &Path {
        &self.ctx.config.library.video_dir
    }

    pub fn id_of(name: &str) -> VideoId {
        VideoId::from_file_name(name)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Cancel and wait for the drain to finish.
    pub async fn shutdown(&mut self) -> MetricsSnapshot {
        self.ctx.cancel.cancel();
        let handle = self.handle.take().expect("server already shut down");
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("server did not drain in time")
            .expect("server task panicked")
    }

    pub async fn get(&self, path: &str) -> RawResponse {
        self.request(&format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n"))
            .await
    }

    pub async fn get_range(&self, path: &str, range: &str) -> RawResponse {
        self.request(&format!(
            "GET {path} HTTP/1.1\r\nHost: test\r\nRange: {range}\r\n\r\n"
        ))
        .await
    }

    /// Send `raw` verbatim and read until the server closes.
    pub async fn request(&self, raw: &str) -> RawResponse {
        send_raw(self.addr, raw.as_bytes()).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
    }
}

/// A parsed response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has no header terminator");
        let head = std::str::from_utf8(&raw[..split]).expect("head is not UTF-8");
        let body = raw[split + 4..].to_vec();

        let mut lines = head.split("\r\n");
        let status_line = lines.next().expect("missing status line");
        let status = status_line
            .split(' ')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("bad status line");
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Self {
            status,
            headers,
            body,
        }
    }
}

pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.expect("failed to connect");
    stream.write_all(raw).await.expect("failed to send request");
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
        .await
        .expect("response timed out")
        .expect("failed to read response");
    RawResponse::parse(&buf)
}
