//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! server, library, streaming and thumbnail sections. Every section defaults
//! sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Locations searched when no explicit config path is given.
const DEFAULT_PATHS: &[&str] = &[
    "./reelcast.toml",
    "~/.config/reelcast/config.toml",
    "/etc/reelcast/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub library: LibraryConfig,
    pub streaming: StreamingConfig,
    pub thumbnails: ThumbnailConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("parse error: {e}")))
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise from the first default location
    /// that exists, otherwise return the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        for candidate in DEFAULT_PATHS {
            let expanded = shellexpand::tilde(candidate);
            let candidate = Path::new(expanded.as_ref());
            if candidate.exists() {
                tracing::info!("Using config file {}", candidate.display());
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found; using defaults");
        Ok(Self::default())
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.listen.parse::<SocketAddr>().is_err() {
            problems.push(format!(
                "server.listen '{}' is not a socket address",
                self.server.listen
            ));
        }
        if self.server.max_connections == 0 {
            problems.push("server.max_connections must be at least 1".to_string());
        }
        if self.streaming.chunk_size == 0 {
            problems.push("streaming.chunk_size must be at least 1".to_string());
        }
        if self.streaming.prefetch_size == 0 {
            problems.push("streaming.prefetch_size must be at least 1".to_string());
        }
        if self.streaming.rate_limit_bytes_per_sec == 0 {
            problems.push("streaming.rate_limit_bytes_per_sec must be at least 1".to_string());
        }
        if self.streaming.cleanup_interval_secs == 0 {
            problems.push("streaming.cleanup_interval_secs must be at least 1".to_string());
        }
        if !(1..=100).contains(&self.thumbnails.quality) {
            problems.push(format!(
                "thumbnails.quality {} is outside 1..=100",
                self.thumbnails.quality
            ));
        }
        if self.thumbnails.width == 0 {
            problems.push("thumbnails.width must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    /// The parsed listen address. Only meaningful after [`Config::validate`].
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Listener and socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Admission cap; the next accept waits while this many are in flight.
    pub max_connections: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4221".into(),
            max_connections: 100,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Where videos live and which files count as videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub video_dir: PathBuf,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            video_dir: PathBuf::from("./videos"),
            extensions: [
                "mp4", "webm", "mov", "mkv", "avi", "flv", "wmv", "m4v", "3gp", "ts", "mts",
                "m2ts",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Chunking, look-ahead and throttling for the stream loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub chunk_size: usize,
    pub prefetch_size: usize,
    pub cleanup_interval_secs: u64,
    pub rate_limit_bytes_per_sec: u32,
    pub keepalive_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            prefetch_size: 10 * 1024 * 1024,
            cleanup_interval_secs: 300,
            rate_limit_bytes_per_sec: 1024 * 1024,
            keepalive_secs: 30,
        }
    }
}

impl StreamingConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Thumbnail extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub dir: PathBuf,
    /// JPEG quality on a 1..=100 scale (higher is better).
    pub quality: u32,
    pub width: u32,
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./thumbnails"),
            quality: 75,
            width: 480,
            ffmpeg_path: None,
        }
    }
}

impl ThumbnailConfig {
    /// Map `quality` onto ffmpeg's `-q:v` scale, where 2 is best and 31 worst.
    pub fn ffmpeg_qscale(&self) -> u32 {
        let quality = self.quality.clamp(1, 100);
        31 - (quality - 1) * 29 / 99
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.server.listen, "0.0.0.0:4221");
        assert_eq!(cfg.server.max_connections, 100);
        assert_eq!(cfg.streaming.chunk_size, 65_536);
        assert_eq!(cfg.streaming.prefetch_size, 10 * 1024 * 1024);
        assert_eq!(cfg.streaming.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(cfg.server.read_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.thumbnails.quality, 75);
        assert_eq!(cfg.thumbnails.width, 480);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let cfg = Config::from_toml(
            r#"
            [server]
            listen = "127.0.0.1:9000"

            [streaming]
            chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.listen, "127.0.0.1:9000");
        assert_eq!(cfg.server.max_connections, 100);
        assert_eq!(cfg.streaming.chunk_size, 4096);
        assert_eq!(cfg.streaming.prefetch_size, 10 * 1024 * 1024);
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.library.video_dir, PathBuf::from("./videos"));
        assert!(cfg.library.extensions.iter().any(|e| e == "mkv"));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = Config::from_toml("[server\nlisten = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut cfg = Config::default();
        cfg.server.listen = "not an address".into();
        cfg.streaming.chunk_size = 0;
        cfg.thumbnails.quality = 0;
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("server.listen"));
        assert!(msg.contains("chunk_size"));
        assert!(msg.contains("quality"));
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/reelcast.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelcast.toml");
        std::fs::write(&path, "[server]\nmax_connections = 4\n").unwrap();
        let cfg = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(cfg.server.max_connections, 4);
    }

    #[test]
    fn qscale_spans_ffmpeg_range() {
        let mut t = ThumbnailConfig::default();
        t.quality = 100;
        assert_eq!(t.ffmpeg_qscale(), 2);
        t.quality = 1;
        assert_eq!(t.ffmpeg_qscale(), 31);
        t.quality = 75;
        let q = t.ffmpeg_qscale();
        assert!((2..=31).contains(&q));
    }
}
