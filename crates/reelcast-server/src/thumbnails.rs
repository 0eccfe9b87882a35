//! On-demand thumbnail extraction.
//!
//! A thumbnail is a single JPEG frame taken one second into the video,
//! scaled to the configured width and cached as `<dir>/<id>.jpg`. Concurrent
//! requests for the same video share one ffmpeg run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::Command;

use reelcast_core::config::ThumbnailConfig;
use reelcast_core::{Error, Result, VideoId};

use crate::registry::VideoFile;

/// Longest an ffmpeg extraction may run before it is killed.
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of thumbnail images for videos.
#[async_trait]
pub trait ThumbnailProvider: Send + Sync {
    /// Return the path of a JPEG thumbnail for `video`, creating it if needed.
    async fn ensure_thumbnail(&self, video: &VideoFile) -> Result<PathBuf>;
}

/// [`ThumbnailProvider`] that shells out to ffmpeg and caches on disk.
#[derive(Debug)]
pub struct FfmpegThumbnails {
    dir: PathBuf,
    width: u32,
    qscale: u32,
    ffmpeg: Option<PathBuf>,
    generating: DashMap<VideoId, Arc<tokio::sync::Mutex<()>>>,
}

impl FfmpegThumbnails {
    /// Build from config. ffmpeg is taken from `ffmpeg_path` if set, else
    /// looked up on `PATH`.
    pub fn from_config(config: &ThumbnailConfig) -> Self {
        let ffmpeg = config
            .ffmpeg_path
            .clone()
            .or_else(|| which::which("ffmpeg").ok());
        match &ffmpeg {
            Some(path) => tracing::info!("Using ffmpeg at {}", path.display()),
            None => tracing::warn!("ffmpeg not found; thumbnails will be unavailable"),
        }

        Self {
            dir: config.dir.clone(),
            width: config.width,
            qscale: config.ffmpeg_qscale(),
            ffmpeg,
            generating: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location for a video's thumbnail.
    pub fn thumbnail_path(&self, id: &VideoId) -> PathBuf {
        self.dir.join(format!("{id}.jpg"))
    }

    /// Arguments passed to ffmpeg to write the frame of `input` to `output`.
    pub fn ffmpeg_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            "00:00:01".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            format!("scale={}:-1", self.width),
            "-q:v".into(),
            self.qscale.to_string(),
            "-f".into(),
            "image2".into(),
            "-y".into(),
            output.to_string_lossy().into_owned(),
        ]
    }

    async fn generate(&self, ffmpeg: &Path, video: &VideoFile, target: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let partial = target.with_extension("jpg.part");

        let mut cmd = Command::new(ffmpeg);
        cmd.args(self.ffmpeg_args(&video.path, &partial))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::tool("ffmpeg", format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(FFMPEG_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool("ffmpeg", format!("I/O error waiting for process: {e}")))
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(Error::tool(
                    "ffmpeg",
                    format!("timed out after {}s", FFMPEG_TIMEOUT.as_secs()),
                ));
            }
        };

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::tool(
                "ffmpeg",
                format!("exited with status {}: {}", output.status, stderr.trim()),
            ));
        }

        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }
}

#[async_trait]
impl ThumbnailProvider for FfmpegThumbnails {
    async fn ensure_thumbnail(&self, video: &VideoFile) -> Result<PathBuf> {
        let target = self.thumbnail_path(&video.id);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(target);
        }

        let ffmpeg = self
            .ffmpeg
            .as_deref()
            .ok_or_else(|| Error::tool("ffmpeg", "not found on PATH"))?;

        let lock = self
            .generating
            .entry(video.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another request may have finished while we waited.
        let result = if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            Ok(())
        } else {
            tracing::debug!(id = %video.id, path = %video.path.display(), "Generating thumbnail");
            self.generate(ffmpeg, video, &target).await
        };

        drop(_guard);
        self.generating
            .remove_if(&video.id, |_, l| Arc::strong_count(l) <= 2);

        result.map(|()| target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn provider(dir: &Path, ffmpeg: Option<PathBuf>) -> FfmpegThumbnails {
        let config = ThumbnailConfig {
            dir: dir.to_path_buf(),
            quality: 100,
            width: 320,
            ffmpeg_path: None,
        };
        let mut thumbs = FfmpegThumbnails::from_config(&config);
        thumbs.ffmpeg = ffmpeg;
        thumbs
    }

    fn video(path: PathBuf) -> VideoFile {
        VideoFile {
            id: VideoId::from_file_name("clip.mp4"),
            name: "clip.mp4".into(),
            display_name: "clip".into(),
            path,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn ffmpeg_arguments() {
        let thumbs = provider(Path::new("/thumbs"), None);
        let args = thumbs.ffmpeg_args(Path::new("/v/clip.mp4"), Path::new("/thumbs/x.jpg"));
        let joined = args.join(" ");
        assert!(joined.contains("-ss 00:00:01 -i /v/clip.mp4"));
        assert!(joined.contains("-frames:v 1"));
        assert!(joined.contains("-vf scale=320:-1"));
        assert!(joined.contains("-q:v 2"));
        assert!(joined.ends_with("-y /thumbs/x.jpg"));
    }

    #[tokio::test]
    async fn cached_thumbnail_is_reused_without_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = provider(dir.path(), None);
        let v = video(dir.path().join("clip.mp4"));
        let cached = thumbs.thumbnail_path(&v.id);
        std::fs::write(&cached, b"jpeg").unwrap();

        assert_eq!(thumbs.ensure_thumbnail(&v).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = provider(dir.path(), None);
        let err = thumbs
            .ensure_thumbnail(&video(dir.path().join("clip.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_ffmpeg_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores its arguments and exits 1.
        let Ok(fake) = which::which("false") else {
            return;
        };
        let thumbs = provider(dir.path(), Some(fake));
        let v = video(dir.path().join("clip.mp4"));
        let err = thumbs.ensure_thumbnail(&v).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(!thumbs.thumbnail_path(&v.id).exists());
        assert!(thumbs.generating.is_empty());
    }
}
