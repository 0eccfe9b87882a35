//! Video registry.
//!
//! Walks the library directory, keeps every file with a configured video
//! extension in a map keyed by [`VideoId`], and answers lookups for the
//! router. A rescan replaces the map wholesale, so deleted files disappear.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;

use reelcast_core::config::LibraryConfig;
use reelcast_core::{Error, Result, VideoId};

/// A playable file known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoFile {
    pub id: VideoId,
    /// File name including extension.
    pub name: String,
    pub display_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Map-backed index of the library directory.
#[derive(Debug)]
pub struct VideoRegistry {
    root: PathBuf,
    extensions: Vec<String>,
    videos: RwLock<HashMap<VideoId, VideoFile>>,
}

impl VideoRegistry {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            root: config.video_dir.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            videos: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-walk the library directory. Returns the number of videos found.
    ///
    /// Blocking; call from `spawn_blocking` on the async side.
    pub fn rescan(&self) -> Result<usize> {
        if !self.root.is_dir() {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("video directory {} is missing", self.root.display()),
            )));
        }

        let mut found: HashMap<VideoId, VideoFile> = HashMap::new();

        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "Error walking video directory");
                    None
                }
            })
        {
            if !entry.file_type().is_file() || !self.is_video(entry.path()) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!("Skipping non UTF-8 file name {}", entry.path().display());
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "Cannot stat video");
                    continue;
                }
            };

            let id = VideoId::from_file_name(&name);
            if let Some(existing) = found.get(&id) {
                tracing::warn!(
                    id = %id,
                    kept = %existing.path.display(),
                    skipped = %entry.path().display(),
                    "Duplicate video file name"
                );
                continue;
            }

            let path = std::fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
            found.insert(
                id.clone(),
                VideoFile {
                    id,
                    display_name: display_name(&name),
                    name,
                    path,
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                },
            );
        }

        let count = found.len();
        *self.videos.write() = found;
        tracing::debug!(root = %self.root.display(), count, "Video directory scanned");
        Ok(count)
    }

    pub fn resolve(&self, id: &VideoId) -> Option<VideoFile> {
        self.videos.read().get(id).cloned()
    }

    /// All known videos ordered by display name.
    pub fn list(&self) -> Vec<VideoFile> {
        let mut videos: Vec<VideoFile> = self.videos.read().values().cloned().collect();
        videos.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        videos
    }

    pub fn len(&self) -> usize {
        self.videos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.read().is_empty()
    }

    fn is_video(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

/// Human-friendly title for a file name: extension dropped, separators
/// turned into spaces, whitespace collapsed.
pub fn display_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let spaced: String = stem
        .chars()
        .map(|c| match c {
            '.' | '_' | '-' | '[' | ']' | '(' | ')' => ' ',
            other => other,
        })
        .collect();
    let cleaned = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        file_name.to_string()
    } else {
        cleaned
    }
}

/// MIME type for a video path, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        "3gp" => "video/3gpp",
        "ts" | "mts" | "m2ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}
