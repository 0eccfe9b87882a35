//! Shared application context.
//!
//! [`AppContext`] is cloned into every connection task. It wraps the
//! immutable configuration and the long-lived services in `Arc`s, plus the
//! cancellation token that drives shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use reelcast_core::config::Config;
use reelcast_core::Metrics;

use crate::prefetch::PrefetchCache;
use crate::registry::VideoRegistry;
use crate::thumbnails::{FfmpegThumbnails, ThumbnailProvider};

/// Services shared by all connection handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<VideoRegistry>,
    pub prefetch: Arc<PrefetchCache>,
    pub thumbnails: Arc<dyn ThumbnailProvider>,
    pub cancel: CancellationToken,
}

impl AppContext {
    /// Build a context with the ffmpeg thumbnail provider.
    pub fn new(config: Config) -> Self {
        let thumbnails: Arc<dyn ThumbnailProvider> =
            Arc::new(FfmpegThumbnails::from_config(&config.thumbnails));
        Self::with_thumbnails(config, thumbnails)
    }

    /// Build a context around a caller-supplied thumbnail provider.
    pub fn with_thumbnails(config: Config, thumbnails: Arc<dyn ThumbnailProvider>) -> Self {
        let prefetch = PrefetchCache::new(
            config.streaming.prefetch_size,
            config.streaming.cleanup_interval(),
        );
        Self {
            registry: Arc::new(VideoRegistry::new(&config.library)),
            prefetch: Arc::new(prefetch),
            metrics: Arc::new(Metrics::new()),
            thumbnails,
            cancel: CancellationToken::new(),
            config: Arc::new(config),
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("listen", &self.config.server.listen)
            .field("videos", &self.registry.len())
            .field("prefetch", &self.prefetch)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
