//! Run-scoped settings and mutable flags threaded through the pipeline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::transcode::{FfmpegTranscoder, Transcoder};
use crate::transfer::{LinkRewrite, RetryPolicy, ScratchDir};

/// Images are transferred in batches of this size; other kinds go one by one.
pub const IMAGE_BATCH_SIZE: usize = 50;

/// Everything a strategy needs besides the two instance handles.
///
/// One context lives for one run. The async-download breaker starts closed
/// and, once tripped, stays tripped until the context is dropped.
pub struct SyncContext {
    pub scratch: ScratchDir,
    pub fast_mode: bool,
    pub link_rewrite: Option<LinkRewrite>,
    pub transcode_videos: bool,
    pub transcoder: Arc<dyn Transcoder>,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    async_downloads: AtomicBool,
}

impl SyncContext {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch: ScratchDir::new(scratch_root),
            fast_mode: false,
            link_rewrite: None,
            transcode_videos: false,
            transcoder: Arc::new(FfmpegTranscoder::default()),
            retry: RetryPolicy::default(),
            batch_size: IMAGE_BATCH_SIZE,
            async_downloads: AtomicBool::new(true),
        }
    }

    pub fn with_fast_mode(mut self, fast_mode: bool, link_rewrite: Option<LinkRewrite>) -> Self {
        self.fast_mode = fast_mode;
        self.link_rewrite = link_rewrite;
        self
    }

    pub fn with_transcoding(mut self, enabled: bool, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcode_videos = enabled;
        self.transcoder = transcoder;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Disables concurrent downloads from the start.
    pub fn with_async_downloads(self, enabled: bool) -> Self {
        self.async_downloads.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn async_downloads_enabled(&self) -> bool {
        self.async_downloads.load(Ordering::SeqCst)
    }

    /// Falls back to sequential downloads for the rest of the run.
    pub fn trip_async_breaker(&self) {
        if self.async_downloads.swap(false, Ordering::SeqCst) {
            warn!(
                "Concurrent downloads failed; using sequential downloads for the rest of the run"
            );
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            scratch = %self.scratch.root().display(),
            fast_mode = self.fast_mode,
            link_rewrite = ?self.link_rewrite.as_ref().map(|l| l.bucket_path()),
            transcode_videos = self.transcode_videos,
            max_attempts = self.retry.max_attempts,
            batch_size = self.batch_size,
            "Sync context ready"
        );
    }
}
