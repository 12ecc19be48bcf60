//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline converts pages.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a logger, a Tokio channel, or a terminal progress bar
//! without the library knowing anything about how the host application
//! communicates. The trait is `Send + Sync` because pages are converted
//! concurrently by a worker pool.
//!
//! Note on totals: when a page is split into N fragments, `total` grows by
//! N-1 mid-flight, so consumers must treat it as a moving target rather than
//! a constant.

use std::sync::Arc;

/// Called by the conversion pipeline as it completes each page.
///
/// Implementations must be `Send + Sync` (pages complete on worker tasks in
/// arbitrary order). All methods have default no-op implementations so
/// callers only override what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is planned.
    ///
    /// `total_pages` is the number of pages in the source chapter; splitting
    /// may raise the total reported by later events.
    fn on_chapter_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called each time a page (or fragment) finishes converting.
    ///
    /// # Arguments
    /// * `message`   — human-readable status line
    /// * `completed` — pages finished so far
    /// * `total`     — pages expected in total, adjusted upward on splits
    fn on_progress(&self, message: &str, completed: u32, total: u32) {
        let _ = (message, completed, total);
    }

    /// Called once after the pipeline has joined all workers.
    ///
    /// `converted` counts pages present in the output (including fallback
    /// encodings and pass-throughs); `errors` counts per-page failures.
    fn on_chapter_complete(&self, converted: usize, errors: usize) {
        let _ = (converted, errors);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in
/// [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct TrackingCallback {
        started_total: AtomicUsize,
        completed: AtomicU32,
        last_total: AtomicU32,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_chapter_start(&self, total_pages: usize) {
            self.started_total.store(total_pages, Ordering::SeqCst);
        }

        fn on_progress(&self, _message: &str, completed: u32, total: u32) {
            self.completed.store(completed, Ordering::SeqCst);
            self.last_total.store(total, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_chapter_start(5);
        cb.on_progress("converting", 1, 5);
        cb.on_chapter_complete(5, 0);
    }

    #[test]
    fn tracking_callback_sees_growing_total() {
        let cb = TrackingCallback {
            started_total: AtomicUsize::new(0),
            completed: AtomicU32::new(0),
            last_total: AtomicU32::new(0),
        };
        cb.on_chapter_start(2);
        cb.on_progress("page 0 done", 1, 2);
        // page 1 split into 3 fragments: total moves from 2 to 4
        cb.on_progress("fragment done", 2, 4);
        assert_eq!(cb.started_total.load(Ordering::SeqCst), 2);
        assert_eq!(cb.completed.load(Ordering::SeqCst), 2);
        assert_eq!(cb.last_total.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ConversionProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_chapter_start(10);
        cb.on_progress("x", 1, 10);
    }
}
