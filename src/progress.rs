//! Progress-callback trait for per-item pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] via [`crate::ScanOptions::progress`]
//! or [`crate::TranslateOptions::progress`] to receive events as the scanner
//! works through pages or the translator works through paragraphs. An "item"
//! is a page for the scanner and a paragraph for the translator.
//!
//! # Example
//!
//! ```rust
//! use bookscan::{PipelineProgress, ScanOptions};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingProgress {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgress for CountingProgress {
//!     fn on_item_complete(&self, item: usize, total: usize, chars: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{item}/{total} done ({chars} chars)");
//!     }
//! }
//!
//! let options = ScanOptions {
//!     progress: Some(Arc::new(CountingProgress { completed: AtomicUsize::new(0) })),
//!     ..ScanOptions::default()
//! };
//! ```

use std::sync::Arc;

/// Called by the scanner and translator as they process each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgress: Send + Sync {
    /// Called once before the first item.
    fn on_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before the provider request for an item is sent.
    ///
    /// `item` is 1-indexed within the current run.
    fn on_item_start(&self, item: usize, total: usize) {
        let _ = (item, total);
    }

    /// Called when an item is done; `chars` is the length of the produced text.
    fn on_item_complete(&self, item: usize, total: usize, chars: usize) {
        let _ = (item, total, chars);
    }

    /// Called when an item fails after all retries are exhausted.
    fn on_item_error(&self, item: usize, total: usize, error: &str) {
        let _ = (item, total, error);
    }

    /// Called once after the run ends.
    fn on_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

/// Convenience alias matching the type stored in the pipeline options.
pub type ProgressCallback = Arc<dyn PipelineProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        total: AtomicUsize,
    }

    impl PipelineProgress for Tracking {
        fn on_start(&self, total: usize) {
            self.total.store(total, Ordering::SeqCst);
        }

        fn on_item_start(&self, _item: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _item: usize, _total: usize, _chars: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _item: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_start(2);
        cb.on_item_start(1, 2);
        cb.on_item_complete(1, 2, 10);
        cb.on_item_error(2, 2, "boom");
        cb.on_complete(2, 1);
    }

    #[test]
    fn tracking_receives_events() {
        let t = Tracking::default();
        t.on_start(2);
        t.on_item_start(1, 2);
        t.on_item_complete(1, 2, 5);
        t.on_item_start(2, 2);
        t.on_item_error(2, 2, "timeout");

        assert_eq!(t.total.load(Ordering::SeqCst), 2);
        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
    }
}
