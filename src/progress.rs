//! Progress-callback trait for per-document extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as a batch run moves through its documents. The CLI uses this to
//! drive a terminal progress bar; a service could forward the same events to
//! a channel or a job table.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2mcq::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     questions: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, _filename: &str, questions: usize, _skipped: usize) {
//!         self.questions.fetch_add(questions, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { questions: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch runner as it processes each document.
///
/// Implementations must be `Send + Sync`: documents are processed
/// concurrently, so `on_document_*` may be called from different tasks at
/// once. All methods have no-op defaults.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any document is processed.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when work on a document begins.
    ///
    /// # Arguments
    /// * `filename` — source PDF file name
    /// * `index`    — 1-based position in the batch
    /// * `total`    — documents in the batch
    fn on_document_start(&self, filename: &str, index: usize, total: usize) {
        let _ = (filename, index, total);
    }

    /// Called when a document produced a saved result.
    ///
    /// # Arguments
    /// * `questions` — accepted questions
    /// * `skipped`   — questions dropped during validation
    fn on_document_complete(&self, filename: &str, questions: usize, skipped: usize) {
        let _ = (filename, questions, skipped);
    }

    /// Called when a document failed and produced no output.
    fn on_document_error(&self, filename: &str, error: &str) {
        let _ = (filename, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
