//! Error types for the cbz2webp library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Cbz2WebpError`] — **Fatal**: the chapter cannot be processed at all
//!   (unreadable archive, encoder backend unavailable, cancelled deadline).
//!   Returned as `Err(Cbz2WebpError)` from the top-level operations; nothing
//!   is written when one occurs.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (undecodable image,
//!   too tall for the target format, encode failure with no working fallback)
//!   but all other pages are fine. Collected into
//!   [`crate::converter::ChapterConversion::page_errors`] so callers can
//!   inspect partial success rather than losing the whole chapter to one bad
//!   page.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! page failure, log and continue, or collect all errors for a post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the cbz2webp library.
///
/// Page-level failures use [`PageError`] and are returned alongside the
/// partially converted chapter rather than propagated here.
#[derive(Debug, Error)]
pub enum Cbz2WebpError {
    // ── Archive errors ────────────────────────────────────────────────────
    /// The input archive is missing, unreadable, or not a valid zip.
    #[error("failed to open archive '{path}': {detail}")]
    ArchiveOpen { path: PathBuf, detail: String },

    /// An archive entry could not be streamed out.
    #[error("failed to read entry '{entry}' from '{path}': {detail}")]
    ArchiveRead {
        path: PathBuf,
        entry: String,
        detail: String,
    },

    /// Could not create the output archive or write an entry into it.
    #[error("failed to write output archive '{path}': {detail}")]
    OutputWrite { path: PathBuf, detail: String },

    // ── Converter errors ──────────────────────────────────────────────────
    /// No converter is registered for the requested format.
    #[error("unknown converter '{requested}', available options are {available}")]
    UnknownFormat {
        requested: String,
        available: String,
    },

    /// The encoder backend failed its one-time readiness probe.
    #[error("encoder backend unavailable: {0}")]
    EncoderUnavailable(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The conversion deadline expired or the caller cancelled. No partial
    /// result is produced.
    #[error("chapter conversion cancelled or deadline exceeded")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a worker task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The chapter conversion continues for the remaining pages; the aggregate
/// of these is returned next to the (possibly partial) result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    /// The page bytes could not be decoded as an image. The page is dropped.
    #[error("page {page}: failed to decode image: {detail}")]
    DecodeFailed { page: u16, detail: String },

    /// The page exceeds the target format's hard height ceiling and
    /// splitting was not requested. The page is passed through unconverted.
    #[error("page {page} is too tall [max: {max}px] to be converted to webp format")]
    TooTall { page: u16, height: u32, max: u32 },

    /// The target-format encode failed and so did the lossless fallback.
    /// The page is dropped from the output.
    #[error("page {page}: encoding failed: {detail}")]
    EncodeFailed { page: u16, detail: String },
}

impl PageError {
    /// Original index of the page this error refers to.
    pub fn page(&self) -> u16 {
        match self {
            PageError::DecodeFailed { page, .. }
            | PageError::TooTall { page, .. }
            | PageError::EncodeFailed { page, .. } => *page,
        }
    }

    /// Whether this error means the page was deliberately left untouched
    /// (still present in the output) rather than lost.
    ///
    /// Drivers typically treat ignored pages as an acceptable outcome and
    /// anything else as worth surfacing.
    pub fn is_ignored(&self) -> bool {
        matches!(self, PageError::TooTall { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_tall_display_mentions_page_and_ceiling() {
        let e = PageError::TooTall {
            page: 7,
            height: 20_000,
            max: 16_383,
        };
        let msg = e.to_string();
        assert!(msg.contains("page 7"), "got: {msg}");
        assert!(msg.contains("16383px"), "got: {msg}");
    }

    #[test]
    fn too_tall_is_ignored_others_are_not() {
        let tall = PageError::TooTall {
            page: 0,
            height: 17_000,
            max: 16_383,
        };
        let decode = PageError::DecodeFailed {
            page: 0,
            detail: "bad magic".into(),
        };
        assert!(tall.is_ignored());
        assert!(!decode.is_ignored());
    }

    #[test]
    fn page_accessor_returns_index() {
        let e = PageError::EncodeFailed {
            page: 42,
            detail: "boom".into(),
        };
        assert_eq!(e.page(), 42);
    }

    #[test]
    fn unknown_format_lists_available() {
        let e = Cbz2WebpError::UnknownFormat {
            requested: "avif".into(),
            available: "webp".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("avif"));
        assert!(msg.contains("webp"));
    }
}
