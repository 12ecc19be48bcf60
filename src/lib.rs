//! # cbz2webp
//!
//! Convert comic-book zip archives (`.cbz`) to WebP, page by page, under
//! bounded parallelism.
//!
//! The crate loads a chapter archive into memory, optionally splits
//! over-tall webtoon strips into fragments, re-encodes every page as WebP,
//! reassembles the chapter deterministically, and writes it back with an
//! idempotency marker so a second run is a no-op.
//!
//! ```text
//!  .cbz ──▶ loader ──▶ split planner ──▶ encode workers ──▶ reassembly ──▶ .cbz
//!             │            │    (bounded queue + semaphore)     │
//!         marker check   crop geometry                     sort + marker
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use cbz2webp::{
//!     ConversionConfig, ConversionFormat, ConverterRegistry, OptimizeOptions, optimize,
//! };
//!
//! # async fn run() -> Result<(), cbz2webp::Cbz2WebpError> {
//! let registry = ConverterRegistry::default();
//! let options = OptimizeOptions {
//!     converter: registry.get(ConversionFormat::WebP)?,
//!     path: PathBuf::from("chapter-12.cbz"),
//!     config: ConversionConfig::builder().quality(85).split(true).build()?,
//!     override_original: false,
//! };
//! let outcome = optimize(&options).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Idempotent**: converted archives carry a marker in the zip comment;
//!   a chapter that already has one is skipped.
//! - **Partial failure**: a page that fails to decode or encode never aborts
//!   the chapter — it is reported and the rest is written.
//! - **Deterministic order**: output pages are sorted by
//!   `(index, split_part_index)` regardless of completion order.
//! - **No partial output on cancellation**: an expired deadline returns
//!   [`Cbz2WebpError::Cancelled`] and writes nothing.

pub mod cbz;
pub mod chapter;
pub mod config;
pub mod converter;
pub mod error;
pub mod optimize;
pub mod progress;

pub use cbz::{load_chapter, write_chapter};
pub use chapter::{sort_pages, Chapter, Page};
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use converter::{
    webp::WebpConverter, ChapterConversion, ConversionFormat, Converter, ConverterRegistry,
};
pub use error::{Cbz2WebpError, PageError};
pub use optimize::{optimize, OptimizeOptions, OptimizeOutcome};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
