//! The archive boundary: reading chapters out of zip containers and writing
//! them back.
//!
//! Only these two submodules touch the archive format; everything between
//! them operates purely on the in-memory [`crate::chapter`] model.
//!
//! ## Conversion marker
//!
//! A converted archive carries its timestamp in two channels:
//!
//! 1. **Archive comment** (primary, read + write) — first line is an
//!    RFC 3339 timestamp, followed by a fixed human-readable trailer.
//! 2. **`Converted.txt` entry** (legacy, read-only) — first line is a
//!    freely-formatted timestamp left behind by older tools.
//!
//! The loader consults the comment first; a chapter marked by either channel
//! is considered already converted, which makes re-runs idempotent.

pub mod loader;
pub mod writer;

pub use loader::load_chapter;
pub use writer::write_chapter;
