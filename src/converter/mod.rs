//! Converter capability: the trait every target codec implements, plus an
//! explicit registry for looking converters up by format.
//!
//! The registry is injected into the driver at construction time rather than
//! resolved through global state, so tests can register stub converters and
//! alternative codecs can slot in without touching the pipeline.

use crate::chapter::Chapter;
use crate::config::ConversionConfig;
use crate::error::{Cbz2WebpError, PageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod webp;

/// Image formats a chapter can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionFormat {
    WebP,
}

impl ConversionFormat {
    /// Canonical lowercase file extension, including the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ConversionFormat::WebP => ".webp",
        }
    }
}

impl fmt::Display for ConversionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionFormat::WebP => write!(f, "webp"),
        }
    }
}

impl FromStr for ConversionFormat {
    type Err = Cbz2WebpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webp" => Ok(ConversionFormat::WebP),
            other => Err(Cbz2WebpError::UnknownFormat {
                requested: other.to_string(),
                available: "webp".to_string(),
            }),
        }
    }
}

/// Result of converting one chapter: the updated chapter plus every
/// non-fatal per-page error encountered along the way.
///
/// An empty `page_errors` means the chapter converted fully; a non-empty one
/// means partial success — the chapter still contains every page that
/// converted, fell back, or was passed through.
#[derive(Debug)]
pub struct ChapterConversion {
    pub chapter: Chapter,
    pub page_errors: Vec<PageError>,
}

impl ChapterConversion {
    /// True when every page converted without a single per-page error.
    pub fn is_complete(&self) -> bool {
        self.page_errors.is_empty()
    }
}

/// A chapter converter for one target format.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Target format of this converter.
    fn format(&self) -> ConversionFormat;

    /// One-time readiness probe of the encoder backend. Must be idempotent
    /// (a no-op after the first successful call) and is invoked by
    /// [`Converter::convert_chapter`] as well, so calling it up front is
    /// optional but surfaces backend problems before any work is queued.
    fn prepare(&self) -> Result<(), Cbz2WebpError>;

    /// Convert every page of `chapter` to the target format under bounded
    /// parallelism.
    ///
    /// Returns the updated chapter together with the collected non-fatal
    /// page errors (partial success). Fatal errors — a dead encoder backend
    /// or a fired `cancel` token — abort with `Err` and yield no partial
    /// result.
    async fn convert_chapter(
        &self,
        chapter: Chapter,
        config: &ConversionConfig,
        cancel: CancellationToken,
    ) -> Result<ChapterConversion, Cbz2WebpError>;
}

/// Explicit format → converter mapping.
pub struct ConverterRegistry {
    converters: HashMap<ConversionFormat, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// An empty registry. Useful in tests that register stubs.
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// Register a converter, replacing any previous one for its format.
    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.converters.insert(converter.format(), converter);
    }

    /// Look up the converter for `format`.
    pub fn get(&self, format: ConversionFormat) -> Result<Arc<dyn Converter>, Cbz2WebpError> {
        self.converters
            .get(&format)
            .cloned()
            .ok_or_else(|| Cbz2WebpError::UnknownFormat {
                requested: format.to_string(),
                available: self
                    .available()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Formats with a registered converter.
    pub fn available(&self) -> Vec<ConversionFormat> {
        self.converters.keys().copied().collect()
    }
}

impl Default for ConverterRegistry {
    /// Registry with all built-in converters (currently WebP).
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(webp::WebpConverter::new()));
        registry
    }
}
