//! Configuration for chapter conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across worker tasks and to diff two runs to
//! understand why their outputs differ.

use crate::error::Cbz2WebpError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::time::Duration;

/// Configuration for converting one chapter.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use cbz2webp::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .quality(80)
///     .split(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Encoder quality, 1–100. Default: 85.
    ///
    /// 85 keeps screentones and line art visually indistinguishable from the
    /// source while cutting file size roughly in half versus JPEG originals.
    pub quality: u8,

    /// Encode losslessly instead of at `quality`. Default: false.
    pub lossless: bool,

    /// Split pages taller than `split_height_threshold` into fragments.
    /// Default: false.
    ///
    /// Webtoon-style chapters ship single strips tens of thousands of pixels
    /// tall; those exceed the target format's hard ceiling and must be split
    /// to be convertible at all.
    pub split: bool,

    /// Soft height threshold above which an eligible page is split,
    /// in pixels. Default: 4000.
    pub split_height_threshold: u32,

    /// Height of each crop fragment, in pixels. Default: 2000.
    ///
    /// The final fragment absorbs the remainder so fragment heights always
    /// sum exactly to the original height.
    pub crop_height: u32,

    /// Concurrent encode operations. `None` (default) uses the machine's
    /// available parallelism. This also bounds the work queue, providing
    /// backpressure on the splitting stage.
    pub concurrency: Option<usize>,

    /// Maximum wall-clock time for converting the chapter. `None` = no
    /// deadline. An expired deadline aborts with
    /// [`Cbz2WebpError::Cancelled`] and returns no partial result.
    pub timeout: Option<Duration>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            quality: 85,
            lossless: false,
            split: false,
            split_height_threshold: 4000,
            crop_height: 2000,
            concurrency: None,
            timeout: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("quality", &self.quality)
            .field("lossless", &self.lossless)
            .field("split", &self.split)
            .field("split_height_threshold", &self.split_height_threshold)
            .field("crop_height", &self.crop_height)
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective worker count for this configuration.
    pub fn workers(&self) -> usize {
        self.concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn quality(mut self, quality: u8) -> Self {
        self.config.quality = quality;
        self
    }

    pub fn lossless(mut self, v: bool) -> Self {
        self.config.lossless = v;
        self
    }

    pub fn split(mut self, v: bool) -> Self {
        self.config.split = v;
        self
    }

    pub fn split_height_threshold(mut self, px: u32) -> Self {
        self.config.split_height_threshold = px;
        self
    }

    pub fn crop_height(mut self, px: u32) -> Self {
        self.config.crop_height = px;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = Some(n.max(1));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Cbz2WebpError> {
        let c = &self.config;
        if c.quality == 0 || c.quality > 100 {
            return Err(Cbz2WebpError::InvalidConfig(format!(
                "quality must be 1-100, got {}",
                c.quality
            )));
        }
        if c.crop_height == 0 {
            return Err(Cbz2WebpError::InvalidConfig(
                "crop height must be > 0".into(),
            ));
        }
        if c.split_height_threshold < c.crop_height {
            return Err(Cbz2WebpError::InvalidConfig(format!(
                "split threshold ({}) must be >= crop height ({})",
                c.split_height_threshold, c.crop_height
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConversionConfig::builder().build().unwrap();
        assert_eq!(config.quality, 85);
        assert!(!config.split);
        assert_eq!(config.split_height_threshold, 4000);
        assert_eq!(config.crop_height, 2000);
    }

    #[test]
    fn rejects_zero_quality() {
        assert!(ConversionConfig::builder().quality(0).build().is_err());
    }

    #[test]
    fn rejects_quality_above_100() {
        assert!(ConversionConfig::builder().quality(101).build().is_err());
    }

    #[test]
    fn rejects_threshold_below_crop_height() {
        let result = ConversionConfig::builder()
            .split_height_threshold(1000)
            .crop_height(2000)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn workers_respects_explicit_concurrency() {
        let config = ConversionConfig::builder().concurrency(3).build().unwrap();
        assert_eq!(config.workers(), 3);
    }

    #[test]
    fn workers_defaults_to_at_least_one() {
        let config = ConversionConfig::default();
        assert!(config.workers() >= 1);
    }
}
