//! WebP chapter converter: split planning, bounded-concurrency encoding,
//! and deterministic reassembly.
//!
//! ## Pipeline shape
//!
//! ```text
//! pages ──▶ splitting stage ──▶ bounded queue ──▶ encode workers ──▶ sort
//!           (task per page,     (capacity P,      (semaphore of P,
//!            decode + crop)      backpressure)     libwebp encode)
//! ```
//!
//! Two groups of tasks cooperate through a bounded `mpsc` channel of work
//! items. The splitting stage decodes each page (under `spawn_blocking` —
//! image decoding is CPU-bound) and emits one work item per page, or one per
//! crop fragment for over-tall pages. The encoding stage drains the queue
//! behind a semaphore so at most P encodes run at once no matter how many
//! fragments a page exploded into.
//!
//! Completion order is arbitrary; the final order is established exclusively
//! by sorting on `(index, split_part_index)` after both stages have joined.
//!
//! ## Cancellation
//!
//! Every suspension point (queue send, queue recv, semaphore acquire, the
//! final joins) races the `CancellationToken`, and a check runs before each
//! new unit of work starts. A fired token aborts with
//! [`Cbz2WebpError::Cancelled`] and returns no partial chapter.

mod encoder;

use crate::chapter::{sort_pages, Chapter, Page};
use crate::config::ConversionConfig;
use crate::converter::{ChapterConversion, ConversionFormat, Converter};
use crate::error::{Cbz2WebpError, PageError};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hard ceiling of the WebP format: libwebp rejects any dimension at or
/// above 16384 px.
const WEBP_MAX_HEIGHT: u32 = 16_383;

/// Converts chapters to WebP.
pub struct WebpConverter {
    prepared: OnceCell<()>,
}

impl WebpConverter {
    pub fn new() -> Self {
        Self {
            prepared: OnceCell::new(),
        }
    }
}

impl Default for WebpConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of encode work: a page paired with its decoded pixels.
///
/// Created by the splitting stage, consumed exactly once by an encode
/// worker; the decoded image is dropped right after encoding to bound peak
/// memory.
struct PageWorkItem {
    page: Page,
    image: DynamicImage,
    /// Detected source format. `None` for crop fragments, whose pixels no
    /// longer correspond to any encoded byte stream.
    source_format: Option<ImageFormat>,
    /// False only for pass-through pages (too tall to convert without
    /// splitting); fragments produced purely to satisfy height limits stay
    /// eligible.
    convertible: bool,
}

#[async_trait]
impl Converter for WebpConverter {
    fn format(&self) -> ConversionFormat {
        ConversionFormat::WebP
    }

    fn prepare(&self) -> Result<(), Cbz2WebpError> {
        self.prepared.get_or_try_init(encoder::probe).map(|_| ())
    }

    async fn convert_chapter(
        &self,
        mut chapter: Chapter,
        config: &ConversionConfig,
        cancel: CancellationToken,
    ) -> Result<ChapterConversion, Cbz2WebpError> {
        self.prepare()?;

        // Child token + drop guard: any early return (fatal error, caller
        // drop) also cancels whatever tasks are still in flight.
        let cancel = cancel.child_token();
        let _abort_guard = cancel.clone().drop_guard();

        let workers = config.workers().max(1);
        let source_pages = chapter.pages.len();
        debug!(
            chapter = %chapter.file_path.display(),
            pages = source_pages,
            quality = config.quality,
            lossless = config.lossless,
            split = config.split,
            workers,
            "starting chapter conversion"
        );
        if let Some(cb) = &config.progress_callback {
            cb.on_chapter_start(source_pages);
        }

        if cancel.is_cancelled() {
            return Err(Cbz2WebpError::Cancelled);
        }

        let (tx, mut rx) = mpsc::channel::<PageWorkItem>(workers);
        let total = Arc::new(AtomicU32::new(source_pages as u32));
        let converted: Arc<Mutex<Vec<Page>>> = Arc::default();
        let errors: Arc<Mutex<Vec<PageError>>> = Arc::default();

        // ── Splitting stage: one task per original page ──────────────────
        let mut split_tasks: JoinSet<Result<(), Cbz2WebpError>> = JoinSet::new();
        let split_requested = config.split;
        let threshold = config.split_height_threshold;
        let crop_height = config.crop_height;
        for page in chapter.pages.drain(..) {
            if cancel.is_cancelled() {
                return Err(Cbz2WebpError::Cancelled);
            }
            let tx = tx.clone();
            let cancel = cancel.clone();
            let total = Arc::clone(&total);
            let errors = Arc::clone(&errors);
            split_tasks.spawn(async move {
                let (items, page_error) = tokio::task::spawn_blocking(move || {
                    plan_page(page, split_requested, threshold, crop_height)
                })
                .await
                .map_err(|e| Cbz2WebpError::Internal(format!("split task panicked: {e}")))?;

                if let Some(err) = page_error {
                    errors
                        .lock()
                        .map_err(|_| poisoned("page error list"))?
                        .push(err);
                }
                if items.len() > 1 {
                    total.fetch_add(items.len() as u32 - 1, Ordering::SeqCst);
                }
                for item in items {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        sent = tx.send(item) => {
                            // a closed queue means the pipeline is tearing down
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                Ok(())
            });
        }
        // The dispatcher's recv() sees end-of-stream once every split task's
        // sender clone is gone.
        drop(tx);

        // ── Encoding stage: semaphore-bounded workers ─────────────────────
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut encode_tasks: JoinSet<Result<(), Cbz2WebpError>> = JoinSet::new();
        let quality = config.quality;
        let lossless = config.lossless;
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return Err(Cbz2WebpError::Cancelled),
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Err(Cbz2WebpError::Cancelled),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| Cbz2WebpError::Internal(e.to_string()))?
                }
            };

            let converted = Arc::clone(&converted);
            let errors = Arc::clone(&errors);
            let total = Arc::clone(&total);
            let progress = config.progress_callback.clone();
            encode_tasks.spawn(async move {
                let _permit = permit;
                let outcome =
                    tokio::task::spawn_blocking(move || encode_item(item, quality, lossless))
                        .await
                        .map_err(|e| {
                            Cbz2WebpError::Internal(format!("encode task panicked: {e}"))
                        })?;
                match outcome {
                    Ok(page) => {
                        // One mutex guards both the result list and the
                        // completed count, so progress never runs backwards.
                        let mut done = converted.lock().map_err(|_| poisoned("page list"))?;
                        done.push(page);
                        if let Some(cb) = &progress {
                            let completed = done.len() as u32;
                            let expected = total.load(Ordering::SeqCst);
                            cb.on_progress(
                                &format!(
                                    "Converted {completed}/{expected} pages to webp format"
                                ),
                                completed,
                                expected,
                            );
                        }
                    }
                    Err(page_error) => {
                        errors
                            .lock()
                            .map_err(|_| poisoned("page error list"))?
                            .push(page_error);
                    }
                }
                Ok(())
            });
        }

        // ── Join both stages before aggregating ──────────────────────────
        join_all(&mut split_tasks, &cancel).await?;
        join_all(&mut encode_tasks, &cancel).await?;
        if cancel.is_cancelled() {
            return Err(Cbz2WebpError::Cancelled);
        }

        let mut pages = Arc::try_unwrap(converted)
            .map_err(|_| Cbz2WebpError::Internal("page list still shared after join".into()))?
            .into_inner()
            .map_err(|_| poisoned("page list"))?;
        let page_errors = Arc::try_unwrap(errors)
            .map_err(|_| Cbz2WebpError::Internal("error list still shared after join".into()))?
            .into_inner()
            .map_err(|_| poisoned("page error list"))?;

        sort_pages(&mut pages);
        chapter.pages = pages;

        if let Some(cb) = &config.progress_callback {
            cb.on_chapter_complete(chapter.pages.len(), page_errors.len());
        }
        debug!(
            chapter = %chapter.file_path.display(),
            final_pages = chapter.pages.len(),
            page_errors = page_errors.len(),
            "chapter conversion finished"
        );

        Ok(ChapterConversion {
            chapter,
            page_errors,
        })
    }
}

/// Drain a join set, racing the cancellation token at every join point.
async fn join_all(
    tasks: &mut JoinSet<Result<(), Cbz2WebpError>>,
    cancel: &CancellationToken,
) -> Result<(), Cbz2WebpError> {
    loop {
        let joined = tokio::select! {
            _ = cancel.cancelled() => return Err(Cbz2WebpError::Cancelled),
            joined = tasks.join_next() => joined,
        };
        match joined {
            None => return Ok(()),
            Some(result) => {
                result.map_err(|e| Cbz2WebpError::Internal(format!("worker task failed: {e}")))??
            }
        }
    }
}

fn poisoned(what: &str) -> Cbz2WebpError {
    Cbz2WebpError::Internal(format!("{what} mutex poisoned"))
}

/// Split Planner: decide whether `page` must be fragmented and produce the
/// resulting work items.
///
/// Returns the work items (possibly empty on decode failure) together with
/// an optional non-fatal error. A too-tall page without splitting yields
/// *both*: the error, and an ineligible pass-through item so the page stays
/// in the output untouched.
fn plan_page(
    page: Page,
    split_requested: bool,
    threshold: u32,
    crop_height: u32,
) -> (Vec<PageWorkItem>, Option<PageError>) {
    let source_format = image::guess_format(&page.contents).ok();
    let image = match image::load_from_memory(&page.contents) {
        Ok(image) => image,
        Err(e) => {
            return (
                Vec::new(),
                Some(PageError::DecodeFailed {
                    page: page.index,
                    detail: e.to_string(),
                }),
            );
        }
    };
    let height = image.height();

    if height >= WEBP_MAX_HEIGHT && !split_requested {
        let error = PageError::TooTall {
            page: page.index,
            height,
            max: WEBP_MAX_HEIGHT,
        };
        let item = PageWorkItem {
            page,
            image,
            source_format,
            convertible: false,
        };
        return (vec![item], Some(error));
    }

    if height >= threshold && split_requested {
        let index = page.index;
        debug!(
            page = index,
            height,
            crop_height,
            "splitting over-tall page"
        );
        let items = crop_fragments(&image, crop_height)
            .into_iter()
            .enumerate()
            .map(|(i, fragment)| PageWorkItem {
                page: Page {
                    index,
                    is_split: true,
                    split_part_index: i as u16,
                    ..Page::default()
                },
                image: fragment,
                source_format: None,
                convertible: true,
            })
            .collect();
        return (items, None);
    }

    let item = PageWorkItem {
        page,
        image,
        source_format,
        convertible: true,
    };
    (vec![item], None)
}

/// Crop an image into `ceil(height / crop_height)` top-anchored horizontal
/// bands. The bands tile the image exactly: every band is `crop_height` tall
/// except the last, which absorbs the remainder.
fn crop_fragments(image: &DynamicImage, crop_height: u32) -> Vec<DynamicImage> {
    let (width, height) = (image.width(), image.height());
    let num_parts = height.div_ceil(crop_height);
    (0..num_parts)
        .map(|i| {
            let y = i * crop_height;
            let part_height = crop_height.min(height - y);
            image.crop_imm(0, y, width, part_height)
        })
        .collect()
}

/// Encode one work item, consuming its decoded image.
fn encode_item(item: PageWorkItem, quality: u8, lossless: bool) -> Result<Page, PageError> {
    let PageWorkItem {
        mut page,
        image,
        source_format,
        convertible,
    } = item;

    // Already in the target format: just canonicalise the extension.
    if source_format == Some(ImageFormat::WebP) {
        page.extension = ConversionFormat::WebP.extension().to_string();
        return Ok(page);
    }
    if !convertible {
        return Ok(page);
    }

    match encoder::encode(&image, quality, lossless) {
        Ok(bytes) => {
            page.replace_contents(bytes, ConversionFormat::WebP.extension());
            Ok(page)
        }
        Err(detail) => {
            warn!(
                page = page.index,
                %detail,
                "webp encode failed, falling back to lossless png"
            );
            match encoder::encode_fallback_png(&image) {
                Ok(bytes) => {
                    page.replace_contents(bytes, ".png");
                    Ok(page)
                }
                Err(fallback_detail) => Err(PageError::EncodeFailed {
                    page: page.index,
                    detail: format!("{detail}; png fallback failed: {fallback_detail}"),
                }),
            }
        }
    }
    // `image` dropped here: decoded pixels are never retained past encode.
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_page(index: u16, width: u32, height: u32) -> Page {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([index as u8, 64, 128, 255]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        Page {
            index,
            extension: ".png".into(),
            size: bytes.len() as u64,
            contents: bytes,
            is_split: false,
            split_part_index: 0,
        }
    }

    #[test]
    fn crop_tiles_exactly_with_remainder() {
        let img = DynamicImage::new_rgba8(100, 5000);
        let parts = crop_fragments(&img, 2000);
        let heights: Vec<u32> = parts.iter().map(|p| p.height()).collect();
        assert_eq!(heights, vec![2000, 2000, 1000]);
        assert_eq!(heights.iter().sum::<u32>(), 5000);
        assert!(parts.iter().all(|p| p.width() == 100));
    }

    #[test]
    fn crop_exact_multiple_has_no_stub_fragment() {
        let img = DynamicImage::new_rgba8(10, 4000);
        let parts = crop_fragments(&img, 2000);
        let heights: Vec<u32> = parts.iter().map(|p| p.height()).collect();
        assert_eq!(heights, vec![2000, 2000]);
    }

    #[test]
    fn plan_passes_short_page_through_as_single_item() {
        let (items, error) = plan_page(png_page(3, 50, 1200), true, 4000, 2000);
        assert!(error.is_none());
        assert_eq!(items.len(), 1);
        assert!(items[0].convertible);
        assert!(!items[0].page.is_split);
        assert_eq!(items[0].source_format, Some(ImageFormat::Png));
    }

    #[test]
    fn plan_splits_tall_page_into_indexed_fragments() {
        let (items, error) = plan_page(png_page(1, 50, 5000), true, 4000, 2000);
        assert!(error.is_none());
        assert_eq!(items.len(), 3);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.page.index, 1);
            assert!(item.page.is_split);
            assert_eq!(item.page.split_part_index, i as u16);
            assert!(item.convertible);
            assert!(item.source_format.is_none());
        }
        assert_eq!(items[2].image.height(), 1000);
    }

    #[test]
    fn plan_does_not_split_when_not_requested() {
        let (items, error) = plan_page(png_page(0, 50, 5000), false, 4000, 2000);
        assert!(error.is_none());
        assert_eq!(items.len(), 1);
        assert!(items[0].convertible);
    }

    #[test]
    fn plan_flags_over_ceiling_page_as_ignored_passthrough() {
        let (items, error) = plan_page(png_page(4, 4, 16_383), false, 4000, 2000);
        let error = error.expect("too-tall error expected");
        assert_eq!(
            error,
            PageError::TooTall {
                page: 4,
                height: 16_383,
                max: WEBP_MAX_HEIGHT
            }
        );
        assert_eq!(items.len(), 1);
        assert!(!items[0].convertible, "page must pass through unconverted");
    }

    #[test]
    fn plan_reports_decode_failure_and_drops_page() {
        let bad = Page {
            index: 9,
            extension: ".jpg".into(),
            size: 4,
            contents: vec![0xde, 0xad, 0xbe, 0xef],
            is_split: false,
            split_part_index: 0,
        };
        let (items, error) = plan_page(bad, true, 4000, 2000);
        assert!(items.is_empty());
        assert!(matches!(error, Some(PageError::DecodeFailed { page: 9, .. })));
    }

    #[test]
    fn encode_item_skips_pages_already_in_webp() {
        let img = DynamicImage::new_rgba8(6, 6);
        let webp_bytes = encoder::encode(&img, 85, false).unwrap();
        let page = Page {
            index: 0,
            extension: ".bin".into(),
            size: webp_bytes.len() as u64,
            contents: webp_bytes.clone(),
            is_split: false,
            split_part_index: 0,
        };
        let item = PageWorkItem {
            page,
            image: img,
            source_format: Some(ImageFormat::WebP),
            convertible: true,
        };
        let out = encode_item(item, 85, false).unwrap();
        assert_eq!(out.extension, ".webp");
        assert_eq!(out.contents, webp_bytes, "contents must not be re-encoded");
    }

    #[test]
    fn encode_item_leaves_passthrough_untouched() {
        let page = png_page(5, 8, 8);
        let original = page.contents.clone();
        let item = PageWorkItem {
            image: image::load_from_memory(&page.contents).unwrap(),
            source_format: Some(ImageFormat::Png),
            convertible: false,
            page,
        };
        let out = encode_item(item, 85, false).unwrap();
        assert_eq!(out.extension, ".png");
        assert_eq!(out.contents, original);
    }

    #[test]
    fn encode_item_converts_eligible_page() {
        let page = png_page(2, 16, 16);
        let item = PageWorkItem {
            image: image::load_from_memory(&page.contents).unwrap(),
            source_format: Some(ImageFormat::Png),
            convertible: true,
            page,
        };
        let out = encode_item(item, 85, false).unwrap();
        assert_eq!(out.extension, ".webp");
        assert_eq!(out.size, out.contents.len() as u64);
        assert_eq!(&out.contents[8..12], b"WEBP");
    }

    #[test]
    fn encode_item_falls_back_to_png_when_encoder_rejects() {
        // libwebp rejects any dimension above 16383, so an over-wide page
        // forces the fallback arm without needing a broken backend.
        let image = DynamicImage::new_rgba8(16_384, 4);
        let item = PageWorkItem {
            page: Page {
                index: 3,
                extension: ".png".into(),
                ..Page::default()
            },
            image,
            source_format: Some(ImageFormat::Png),
            convertible: true,
        };
        let out = encode_item(item, 85, false).expect("fallback must not be a page error");
        assert_eq!(out.extension, ".png");
        assert_eq!(out.size, out.contents.len() as u64);
        let decoded = image::load_from_memory(&out.contents).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16_384, 4));
        assert_eq!(
            image::guess_format(&out.contents).unwrap(),
            ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn convert_chapter_splits_and_orders_pages() {
        let chapter = Chapter {
            pages: vec![png_page(0, 50, 1200), png_page(1, 50, 5000)],
            ..Chapter::default()
        };
        let config = ConversionConfig::builder()
            .split(true)
            .concurrency(2)
            .build()
            .unwrap();
        let converter = WebpConverter::new();
        let result = converter
            .convert_chapter(chapter, &config, CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_complete());
        let keys: Vec<_> = result
            .chapter
            .pages
            .iter()
            .map(|p| (p.index, p.split_part_index, p.is_split))
            .collect();
        assert_eq!(
            keys,
            vec![(0, 0, false), (1, 0, true), (1, 1, true), (1, 2, true)]
        );
        let heights: Vec<u32> = result.chapter.pages[1..]
            .iter()
            .map(|p| image::load_from_memory(&p.contents).unwrap().height())
            .collect();
        assert_eq!(heights, vec![2000, 2000, 1000]);
        assert!(result.chapter.pages.iter().all(|p| p.extension == ".webp"));
    }

    #[tokio::test]
    async fn convert_chapter_preserves_count_without_splitting() {
        let chapter = Chapter {
            pages: vec![png_page(0, 20, 100), png_page(1, 20, 100), png_page(2, 20, 100)],
            ..Chapter::default()
        };
        let config = ConversionConfig::default();
        let converter = WebpConverter::new();
        let result = converter
            .convert_chapter(chapter, &config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.chapter.pages.len(), 3);
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn convert_chapter_isolates_decode_failures() {
        let bad = Page {
            index: 1,
            extension: ".jpg".into(),
            size: 3,
            contents: vec![1, 2, 3],
            is_split: false,
            split_part_index: 0,
        };
        let chapter = Chapter {
            pages: vec![png_page(0, 20, 100), bad],
            ..Chapter::default()
        };
        let converter = WebpConverter::new();
        let result = converter
            .convert_chapter(chapter, &ConversionConfig::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.chapter.pages.len(), 1);
        assert_eq!(result.chapter.pages[0].index, 0);
        assert_eq!(result.page_errors.len(), 1);
        assert_eq!(result.page_errors[0].page(), 1);
    }

    #[tokio::test]
    async fn convert_chapter_keeps_too_tall_page_unconverted() {
        let chapter = Chapter {
            pages: vec![png_page(0, 20, 100), png_page(1, 4, 16_383)],
            ..Chapter::default()
        };
        let converter = WebpConverter::new();
        let result = converter
            .convert_chapter(chapter, &ConversionConfig::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.chapter.pages.len(), 2);
        assert_eq!(result.page_errors.len(), 1);
        assert!(result.page_errors[0].is_ignored());
        assert_eq!(result.page_errors[0].page(), 1);
        // the tall page passes through in its original encoding
        assert_eq!(result.chapter.pages[1].extension, ".png");
        // the short page still converted
        assert_eq!(result.chapter.pages[0].extension, ".webp");
    }

    #[tokio::test]
    async fn cancelled_token_yields_no_partial_result() {
        let chapter = Chapter {
            pages: vec![png_page(0, 20, 100)],
            ..Chapter::default()
        };
        let token = CancellationToken::new();
        token.cancel();
        let converter = WebpConverter::new();
        let err = converter
            .convert_chapter(chapter, &ConversionConfig::default(), token)
            .await
            .unwrap_err();
        assert!(matches!(err, Cbz2WebpError::Cancelled));
    }

    #[test]
    fn prepare_is_idempotent() {
        let converter = WebpConverter::new();
        converter.prepare().unwrap();
        converter.prepare().unwrap();
    }
}
