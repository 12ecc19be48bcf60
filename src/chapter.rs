//! In-memory archive model: a [`Chapter`] and its [`Page`]s.
//!
//! Pure data plus ordering invariants — no archive or image behaviour lives
//! here. The loader builds a `Chapter`, the conversion pipeline rewrites page
//! contents, and the writer serialises the result; everything in between
//! operates on these types only.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One comic/manga archive's worth of ordered pages plus metadata.
#[derive(Debug, Clone, Default)]
pub struct Chapter {
    /// Path the chapter was loaded from. Opaque to the pipeline.
    pub file_path: PathBuf,
    /// Pages in source-archive insertion order. Not sorted until the
    /// pipeline reassembles them — callers must not assume sortedness.
    pub pages: Vec<Page>,
    /// Raw `ComicInfo.xml` sidecar, passed through unmodified. Never parsed.
    pub comic_info_xml: Option<String>,
    /// Set once the chapter has been converted (or when a prior conversion
    /// marker was found at load time).
    pub is_converted: bool,
    /// When the conversion happened. Meaningful only if `is_converted`.
    pub converted_at: Option<DateTime<Utc>>,
}

impl Chapter {
    /// Mark the chapter as converted, stamped with the current time.
    pub fn set_converted(&mut self) {
        self.is_converted = true;
        self.converted_at = Some(Utc::now());
    }
}

/// One image unit with a stable original index.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// 0-based ordinal assigned at load time from the position in the source
    /// listing — never parsed from the filename.
    pub index: u16,
    /// Lowercase file extension including the dot (e.g. `.jpg`), reflecting
    /// the current encoding of `contents`.
    pub extension: String,
    /// Byte length of `contents`. Kept in sync by [`Page::replace_contents`].
    pub size: u64,
    /// Owned image bytes. Replaced wholesale on conversion, never mutated
    /// in place.
    pub contents: Vec<u8>,
    /// Whether this page is one fragment of an originally taller page.
    pub is_split: bool,
    /// 0-based ordinal among fragments sharing the same `index`.
    /// Meaningless when `is_split` is false.
    pub split_part_index: u16,
}

impl Page {
    /// Swap in a new encoding for this page, keeping `size` consistent.
    pub fn replace_contents(&mut self, contents: Vec<u8>, extension: &str) {
        self.size = contents.len() as u64;
        self.contents = contents;
        self.extension = extension.to_string();
    }

    /// Sort key establishing canonical chapter order.
    pub fn sort_key(&self) -> (u16, u16) {
        (self.index, self.split_part_index)
    }
}

/// Reassemble pages into canonical chapter order: `index` ascending, then
/// `split_part_index` ascending.
///
/// The key must be total over the retained pages; a duplicate
/// `(index, split_part_index)` pair indicates a pipeline defect, not a
/// user-facing failure.
pub fn sort_pages(pages: &mut [Page]) {
    pages.sort_by_key(Page::sort_key);
    debug_assert!(
        pages.windows(2).all(|w| w[0].sort_key() < w[1].sort_key()),
        "duplicate (index, split_part_index) after reassembly"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: u16, split: Option<u16>) -> Page {
        Page {
            index,
            is_split: split.is_some(),
            split_part_index: split.unwrap_or(0),
            ..Page::default()
        }
    }

    #[test]
    fn replace_contents_keeps_size_in_sync() {
        let mut p = page(0, None);
        p.replace_contents(vec![1, 2, 3, 4], ".webp");
        assert_eq!(p.size, 4);
        assert_eq!(p.extension, ".webp");
    }

    #[test]
    fn sort_orders_by_index_then_split_part() {
        let mut pages = vec![
            page(2, None),
            page(1, Some(1)),
            page(0, None),
            page(1, Some(0)),
        ];
        sort_pages(&mut pages);
        let keys: Vec<_> = pages.iter().map(Page::sort_key).collect();
        assert_eq!(keys, vec![(0, 0), (1, 0), (1, 1), (2, 0)]);
    }

    #[test]
    fn set_converted_stamps_timestamp() {
        let mut ch = Chapter::default();
        assert!(!ch.is_converted);
        ch.set_converted();
        assert!(ch.is_converted);
        assert!(ch.converted_at.is_some());
    }
}
