//! Chapter Writer: in-memory [`Chapter`] → zip archive.
//!
//! Page entries are Stored, not Deflated — the image payload is already
//! compressed by its codec, and re-deflating WebP/PNG/JPEG bytes wastes CPU
//! for a fraction of a percent. The `ComicInfo.xml` sidecar is text, so that
//! one entry is Deflated.
//!
//! Any I/O failure aborts the whole write. Callers are responsible for not
//! exposing a half-written output path (the driver writes next to the source
//! and only removes the original after success).

use crate::chapter::Chapter;
use crate::error::Cbz2WebpError;
use chrono::{SecondsFormat, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Trailer appended after the timestamp in the archive comment. The first
/// line stays machine-parseable; this line is for humans poking at the file.
const MARKER_TRAILER: &str = "This chapter has been converted by cbz2webp.";

/// Serialise a chapter into a zip archive at `output_path`.
///
/// Entry names follow the canonical `NNNN[-MM]EXT` pattern: 4-digit
/// zero-padded page index, optional 2-digit split-part suffix, current
/// extension. When the chapter is marked converted, the archive comment
/// doubles as the machine-readable conversion marker consumed by the loader
/// on any future run.
pub fn write_chapter(chapter: &Chapter, output_path: &Path) -> Result<(), Cbz2WebpError> {
    let write_error = |detail: String| Cbz2WebpError::OutputWrite {
        path: output_path.to_path_buf(),
        detail,
    };

    let file = File::create(output_path).map_err(|e| write_error(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for page in &chapter.pages {
        let name = if page.is_split {
            format!(
                "{:04}-{:02}{}",
                page.index, page.split_part_index, page.extension
            )
        } else {
            format!("{:04}{}", page.index, page.extension)
        };
        zip.start_file(&name, stored)
            .map_err(|e| write_error(format!("entry '{name}': {e}")))?;
        zip.write_all(&page.contents)
            .map_err(|e| write_error(format!("entry '{name}': {e}")))?;
    }

    if let Some(xml) = chapter.comic_info_xml.as_deref().filter(|x| !x.is_empty()) {
        let deflated =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file("ComicInfo.xml", deflated)
            .map_err(|e| write_error(format!("entry 'ComicInfo.xml': {e}")))?;
        zip.write_all(xml.as_bytes())
            .map_err(|e| write_error(format!("entry 'ComicInfo.xml': {e}")))?;
    }

    if chapter.is_converted {
        let stamp = chapter
            .converted_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        zip.set_comment(format!("{stamp}\n{MARKER_TRAILER}"));
    }

    zip.finish().map_err(|e| write_error(e.to_string()))?;
    debug!(
        path = %output_path.display(),
        pages = chapter.pages.len(),
        converted = chapter.is_converted,
        "chapter written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbz::load_chapter;
    use crate::chapter::Page;

    fn page(index: u16, split: Option<u16>, ext: &str, contents: &[u8]) -> Page {
        Page {
            index,
            extension: ext.to_string(),
            size: contents.len() as u64,
            contents: contents.to_vec(),
            is_split: split.is_some(),
            split_part_index: split.unwrap_or(0),
        }
    }

    #[test]
    fn entry_names_are_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.cbz");
        let chapter = Chapter {
            pages: vec![
                page(0, None, ".jpg", b"aa"),
                page(1, Some(0), ".webp", b"bb"),
                page(1, Some(1), ".webp", b"cc"),
            ],
            ..Chapter::default()
        };
        write_chapter(&chapter, &out).unwrap();

        let file = std::fs::File::open(&out).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert!(names.contains(&"0000.jpg"));
        assert!(names.contains(&"0001-00.webp"));
        assert!(names.contains(&"0001-01.webp"));
    }

    #[test]
    fn marker_round_trips_through_comment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.cbz");
        let mut chapter = Chapter {
            pages: vec![page(0, None, ".png", b"xx")],
            ..Chapter::default()
        };
        chapter.set_converted();
        let stamped = chapter.converted_at.unwrap();
        write_chapter(&chapter, &out).unwrap();

        let reloaded = load_chapter(&out).unwrap();
        assert!(reloaded.is_converted);
        let delta = (reloaded.converted_at.unwrap() - stamped).num_seconds().abs();
        assert!(delta <= 1, "timestamp drifted by {delta}s");
    }

    #[test]
    fn comic_info_is_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.cbz");
        let chapter = Chapter {
            pages: vec![page(0, None, ".png", b"xx")],
            comic_info_xml: Some("<ComicInfo><Title>t</Title></ComicInfo>".into()),
            ..Chapter::default()
        };
        write_chapter(&chapter, &out).unwrap();

        let reloaded = load_chapter(&out).unwrap();
        assert_eq!(reloaded.pages.len(), 1);
        assert_eq!(
            reloaded.comic_info_xml.as_deref(),
            Some("<ComicInfo><Title>t</Title></ComicInfo>")
        );
    }

    #[test]
    fn unwritable_path_is_output_error() {
        let chapter = Chapter::default();
        let err = write_chapter(&chapter, Path::new("/nonexistent/dir/out.cbz")).unwrap_err();
        assert!(matches!(err, Cbz2WebpError::OutputWrite { .. }));
    }
}
