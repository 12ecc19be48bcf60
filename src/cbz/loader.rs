//! Chapter Loader: zip archive → in-memory [`Chapter`].
//!
//! ## Why indices come from position, not filenames
//!
//! Page indices are reassigned sequentially as entries are encountered in
//! on-disk order, never parsed from digits in the entry name. This keeps
//! load → convert → save cycles naming-format-agnostic: whatever scheme a
//! previous run (or another tool) used, the loader produces the same
//! gap-free 0-based ordering.
//!
//! Pages whose bytes are not decodable images are still loaded as opaque
//! pages here — decoding is deferred to the split planner, which is where a
//! decode failure surfaces as a per-page error.

use crate::chapter::{Chapter, Page};
use crate::error::Cbz2WebpError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Load a chapter from a zip-compatible archive.
///
/// # Errors
/// * [`Cbz2WebpError::ArchiveOpen`] — the archive is missing or corrupt
/// * [`Cbz2WebpError::ArchiveRead`] — an entry could not be streamed
pub fn load_chapter(path: &Path) -> Result<Chapter, Cbz2WebpError> {
    let file = File::open(path).map_err(|e| Cbz2WebpError::ArchiveOpen {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| Cbz2WebpError::ArchiveOpen {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let mut chapter = Chapter {
        file_path: path.to_path_buf(),
        ..Chapter::default()
    };

    // Primary marker channel: the archive-level comment. A parse failure
    // here is non-fatal; the chapter just counts as not-yet-converted.
    let comment = String::from_utf8_lossy(archive.comment()).into_owned();
    if let Some(first_line) = comment.lines().next() {
        if let Some(ts) = parse_marker_timestamp(first_line) {
            chapter.is_converted = true;
            chapter.converted_at = Some(ts);
            debug!(path = %path.display(), converted_at = %ts, "found conversion marker in archive comment");
        }
    }

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| Cbz2WebpError::ArchiveRead {
            path: path.to_path_buf(),
            entry: format!("#{i}"),
            detail: e.to_string(),
        })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let basename = basename_lower(&name);

        if basename == "comicinfo.xml" {
            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .map_err(|e| read_error(path, &name, e))?;
            chapter.comic_info_xml = Some(xml);
        } else if basename == "converted.txt" && !chapter.is_converted {
            // Legacy marker channel. The entry is consumed either way; an
            // unparsable first line just leaves the chapter unconverted.
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| read_error(path, &name, e))?;
            if let Some(ts) = text.lines().next().and_then(parse_marker_timestamp) {
                chapter.is_converted = true;
                chapter.converted_at = Some(ts);
                debug!(path = %path.display(), converted_at = %ts, "found legacy Converted.txt marker");
            }
        } else {
            let mut contents = Vec::with_capacity(initial_capacity(entry.size()));
            entry
                .read_to_end(&mut contents)
                .map_err(|e| read_error(path, &name, e))?;
            chapter.pages.push(Page {
                index: chapter.pages.len() as u16,
                extension: extension_lower(&name),
                size: contents.len() as u64,
                contents,
                is_split: false,
                split_part_index: 0,
            });
        }
    }

    debug!(
        path = %path.display(),
        pages = chapter.pages.len(),
        converted = chapter.is_converted,
        "chapter loaded"
    );
    Ok(chapter)
}

fn read_error(path: &Path, entry: &str, e: std::io::Error) -> Cbz2WebpError {
    Cbz2WebpError::ArchiveRead {
        path: path.to_path_buf(),
        entry: entry.to_string(),
        detail: e.to_string(),
    }
}

/// Buffer preallocation cap. Entry sizes are archive-declared and therefore
/// untrusted; `read_to_end` grows the buffer past this as real bytes arrive.
const MAX_PREALLOC: u64 = 4 << 20;

fn initial_capacity(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOC) as usize
}

/// Lowercased basename of a zip entry name (zip names always use `/`).
fn basename_lower(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_lowercase()
}

/// Lowercased extension including the dot, or empty when there is none.
fn extension_lower(name: &str) -> String {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}", ext.to_lowercase()),
        None => String::new(),
    }
}

/// Parse a freely-formatted marker timestamp.
///
/// Markers were written by several generations of tools: RFC 3339 (what the
/// writer emits today), RFC 2822, and a handful of `YYYY-MM-DD`-style shapes
/// with or without offsets. Unknown trailing zone abbreviations (`... UTC`)
/// are stripped and the parse retried.
pub(crate) fn parse_marker_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S %z"];
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }

    // "2024-01-02 15:04:05.999 +0000 UTC" — strip the zone name and retry.
    if let Some((head, tail)) = s.rsplit_once(' ') {
        if tail.chars().all(|c| c.is_ascii_alphabetic()) {
            return parse_marker_timestamp(head);
        }
    }

    None
}
