//! The driving operation: load an archive, convert it, and write the result
//! with a conversion marker.
//!
//! This is the single entry point collaborators (CLI, batch drivers, watch
//! daemons) call per archive. It owns everything around the pipeline: the
//! already-converted skip, the deadline watchdog, per-page error reporting,
//! output-path resolution, and the CBR → CBZ rename rule.

use crate::cbz;
use crate::config::ConversionConfig;
use crate::converter::Converter;
use crate::error::{Cbz2WebpError, PageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything needed to optimize one archive.
#[derive(Clone)]
pub struct OptimizeOptions {
    /// Converter to run the chapter through (looked up from a
    /// [`crate::converter::ConverterRegistry`]).
    pub converter: Arc<dyn Converter>,
    /// Path to the source `.cbz` archive.
    pub path: PathBuf,
    /// Conversion knobs (quality, splitting, deadline, progress, ...).
    pub config: ConversionConfig,
    /// Overwrite the original archive instead of writing a
    /// `*_converted.cbz` sibling. A `.cbr` input becomes `.cbz` and the
    /// original is removed after a successful write.
    pub override_original: bool,
}

/// Chapter-level verdict of one optimize run.
#[derive(Debug)]
pub enum OptimizeOutcome {
    /// A prior conversion marker was found; nothing was done.
    AlreadyConverted,
    /// The chapter was converted and written. `page_errors` is empty for a
    /// full conversion and lists the non-fatal failures for a partial one.
    Converted {
        output_path: PathBuf,
        page_errors: Vec<PageError>,
    },
}

impl OptimizeOutcome {
    /// True when every page converted cleanly (or the chapter was skipped).
    pub fn is_complete(&self) -> bool {
        match self {
            OptimizeOutcome::AlreadyConverted => true,
            OptimizeOutcome::Converted { page_errors, .. } => page_errors.is_empty(),
        }
    }
}

/// Convert the archive at `options.path`, writing the converted archive plus
/// its idempotency marker.
///
/// Per-page failures do not abort the run: the converted chapter is written
/// with every page that survived, and the failures are reported in the
/// outcome. Only setup failures, I/O failures, and an expired deadline
/// return `Err` — in which case no output is written.
pub async fn optimize(options: &OptimizeOptions) -> Result<OptimizeOutcome, Cbz2WebpError> {
    let path = options.path.clone();
    info!(file = %path.display(), "processing file");

    let chapter = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || cbz::load_chapter(&path))
            .await
            .map_err(|e| Cbz2WebpError::Internal(format!("loader task panicked: {e}")))??
    };

    if chapter.is_converted {
        info!(file = %path.display(), "chapter already converted, skipping");
        return Ok(OptimizeOutcome::AlreadyConverted);
    }

    // Deadline watchdog: an expired deadline cancels the token, and every
    // pipeline suspension point races it.
    let cancel = CancellationToken::new();
    let watchdog = options.config.timeout.map(|timeout| {
        if timeout.is_zero() {
            // Already expired: cancel synchronously so not a single unit of
            // work starts.
            cancel.cancel();
        }
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        })
    });

    let result = options
        .converter
        .convert_chapter(chapter, &options.config, cancel)
        .await;
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    let conversion = result?;

    for error in &conversion.page_errors {
        match error {
            PageError::TooTall { .. } => {
                warn!(file = %path.display(), page = error.page(), %error, "page ignored")
            }
            PageError::DecodeFailed { .. } => {
                warn!(file = %path.display(), page = error.page(), %error, "page dropped")
            }
            PageError::EncodeFailed { .. } => {
                warn!(file = %path.display(), page = error.page(), %error, "page dropped")
            }
        }
    }

    let mut chapter = conversion.chapter;
    chapter.set_converted();

    let (output_path, remove_original) = resolve_output_path(&path, options.override_original);
    debug!(
        file = %path.display(),
        output = %output_path.display(),
        remove_original,
        "writing converted chapter"
    );
    // Move the chapter into the writer task; page buffers can be hundreds of
    // megabytes and must not be duplicated here.
    {
        let output_path = output_path.clone();
        tokio::task::spawn_blocking(move || cbz::write_chapter(&chapter, &output_path))
            .await
            .map_err(|e| Cbz2WebpError::Internal(format!("writer task panicked: {e}")))??;
    }

    // CBR → CBZ override: the output landed next to the original under a new
    // extension; drop the original now that the write succeeded. A failed
    // delete is only a warning — the conversion itself is done.
    if remove_original && output_path != path {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(file = %path.display(), error = %e, "failed to delete original archive");
        } else {
            info!(file = %path.display(), "deleted original archive");
        }
    }

    info!(output = %output_path.display(), "converted file written");
    Ok(OptimizeOutcome::Converted {
        output_path,
        page_errors: conversion.page_errors,
    })
}

/// Where the converted archive goes, and whether the original should be
/// removed afterwards.
///
/// Override mode rewrites in place, except `.cbr` inputs: those become a
/// sibling `.cbz` and the original is deleted after a successful write.
/// Non-override mode appends `_converted.cbz` to the stem so the original
/// stays untouched.
fn resolve_output_path(path: &Path, override_original: bool) -> (PathBuf, bool) {
    let name = path.to_string_lossy();
    let lower = name.to_lowercase();
    if override_original {
        if lower.ends_with(".cbr") {
            (path.with_extension("cbz"), true)
        } else {
            (path.to_path_buf(), false)
        }
    } else {
        let stem = if lower.ends_with(".cbz") || lower.ends_with(".cbr") {
            &name[..name.len() - 4]
        } else {
            &name[..]
        };
        (PathBuf::from(format!("{stem}_converted.cbz")), false)
    }
}
