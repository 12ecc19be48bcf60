//! CLI binary for cbz2webp.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, walks the input path for archives, and prints results.

use anyhow::{Context, Result};
use cbz2webp::{
    optimize, Cbz2WebpError, ConversionConfig, ConversionFormat, ConversionProgressCallback,
    ConverterRegistry, OptimizeOptions, OptimizeOutcome, ProgressCallback,
};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback ────────────────────────────────────────────────────

/// Per-chapter progress callback: keeps the shared file-level bar's message
/// current and forwards page milestones to tracing. Pages complete
/// out-of-order under concurrency, so only the running counter is shown.
struct CliProgressCallback {
    bar: ProgressBar,
    label: String,
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_chapter_start(&self, total_pages: usize) {
        self.bar
            .set_message(format!("{}: 0/{total_pages} pages", self.label));
    }

    fn on_progress(&self, message: &str, completed: u32, total: u32) {
        self.bar
            .set_message(format!("{}: {completed}/{total} pages", self.label));
        // Milestone pages at INFO, the rest at DEBUG, so plain-log mode
        // stays readable on thousand-page chapters.
        if completed % 10 == 0 || completed == total {
            info!(chapter = %self.label, "{message}");
        } else {
            debug!(chapter = %self.label, "{message}");
        }
    }

    fn on_chapter_complete(&self, converted: usize, errors: usize) {
        debug!(chapter = %self.label, converted, errors, "chapter pipeline finished");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one chapter (writes chapter-12_converted.cbz next to it)
  cbz2webp chapter-12.cbz

  # Convert a whole library in place, splitting webtoon strips
  cbz2webp --override --split ~/comics

  # Lossless, four chapters at a time, 60s deadline per chapter
  cbz2webp --lossless -n 4 -t 60 ~/comics

  # Quiet batch run for cron
  cbz2webp --quiet --override ~/comics

NOTES:
  Converted archives carry a marker in the zip comment; re-running over the
  same library skips them, so repeated runs are cheap and safe.

  A page that fails to decode or encode never fails the chapter: the rest is
  converted and the failure is reported.
"#;

/// Convert comic archives (.cbz/.cbr) to WebP, page by page.
#[derive(Parser, Debug)]
#[command(
    name = "cbz2webp",
    version,
    about = "Convert comic archives (.cbz) to WebP, page by page",
    long_about = "Re-encode every page of a comic-book zip archive as WebP, optionally \
splitting over-tall webtoon strips into fragments. Converted archives are marked in the \
zip comment so repeated runs skip them.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// A .cbz/.cbr file, or a directory scanned recursively for archives.
    path: PathBuf,

    /// WebP encoder quality (1-100).
    #[arg(short, long, env = "CBZ2WEBP_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Encode losslessly instead of at --quality.
    #[arg(long, env = "CBZ2WEBP_LOSSLESS")]
    lossless: bool,

    /// Split pages taller than 4000px into 2000px fragments.
    #[arg(short, long, env = "CBZ2WEBP_SPLIT")]
    split: bool,

    /// Overwrite originals instead of writing *_converted.cbz siblings.
    /// A .cbr input becomes .cbz and the original is deleted.
    #[arg(short = 'o', long = "override", env = "CBZ2WEBP_OVERRIDE")]
    override_original: bool,

    /// Number of chapters converted concurrently.
    #[arg(short = 'n', long, env = "CBZ2WEBP_PARALLELISM", default_value_t = 2)]
    parallelism: usize,

    /// Per-chapter deadline in seconds (0 = none). An expired deadline
    /// aborts the chapter without writing anything.
    #[arg(short = 't', long, env = "CBZ2WEBP_TIMEOUT", default_value_t = 0)]
    timeout: u64,

    /// Target format.
    #[arg(short = 'f', long, env = "CBZ2WEBP_FORMAT", default_value = "webp")]
    format: String,

    /// Disable the progress bar.
    #[arg(long, env = "CBZ2WEBP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CBZ2WEBP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(long, env = "CBZ2WEBP_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let format: ConversionFormat = cli
        .format
        .parse()
        .with_context(|| format!("Unsupported format '{}'", cli.format))?;
    let registry = ConverterRegistry::default();
    let converter = registry.get(format).context("No converter registered")?;
    // Surface a dead encoder backend before touching any archive.
    converter.prepare().context("Encoder backend unavailable")?;

    let files = collect_archives(&cli.path)?;
    if files.is_empty() {
        anyhow::bail!("No .cbz/.cbr archives found under {}", cli.path.display());
    }

    let bar = if show_progress {
        let bar = ProgressBar::new(files.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} archives  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    } else {
        ProgressBar::hidden()
    };

    let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
    let parallelism = cli.parallelism.max(1);

    // ── Run conversions, `parallelism` chapters at a time ─────────────────
    let cli = &cli;
    let results: Vec<(PathBuf, Result<OptimizeOutcome, Cbz2WebpError>)> =
        stream::iter(files.into_iter().map(|path| {
            let converter = Arc::clone(&converter);
            let bar = bar.clone();
            async move {
                let label = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                let progress: ProgressCallback = Arc::new(CliProgressCallback {
                    bar: bar.clone(),
                    label,
                });

                let config = build_config(cli, timeout, progress);
                let result = match config {
                    Ok(config) => {
                        optimize(&OptimizeOptions {
                            converter,
                            path: path.clone(),
                            config,
                            override_original: cli.override_original,
                        })
                        .await
                    }
                    Err(e) => Err(e),
                };
                bar.inc(1);
                (path, result)
            }
        }))
        .buffer_unordered(parallelism)
        .collect()
        .await;

    bar.finish_and_clear();

    // ── Per-file report + summary ──────────────────────────────────────────
    let mut converted = 0usize;
    let mut skipped = 0usize;
    let mut partial = 0usize;
    let mut failed = 0usize;
    for (path, result) in &results {
        let name = path.display();
        match result {
            Ok(OptimizeOutcome::AlreadyConverted) => {
                skipped += 1;
                if !cli.quiet {
                    eprintln!("{} {}  {}", dim("·"), name, dim("already converted"));
                }
            }
            Ok(OptimizeOutcome::Converted {
                output_path,
                page_errors,
            }) => {
                if page_errors.is_empty() {
                    converted += 1;
                    if !cli.quiet {
                        eprintln!(
                            "{} {}  →  {}",
                            green("✓"),
                            name,
                            bold(&output_path.display().to_string())
                        );
                    }
                } else {
                    partial += 1;
                    if !cli.quiet {
                        eprintln!(
                            "{} {}  →  {}  ({} page errors)",
                            cyan("⚠"),
                            name,
                            bold(&output_path.display().to_string()),
                            page_errors.len()
                        );
                        for err in page_errors {
                            eprintln!("    {}", dim(&err.to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}  {}", red("✗"), name, red(&e.to_string()));
            }
        }
    }

    if !cli.quiet {
        eprintln!(
            "{} {} converted, {} partial, {} skipped, {} failed",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&converted.to_string()),
            partial,
            skipped,
            failed,
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} archive(s) failed to convert");
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(
    cli: &Cli,
    timeout: Option<Duration>,
    progress: ProgressCallback,
) -> Result<ConversionConfig, Cbz2WebpError> {
    let mut builder = ConversionConfig::builder()
        .quality(cli.quality)
        .lossless(cli.lossless)
        .split(cli.split)
        .progress_callback(progress);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Collect archive paths: the file itself, or every `.cbz`/`.cbr` under a
/// directory. Sorted for a stable processing order.
fn collect_archives(path: &PathBuf) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.clone()]);
    }
    if !path.is_dir() {
        anyhow::bail!("{} is neither a file nor a directory", path.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    ext == "cbz" || ext == "cbr"
                })
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}
