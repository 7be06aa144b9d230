// Concurrent batch pipeline: enumerate a corpus, recompress and verify every
// item in parallel, aggregate the results, and swap the corpus atomically.
//
// Per-item failures are logged and counted, never fatal; only setup-phase
// failures abort before any worker starts. Aggregate counters are atomics
// updated outside any lock, so bookkeeping never serializes the workers.

mod archive;
mod directory;

pub use archive::run_archive;
pub use directory::run_directory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::engine::{RecompressOptions, Recompressor};
use crate::equality::{Verdict, verify_png};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Batch run configuration.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Worker count; 0 removes the bound (one worker per logical CPU).
    pub jobs: usize,
    /// Do everything except touch the filesystem.
    pub dry_run: bool,
    /// Enumerate and tally the corpus without compressing.
    pub count_only: bool,
    /// Verify every compressed item against the original pixels.
    pub verify: bool,
    /// Keep the `.old` backup after the swap.
    pub keep_backup: bool,
    /// Options handed to the recompression engine.
    pub engine: RecompressOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            dry_run: false,
            count_only: false,
            verify: true,
            keep_backup: true,
            engine: RecompressOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Setup-phase failure. Aborts the run before any worker starts.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("corpus not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unrecognized corpus {}: {}", .path.display(), .reason)]
    Unrecognized { path: PathBuf, reason: String },

    #[error("sibling path already exists: {}", .0.display())]
    SiblingExists(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl BatchError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Shared aggregate counters, updated with atomic adds outside any lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    processed: AtomicU64,
    identical: AtomicU64,
    src_bytes: AtomicU64,
    dst_bytes: AtomicU64,
}

impl Counters {
    pub(crate) fn record(&self, src_len: usize, dst_len: usize, identical: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if identical {
            self.identical.fetch_add(1, Ordering::Relaxed);
        }
        self.src_bytes.fetch_add(src_len as u64, Ordering::Relaxed);
        self.dst_bytes.fetch_add(dst_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, elapsed: Duration) -> Summary {
        Summary {
            processed: self.processed.load(Ordering::Relaxed),
            identical: self.identical.load(Ordering::Relaxed),
            src_bytes: self.src_bytes.load(Ordering::Relaxed),
            dst_bytes: self.dst_bytes.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub processed: u64,
    pub identical: u64,
    pub src_bytes: u64,
    pub dst_bytes: u64,
    pub elapsed: Duration,
}

impl Summary {
    /// Items whose output was not verified identical.
    pub fn different(&self) -> u64 {
        self.processed - self.identical
    }

    /// Size reduction across the corpus, in percent.
    pub fn reduction_percent(&self) -> f64 {
        if self.src_bytes == 0 {
            0.0
        } else {
            100.0 * (1.0 - self.dst_bytes as f64 / self.src_bytes as f64)
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} identical, {} different), {} -> {} bytes ({:.1}% saved) in {:.2?}",
            self.processed,
            self.identical,
            self.different(),
            self.src_bytes,
            self.dst_bytes,
            self.reduction_percent(),
            self.elapsed
        )
    }
}

// ---------------------------------------------------------------------------
// Per-item report
// ---------------------------------------------------------------------------

/// Per-item result, owned by its worker until folded into the aggregate.
#[derive(Debug)]
pub struct ItemReport {
    pub name: String,
    pub src_len: usize,
    pub dst_len: usize,
    /// `None` when verification was disabled or the engine failed.
    pub verdict: Option<Verdict>,
    pub elapsed: Duration,
}

pub(crate) struct Processed {
    pub bytes: Vec<u8>,
    pub identical: bool,
    pub report: ItemReport,
}

/// Drive one item through compress + verify, logging the outcome.
///
/// An engine error carries the original bytes through unchanged and counts
/// the item as different (skip-and-count); it never aborts the batch.
pub(crate) fn process_item(
    engine: &dyn Recompressor,
    opts: &BatchOptions,
    name: &str,
    data: &[u8],
) -> Processed {
    let started = Instant::now();

    let (bytes, identical, verdict) = match engine.recompress(data, &opts.engine) {
        Ok(out) => {
            if opts.verify {
                match verify_png(data, &out) {
                    Ok(v) => {
                        let same = v.is_same();
                        if !same {
                            warn!("{name}: verification mismatch: {v}");
                        }
                        (out, same, Some(v))
                    }
                    Err(e) => {
                        error!("{name}: verification failed: {e}");
                        (out, false, None)
                    }
                }
            } else {
                (out, false, None)
            }
        }
        Err(e) => {
            error!("{name}: engine error: {e}");
            (data.to_vec(), false, None)
        }
    };

    let elapsed = started.elapsed();
    let ratio = if data.is_empty() {
        100.0
    } else {
        100.0 * bytes.len() as f64 / data.len() as f64
    };
    info!(
        "{name}: {} -> {} bytes ({ratio:.1}%) in {elapsed:.2?}",
        data.len(),
        bytes.len(),
    );

    Processed {
        identical,
        report: ItemReport {
            name: name.to_string(),
            src_len: data.len(),
            dst_len: bytes.len(),
            verdict,
            elapsed,
        },
        bytes,
    }
}

// ---------------------------------------------------------------------------
// Corpus dispatch
// ---------------------------------------------------------------------------

/// Run the batch over a corpus path: a directory tree of PNG files, or a zip
/// archive of PNG entries.
pub fn run(
    path: &Path,
    engine: &dyn Recompressor,
    opts: &BatchOptions,
) -> Result<Summary, BatchError> {
    if !path.exists() {
        return Err(BatchError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        run_directory(path, engine, opts)
    } else {
        run_archive(path, engine, opts)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn build_pool(jobs: usize) -> Result<rayon::ThreadPool, BatchError> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()?)
}

pub(crate) fn has_png_suffix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b".png")
}

/// `corpus` -> `corpus.old` / `corpus.zip` -> `corpus.zip.new`; the suffix is
/// appended to the full file name.
pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Atomic corpus swap: original becomes the `.old` sibling, the freshly
/// written corpus takes the original name.
pub(crate) fn swap_corpus(
    original: &Path,
    fresh: &Path,
    keep_backup: bool,
) -> Result<(), BatchError> {
    let backup = sibling_with_suffix(original, ".old");
    std::fs::rename(original, &backup)
        .map_err(|e| BatchError::io(format!("renaming {} to backup", original.display()), e))?;
    std::fs::rename(fresh, original)
        .map_err(|e| BatchError::io(format!("installing {}", original.display()), e))?;

    if !keep_backup {
        let result = if backup.is_dir() {
            std::fs::remove_dir_all(&backup)
        } else {
            std::fs::remove_file(&backup)
        };
        if let Err(e) = result {
            warn!("could not remove backup {}: {e}", backup.display());
        }
    }
    Ok(())
}

/// Reject the run up front if the swap siblings are already occupied.
pub(crate) fn check_siblings(path: &Path) -> Result<PathBuf, BatchError> {
    let fresh = sibling_with_suffix(path, ".new");
    let backup = sibling_with_suffix(path, ".old");
    if fresh.exists() {
        return Err(BatchError::SiblingExists(fresh));
    }
    if backup.exists() {
        return Err(BatchError::SiblingExists(backup));
    }
    Ok(fresh)
}

/// Lock a mutex, recovering the guard if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, PassthroughRecompressor};

    #[test]
    fn summary_invariant_holds() {
        let counters = Counters::default();
        counters.record(100, 90, true);
        counters.record(50, 50, true);
        counters.record(10, 10, false);
        let summary = counters.snapshot(Duration::from_secs(1));
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.identical, 2);
        assert_eq!(summary.different(), 1);
        assert_eq!(summary.processed, summary.identical + summary.different());
        assert_eq!(summary.src_bytes, 160);
        assert_eq!(summary.dst_bytes, 150);
    }

    #[test]
    fn reduction_percent_of_empty_corpus_is_zero() {
        let summary = Counters::default().snapshot(Duration::ZERO);
        assert_eq!(summary.reduction_percent(), 0.0);
    }

    #[test]
    fn png_suffix_is_case_insensitive() {
        assert!(has_png_suffix("a.png"));
        assert!(has_png_suffix("dir/B.PNG"));
        assert!(has_png_suffix("x.PnG"));
        assert!(!has_png_suffix("a.jpg"));
        assert!(!has_png_suffix("png"));
        assert!(!has_png_suffix(""));
        // Non-ASCII entry names must not trip char boundaries.
        assert!(has_png_suffix("テクスチャ.png"));
        assert!(!has_png_suffix("日本語"));
    }

    #[test]
    fn sibling_suffix_appends_to_full_name() {
        assert_eq!(
            sibling_with_suffix(Path::new("/tmp/corpus.zip"), ".old"),
            PathBuf::from("/tmp/corpus.zip.old")
        );
        assert_eq!(
            sibling_with_suffix(Path::new("images"), ".new"),
            PathBuf::from("images.new")
        );
    }

    #[test]
    fn passthrough_item_is_identical() {
        let data = b"any bytes".to_vec();
        let opts = BatchOptions::default();
        let out = process_item(&PassthroughRecompressor, &opts, "item", &data);
        assert!(out.identical);
        assert_eq!(out.bytes, data);
        assert_eq!(out.report.verdict, Some(Verdict::Same));
    }

    #[test]
    fn engine_error_carries_original_bytes_through() {
        struct Failing;
        impl Recompressor for Failing {
            fn recompress(
                &self,
                _png: &[u8],
                _opts: &RecompressOptions,
            ) -> Result<Vec<u8>, EngineError> {
                Err(EngineError::Status(1))
            }
        }

        let data = b"original".to_vec();
        let out = process_item(&Failing, &BatchOptions::default(), "item", &data);
        assert!(!out.identical);
        assert_eq!(out.bytes, data);
        assert_eq!(out.report.verdict, None);
    }

    #[test]
    fn disabled_verification_never_counts_identical() {
        let opts = BatchOptions {
            verify: false,
            ..BatchOptions::default()
        };
        let out = process_item(&PassthroughRecompressor, &opts, "item", b"bytes");
        assert!(!out.identical);
        assert_eq!(out.report.verdict, None);
    }

    #[test]
    fn missing_corpus_is_fatal() {
        let err = run(
            Path::new("/does/not/exist"),
            &PassthroughRecompressor,
            &BatchOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::NotFound(_)));
    }
}
