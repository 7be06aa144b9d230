// Directory-mode batch: a tree of PNG files. No shared handles, so only the
// aggregate counters are contended.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{error, info};
use rayon::prelude::*;

use crate::engine::Recompressor;

use super::{
    BatchError, BatchOptions, Counters, Summary, build_pool, check_siblings, has_png_suffix,
    process_item, swap_corpus,
};

/// Recompress every PNG under `root`, writing the replacement tree beside it
/// and swapping the two when all items are done.
///
/// Non-PNG files are carried into the new tree verbatim so the swapped corpus
/// stays complete.
pub fn run_directory(
    root: &Path,
    engine: &dyn Recompressor,
    opts: &BatchOptions,
) -> Result<Summary, BatchError> {
    let started = Instant::now();
    let files = collect_files(root)?;
    let counters = Counters::default();

    if opts.count_only {
        for rel in files.iter().filter(|p| is_png_path(p)) {
            let len = std::fs::metadata(root.join(rel))
                .map_err(|e| BatchError::io(format!("reading metadata of {}", rel.display()), e))?
                .len() as usize;
            counters.record(len, len, true);
        }
        return Ok(counters.snapshot(started.elapsed()));
    }

    let fresh_root = if opts.dry_run {
        None
    } else {
        let fresh = check_siblings(root)?;
        std::fs::create_dir_all(&fresh)
            .map_err(|e| BatchError::io(format!("creating {}", fresh.display()), e))?;
        Some(fresh)
    };

    let pool = build_pool(opts.jobs)?;
    pool.install(|| {
        files.par_iter().for_each(|rel| {
            let src_path = root.join(rel);
            let data = match std::fs::read(&src_path) {
                Ok(data) => data,
                Err(e) => {
                    error!("{}: read failed: {e}", rel.display());
                    return;
                }
            };

            let bytes = if is_png_path(rel) {
                let outcome = process_item(engine, opts, &rel.display().to_string(), &data);
                counters.record(
                    outcome.report.src_len,
                    outcome.report.dst_len,
                    outcome.identical,
                );
                outcome.bytes
            } else {
                data
            };

            if let Some(fresh_root) = &fresh_root {
                if let Err(e) = write_under(fresh_root, rel, &bytes) {
                    error!("{}: write failed: {e}", rel.display());
                }
            }
        });
    });

    if let Some(fresh_root) = &fresh_root {
        swap_corpus(root, fresh_root, opts.keep_backup)?;
        info!("swapped {} into place", root.display());
    }

    Ok(counters.snapshot(started.elapsed()))
}

fn is_png_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(has_png_suffix)
}

fn write_under(root: &Path, rel: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dest = root.join(rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes)
}

/// Walk the tree, collecting every file as a path relative to `root`, in a
/// deterministic order.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, BatchError> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(&path, root, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)
        .map_err(|e| BatchError::io(format!("enumerating {}", root.display()), e))?;
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
