// Archive-mode batch: PNG entries inside a zip file.
//
// Archives are not safe for concurrent multi-entry access, so the shared
// read handle and the shared write handle each sit behind their own mutex,
// held only for the read or write step — never across compression or
// verification.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use log::{error, info};
use rayon::prelude::*;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::engine::Recompressor;

use super::{
    BatchError, BatchOptions, Counters, Summary, build_pool, check_siblings, has_png_suffix,
    lock, process_item, swap_corpus,
};

struct Entry {
    index: usize,
    name: String,
    is_dir: bool,
    png: bool,
    size: u64,
}

/// Recompress every `.png` entry of the archive at `path`, writing the
/// replacement archive beside it and swapping the two when all entries are
/// done. Other entries are copied across verbatim.
pub fn run_archive(
    path: &Path,
    engine: &dyn Recompressor,
    opts: &BatchOptions,
) -> Result<Summary, BatchError> {
    let started = Instant::now();

    let file = File::open(path)
        .map_err(|e| BatchError::io(format!("opening {}", path.display()), e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| BatchError::Unrecognized {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        entries.push(Entry {
            index,
            name: entry.name().to_string(),
            is_dir: entry.is_dir(),
            png: has_png_suffix(entry.name()),
            size: entry.size(),
        });
    }

    let counters = Counters::default();

    if opts.count_only {
        for entry in entries.iter().filter(|e| e.png && !e.is_dir) {
            counters.record(entry.size as usize, entry.size as usize, true);
        }
        return Ok(counters.snapshot(started.elapsed()));
    }

    let writer = if opts.dry_run {
        None
    } else {
        let fresh = check_siblings(path)?;
        let out = File::create(&fresh)
            .map_err(|e| BatchError::io(format!("creating {}", fresh.display()), e))?;
        let mut writer = ZipWriter::new(out);
        // Directory entries are cheap; emit them up front, serially.
        for entry in entries.iter().filter(|e| e.is_dir) {
            writer.add_directory(entry.name.as_str(), SimpleFileOptions::default())?;
        }
        Some((fresh, Mutex::new(writer)))
    };

    let reader = Mutex::new(archive);
    let pool = build_pool(opts.jobs)?;

    pool.install(|| {
        entries
            .par_iter()
            .filter(|e| !e.is_dir)
            .for_each(|entry| {
                // Hold the read lock only while pulling the entry's bytes.
                let data = {
                    let mut archive = lock(&reader);
                    let mut data = Vec::with_capacity(entry.size as usize);
                    match archive.by_index(entry.index) {
                        Ok(mut file) => {
                            if let Err(e) = file.read_to_end(&mut data) {
                                error!("{}: read failed: {e}", entry.name);
                                return;
                            }
                        }
                        Err(e) => {
                            error!("{}: open failed: {e}", entry.name);
                            return;
                        }
                    }
                    data
                };

                let (bytes, method) = if entry.png {
                    let outcome = process_item(engine, opts, &entry.name, &data);
                    counters.record(
                        outcome.report.src_len,
                        outcome.report.dst_len,
                        outcome.identical,
                    );
                    // Recompressed PNGs do not deflate further; store them.
                    (outcome.bytes, CompressionMethod::Stored)
                } else {
                    (data, CompressionMethod::Deflated)
                };

                if let Some((_, writer)) = &writer {
                    // Hold the write lock only while emitting this entry.
                    let mut writer = lock(writer);
                    let options = SimpleFileOptions::default().compression_method(method);
                    if let Err(e) = writer.start_file(entry.name.as_str(), options) {
                        error!("{}: start entry failed: {e}", entry.name);
                        return;
                    }
                    if let Err(e) = writer.write_all(&bytes) {
                        error!("{}: write failed: {e}", entry.name);
                    }
                }
            });
    });

    if let Some((fresh, writer)) = writer {
        let writer = match writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.finish()?;
        swap_corpus(path, &fresh, opts.keep_backup)?;
        info!("swapped {} into place", path.display());
    }

    Ok(counters.snapshot(started.elapsed()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
