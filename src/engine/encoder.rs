// PNG re-encoding engine: inflate the IDAT stream, re-filter scanlines per
// the requested strategies, and re-entropy-code with the iterated DEFLATE
// engine, keeping the smallest trial.
//
// Interlaced images and streams with unexpected scanline geometry skip the
// refilter trials and re-entropy-code the existing filtered stream, which is
// still lossless.

use std::io::{Read, Write};
use std::num::NonZeroU64;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::debug;

use crate::container::FormatError;
use crate::container::png::{self, Chunk, ImageHeader};

use super::{EngineError, FilterStrategies, RecompressOptions, Recompressor};

/// Inputs above this size use the large-image iteration count.
const LARGE_IMAGE_THRESHOLD: usize = 200_000;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Production recompressor backed by the zopfli entropy coder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZopfliRecompressor;

impl Recompressor for ZopfliRecompressor {
    fn recompress(&self, input: &[u8], opts: &RecompressOptions) -> Result<Vec<u8>, EngineError> {
        let chunks = png::decode_png(input, false)?;
        let ihdr = chunks
            .iter()
            .find(|c| c.kind == png::IHDR)
            .ok_or(FormatError::MissingChunk("IHDR"))?;
        let mut header = ImageHeader::parse(ihdr)?;

        let mut idat = Vec::new();
        for chunk in chunks.iter().filter(|c| c.kind == png::IDAT) {
            idat.extend_from_slice(&chunk.data);
        }
        if idat.is_empty() {
            return Err(FormatError::MissingChunk("IDAT").into());
        }
        let raw = inflate(&idat)?;

        let iterations = if input.len() > LARGE_IMAGE_THRESHOLD {
            opts.iterations_large
        } else {
            opts.iterations
        };

        let height = header.height as usize;
        let row_len = header.bytes_per_row();
        let refilterable = header.interlace == 0
            && (row_len + 1)
                .checked_mul(height)
                .is_some_and(|expected| raw.len() == expected);

        let mut trials: Vec<(&'static str, Vec<u8>)> = Vec::new();

        if refilterable {
            let (original_filters, mut pixels) =
                unfilter(&raw, row_len, header.filter_step(), height)?;

            if opts.lossy_8bit && header.bit_depth == 16 && header.color_type != 3 {
                pixels = reduce_to_8bit(&pixels);
                header.bit_depth = 8;
            }
            if opts.lossy_transparent {
                clear_invisible(&mut pixels, &header);
            }

            // Geometry may have changed with the bit depth.
            let row_len = header.bytes_per_row();
            let step = header.filter_step();
            let strategies = effective_strategies(opts);

            let fixed = [
                (FilterStrategies::FIXED_NONE, "none", 0u8),
                (FilterStrategies::FIXED_SUB, "sub", 1),
                (FilterStrategies::FIXED_UP, "up", 2),
                (FilterStrategies::FIXED_AVERAGE, "average", 3),
                (FilterStrategies::FIXED_PAETH, "paeth", 4),
            ];
            for (flag, label, ftype) in fixed {
                if strategies.contains(flag) {
                    let filters = vec![ftype; height];
                    trials.push((label, build_stream(&pixels, row_len, step, &filters)));
                }
            }
            for (flag, label, mode) in [
                (FilterStrategies::MIN_SUM, "min-sum", Adaptive::MinSum),
                (FilterStrategies::ENTROPY, "entropy", Adaptive::Entropy),
                (
                    FilterStrategies::BRUTE_FORCE,
                    "brute-force",
                    Adaptive::BruteForce,
                ),
            ] {
                if strategies.contains(flag) {
                    let filters = adaptive_filters(&pixels, row_len, step, height, mode);
                    trials.push((label, build_stream(&pixels, row_len, step, &filters)));
                }
            }
            if strategies.contains(FilterStrategies::PREDEFINED) {
                trials.push((
                    "predefined",
                    build_stream(&pixels, row_len, step, &original_filters),
                ));
            }
        } else {
            trials.push(("as-is", raw));
        }

        let mut best: Option<(&'static str, Vec<u8>)> = None;
        for (label, stream) in &trials {
            let packed = deflate_stream(stream, iterations, opts.standard_deflate)?;
            debug!("trial {label}: {} bytes", packed.len());
            if best.as_ref().is_none_or(|(_, b)| packed.len() < b.len()) {
                best = Some((*label, packed));
            }
        }
        let (label, body) = best
            .ok_or_else(|| EngineError::Unsupported("no filter trial produced output".into()))?;
        debug!("selected {label} ({} compressed bytes)", body.len());

        let out = png::encode_png(&assemble(&chunks, &header, body, &opts.keep_chunks));
        Ok(if out.len() < input.len() {
            out
        } else {
            input.to_vec()
        })
    }
}

fn effective_strategies(opts: &RecompressOptions) -> FilterStrategies {
    if opts.auto_strategy || opts.strategies.is_empty() {
        FilterStrategies::FIXED_NONE
            | FilterStrategies::MIN_SUM
            | FilterStrategies::ENTROPY
            | FilterStrategies::PREDEFINED
    } else {
        opts.strategies
    }
}

// ---------------------------------------------------------------------------
// Entropy coding
// ---------------------------------------------------------------------------

fn inflate(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(3));
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn deflate_stream(data: &[u8], iterations: u32, standard: bool) -> Result<Vec<u8>, EngineError> {
    if standard {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
        encoder.write_all(data)?;
        return Ok(encoder.finish()?);
    }

    let options = zopfli::Options {
        iteration_count: NonZeroU64::new(iterations.max(1) as u64).unwrap_or(NonZeroU64::MIN),
        ..zopfli::Options::default()
    };
    let mut out = Vec::with_capacity(data.len() / 2);
    zopfli::compress(options, zopfli::Format::Zlib, data, &mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Scanline filtering
// ---------------------------------------------------------------------------

/// Undo the per-row filters, returning the filter-type list and the raw
/// pixel bytes.
fn unfilter(
    raw: &[u8],
    row_len: usize,
    step: usize,
    height: usize,
) -> Result<(Vec<u8>, Vec<u8>), EngineError> {
    debug_assert_eq!(raw.len(), (row_len + 1) * height);
    let mut filters = Vec::with_capacity(height);
    let mut out = vec![0u8; row_len * height];

    for y in 0..height {
        let src = &raw[y * (row_len + 1)..(y + 1) * (row_len + 1)];
        let ftype = src[0];
        filters.push(ftype);

        let (done, rest) = out.split_at_mut(y * row_len);
        let prev = (y > 0).then(|| &done[(y - 1) * row_len..]);
        let cur = &mut rest[..row_len];
        cur.copy_from_slice(&src[1..]);
        reconstruct_row(cur, prev, step, ftype)?;
    }
    Ok((filters, out))
}

fn reconstruct_row(
    cur: &mut [u8],
    prev: Option<&[u8]>,
    step: usize,
    ftype: u8,
) -> Result<(), EngineError> {
    match ftype {
        0 => {}
        1 => {
            for i in step..cur.len() {
                cur[i] = cur[i].wrapping_add(cur[i - step]);
            }
        }
        2 => {
            if let Some(prev) = prev {
                for i in 0..cur.len() {
                    cur[i] = cur[i].wrapping_add(prev[i]);
                }
            }
        }
        3 => {
            for i in 0..cur.len() {
                let a = if i >= step { cur[i - step] as u32 } else { 0 };
                let b = prev.map_or(0, |p| p[i] as u32);
                cur[i] = cur[i].wrapping_add(((a + b) / 2) as u8);
            }
        }
        4 => {
            for i in 0..cur.len() {
                let a = if i >= step { cur[i - step] } else { 0 };
                let b = prev.map_or(0, |p| p[i]);
                let c = if i >= step {
                    prev.map_or(0, |p| p[i - step])
                } else {
                    0
                };
                cur[i] = cur[i].wrapping_add(paeth(a, b, c));
            }
        }
        other => {
            return Err(EngineError::Unsupported(format!(
                "scanline filter type {other}"
            )));
        }
    }
    Ok(())
}

/// Apply filter `ftype` to one row, writing the filtered bytes into `out`.
fn filter_row(cur: &[u8], prev: Option<&[u8]>, step: usize, ftype: u8, out: &mut Vec<u8>) {
    out.clear();
    match ftype {
        0 => out.extend_from_slice(cur),
        1 => {
            for i in 0..cur.len() {
                let a = if i >= step { cur[i - step] } else { 0 };
                out.push(cur[i].wrapping_sub(a));
            }
        }
        2 => {
            for i in 0..cur.len() {
                let b = prev.map_or(0, |p| p[i]);
                out.push(cur[i].wrapping_sub(b));
            }
        }
        3 => {
            for i in 0..cur.len() {
                let a = if i >= step { cur[i - step] as u32 } else { 0 };
                let b = prev.map_or(0, |p| p[i] as u32);
                out.push(cur[i].wrapping_sub(((a + b) / 2) as u8));
            }
        }
        4 => {
            for i in 0..cur.len() {
                let a = if i >= step { cur[i - step] } else { 0 };
                let b = prev.map_or(0, |p| p[i]);
                let c = if i >= step {
                    prev.map_or(0, |p| p[i - step])
                } else {
                    0
                };
                out.push(cur[i].wrapping_sub(paeth(a, b, c)));
            }
        }
        _ => unreachable!("internal filter type {ftype}"),
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adaptive {
    /// Smallest sum of absolute signed filtered bytes.
    MinSum,
    /// Smallest Shannon-entropy bit estimate.
    Entropy,
    /// Smallest actual deflate output, rows coded independently.
    BruteForce,
}

/// Choose a filter per row by trying all five and scoring each candidate.
fn adaptive_filters(
    pixels: &[u8],
    row_len: usize,
    step: usize,
    height: usize,
    mode: Adaptive,
) -> Vec<u8> {
    let mut filters = Vec::with_capacity(height);
    let mut candidate = Vec::with_capacity(row_len);

    for y in 0..height {
        let cur = &pixels[y * row_len..(y + 1) * row_len];
        let prev = (y > 0).then(|| &pixels[(y - 1) * row_len..y * row_len]);

        let mut best_type = 0u8;
        let mut best_cost = f64::INFINITY;
        for ftype in 0..=4u8 {
            filter_row(cur, prev, step, ftype, &mut candidate);
            let cost = match mode {
                Adaptive::MinSum => sum_abs(&candidate) as f64,
                Adaptive::Entropy => entropy_bits(&candidate),
                Adaptive::BruteForce => deflate_probe_len(&candidate) as f64,
            };
            if cost < best_cost {
                best_cost = cost;
                best_type = ftype;
            }
        }
        filters.push(best_type);
    }
    filters
}

/// Sum of absolute values of the filtered bytes interpreted as signed.
fn sum_abs(row: &[u8]) -> u64 {
    row.iter().map(|&b| (b as i8).unsigned_abs() as u64).sum()
}

/// Shannon-entropy estimate of the coded size, in bits.
fn entropy_bits(row: &[u8]) -> f64 {
    let mut counts = [0u32; 256];
    for &b in row {
        counts[b as usize] += 1;
    }
    let total = row.len() as f64;
    let mut bits = 0.0;
    for &c in counts.iter().filter(|&&c| c > 0) {
        let p = c as f64 / total;
        bits -= c as f64 * p.log2();
    }
    bits
}

/// Actual deflate size of one row at a fast level, as a brute-force score.
fn deflate_probe_len(row: &[u8]) -> usize {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    if encoder.write_all(row).is_err() {
        return usize::MAX;
    }
    encoder.finish().map_or(usize::MAX, |v| v.len())
}

/// Produce the filtered scanline stream for a per-row filter list.
fn build_stream(pixels: &[u8], row_len: usize, step: usize, filters: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((row_len + 1) * filters.len());
    let mut filtered = Vec::with_capacity(row_len);

    for (y, &ftype) in filters.iter().enumerate() {
        let cur = &pixels[y * row_len..(y + 1) * row_len];
        let prev = (y > 0).then(|| &pixels[(y - 1) * row_len..y * row_len]);
        filter_row(cur, prev, step, ftype, &mut filtered);
        out.push(ftype);
        out.extend_from_slice(&filtered);
    }
    out
}

// ---------------------------------------------------------------------------
// Lossy cleanups
// ---------------------------------------------------------------------------

/// Zero the color samples of fully transparent pixels so they filter and
/// code better. Pixel count and alpha are untouched.
fn clear_invisible(pixels: &mut [u8], hdr: &ImageHeader) {
    match (hdr.color_type, hdr.bit_depth) {
        (6, 8) => {
            for px in pixels.chunks_exact_mut(4) {
                if px[3] == 0 {
                    px[..3].fill(0);
                }
            }
        }
        (6, 16) => {
            for px in pixels.chunks_exact_mut(8) {
                if px[6] == 0 && px[7] == 0 {
                    px[..6].fill(0);
                }
            }
        }
        (4, 8) => {
            for px in pixels.chunks_exact_mut(2) {
                if px[1] == 0 {
                    px[0] = 0;
                }
            }
        }
        (4, 16) => {
            for px in pixels.chunks_exact_mut(4) {
                if px[2] == 0 && px[3] == 0 {
                    px[0] = 0;
                    px[1] = 0;
                }
            }
        }
        _ => {}
    }
}

/// Drop the low byte of every big-endian 16-bit sample.
fn reduce_to_8bit(pixels: &[u8]) -> Vec<u8> {
    pixels.iter().step_by(2).copied().collect()
}

// ---------------------------------------------------------------------------
// Output assembly
// ---------------------------------------------------------------------------

/// Rebuild the chunk stream: IHDR, kept chunks in their original order and
/// position relative to the image data, one consolidated IDAT, IEND.
///
/// Critical chunks (PLTE included) and tRNS always survive; other ancillary
/// chunks only when named in the allowlist.
fn assemble(
    original: &[Chunk],
    header: &ImageHeader,
    body: Vec<u8>,
    keep: &[String],
) -> Vec<Chunk> {
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut seen_idat = false;

    for chunk in original {
        match chunk.kind {
            png::IHDR | png::IEND => {}
            png::IDAT => seen_idat = true,
            _ => {
                let kept = chunk.is_critical()
                    || chunk.kind == png::TRNS
                    || keep.iter().any(|k| k.as_bytes() == chunk.kind.as_slice());
                if kept {
                    if seen_idat {
                        after.push(chunk.clone());
                    } else {
                        before.push(chunk.clone());
                    }
                }
            }
        }
    }

    let mut out = Vec::with_capacity(before.len() + after.len() + 3);
    out.push(header.to_chunk());
    out.append(&mut before);
    out.push(Chunk::new(png::IDAT, body));
    out.append(&mut after);
    out.push(Chunk::new(png::IEND, Vec::new()));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
