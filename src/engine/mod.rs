// Recompression port: the narrow interface to the lossless re-encoding
// engine, plus the options record the CLI populates.

mod encoder;

pub use encoder::ZopfliRecompressor;

use bitflags::bitflags;

use crate::container::FormatError;

// ---------------------------------------------------------------------------
// Filter strategies
// ---------------------------------------------------------------------------

bitflags! {
    /// Scanline filter strategies to trial, numbered 0-8: the five fixed
    /// filters, minimum-sum, entropy, predefined (reuse the input's
    /// per-row filters), and brute-force.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilterStrategies: u16 {
        const FIXED_NONE = 1 << 0;
        const FIXED_SUB = 1 << 1;
        const FIXED_UP = 1 << 2;
        const FIXED_AVERAGE = 1 << 3;
        const FIXED_PAETH = 1 << 4;
        const MIN_SUM = 1 << 5;
        const ENTROPY = 1 << 6;
        const PREDEFINED = 1 << 7;
        const BRUTE_FORCE = 1 << 8;
    }
}

impl FilterStrategies {
    /// Map a numeric strategy index (0-8) to its flag.
    pub fn from_index(index: u8) -> Option<Self> {
        if index <= 8 {
            Self::from_bits(1 << index)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options passed through the recompression port. All fields are
/// independently settable; the engine is deterministic for a fixed
/// input+options pair.
#[derive(Debug, Clone)]
pub struct RecompressOptions {
    /// Entropy-coder iteration count.
    pub iterations: u32,
    /// Iteration count for inputs above the large-image threshold.
    pub iterations_large: u32,
    /// Filter strategies to trial. Empty means the engine picks its own set.
    pub strategies: FilterStrategies,
    /// Let the engine pick the strategy set regardless of `strategies`.
    pub auto_strategy: bool,
    /// Zero color samples of fully transparent pixels.
    pub lossy_transparent: bool,
    /// Reduce 16-bit samples to 8-bit.
    pub lossy_8bit: bool,
    /// Use the standard deflate coder instead of the iterated one.
    pub standard_deflate: bool,
    /// Ancillary chunk names copied to the output verbatim.
    pub keep_chunks: Vec<String>,
}

impl Default for RecompressOptions {
    fn default() -> Self {
        Self {
            iterations: 15,
            iterations_large: 5,
            strategies: FilterStrategies::MIN_SUM
                | FilterStrategies::ENTROPY
                | FilterStrategies::PREDEFINED,
            auto_strategy: false,
            lossy_transparent: false,
            lossy_8bit: false,
            standard_deflate: false,
            keep_chunks: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure inside the recompression engine. Recorded per item, never
/// retried, excluded from the identical tally.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("malformed image: {0}")]
    Format(#[from] FormatError),

    #[error("I/O during recompression: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine returned status {0}")]
    Status(i32),

    #[error("unsupported image: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// The lossless re-encoding capability. Implementations never mutate their
/// input and report failure as a value, not a panic.
pub trait Recompressor: Send + Sync {
    fn recompress(&self, png: &[u8], opts: &RecompressOptions) -> Result<Vec<u8>, EngineError>;
}

/// Engine that returns its input unchanged. Used by count-only runs and as
/// a test stand-in.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRecompressor;

impl Recompressor for PassthroughRecompressor {
    fn recompress(&self, png: &[u8], _opts: &RecompressOptions) -> Result<Vec<u8>, EngineError> {
        Ok(png.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_indices_map_to_flags() {
        assert_eq!(
            FilterStrategies::from_index(0),
            Some(FilterStrategies::FIXED_NONE)
        );
        assert_eq!(
            FilterStrategies::from_index(4),
            Some(FilterStrategies::FIXED_PAETH)
        );
        assert_eq!(
            FilterStrategies::from_index(5),
            Some(FilterStrategies::MIN_SUM)
        );
        assert_eq!(
            FilterStrategies::from_index(8),
            Some(FilterStrategies::BRUTE_FORCE)
        );
        assert_eq!(FilterStrategies::from_index(9), None);
    }

    #[test]
    fn passthrough_returns_input() {
        let data = b"\x89PNG not really".to_vec();
        let out = PassthroughRecompressor
            .recompress(&data, &RecompressOptions::default())
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn default_options_match_engine_defaults() {
        let opts = RecompressOptions::default();
        assert_eq!(opts.iterations, 15);
        assert_eq!(opts.iterations_large, 5);
        assert!(!opts.standard_deflate);
        assert!(opts.keep_chunks.is_empty());
    }
}
