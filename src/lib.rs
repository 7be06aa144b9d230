//! Pngpress: batch PNG recompression with verified lossless output.
//!
//! The crate provides:
//! - Binary container codecs for PNG chunk streams and GLB/VRM files (`container`)
//! - A CPU-adaptive byte/pixel equality engine with tagged verdicts (`equality`)
//! - The recompression port and its zopfli-backed engine (`engine`)
//! - A concurrent batch pipeline over directories and zip archives (`batch`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use pngpress::engine::{RecompressOptions, Recompressor, ZopfliRecompressor};
//! use pngpress::equality::verify_png;
//!
//! let original = std::fs::read("texture.png").unwrap();
//! let smaller = ZopfliRecompressor
//!     .recompress(&original, &RecompressOptions::default())
//!     .unwrap();
//! assert!(verify_png(&original, &smaller).unwrap().is_same());
//! ```

pub mod batch;
pub mod container;
pub mod engine;
pub mod equality;

#[cfg(feature = "cli")]
pub mod cli;
