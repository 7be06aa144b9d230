// Equality engine: byte-memory and pixel-buffer equality verdicts with
// CPU-capability-adaptive dispatch.

pub mod bytes;
pub mod pixel;

pub use bytes::{Strategy, bytes_equal, strategy};
pub use pixel::{
    PixelError, PixelFormat, PixelImage, Verdict, compare_images, decode_pixels, verify_png,
};
