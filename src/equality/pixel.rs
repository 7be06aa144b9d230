// Pixel-buffer comparison with tagged verdicts.
//
// Verdict precedence: width, height, pixel format, stride, image data. A
// format mismatch does not immediately mean "different": the slow per-pixel
// fallback normalizes both sides through the image codec's sample model and
// only then decides.

use std::fmt;

use super::bytes::bytes_equal;

// ---------------------------------------------------------------------------
// Pixel format
// ---------------------------------------------------------------------------

/// Sample layout of a decoded pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    L8,
    La8,
    Rgb8,
    Rgba8,
    L16,
    La16,
    Rgb16,
    Rgba16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::L8 => 1,
            Self::La8 | Self::L16 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::La16 => 4,
            Self::Rgb16 => 6,
            Self::Rgba16 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::L8 => "L8",
            Self::La8 => "LA8",
            Self::Rgb8 => "RGB8",
            Self::Rgba8 => "RGBA8",
            Self::L16 => "L16",
            Self::La16 => "LA16",
            Self::Rgb16 => "RGB16",
            Self::Rgba16 => "RGBA16",
        }
    }

    fn from_color(color: image::ColorType) -> Option<Self> {
        match color {
            image::ColorType::L8 => Some(Self::L8),
            image::ColorType::La8 => Some(Self::La8),
            image::ColorType::Rgb8 => Some(Self::Rgb8),
            image::ColorType::Rgba8 => Some(Self::Rgba8),
            image::ColorType::L16 => Some(Self::L16),
            image::ColorType::La16 => Some(Self::La16),
            image::ColorType::Rgb16 => Some(Self::Rgb16),
            image::ColorType::Rgba16 => Some(Self::Rgba16),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Pixel image
// ---------------------------------------------------------------------------

/// A decoded pixel buffer: dimensions, sample layout, row stride, bytes.
#[derive(Debug, Clone)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes between the starts of consecutive rows.
    pub stride: usize,
    pub data: Vec<u8>,
}

/// Failure to obtain a pixel buffer from encoded bytes.
#[derive(Debug, thiserror::Error)]
pub enum PixelError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("unsupported pixel layout {0:?}")]
    UnsupportedLayout(image::ColorType),
}

/// Decode a PNG byte stream into a pixel buffer via the image codec.
pub fn decode_pixels(bytes: &[u8]) -> Result<PixelImage, PixelError> {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?;
    let color = img.color();
    let format = PixelFormat::from_color(color).ok_or(PixelError::UnsupportedLayout(color))?;
    let (width, height) = (img.width(), img.height());
    let stride = width as usize * format.bytes_per_pixel();
    Ok(PixelImage {
        width,
        height,
        format,
        stride,
        data: img.into_bytes(),
    })
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Tagged outcome of an image comparison, richer than a boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Same,
    DifferentWidth { detail: String },
    DifferentHeight { detail: String },
    /// Pixel values match but the declared sample layouts differ.
    SameButDifferentPixelFormat { detail: String },
    DifferentStride { detail: String },
    DifferentImageData,
}

impl Verdict {
    /// Whether the images hold the same visual content.
    ///
    /// `SameButDifferentPixelFormat` counts: the per-pixel check confirmed
    /// value equality, only the declared layout changed.
    pub fn is_same(&self) -> bool {
        matches!(self, Self::Same | Self::SameButDifferentPixelFormat { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same => f.write_str("same"),
            Self::DifferentWidth { detail } => write!(f, "different width ({detail})"),
            Self::DifferentHeight { detail } => write!(f, "different height ({detail})"),
            Self::SameButDifferentPixelFormat { detail } => {
                write!(f, "same, but different pixel format ({detail})")
            }
            Self::DifferentStride { detail } => write!(f, "different stride ({detail})"),
            Self::DifferentImageData => f.write_str("different image data"),
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compare two pixel images.
///
/// Precedence: width, height, pixel format, stride, data. Matching formats
/// and strides compare row prefixes through the byte-equality engine; a
/// format mismatch falls back to the per-pixel value comparison.
pub fn compare_images(a: &PixelImage, b: &PixelImage) -> Verdict {
    if a.width != b.width {
        return Verdict::DifferentWidth {
            detail: format!("{} -> {}", a.width, b.width),
        };
    }
    if a.height != b.height {
        return Verdict::DifferentHeight {
            detail: format!("{} -> {}", a.height, b.height),
        };
    }
    if a.format != b.format {
        return if pixels_match(a, b) {
            Verdict::SameButDifferentPixelFormat {
                detail: format!("{} -> {}", a.format, b.format),
            }
        } else {
            Verdict::DifferentImageData
        };
    }
    if a.stride != b.stride {
        return Verdict::DifferentStride {
            detail: format!("{} -> {}", a.stride, b.stride),
        };
    }

    let row = a.width as usize * a.format.bytes_per_pixel();
    for y in 0..a.height as usize {
        let off = y * a.stride;
        if !bytes_equal(&a.data[off..off + row], &b.data[off..off + row]) {
            return Verdict::DifferentImageData;
        }
    }
    Verdict::Same
}

/// Verify that `candidate` carries the same image as `original`.
///
/// Identical byte streams short-circuit through the byte-equality engine
/// without decoding either side.
pub fn verify_png(original: &[u8], candidate: &[u8]) -> Result<Verdict, PixelError> {
    if bytes_equal(original, candidate) {
        return Ok(Verdict::Same);
    }
    let a = decode_pixels(original)?;
    let b = decode_pixels(candidate)?;
    Ok(compare_images(&a, &b))
}

/// Slow path: compare pixel values after normalizing both sides to RGBA
/// with 16-bit samples.
fn pixels_match(a: &PixelImage, b: &PixelImage) -> bool {
    for y in 0..a.height {
        for x in 0..a.width {
            if sample_rgba16(a, x, y) != sample_rgba16(b, x, y) {
                return false;
            }
        }
    }
    true
}

/// Read one pixel as RGBA with 16-bit samples. 8-bit samples are widened by
/// replication (`v * 257`); gray replicates into the color channels; a
/// missing alpha channel reads as opaque.
fn sample_rgba16(img: &PixelImage, x: u32, y: u32) -> [u16; 4] {
    let bpp = img.format.bytes_per_pixel();
    let off = y as usize * img.stride + x as usize * bpp;
    let px = &img.data[off..off + bpp];

    fn wide(v: u8) -> u16 {
        v as u16 * 257
    }
    fn ne16(px: &[u8], sample: usize) -> u16 {
        u16::from_ne_bytes([px[2 * sample], px[2 * sample + 1]])
    }

    match img.format {
        PixelFormat::L8 => {
            let v = wide(px[0]);
            [v, v, v, u16::MAX]
        }
        PixelFormat::La8 => {
            let v = wide(px[0]);
            [v, v, v, wide(px[1])]
        }
        PixelFormat::Rgb8 => [wide(px[0]), wide(px[1]), wide(px[2]), u16::MAX],
        PixelFormat::Rgba8 => [wide(px[0]), wide(px[1]), wide(px[2]), wide(px[3])],
        PixelFormat::L16 => {
            let v = ne16(px, 0);
            [v, v, v, u16::MAX]
        }
        PixelFormat::La16 => {
            let v = ne16(px, 0);
            [v, v, v, ne16(px, 1)]
        }
        PixelFormat::Rgb16 => [ne16(px, 0), ne16(px, 1), ne16(px, 2), u16::MAX],
        PixelFormat::Rgba16 => [ne16(px, 0), ne16(px, 1), ne16(px, 2), ne16(px, 3)],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
