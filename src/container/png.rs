// PNG chunk stream codec.
//
// Each chunk is `length(4B big-endian) | type(4 ASCII bytes) | payload |
// crc(4B big-endian)`. The CRC covers the type bytes followed by the payload
// bytes and uses the standard reflected polynomial; it is fed incrementally,
// segment by segment, so synthetic chunks can be checksummed while they are
// being assembled.

use crc32fast::Hasher;

use super::FormatError;

// ---------------------------------------------------------------------------
// Signature and well-known chunk types
// ---------------------------------------------------------------------------

/// The 8-byte PNG file signature.
pub const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub const IHDR: [u8; 4] = *b"IHDR";
pub const PLTE: [u8; 4] = *b"PLTE";
pub const TRNS: [u8; 4] = *b"tRNS";
pub const IDAT: [u8; 4] = *b"IDAT";
pub const IEND: [u8; 4] = *b"IEND";
pub const TEXT: [u8; 4] = *b"tEXt";
pub const TIME: [u8; 4] = *b"tIME";

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One typed, checksummed unit of the chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 4-byte ASCII type tag.
    pub kind: [u8; 4],
    /// Payload bytes.
    pub data: Vec<u8>,
    /// CRC-32 over type + payload as stored in (or computed for) the stream.
    pub crc: u32,
}

impl Chunk {
    /// Build a chunk, computing its CRC over type + payload.
    pub fn new(kind: [u8; 4], data: Vec<u8>) -> Self {
        let crc = crc_over(&kind, &[&data]);
        Self { kind, data, crc }
    }

    /// Build a chunk from multiple payload segments, feeding the checksum
    /// incrementally before finalizing.
    pub fn from_segments(kind: [u8; 4], segments: &[&[u8]]) -> Self {
        let crc = crc_over(&kind, segments);
        let mut data = Vec::with_capacity(segments.iter().map(|s| s.len()).sum());
        for seg in segments {
            data.extend_from_slice(seg);
        }
        Self { kind, data, crc }
    }

    /// The type tag as text (lossy for non-ASCII tags).
    pub fn kind_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.kind)
    }

    /// Recompute the CRC and compare it against the stored value.
    pub fn verify_crc(&self) -> bool {
        crc_over(&self.kind, &[&self.data]) == self.crc
    }

    /// Serialized size: length + type + payload + crc.
    pub fn encoded_len(&self) -> usize {
        12 + self.data.len()
    }

    /// Critical chunks carry an uppercase first letter.
    pub fn is_critical(&self) -> bool {
        self.kind[0].is_ascii_uppercase()
    }
}

/// Running CRC-32 over the type bytes then each payload segment in order.
fn crc_over(kind: &[u8; 4], segments: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(kind);
    for seg in segments {
        hasher.update(seg);
    }
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// Chunk stream decode/encode
// ---------------------------------------------------------------------------

/// Decode a chunk stream, reading chunks sequentially until the input is
/// exhausted.
///
/// Fails if a declared length reaches past the end of the input, or — when
/// `verify_crc` is set — if a stored CRC does not match the recomputed one.
pub fn decode_chunks(mut data: &[u8], verify_crc: bool) -> Result<Vec<Chunk>, FormatError> {
    let mut chunks = Vec::new();

    while !data.is_empty() {
        if data.len() < 8 {
            return Err(FormatError::Truncated {
                context: "chunk header",
            });
        }
        let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let kind = [data[4], data[5], data[6], data[7]];
        let rest = &data[8..];

        let Some(total) = declared.checked_add(4) else {
            return Err(FormatError::LengthOverflow {
                declared,
                remaining: rest.len(),
            });
        };
        if rest.len() < total {
            return Err(FormatError::LengthOverflow {
                declared: total,
                remaining: rest.len(),
            });
        }

        let payload = rest[..declared].to_vec();
        let stored = u32::from_be_bytes([
            rest[declared],
            rest[declared + 1],
            rest[declared + 2],
            rest[declared + 3],
        ]);

        if verify_crc {
            let computed = crc_over(&kind, &[&payload]);
            if computed != stored {
                return Err(FormatError::CrcMismatch {
                    kind: String::from_utf8_lossy(&kind).into_owned(),
                    stored,
                    computed,
                });
            }
        }

        chunks.push(Chunk {
            kind,
            data: payload,
            crc: stored,
        });
        data = &rest[total..];
    }

    Ok(chunks)
}

/// Serialize a chunk sequence, preserving order. Exact inverse of
/// [`decode_chunks`].
pub fn encode_chunks(chunks: &[Chunk]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.iter().map(Chunk::encoded_len).sum());
    for chunk in chunks {
        out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&chunk.kind);
        out.extend_from_slice(&chunk.data);
        out.extend_from_slice(&chunk.crc.to_be_bytes());
    }
    out
}

/// Decode a whole PNG file: signature check, then the chunk stream.
pub fn decode_png(data: &[u8], verify_crc: bool) -> Result<Vec<Chunk>, FormatError> {
    let Some(rest) = data.strip_prefix(&SIGNATURE[..]) else {
        return Err(FormatError::BadSignature);
    };
    decode_chunks(rest, verify_crc)
}

/// Serialize a whole PNG file: signature, then the chunk stream.
pub fn encode_png(chunks: &[Chunk]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + chunks.iter().map(Chunk::encoded_len).sum::<usize>());
    out.extend_from_slice(&SIGNATURE);
    out.extend_from_slice(&encode_chunks(chunks));
    out
}

// ---------------------------------------------------------------------------
// Synthetic chunks
// ---------------------------------------------------------------------------

/// Build a tEXt metadata chunk: key, NUL separator, value.
pub fn text_chunk(key: &str, value: &str) -> Chunk {
    Chunk::from_segments(TEXT, &[key.as_bytes(), &[0], value.as_bytes()])
}

/// Timestamp carried by a tIME chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeStamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Build a tIME chunk: 7 bytes — big-endian 16-bit year, then month, day,
/// hour, minute, second.
pub fn time_chunk(ts: TimeStamp) -> Chunk {
    Chunk::from_segments(
        TIME,
        &[
            &ts.year.to_be_bytes(),
            &[ts.month, ts.day, ts.hour, ts.minute, ts.second],
        ],
    )
}

// ---------------------------------------------------------------------------
// Image header (IHDR)
// ---------------------------------------------------------------------------

/// Parsed IHDR fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub compression: u8,
    pub filter: u8,
    pub interlace: u8,
}

impl ImageHeader {
    /// Parse the 13-byte IHDR payload.
    pub fn parse(chunk: &Chunk) -> Result<Self, FormatError> {
        if chunk.kind != IHDR {
            return Err(FormatError::InvalidHeader(format!(
                "expected IHDR, found {}",
                chunk.kind_str()
            )));
        }
        let d = &chunk.data;
        if d.len() != 13 {
            return Err(FormatError::InvalidHeader(format!(
                "IHDR payload is {} bytes, expected 13",
                d.len()
            )));
        }
        let hdr = Self {
            width: u32::from_be_bytes([d[0], d[1], d[2], d[3]]),
            height: u32::from_be_bytes([d[4], d[5], d[6], d[7]]),
            bit_depth: d[8],
            color_type: d[9],
            compression: d[10],
            filter: d[11],
            interlace: d[12],
        };
        if hdr.channels() == 0 {
            return Err(FormatError::InvalidHeader(format!(
                "unknown color type {}",
                hdr.color_type
            )));
        }
        if hdr.width == 0 || hdr.height == 0 {
            return Err(FormatError::InvalidHeader("zero dimension".into()));
        }
        Ok(hdr)
    }

    /// Serialize back into an IHDR chunk.
    pub fn to_chunk(&self) -> Chunk {
        Chunk::from_segments(
            IHDR,
            &[
                &self.width.to_be_bytes(),
                &self.height.to_be_bytes(),
                &[
                    self.bit_depth,
                    self.color_type,
                    self.compression,
                    self.filter,
                    self.interlace,
                ],
            ],
        )
    }

    /// Samples per pixel for this color type (0 for unknown types).
    pub fn channels(&self) -> u32 {
        match self.color_type {
            0 | 3 => 1,
            2 => 3,
            4 => 2,
            6 => 4,
            _ => 0,
        }
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.channels() * self.bit_depth as u32
    }

    /// Unfiltered scanline length in bytes (without the filter byte).
    pub fn bytes_per_row(&self) -> usize {
        ((self.width as u64 * self.bits_per_pixel() as u64).div_ceil(8)) as usize
    }

    /// Byte distance between corresponding bytes of horizontally adjacent
    /// pixels, as used by the scanline filters.
    pub fn filter_step(&self) -> usize {
        ((self.bits_per_pixel() + 7) / 8).max(1) as usize
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
