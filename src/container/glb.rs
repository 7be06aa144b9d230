// GLB/VRM container codec (binary glTF).
//
// Layout: a fixed 12-byte header — magic u32 `glTF`, version u32, total
// length u32, all little-endian — followed by exactly two chunks, each
// `length(u32 LE) | type(u32 LE) | payload`. The first chunk must carry the
// JSON tag, the second the BIN tag.
//
// The embedded-image index built from the JSON document is an extraction
// utility; it is not part of the batch recompression loop.

use serde::Deserialize;

use super::FormatError;

// ---------------------------------------------------------------------------
// Magic and chunk tags
// ---------------------------------------------------------------------------

/// `glTF` in little-endian.
pub const GLB_MAGIC: u32 = 0x4654_6C67;
/// `JSON` chunk tag.
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
/// `BIN\0` chunk tag.
pub const CHUNK_BIN: u32 = 0x004E_4942;

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// A decoded GLB/VRM container: version plus the JSON and BIN chunk payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlbContainer {
    pub version: u32,
    pub json: Vec<u8>,
    pub bin: Vec<u8>,
}

impl GlbContainer {
    /// Decode a container from a complete byte buffer.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::Truncated {
                context: "GLB header",
            });
        }
        let magic = read_u32(data, 0);
        if magic != GLB_MAGIC {
            return Err(FormatError::BadMagic { found: magic });
        }
        let version = read_u32(data, 4);
        let total = read_u32(data, 8) as usize;
        if total > data.len() {
            return Err(FormatError::Truncated {
                context: "GLB body",
            });
        }

        let (json, next) = read_chunk(data, HEADER_LEN, CHUNK_JSON)?;
        let (bin, _) = read_chunk(data, next, CHUNK_BIN)?;

        Ok(Self {
            version,
            json: json.to_vec(),
            bin: bin.to_vec(),
        })
    }

    /// Serialize the container: header, JSON chunk, BIN chunk.
    ///
    /// Chunk payloads are padded to 4-byte alignment — JSON with spaces, BIN
    /// with zeros — and the header's total length covers the padded stream.
    pub fn encode(&self) -> Vec<u8> {
        let json_padded = padded_len(self.json.len());
        let bin_padded = padded_len(self.bin.len());
        let total = HEADER_LEN + CHUNK_HEADER_LEN + json_padded + CHUNK_HEADER_LEN + bin_padded;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());

        out.extend_from_slice(&(json_padded as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(&self.json);
        out.resize(out.len() + (json_padded - self.json.len()), b' ');

        out.extend_from_slice(&(bin_padded as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&self.bin);
        out.resize(out.len() + (bin_padded - self.bin.len()), 0);

        out
    }

    /// Parse the JSON chunk into the parts of the document this crate reads.
    pub fn document(&self) -> Result<GltfDocument, FormatError> {
        Ok(serde_json::from_slice(&self.json)?)
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_chunk(data: &[u8], offset: usize, expected: u32) -> Result<(&[u8], usize), FormatError> {
    if data.len() < offset + CHUNK_HEADER_LEN {
        return Err(FormatError::Truncated {
            context: "GLB chunk header",
        });
    }
    let length = read_u32(data, offset) as usize;
    let tag = read_u32(data, offset + 4);
    if tag != expected {
        return Err(FormatError::WrongChunkTag {
            expected,
            found: tag,
        });
    }
    let start = offset + CHUNK_HEADER_LEN;
    let Some(end) = start.checked_add(length).filter(|&e| e <= data.len()) else {
        return Err(FormatError::LengthOverflow {
            declared: length,
            remaining: data.len().saturating_sub(start),
        });
    };
    Ok((&data[start..end], end))
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

// ---------------------------------------------------------------------------
// JSON document
// ---------------------------------------------------------------------------

/// The slice of the glTF document this crate consumes: buffer views and the
/// image cross-references into them.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfDocument {
    #[serde(default)]
    pub buffer_views: Vec<BufferView>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// A byte range into the BIN chunk.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    #[serde(default)]
    pub byte_offset: usize,
    pub byte_length: usize,
}

/// An image entry referencing a buffer view.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub buffer_view: Option<usize>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

/// One embedded image located inside the BIN chunk.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedImage<'a> {
    pub name: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    pub bytes: &'a [u8],
}

/// Slice the BIN payload by a buffer view, bounds-checked.
pub fn buffer_slice<'a>(
    bin: &'a [u8],
    index: usize,
    view: &BufferView,
) -> Result<&'a [u8], FormatError> {
    let end = view
        .byte_offset
        .checked_add(view.byte_length)
        .filter(|&e| e <= bin.len());
    match end {
        Some(end) => Ok(&bin[view.byte_offset..end]),
        None => Err(FormatError::BufferViewOutOfRange {
            index,
            offset: view.byte_offset,
            length: view.byte_length,
            available: bin.len(),
        }),
    }
}

/// Build the embedded-image index: every image that references a buffer view,
/// with its resolved byte range.
///
/// Images without a buffer view (external URIs) are skipped.
pub fn embedded_images<'a>(
    doc: &'a GltfDocument,
    bin: &'a [u8],
) -> Result<Vec<EmbeddedImage<'a>>, FormatError> {
    let mut out = Vec::new();
    for image in &doc.images {
        let Some(index) = image.buffer_view else {
            continue;
        };
        let view = doc
            .buffer_views
            .get(index)
            .ok_or(FormatError::MissingBufferView { index })?;
        out.push(EmbeddedImage {
            name: image.name.as_deref(),
            mime_type: image.mime_type.as_deref(),
            bytes: buffer_slice(bin, index, view)?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "asset": {"version": "2.0"},
        "bufferViews": [
            {"byteOffset": 0, "byteLength": 4},
            {"byteOffset": 4, "byteLength": 8}
        ],
        "images": [
            {"bufferView": 1, "name": "body", "mimeType": "image/png"},
            {"uri": "external.png"}
        ]
    }"#;

    fn sample() -> GlbContainer {
        GlbContainer {
            version: 2,
            json: DOC.as_bytes().to_vec(),
            bin: (0u8..12).collect(),
        }
    }

    #[test]
    fn roundtrip_preserves_chunks() {
        let container = sample();
        let decoded = GlbContainer::decode(&container.encode()).unwrap();
        assert_eq!(decoded.version, 2);
        // JSON padding is whitespace, so trim before comparing.
        assert_eq!(
            decoded.json.trim_ascii_end(),
            container.json.trim_ascii_end()
        );
        assert_eq!(decoded.bin, container.bin);
    }

    #[test]
    fn encode_pads_to_four_bytes() {
        let encoded = sample().encode();
        let total = u32::from_le_bytes([encoded[8], encoded[9], encoded[10], encoded[11]]);
        assert_eq!(total as usize, encoded.len());
        assert_eq!(encoded.len() % 4, 0);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut encoded = sample().encode();
        encoded[0] = b'X';
        let err = GlbContainer::decode(&encoded).unwrap_err();
        assert!(matches!(err, FormatError::BadMagic { .. }));
    }

    #[test]
    fn first_chunk_must_be_json() {
        let mut encoded = sample().encode();
        // Overwrite the first chunk's tag with the BIN tag.
        encoded[16..20].copy_from_slice(&CHUNK_BIN.to_le_bytes());
        let err = GlbContainer::decode(&encoded).unwrap_err();
        assert!(matches!(
            err,
            FormatError::WrongChunkTag {
                expected: CHUNK_JSON,
                ..
            }
        ));
    }

    #[test]
    fn second_chunk_must_be_bin() {
        let container = sample();
        let encoded = container.encode();
        let bin_tag_at = 12 + 8 + padded_len(container.json.len()) + 4;
        let mut corrupt = encoded;
        corrupt[bin_tag_at..bin_tag_at + 4].copy_from_slice(&CHUNK_JSON.to_le_bytes());
        let err = GlbContainer::decode(&corrupt).unwrap_err();
        assert!(matches!(
            err,
            FormatError::WrongChunkTag {
                expected: CHUNK_BIN,
                ..
            }
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        let err = GlbContainer::decode(&[0x67, 0x6C]).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { .. }));
    }

    #[test]
    fn buffer_views_slice_bin_chunk() {
        let container = sample();
        let doc = container.document().unwrap();
        assert_eq!(doc.buffer_views.len(), 2);
        let first = buffer_slice(&container.bin, 0, &doc.buffer_views[0]).unwrap();
        let second = buffer_slice(&container.bin, 1, &doc.buffer_views[1]).unwrap();
        assert_eq!(first, &[0, 1, 2, 3]);
        assert_eq!(second, &[4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn image_index_resolves_buffer_views() {
        let container = sample();
        let doc = container.document().unwrap();
        let images = embedded_images(&doc, &container.bin).unwrap();
        // The external-URI image is skipped.
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, Some("body"));
        assert_eq!(images[0].mime_type, Some("image/png"));
        assert_eq!(images[0].bytes, &[4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn out_of_range_buffer_view_rejected() {
        let view = BufferView {
            byte_offset: 8,
            byte_length: 100,
        };
        let err = buffer_slice(&[0u8; 12], 0, &view).unwrap_err();
        assert!(matches!(err, FormatError::BufferViewOutOfRange { .. }));
    }

    #[test]
    fn missing_buffer_view_index_rejected() {
        let doc: GltfDocument =
            serde_json::from_str(r#"{"images": [{"bufferView": 5}]}"#).unwrap();
        let err = embedded_images(&doc, &[]).unwrap_err();
        assert!(matches!(err, FormatError::MissingBufferView { index: 5 }));
    }
}
