// Binary container codecs: PNG chunk streams and GLB/VRM containers.

pub mod glb;
pub mod png;

// ---------------------------------------------------------------------------
// Format error
// ---------------------------------------------------------------------------

/// Malformed chunk or container data. Fatal to the parse at hand, never
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unexpected end of data while reading {context}")]
    Truncated { context: &'static str },

    #[error("chunk length {declared} exceeds the {remaining} remaining bytes")]
    LengthOverflow { declared: usize, remaining: usize },

    #[error("bad PNG signature")]
    BadSignature,

    #[error("{kind}: stored crc {stored:#010X}, computed {computed:#010X}")]
    CrcMismatch {
        kind: String,
        stored: u32,
        computed: u32,
    },

    #[error("missing {0} chunk")]
    MissingChunk(&'static str),

    #[error("invalid image header: {0}")]
    InvalidHeader(String),

    #[error("bad container magic: {found:#010X}")]
    BadMagic { found: u32 },

    #[error("wrong chunk tag: expected {expected:#010X}, found {found:#010X}")]
    WrongChunkTag { expected: u32, found: u32 },

    #[error("invalid JSON chunk: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bufferView {index} not present in document")]
    MissingBufferView { index: usize },

    #[error(
        "bufferView {index} spans {offset}+{length}, beyond binary chunk of {available} bytes"
    )]
    BufferViewOutOfRange {
        index: usize,
        offset: usize,
        length: usize,
        available: usize,
    },
}
