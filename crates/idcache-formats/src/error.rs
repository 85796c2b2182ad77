//! Format and decode error types

use thiserror::Error;

/// Error raised while decoding a compressed stream or parsing a directory record
#[derive(Debug, Error)]
pub enum FormatError {
    /// Huffman child reference points outside the 255-node table
    #[error("huffman node reference {0:#06x} outside table")]
    HuffmanNodeOutOfRange(u16),

    /// Compressed input ran out before the expanded length was produced
    #[error("{codec} input exhausted after {produced} of {expected} output units")]
    InputExhausted {
        /// Codec that was decoding
        codec: &'static str,
        /// Output units produced so far
        produced: usize,
        /// Output units requested
        expected: usize,
    },

    /// Carmack back-reference outside the already written output
    #[error(
        "carmack back-reference at word {position} copies {count} words from {source_index}, outside written output"
    )]
    BackReferenceOutOfRange {
        /// Output word index where the copy starts
        position: usize,
        /// Source word index of the copy
        source_index: isize,
        /// Number of words requested
        count: usize,
    },

    /// Decoder would write past the requested expanded length
    #[error("{codec} output overrun: {needed} units needed, {available} remain")]
    OutputOverrun {
        /// Codec that was decoding
        codec: &'static str,
        /// Units the next operation would write
        needed: usize,
        /// Units left in the output buffer
        available: usize,
    },

    /// Fixed-size table had the wrong size
    #[error("invalid {table} size: expected {expected} bytes, got {actual}")]
    TableSize {
        /// Table name
        table: &'static str,
        /// Expected size in bytes
        expected: usize,
        /// Actual size in bytes
        actual: usize,
    },

    /// A sparse entry was dereferenced
    #[error("chunk {0} is sparse")]
    SparseChunk(usize),

    /// Chunk id outside its namespace
    #[error("chunk id {id} out of range (namespace holds {count})")]
    ChunkOutOfRange {
        /// Requested id
        id: usize,
        /// Number of chunks in the namespace
        count: usize,
    },

    /// Offset table is not ordered
    #[error("offset table not ascending at entry {index}: {offset:#x} after {previous:#x}")]
    OffsetOrder {
        /// Entry index
        index: usize,
        /// Offset at that entry
        offset: u32,
        /// Preceding non-sparse offset
        previous: u32,
    },

    /// Generic record violation
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;
