//! Stream decoding for `/api/generate` responses.

pub mod chunk;
pub mod decoder;

pub use chunk::GenerateChunk;
pub use decoder::{NdjsonDecoder, decode_stream};
