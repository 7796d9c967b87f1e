//! Newline-delimited JSON decoding of a chunked response body.
//!
//! Network reads do not respect line boundaries: one read may end in the
//! middle of a record (or of a UTF-8 sequence) and another may carry several
//! records at once. The decoder keeps the unterminated tail between reads and
//! only decodes complete lines, plus whatever is left when the body ends.
//!
//! A line that is not valid JSON is logged and skipped; it never ends the
//! stream. Neither does a line longer than [`MAX_LINE_BYTES`]: its bytes are
//! dropped up to the next newline.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use tracing::warn;

use crate::stream::chunk::GenerateChunk;

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental line splitter and record decoder.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    /// Inside an oversized line; bytes are dropped until the next newline.
    discarding: bool,
    skipped: usize,
}

impl NdjsonDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read and return every record completed by it, in order.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<GenerateChunk> {
        let mut records = Vec::new();
        if self.discarding {
            let Some(pos) = bytes.iter().position(|b| *b == b'\n') else {
                return records;
            };
            self.discarding = false;
            bytes = &bytes[pos + 1..];
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            if let Some(record) = self.decode_line(&line) {
                records.push(record);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(
                "Dropping stream line longer than {MAX_LINE_BYTES} bytes ({} buffered)",
                self.buffer.len()
            );
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
            self.skipped += 1;
        }
        records
    }

    /// Decode the unterminated tail left when the body ends.
    pub fn finish(&mut self) -> Option<GenerateChunk> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        self.decode_line(&rest)
    }

    /// Number of non-empty lines that could not be decoded so far.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<GenerateChunk> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(err) => {
                self.skipped += 1;
                warn!("Skipping stream line with invalid UTF-8: {err}");
                return None;
            }
        };
        if text.is_empty() {
            return None;
        }

        match serde_json::from_str::<GenerateChunk>(text) {
            Ok(record) => Some(record),
            Err(err) => {
                self.skipped += 1;
                warn!("Skipping malformed stream line: {err}");
                None
            }
        }
    }
}

struct DecodeState<S> {
    body: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<GenerateChunk>,
    exhausted: bool,
}

/// Turn a byte stream into a lazy, ordered stream of decoded records.
///
/// Transport errors from `body` are forwarded once and end the stream.
pub fn decode_stream<S, B, E>(body: S) -> impl Stream<Item = Result<GenerateChunk, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        body,
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.pending.pop_front() {
                return Some((Ok(record), state));
            }
            if state.exhausted {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let records = state.decoder.push(bytes.as_ref());
                    state.pending.extend(records);
                }
                Some(Err(err)) => {
                    state.exhausted = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.exhausted = true;
                    let tail = state.decoder.finish();
                    state.pending.extend(tail);
                    let skipped = state.decoder.skipped();
                    if skipped > 0 {
                        warn!("{skipped} stream lines skipped");
                    }
                }
            }
        }
    })
}
