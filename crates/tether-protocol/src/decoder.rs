//! Newline-delimited JSON decoding for the CLI's stdout.
//!
//! Bytes arrive in arbitrary chunks. The decoder keeps the trailing
//! partial line between calls, yields one JSON value per complete
//! non-empty line, and drops lines that don't parse. The CLI interleaves
//! the odd non-JSON line with its output, so a bad line is never fatal.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::ProtocolError;

/// `tokio_util` codec producing one JSON value per line.
///
/// Usable directly with `FramedRead` over a child's stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineCodec {
    /// Index up to which the buffer has already been searched for `\n`
    next_index: usize,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one raw line. `None` for blank or malformed lines.
    fn parse_line(line: &[u8]) -> Option<Value> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(e) => {
                debug!(error = %e, "Dropping non-UTF-8 stream line");
                return None;
            }
        };
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, line = %text, "Dropping malformed stream line");
                None
            }
        }
    }
}

impl Decoder for JsonLineCodec {
    type Item = Value;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, ProtocolError> {
        loop {
            let Some(offset) = src
                .get(self.next_index..)
                .and_then(|rest| rest.iter().position(|b| *b == b'\n'))
            else {
                self.next_index = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if let Some(value) = Self::parse_line(&line) {
                return Ok(Some(value));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>, ProtocolError> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }
        // Final line without a trailing newline
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let line = src.split_to(src.len());
        Ok(Self::parse_line(&line))
    }
}

/// Push-style decoder: feed chunks, drain complete records.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    codec: JsonLineCodec,
    buffer: BytesMut,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the records it completed, in order.
    ///
    /// The iterator is lazy; records not drained before the next `feed`
    /// stay buffered and come out first next time.
    pub fn feed(&mut self, chunk: &[u8]) -> Records<'_> {
        self.buffer.extend_from_slice(chunk);
        Records {
            codec: &mut self.codec,
            buffer: &mut self.buffer,
        }
    }

    /// Drains everything left at end of stream, including a final line
    /// that never got its newline, and resets the decoder.
    pub fn finish(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Some(value)) = self.codec.decode(&mut self.buffer) {
            out.push(value);
        }
        if let Ok(Some(value)) = self.codec.decode_eof(&mut self.buffer) {
            out.push(value);
        }
        self.buffer.clear();
        self.codec = JsonLineCodec::new();
        out
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Iterator over records completed by one `feed` call.
pub struct Records<'a> {
    codec: &'a mut JsonLineCodec,
    buffer: &'a mut BytesMut,
}

impl Iterator for Records<'_> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        // decode never returns Err: bad lines are skipped inside it
        self.codec.decode(self.buffer).ok().flatten()
    }
}
