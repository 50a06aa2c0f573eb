//! tether protocol - Wire formats around the Claude Code CLI
//!
//! This crate provides the record types the CLI prints in
//! `stream-json` mode, the line decoder that turns raw stdout bytes
//! into those records, and the events sent on to the UI.

pub mod decoder;
pub mod message;
pub mod parse;

use thiserror::Error;

pub use decoder::{JsonLineCodec, StreamDecoder};
pub use message::UiEvent;
pub use parse::{tool_result_text, ContentBlock, RawResult, RawUsage, StreamRecord};

/// Errors raised while reading the CLI's output.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying pipe failed; the codec's error type must absorb I/O errors
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON value did not match any known record shape
    #[error("unrecognised record: {0}")]
    Record(#[from] serde_json::Error),
}
