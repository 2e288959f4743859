//! Transcript decoding and parsing.
//!
//! Turns the raw bytes of an exported chat transcript into an ordered,
//! chronologically non-decreasing sequence of [`Message`]s plus the
//! non-fatal warnings collected on the way.

pub mod format;
pub mod parser;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ParseError, ParseWarning};

pub use format::TimestampFormat;
pub use parser::TranscriptParser;

/// One logical utterance from the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub timestamp: NaiveDateTime,
    /// Absent for system notices
    pub sender: Option<String>,
    pub body: String,
    /// Filenames referenced by attachment markers, in order, without duplicates
    pub attachment_refs: Vec<String>,
    pub is_system: bool,
    /// 1-based line of the message start in the transcript
    pub line: usize,
}

/// Parser output: the message sequence plus everything worth reporting.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub messages: Vec<Message>,
    pub warnings: Vec<ParseWarning>,
    pub format: TimestampFormat,
}

/// Decode transcript bytes. UTF-16 is honoured when a byte-order mark says
/// so; everything else is read as UTF-8, lossily if necessary.
pub fn decode_transcript(bytes: &[u8]) -> (String, Option<ParseWarning>) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return decode_utf8(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, true);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, false);
    }
    decode_utf8(bytes)
}

fn decode_utf8(bytes: &[u8]) -> (String, Option<ParseWarning>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), None),
        Err(_) => (
            String::from_utf8_lossy(bytes).into_owned(),
            Some(ParseWarning::LossyDecoding {
                encoding: "UTF-8".to_string(),
            }),
        ),
    }
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> (String, Option<ParseWarning>) {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    let lossy = bytes.len() % 2 != 0
        || char::decode_utf16(units.iter().copied()).any(|c| c.is_err());
    let warning = lossy.then(|| ParseWarning::LossyDecoding {
        encoding: if little_endian { "UTF-16LE" } else { "UTF-16BE" }.to_string(),
    });

    (String::from_utf16_lossy(&units), warning)
}

/// Read, decode and parse a transcript file.
pub fn read_transcript(path: &Path, parser: &TranscriptParser) -> Result<Transcript, ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let (text, decode_warning) = decode_transcript(&bytes);
    let mut transcript = parser.parse(&text)?;

    if let Some(warning) = decode_warning {
        warn!("{}", warning);
        transcript.warnings.insert(0, warning);
    }

    info!(
        "Parsed {} messages from {:?} using format {}",
        transcript.messages.len(),
        path.file_name().unwrap_or_default(),
        transcript.format
    );

    Ok(transcript)
}
