//! Marker-protocol response parser
//!
//! Combined extract-and-reply model calls answer in one stream shaped as
//!
//! ```text
//! [TABLE]{"field": "value", ...}[/TABLE]
//! free-text reply...
//! ```
//!
//! This parser demultiplexes that stream into a structured extraction
//! payload and the reply text, independent of how the transport chunked it.
//! It starts in `ScanningHeader`, buffering input until the close marker
//! shows up, then decodes the header and switches to `EmittingBody`, where
//! every chunk is forwarded verbatim once the body's leading whitespace has
//! been trimmed. A stream that never contains the close marker is treated as
//! plain reply text with an empty extraction; header decoding never blocks
//! delivery of user-visible text.

use crate::core::form::FieldMap;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Opens the structured header
pub const TABLE_OPEN: &str = "[TABLE]";

/// Closes the structured header; everything after it is reply text
pub const TABLE_CLOSE: &str = "[/TABLE]";

/// Header payload unparseable even after lenient cleanup. Recovered locally
/// by emitting an empty extraction; never surfaced to the event consumer.
#[derive(Debug, Error)]
#[error("unparseable table header: {0}")]
pub struct ParseError(String);

/// What the parser found in the stream so far
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// The decoded header map, raw: field filtering and value acceptance
    /// are the merger's job. Emitted exactly once per stream.
    Extraction(FieldMap),

    /// A fragment of user-visible reply text
    Content(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    ScanningHeader,
    EmittingBody,
}

/// Incremental two-state push parser. Feed chunks with [`push`], then call
/// [`finish`] when the stream ends to flush a header-less stream.
///
/// [`push`]: ResponseParser::push
/// [`finish`]: ResponseParser::finish
#[derive(Debug)]
pub struct ResponseParser {
    state: ParserState,
    buffer: String,
    body_started: bool,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::ScanningHeader,
            buffer: String::new(),
            body_started: false,
        }
    }

    /// Feed one raw chunk, returning the events it completed
    pub fn push(&mut self, chunk: &str) -> Vec<ParserEvent> {
        match self.state {
            ParserState::ScanningHeader => {
                self.buffer.push_str(chunk);
                let Some(close_idx) = self.buffer.find(TABLE_CLOSE) else {
                    return Vec::new();
                };

                let header_region = &self.buffer[..close_idx];
                let header = match header_region.find(TABLE_OPEN) {
                    Some(open_idx) => &header_region[open_idx + TABLE_OPEN.len()..],
                    None => header_region,
                };

                let fields = match decode_header(header) {
                    Ok(fields) => fields,
                    Err(err) => {
                        warn!(%err, "table header rejected, emitting empty extraction");
                        FieldMap::new()
                    }
                };
                debug!(fields = fields.len(), "table header decoded");

                let mut events = vec![ParserEvent::Extraction(fields)];

                let rest = self.buffer[close_idx + TABLE_CLOSE.len()..].to_string();
                self.state = ParserState::EmittingBody;
                self.buffer.clear();

                let trimmed = rest.trim_start();
                if !trimmed.is_empty() {
                    self.body_started = true;
                    events.push(ParserEvent::Content(trimmed.to_string()));
                }
                events
            }
            ParserState::EmittingBody => {
                if !self.body_started {
                    let trimmed = chunk.trim_start();
                    if trimmed.is_empty() {
                        return Vec::new();
                    }
                    self.body_started = true;
                    return vec![ParserEvent::Content(trimmed.to_string())];
                }
                if chunk.is_empty() {
                    return Vec::new();
                }
                vec![ParserEvent::Content(chunk.to_string())]
            }
        }
    }

    /// Flush at end of stream. If the close marker never arrived the whole
    /// buffer is reply text and the extraction is empty; fail open, never
    /// fail closed.
    pub fn finish(self) -> Vec<ParserEvent> {
        match self.state {
            ParserState::ScanningHeader => {
                warn!("stream ended without close marker, treating as plain reply");
                let mut events = vec![ParserEvent::Extraction(FieldMap::new())];
                if !self.buffer.is_empty() {
                    events.push(ParserEvent::Content(self.buffer));
                }
                events
            }
            ParserState::EmittingBody => Vec::new(),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the header region: strict JSON first, then a lenient cleanup pass.
fn decode_header(raw: &str) -> Result<FieldMap, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(FieldMap::new());
    }
    if let Ok(fields) = serde_json::from_str::<FieldMap>(trimmed) {
        return Ok(fields);
    }
    let cleaned = clean_json(trimmed);
    serde_json::from_str::<FieldMap>(&cleaned).map_err(|err| ParseError(err.to_string()))
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid regex"))
}

/// Lenient cleanup for model-mangled JSON: strip a surrounding code fence,
/// then trim to the outermost balanced-brace region.
fn clean_json(raw: &str) -> String {
    let defenced = match fence_regex().captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw,
    };

    let Some(start) = defenced.find('{') else {
        return defenced.trim().to_string();
    };

    let mut depth = 0usize;
    for (offset, ch) in defenced[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return defenced[start..start + offset + 1].to_string();
                }
            }
            _ => {}
        }
    }
    defenced[start..].trim().to_string()
}
