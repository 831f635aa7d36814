//! Streaming parser for health-export XML
//!
//! The export is processed as a line stream:
//! - chunks may cut a line (or a UTF-8 sequence) anywhere; the unfinished
//!   tail is carried in [`ParserState`] until the next chunk
//! - each complete line is classified into a [`LineKind`]
//! - a two-state machine (outside / inside a record element) turns line
//!   kinds into finished [`HealthRecord`]s
//!
//! Tags are assumed to be line-delimited, as the export writes them.
//! A tag broken across two lines is not recognized.

mod attributes;
mod identity;

pub use attributes::*;
pub use identity::*;

use crate::models::{HealthRecord, MetadataEntry};
use tracing::debug;

/// Classification of one trimmed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `<Record .../>`
    RecordOpenSelfClosing,
    /// `<Record ...>` with children to follow
    RecordOpen,
    /// `</Record>`
    RecordClose,
    /// `<MetadataEntry .../>`
    MetadataEntry,
    Other,
}

pub fn classify_line(line: &str) -> LineKind {
    if line.starts_with("<Record ") {
        if line.ends_with("/>") {
            LineKind::RecordOpenSelfClosing
        } else {
            LineKind::RecordOpen
        }
    } else if line.starts_with("</Record>") {
        LineKind::RecordClose
    } else if line.starts_with("<MetadataEntry ") {
        LineKind::MetadataEntry
    } else {
        LineKind::Other
    }
}

/// Whether the parser is currently inside a record element.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RecordState {
    #[default]
    Outside,
    InsideRecord {
        record: HealthRecord,
        metadata: Vec<MetadataEntry>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    pub identity: IdentityScheme,
    /// Emit a record still open at end of input rather than dropping it
    pub flush_unterminated: bool,
}

/// Everything the parser carries from one chunk to the next.
#[derive(Debug, Clone, Default)]
pub struct ParserState {
    pending_tail: Vec<u8>,
    record: RecordState,
    total_emitted: u64,
    options: ParserOptions,
}

impl ParserState {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Records emitted since the stream started
    pub fn total_emitted(&self) -> u64 {
        self.total_emitted
    }

    pub fn is_inside_record(&self) -> bool {
        matches!(self.record, RecordState::InsideRecord { .. })
    }

    /// Bytes of the unfinished last line
    pub fn pending_tail(&self) -> &[u8] {
        &self.pending_tail
    }

    fn feed_line(&mut self, raw: &[u8], out: &mut Vec<HealthRecord>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }

        let kind = classify_line(line);
        let current = std::mem::take(&mut self.record);
        let (next, emitted) = transition(current, kind, line, self.options.identity);
        self.record = next;

        if let Some(record) = emitted {
            self.total_emitted += 1;
            out.push(record);
        }
    }
}

/// Feed one chunk through the parser.
///
/// Returns the new state and the records completed by this chunk (possibly
/// none, possibly many). The final partial line is held back in the state.
pub fn process_chunk(
    mut state: ParserState,
    chunk: impl AsRef<[u8]>,
) -> (ParserState, Vec<HealthRecord>) {
    let mut records = Vec::new();

    let mut buffer = std::mem::take(&mut state.pending_tail);
    buffer.extend_from_slice(chunk.as_ref());

    let mut start = 0;
    while let Some(pos) = buffer[start..].iter().position(|b| *b == b'\n') {
        let end = start + pos;
        state.feed_line(&buffer[start..end], &mut records);
        start = end + 1;
    }

    buffer.drain(..start);
    state.pending_tail = buffer;

    (state, records)
}

/// Close the stream.
///
/// The pending tail is handled as a final line. A record element that was
/// opened but never closed is emitted only when
/// [`ParserOptions::flush_unterminated`] is set.
pub fn finish(mut state: ParserState) -> (ParserState, Vec<HealthRecord>) {
    let mut records = Vec::new();

    let tail = std::mem::take(&mut state.pending_tail);
    state.feed_line(&tail, &mut records);

    if let RecordState::InsideRecord {
        mut record,
        metadata,
    } = std::mem::take(&mut state.record)
    {
        if state.options.flush_unterminated {
            record.metadata = metadata;
            state.total_emitted += 1;
            records.push(record);
        } else {
            debug!(id = %record.id, "Dropping unterminated record at end of input");
        }
    }

    (state, records)
}

/// One step of the record state machine.
pub fn transition(
    state: RecordState,
    kind: LineKind,
    line: &str,
    scheme: IdentityScheme,
) -> (RecordState, Option<HealthRecord>) {
    match (state, kind) {
        (state, LineKind::RecordOpenSelfClosing) => {
            if let RecordState::InsideRecord { record, .. } = state {
                debug!(id = %record.id, "Record superseded before its closing tag");
            }
            (RecordState::Outside, parse_record(line, scheme))
        }
        (state, LineKind::RecordOpen) => {
            if let RecordState::InsideRecord { record, .. } = state {
                debug!(id = %record.id, "Record superseded before its closing tag");
            }
            match parse_record(line, scheme) {
                Some(record) => (
                    RecordState::InsideRecord {
                        record,
                        metadata: Vec::new(),
                    },
                    None,
                ),
                None => (RecordState::Outside, None),
            }
        }
        (
            RecordState::InsideRecord {
                mut record,
                metadata,
            },
            LineKind::RecordClose,
        ) => {
            record.metadata = metadata;
            (RecordState::Outside, Some(record))
        }
        (
            RecordState::InsideRecord {
                record,
                mut metadata,
            },
            LineKind::MetadataEntry,
        ) => {
            if let Some(entry) = parse_metadata(line) {
                metadata.push(entry);
            }
            (RecordState::InsideRecord { record, metadata }, None)
        }
        (RecordState::Outside, LineKind::RecordClose | LineKind::MetadataEntry) => {
            (RecordState::Outside, None)
        }
        (state, LineKind::Other) => (state, None),
    }
}

/// Build a record from a `<Record ...>` line.
///
/// Returns `None` when no attribute could be extracted at all.
pub fn parse_record(line: &str, scheme: IdentityScheme) -> Option<HealthRecord> {
    let attrs = extract_attributes(line);
    if attrs.is_empty() {
        debug!(line, "Skipping record line without attributes");
        return None;
    }

    let owned = |key: &str| attrs.get(key).map(str::to_string);
    let date = |key: &str| attrs.get(key).map(normalize_timestamp);

    Some(HealthRecord {
        id: record_id(&attrs, scheme),
        record_type: attrs.get("type").unwrap_or_default().to_string(),
        source_name: owned("sourceName"),
        source_version: owned("sourceVersion"),
        device: attrs.get("device").map(decode_html_entities),
        unit: owned("unit"),
        value: attrs.get("value").map(parse_number).unwrap_or(f64::NAN),
        creation_date: date("creationDate"),
        start_date: date("startDate"),
        end_date: date("endDate"),
        metadata: Vec::new(),
    })
}

/// Build a metadata entry from a `<MetadataEntry .../>` line.
pub fn parse_metadata(line: &str) -> Option<MetadataEntry> {
    let attrs = extract_attributes(line);
    match (attrs.get("key"), attrs.get("value")) {
        (Some(key), Some(value)) => Some(MetadataEntry::new(key, value)),
        _ => {
            debug!(line, "Skipping metadata entry without key or value");
            None
        }
    }
}
