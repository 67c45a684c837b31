//! The wire codec: a self-delimiting textual record format.
//!
//! ```text
//! <magic>(<name>:<typename>="<escaped-value>"<TAB>)*<NL>
//! ```
//!
//! `magic` is `?` for requests and `!` for replies. Values are escaped so
//! a record is always a single line of printable bytes: `\`, `"` and `^`
//! become `\c`, bytes at or above `0x80` become `\xNN`, and control
//! characters become `^C` (the byte XOR `0x40`).
//!
//! Decoding is strict about structure — a missing delimiter, an unknown
//! type name, or an append that would overflow the event aborts with
//! [`ProtoError::Malformed`] — but a buffer that simply ends before the
//! terminating newline reports [`Decoded::Incomplete`] so the caller can
//! read more bytes and retry. The decoder never reads past the supplied
//! buffer, whatever the input claims.

use crate::error::{ProtoError, Result};
use crate::event::{Event, EventKind};
use crate::types::{PrintMode, TypeCode};

/// Maximum encoded record size, including magic and newline.
pub const MAX_RECORD: usize = 4096;

/// Result of a decode attempt over a byte buffer.
#[derive(Debug)]
pub enum Decoded {
    /// A full record was decoded; `consumed` bytes may be dropped from the
    /// front of the caller's buffer.
    Complete { event: Event, consumed: usize },
    /// No terminating newline yet — supply more bytes and retry.
    Incomplete,
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

fn escape_into(text: &str, out: &mut Vec<u8>) {
    for &b in text.as_bytes() {
        match b {
            b'\\' | b'"' | b'^' => {
                out.push(b'\\');
                out.push(b);
            }
            0x80.. => {
                out.push(b'\\');
                out.push(b'x');
                out.extend_from_slice(format!("{b:02x}").as_bytes());
            }
            0x00..=0x1f | 0x7f => {
                out.push(b'^');
                out.push(b ^ 0x40);
            }
            _ => out.push(b),
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode an escaped value up to the closing quote. Returns the decoded
/// bytes and the position just past the quote.
fn unescape_value(line: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let malformed = |offset: usize, reason: &str| ProtoError::Malformed {
        offset,
        reason: reason.to_string(),
    };
    let mut out = Vec::new();
    let mut i = start;
    loop {
        let &b = line
            .get(i)
            .ok_or_else(|| malformed(i, "unterminated value"))?;
        match b {
            b'"' => return Ok((out, i + 1)),
            b'\\' => {
                let &next = line
                    .get(i + 1)
                    .ok_or_else(|| malformed(i, "dangling escape"))?;
                if next == b'x' {
                    let hi = line.get(i + 2).copied().and_then(hex_digit);
                    let lo = line.get(i + 3).copied().and_then(hex_digit);
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => {
                            out.push((hi << 4) | lo);
                            i += 4;
                        }
                        _ => return Err(malformed(i, "bad hex escape")),
                    }
                } else {
                    out.push(next);
                    i += 2;
                }
            }
            b'^' => {
                let &next = line
                    .get(i + 1)
                    .ok_or_else(|| malformed(i, "dangling caret"))?;
                out.push(next ^ 0x40);
                i += 2;
            }
            // Anything the encoder would have escaped must arrive escaped.
            0x00..=0x1f | 0x7f.. => return Err(malformed(i, "unescaped raw byte")),
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode an event as one wire record appended to `out`.
///
/// Fails with [`ProtoError::RecordTooLarge`] — leaving `out` untouched —
/// when the record would exceed [`MAX_RECORD`].
pub fn to_buffer(event: &Event, out: &mut Vec<u8>) -> Result<usize> {
    let mut record = Vec::with_capacity(256);
    record.push(event.kind().magic());
    for unit in event.units() {
        record.extend_from_slice(unit.name().as_bytes());
        record.push(b':');
        record.extend_from_slice(unit.code().name().as_bytes());
        record.extend_from_slice(b"=\"");
        escape_into(&unit.value().print(PrintMode::Wire), &mut record);
        record.extend_from_slice(b"\"\t");
    }
    record.push(b'\n');

    if record.len() > MAX_RECORD {
        return Err(ProtoError::RecordTooLarge(record.len()));
    }
    out.extend_from_slice(&record);
    Ok(record.len())
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Try to decode one record from the front of `buf`.
pub fn from_buffer(buf: &[u8]) -> Result<Decoded> {
    let malformed = |offset: usize, reason: &str| ProtoError::Malformed {
        offset,
        reason: reason.to_string(),
    };

    if buf.is_empty() {
        return Ok(Decoded::Incomplete);
    }

    let kind = EventKind::from_magic(buf[0]).ok_or_else(|| malformed(0, "bad magic"))?;

    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        // No terminator in sight: either the record is still in flight or
        // the peer is feeding us an unbounded line.
        if buf.len() > MAX_RECORD {
            return Err(ProtoError::RecordTooLarge(buf.len()));
        }
        return Ok(Decoded::Incomplete);
    };
    if nl + 1 > MAX_RECORD {
        return Err(ProtoError::RecordTooLarge(nl + 1));
    }

    let line = &buf[1..nl];
    let mut event = Event::new(kind);
    let mut i = 0usize;

    while i < line.len() {
        // name, up to ':'
        let name_start = i;
        while i < line.len() && line[i] != b':' {
            i += 1;
        }
        if i >= line.len() {
            return Err(malformed(name_start + 1, "missing ':' after name"));
        }
        let name_bytes = &line[name_start..i];
        if name_bytes.is_empty() || !name_bytes.iter().all(|b| (0x21..0x7f).contains(b)) {
            return Err(malformed(name_start + 1, "bad unit name"));
        }
        let name = std::str::from_utf8(name_bytes).unwrap();
        i += 1;

        // typename, up to '='
        let type_start = i;
        while i < line.len() && line[i] != b'=' {
            i += 1;
        }
        if i >= line.len() {
            return Err(malformed(type_start + 1, "missing '=' after type"));
        }
        let type_name = std::str::from_utf8(&line[type_start..i])
            .map_err(|_| malformed(type_start + 1, "type not utf-8"))?;
        let code = TypeCode::from_name(type_name)
            .ok_or_else(|| ProtoError::UnknownTypeName(type_name.to_string()))?;
        i += 1;

        // opening quote
        if line.get(i) != Some(&b'"') {
            return Err(malformed(i + 1, "missing opening quote"));
        }
        let (raw, after) = unescape_value(line, i + 1)?;
        i = after;

        let text =
            String::from_utf8(raw).map_err(|_| malformed(i, "value not utf-8 after unescape"))?;
        // Scan errors (truncation, substituted defaults) are tolerated;
        // only a failed append is structural.
        if event.append_scanned(name, code, &text).is_err() {
            return Err(malformed(i, "unit does not fit event"));
        }

        // field separator: tab, or end of line
        match line.get(i) {
            Some(&b'\t') => i += 1,
            None => break,
            Some(_) => return Err(malformed(i + 1, "missing field separator")),
        }
    }

    Ok(Decoded::Complete {
        event,
        consumed: nl + 1,
    })
}
