//! Best-effort CSV line tokenizing and repair of records split across lines.
//!
//! Vendor exports are frequently malformed: text fields carry raw newlines
//! without quoting, so one logical record spans several physical lines.
//! Nothing here returns an error; malformed input is tokenized as well as
//! possible and unrecoverable records are counted and dropped.

use tracing::debug;

/// Tokenize one CSV line.
///
/// Double quotes toggle quoted mode, a comma inside quotes is literal and
/// `""` inside a quoted field is an escaped quote. An unterminated quote
/// simply runs to the end of the line.
#[must_use]
pub fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            },
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    fields.push(current);
    fields
}

/// Tokenize a header line into trimmed column names with stray quotes removed.
///
/// A leading UTF-8 byte order mark is dropped; spreadsheet exports often carry one.
#[must_use]
pub fn parse_header(line: &str) -> Vec<String> {
    parse_line(line.trim_start_matches('\u{feff}'))
        .into_iter()
        .map(|h| h.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string())
        .collect()
}

/// Split raw text into physical lines, dropping blank ones and trailing `\r`.
#[must_use]
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty())
        .collect()
}

/// Output of `reconstruct_lines`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    /// Header followed by one entry per logical record
    pub lines: Vec<String>,
    /// Physical lines folded into a preceding record
    pub merged: usize,
    /// Records that stayed under-populated and were discarded
    pub dropped: usize,
}

/// Re-join records that were split across physical lines.
///
/// The header (first line) is kept verbatim. A line with fewer than
/// `expected` fields absorbs following lines, joined by a comma, until it
/// reaches `expected` fields, until the next line would overshoot the
/// remaining field count (that line then starts a new record) or until
/// `max_join` extra lines were absorbed. A repaired record is kept when it
/// has at least `expected - 1` fields.
#[must_use]
pub fn reconstruct_lines<S: AsRef<str>>(lines: &[S], expected: usize, max_join: usize) -> Reconstruction {
    let mut out = Reconstruction::default();
    let Some(header) = lines.first() else {
        return out;
    };
    out.lines.push(header.as_ref().to_string());

    let min_fields = expected.saturating_sub(1);
    let mut i = 1;
    while i < lines.len() {
        let line = lines[i].as_ref();
        if line.trim().is_empty() {
            i += 1;
            continue;
        }

        let mut count = parse_line(line).len();
        if count >= expected {
            out.lines.push(line.to_string());
            i += 1;
            continue;
        }

        let mut record = line.to_string();
        let mut joined = 0;
        let mut next = i + 1;
        while next < lines.len() && count < expected && joined < max_join {
            let candidate = lines[next].as_ref();
            if candidate.trim().is_empty() {
                next += 1;
                continue;
            }
            if parse_line(candidate).len() > expected - count {
                break;
            }
            record.push(',');
            record.push_str(candidate);
            count = parse_line(&record).len();
            joined += 1;
            next += 1;
        }

        if count >= min_fields {
            out.merged += joined;
            out.lines.push(record);
        } else {
            debug!(line = i + 1, fields = count, expected, "Dropping unrecoverable record");
            out.dropped += 1;
        }
        i = next;
    }

    out
}
