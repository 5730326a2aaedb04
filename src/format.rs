//! Vendor CSV format detection.
//!
//! Each supported export is described by a signature: header tokens that
//! must all appear (case-insensitive substring match) for the header to
//! claim that format, plus the columns the row normalizer needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{IngestError, Result};

/// Known vendor export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvFormat {
    /// Export keyed by `chat_id`, with `mobile_number`/`fromMe`/`direction` columns
    Wrl,
    /// Export keyed by an opaque `chat` hash, with `_id`/`is_out`/`wa_sender_id` columns
    Rcws,
}

impl CsvFormat {
    /// Upper-case tag used in logs and summaries
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Wrl => "WRL",
            Self::Rcws => "RCWS",
        }
    }

    /// Signature entry for this format
    #[must_use]
    pub fn signature(self) -> &'static FormatSignature {
        FORMAT_SIGNATURES
            .iter()
            .find(|s| s.format == self)
            .unwrap_or(&FORMAT_SIGNATURES[0])
    }
}

impl fmt::Display for CsvFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CsvFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "wrl" => Ok(Self::Wrl),
            "rcws" => Ok(Self::Rcws),
            other => Err(IngestError::Validation(format!("Unknown CSV format: {other}. Must be one of: wrl, rcws"))),
        }
    }
}

/// Declarative description of one vendor format
#[derive(Debug)]
pub struct FormatSignature {
    /// Format this signature identifies
    pub format: CsvFormat,
    /// Tokens that must all occur in the lowercased header line
    pub header_tokens: &'static [&'static str],
    /// Column names the normalizer reads
    pub required_columns: &'static [&'static str],
}

/// Signature table, checked in order
pub static FORMAT_SIGNATURES: [FormatSignature; 2] = [
    FormatSignature {
        format: CsvFormat::Wrl,
        header_tokens: &["chat_id", "mobile_number", "fromme", "direction"],
        required_columns: &["chat_id", "mobile_number", "fromme", "direction", "text", "type"],
    },
    FormatSignature {
        format: CsvFormat::Rcws,
        header_tokens: &["_id", "chat", "is_out", "wa_sender_id"],
        required_columns: &["_id", "chat", "is_out", "text", "type"],
    },
];

/// Classify a header line, or `None` when no signature matches.
#[must_use]
pub fn detect_format(header_line: &str) -> Option<CsvFormat> {
    let lowered = header_line.to_lowercase();
    FORMAT_SIGNATURES
        .iter()
        .find(|sig| sig.header_tokens.iter().all(|token| lowered.contains(token)))
        .map(|sig| sig.format)
}

/// Required columns of `format` absent from `headers` (compared lowercased).
#[must_use]
pub fn missing_columns(format: CsvFormat, headers: &[String]) -> Vec<&'static str> {
    let present: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    format
        .signature()
        .required_columns
        .iter()
        .filter(|col| !present.iter().any(|h| h == *col))
        .copied()
        .collect()
}

/// Pick the format for an upload.
///
/// With an override the header is trusted and columns are not checked.
/// Otherwise the header must match a signature and carry every required column.
pub fn select_format(header_line: &str, headers: &[String], override_format: Option<CsvFormat>) -> Result<CsvFormat> {
    if let Some(format) = override_format {
        info!(format = %format, "Using forced CSV format");
        return Ok(format);
    }

    let Some(format) = detect_format(header_line) else {
        warn!(columns = %headers.join(", "), "CSV header matches no known format");
        return Err(IngestError::UnrecognizedFormat {
            columns: headers.join(", "),
        });
    };

    let missing = missing_columns(format, headers);
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing.join(", ")));
    }

    info!(format = %format, "Detected CSV format");
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_header;

    #[test]
    fn test_detect_wrl() {
        let header = "chat_id,mobile_number,fromMe,direction,text,type,message_created";
        assert_eq!(detect_format(header), Some(CsvFormat::Wrl));
    }

    #[test]
    fn test_detect_rcws() {
        let header = "_id,chat,phone,is_out,wa_sender_id,text,type,timestamp";
        assert_eq!(detect_format(header), Some(CsvFormat::Rcws));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_format("name,email,created"), None);
    }

    #[test]
    fn test_override_skips_column_check() {
        let header = "foo,bar";
        let headers = parse_header(header);
        assert_eq!(select_format(header, &headers, Some(CsvFormat::Rcws)).ok(), Some(CsvFormat::Rcws));
    }

    #[test]
    fn test_missing_required_column() {
        let header = "chat_id,mobile_number,fromMe,direction,text";
        let headers = parse_header(header);
        let err = select_format(header, &headers, None);
        assert!(matches!(err, Err(IngestError::MissingColumns(ref cols)) if cols == "type"));
    }

    #[test]
    fn test_parse_format_name() {
        assert_eq!("WRL".parse::<CsvFormat>().ok(), Some(CsvFormat::Wrl));
        assert!("xls".parse::<CsvFormat>().is_err());
    }
}
