//! Reading uploads from disk and measuring their compressibility.

use async_compression::tokio::bufread::{GzipDecoder, ZlibEncoder};
use async_compression::Level;
use std::path::Path;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::models::CompressionStats;

/// Upload content ready for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Logical file name (`.gz` suffix removed)
    pub file_name: String,
    /// Decoded CSV text
    pub content: String,
    /// Size of the upload as received
    pub received_bytes: u64,
}

/// Read an upload from `path`, gunzipping `*.gz` files
pub async fn read_upload(path: &Path) -> Result<Upload> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let bytes = tokio::fs::read(path).await?;
    decode_upload(&file_name, bytes).await
}

/// Decode raw upload bytes named `file_name`
pub async fn decode_upload(file_name: &str, bytes: Vec<u8>) -> Result<Upload> {
    let received_bytes = bytes.len() as u64;
    let (file_name, raw) = match file_name.strip_suffix(".gz") {
        Some(stem) => {
            let mut decoder = GzipDecoder::new(BufReader::new(bytes.as_slice()));
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .await
                .map_err(|e| IngestError::Validation(format!("Invalid gzip upload {file_name}: {e}")))?;
            debug!(compressed = received_bytes, decompressed = out.len(), "Decompressed gzip upload");
            (stem.to_string(), out)
        },
        None => (file_name.to_string(), bytes),
    };

    let content = match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            warn!(file = %file_name, "Upload is not valid UTF-8, replacing invalid sequences");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        },
    };

    Ok(Upload {
        file_name,
        content,
        received_bytes,
    })
}

/// Deflate `text` at best compression and report the size reduction
pub async fn compression_stats(text: &str) -> Result<CompressionStats> {
    let mut encoder = ZlibEncoder::with_quality(text.as_bytes(), Level::Best);
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed).await?;

    Ok(CompressionStats {
        original_bytes: text.len() as u64,
        compressed_bytes: compressed.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::bufread::GzipEncoder;

    #[tokio::test]
    async fn test_gzip_upload_is_decoded() {
        let csv = "chat_id,mobile_number,fromMe,direction,text,type\n1,2,true,out,hi,text\n";
        let mut encoder = GzipEncoder::new(csv.as_bytes());
        let mut gz = Vec::new();
        encoder.read_to_end(&mut gz).await.unwrap();

        let upload = decode_upload("export.csv.gz", gz).await.unwrap();
        assert_eq!(upload.file_name, "export.csv");
        assert_eq!(upload.content, csv);
    }

    #[tokio::test]
    async fn test_compression_stats_shrink_repetitive_text() {
        let text = "5511999990000,hello,text\n".repeat(200);
        let stats = compression_stats(&text).await.unwrap();
        assert_eq!(stats.original_bytes, text.len() as u64);
        assert!(stats.compressed_bytes < stats.original_bytes);
        assert!(stats.ratio_percent() > 50.0);
    }
}
