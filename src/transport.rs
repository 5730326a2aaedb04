//! Client side of the upload transport.
//!
//! Small files go in one request. Larger ones are cut into fixed-size chunks
//! sent strictly in order, because the receiver keeps per-upload state (the
//! header from chunk 0, carried partial lines, running counts).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorReport, IngestError, Result};
use crate::format::CsvFormat;
use crate::metrics::MetricsCollector;
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::receiver::ChunkReceiver;
use crate::utils::{format_bytes, split_into_chunks};

/// Header carrying the owning user on upload requests
pub const USER_ID_HEADER: &str = "x-user-id";

/// One chunk of a chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    /// Correlates the chunks of one upload
    pub upload_id: Uuid,
    /// Raw CSV text slice
    pub chunk: String,
    /// 0-based position
    pub chunk_index: usize,
    /// Number of chunks in the upload
    pub total_chunks: usize,
    /// Set on the final chunk
    pub is_last_chunk: bool,
    /// Owner of the created conversations
    pub user_id: i64,
    /// Forced format, honored on chunk 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<CsvFormat>,
}

/// Per-chunk statistics returned by the receiver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    /// Messages saved from this chunk
    pub messages_found: usize,
    /// Data lines processed in this chunk
    pub lines_processed: usize,
    /// Echo of the request index
    pub chunk_index: usize,
    /// Echo of the request total
    pub total_chunks: usize,
    /// Conversations seen so far in this upload
    #[serde(default)]
    pub conversations: usize,
    /// Echo of the request flag
    #[serde(default)]
    pub is_last_chunk: bool,
}

/// Sends one chunk and waits for its statistics
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn send_chunk(&self, request: &ChunkRequest) -> anyhow::Result<ChunkResponse>;
}

/// Posts chunks as JSON to an HTTP endpoint
pub struct HttpChunkTransport {
    client: Client,
    endpoint: String,
}

impl HttpChunkTransport {
    /// Transport posting to `endpoint`
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn send_chunk(&self, request: &ChunkRequest) -> anyhow::Result<ChunkResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(USER_ID_HEADER, request.user_id.to_string())
            .json(request)
            .send()
            .await
            .context("chunk request failed")?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.context("invalid chunk response");
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorReport>(&body) {
            Ok(report) => Err(anyhow!("{status}: {} {}", report.error, report.details)),
            Err(_) => Err(anyhow!("{status}: {body}")),
        }
    }
}

/// Hands chunks straight to an in-process receiver
pub struct LocalChunkTransport {
    receiver: Arc<ChunkReceiver>,
}

impl LocalChunkTransport {
    /// Transport delivering to `receiver`
    pub fn new(receiver: Arc<ChunkReceiver>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl ChunkTransport for LocalChunkTransport {
    async fn send_chunk(&self, request: &ChunkRequest) -> anyhow::Result<ChunkResponse> {
        Ok(self.receiver.handle(request.clone()).await?)
    }
}

/// Chunking and pacing for the uploader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderSettings {
    /// Maximum chunk size in bytes
    pub chunk_size: usize,
    /// Deadline for each chunk request
    pub chunk_timeout: Duration,
    /// Pause between chunks
    pub chunk_delay: Duration,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        Self {
            chunk_size: 512 * 1024,
            chunk_timeout: Duration::from_secs(300),
            chunk_delay: Duration::from_millis(200),
        }
    }
}

/// Totals of a completed chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedUploadSummary {
    /// Correlation id sent with every chunk
    pub upload_id: Uuid,
    /// Chunks accepted by the receiver
    pub chunks_sent: usize,
    /// Messages saved across all chunks
    pub messages_found: usize,
    /// Data lines processed across all chunks
    pub lines_processed: usize,
    /// Conversations reported by the last chunk
    pub conversations: usize,
}

/// Sends a large upload as ordered chunks
pub struct ChunkedUploader {
    transport: Arc<dyn ChunkTransport>,
    settings: UploaderSettings,
    metrics: MetricsCollector,
}

impl ChunkedUploader {
    /// Uploader sending through `transport`
    pub fn new(transport: Arc<dyn ChunkTransport>, settings: UploaderSettings) -> Self {
        Self {
            transport,
            settings,
            metrics: MetricsCollector::default(),
        }
    }

    /// Upload `text` chunk by chunk.
    ///
    /// Stops at the first failed or timed-out chunk; the error names it and
    /// how many chunks were accepted before it.
    pub async fn upload(
        &self, text: &str, user_id: i64, format: Option<CsvFormat>, progress: Arc<dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<ChunkedUploadSummary> {
        let tracker = ProgressTracker::new(progress);
        let chunks = split_into_chunks(text, self.settings.chunk_size);
        if chunks.is_empty() {
            return Err(IngestError::Validation("Nothing to upload".to_string()));
        }

        let upload_id = Uuid::new_v4();
        let total = chunks.len();
        info!(%upload_id, chunks = total, size = %format_bytes(text.len() as u64), "Starting chunked upload");

        let mut summary = ChunkedUploadSummary {
            upload_id,
            chunks_sent: 0,
            messages_found: 0,
            lines_processed: 0,
            conversations: 0,
        };

        for (idx, chunk) in chunks.into_iter().enumerate() {
            if idx > 0 {
                tokio::select! {
                    () = cancel.cancelled() => return Err(IngestError::Cancelled),
                    () = tokio::time::sleep(self.settings.chunk_delay) => {},
                }
            }

            let request = ChunkRequest {
                upload_id,
                chunk: chunk.to_string(),
                chunk_index: idx,
                total_chunks: total,
                is_last_chunk: idx + 1 == total,
                user_id,
                format,
            };

            let failure = |message: String| IngestError::Transport {
                chunk_index: idx + 1,
                chunks_succeeded: summary.chunks_sent,
                message,
            };

            let sent = tokio::select! {
                () = cancel.cancelled() => return Err(IngestError::Cancelled),
                sent = tokio::time::timeout(self.settings.chunk_timeout, self.transport.send_chunk(&request)) => sent,
            };

            let response = match sent {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    self.metrics.record_chunk(false);
                    warn!(chunk = idx + 1, total, error = %e, "Chunk upload failed");
                    return Err(failure(format!("{e:#}")));
                },
                Err(_) => {
                    self.metrics.record_chunk(false);
                    warn!(chunk = idx + 1, total, "Chunk upload timed out");
                    return Err(failure(format!(
                        "timed out after {}s",
                        self.settings.chunk_timeout.as_secs()
                    )));
                },
            };

            self.metrics.record_chunk(true);
            summary.chunks_sent += 1;
            summary.messages_found += response.messages_found;
            summary.lines_processed += response.lines_processed;
            summary.conversations = response.conversations;
            debug!(
                chunk = idx + 1,
                total,
                messages = response.messages_found,
                lines = response.lines_processed,
                "Chunk accepted"
            );
            tracker.report_within(
                0,
                100,
                idx + 1,
                total,
                &format!("Sent chunk {}/{} ({} messages so far)", idx + 1, total, summary.messages_found),
            );
        }

        info!(%upload_id, messages = summary.messages_found, "Chunked upload completed");
        Ok(summary)
    }
}

/// Result of a single-shot upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// Conversations touched by the upload
    pub conversations: usize,
    /// Messages saved
    pub total_messages: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UploadResponse {
    Receipt(UploadReceipt),
    Error(ErrorReport),
}

/// Uploads a whole file in one request
pub struct HttpUploadClient {
    client: Client,
    endpoint: String,
}

impl HttpUploadClient {
    /// Client posting to `endpoint`
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Post the file body with the user id header
    pub async fn upload(&self, file_name: &str, body: Vec<u8>, user_id: i64) -> Result<UploadReceipt> {
        let failure = |message: String| IngestError::Transport {
            chunk_index: 1,
            chunks_succeeded: 0,
            message,
        };

        info!(file = file_name, size = %format_bytes(body.len() as u64), "Uploading file");
        let response = self
            .client
            .post(&self.endpoint)
            .header(USER_ID_HEADER, user_id.to_string())
            .header("x-file-name", file_name)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(body)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| failure(e.to_string()))?;
        match serde_json::from_str::<UploadResponse>(&text) {
            Ok(UploadResponse::Receipt(receipt)) if status.is_success() => Ok(receipt),
            Ok(UploadResponse::Error(report)) => Err(failure(format!("{}: {}", report.error, report.details))),
            _ => Err(failure(format!("{status}: {text}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_request_wire_names() {
        let request = ChunkRequest {
            upload_id: Uuid::nil(),
            chunk: "a,b\n".to_string(),
            chunk_index: 0,
            total_chunks: 2,
            is_last_chunk: false,
            user_id: 7,
            format: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["chunkIndex"], 0);
        assert_eq!(json["totalChunks"], 2);
        assert_eq!(json["isLastChunk"], false);
        assert_eq!(json["userId"], 7);
        assert!(json.get("format").is_none());
    }

    #[test]
    fn test_upload_response_shapes() {
        let ok: UploadResponse = serde_json::from_str(r#"{"conversations":2,"totalMessages":3}"#).unwrap();
        assert!(matches!(ok, UploadResponse::Receipt(UploadReceipt { conversations: 2, total_messages: 3 })));

        let err: UploadResponse = serde_json::from_str(r#"{"error":"ValidationError","details":"bad"}"#).unwrap();
        assert!(matches!(err, UploadResponse::Error(_)));
    }
}
