//! Receiving side of chunked uploads.
//!
//! Chunk 0 carries the header and fixes the format for the whole upload.
//! A chunk boundary may cut a line in half; the trailing partial line is
//! carried into the next chunk. Each chunk persists its new conversations
//! before its messages. The last chunk backfills conversation titles from
//! phone numbers that only showed up in later chunks. Sessions left idle
//! longer than the session TTL (an abandoned upload) are evicted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::format::select_format;
use crate::inference::format_phone;
use crate::models::ConversationId;
use crate::normalize::RowNormalizer;
use crate::parser::{parse_header, reconstruct_lines, split_lines};
use crate::persistence::BatchPersister;
use crate::progress::ProgressTracker;
use crate::repository::ConversationStore;
use crate::service::{normalize_lines, IngestOptions, MessageAssembler, RowStats};
use crate::transport::{ChunkRequest, ChunkResponse};
use crate::validation::UploadValidator;

struct UploadSession {
    header_line: String,
    header_len: usize,
    normalizer: RowNormalizer,
    assembler: MessageAssembler,
    carry: String,
    next_index: usize,
    persisted: HashSet<ConversationId>,
    stats: RowStats,
    last_seen: Instant,
}

/// Idle time after which an unfinished upload is dropped
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Accumulates chunked uploads and persists them chunk by chunk
pub struct ChunkReceiver {
    store: Arc<dyn ConversationStore>,
    options: IngestOptions,
    session_ttl: Duration,
    sessions: Mutex<HashMap<Uuid, UploadSession>>,
}

impl ChunkReceiver {
    /// Receiver persisting into `store`
    pub fn new(store: Arc<dyn ConversationStore>, options: IngestOptions) -> Self {
        Self {
            store,
            options,
            session_ttl: DEFAULT_SESSION_TTL,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Override how long an unfinished upload may stay idle
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Drop sessions idle for longer than the session TTL; returns how many
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|upload_id, session| {
            let keep = now.duration_since(session.last_seen) <= self.session_ttl;
            if !keep {
                warn!(%upload_id, next_chunk = session.next_index, "Evicting abandoned upload");
            }
            keep
        });
        before - sessions.len()
    }

    /// Number of uploads currently in progress
    pub async fn active_uploads(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Process one chunk.
    ///
    /// Chunks of one upload must arrive in order. Any error discards the
    /// upload's session; rows persisted by earlier chunks stay.
    pub async fn handle(&self, request: ChunkRequest) -> Result<ChunkResponse> {
        UploadValidator::validate_user_id(request.user_id)?;
        self.evict_idle().await;
        if request.chunk_index >= request.total_chunks {
            return Err(IngestError::Validation(format!(
                "Chunk index {} out of range for {} chunks",
                request.chunk_index, request.total_chunks
            )));
        }

        let existing = self.sessions.lock().await.remove(&request.upload_id);
        let (mut session, body) = match existing {
            Some(session) if session.next_index == request.chunk_index => (session, request.chunk.clone()),
            Some(session) => {
                return Err(IngestError::Validation(format!(
                    "Chunk {} arrived out of order, expected {}",
                    request.chunk_index, session.next_index
                )));
            },
            None if request.chunk_index == 0 => self.open_session(&request)?,
            None => {
                return Err(IngestError::Validation(format!(
                    "Unknown upload {} for chunk {}",
                    request.upload_id, request.chunk_index
                )));
            },
        };

        let response = self.process(&mut session, &request, body).await?;

        if request.is_last_chunk {
            self.backfill_titles(&session).await;
            info!(
                upload_id = %request.upload_id,
                conversations = response.conversations,
                dropped = session.stats.dropped_rows,
                skipped = session.stats.skipped_rows,
                "Chunked upload finished"
            );
        } else {
            session.next_index += 1;
            session.last_seen = Instant::now();
            self.sessions.lock().await.insert(request.upload_id, session);
        }

        Ok(response)
    }

    fn open_session(&self, request: &ChunkRequest) -> Result<(UploadSession, String)> {
        let (header_line, rest) = match request.chunk.split_once('\n') {
            Some((header, rest)) => (header.trim_end_matches('\r').to_string(), rest.to_string()),
            None => (request.chunk.trim_end_matches('\r').to_string(), String::new()),
        };
        let headers = parse_header(&header_line);
        let format = select_format(&header_line, &headers, request.format)?;
        info!(upload_id = %request.upload_id, format = %format, chunks = request.total_chunks, "Opened chunked upload");

        let session = UploadSession {
            header_len: headers.len(),
            normalizer: RowNormalizer::new(format, &headers),
            assembler: MessageAssembler::new(format, self.options.clone()),
            header_line,
            carry: String::new(),
            next_index: 0,
            persisted: HashSet::new(),
            stats: RowStats::default(),
            last_seen: Instant::now(),
        };
        Ok((session, rest))
    }

    async fn process(&self, session: &mut UploadSession, request: &ChunkRequest, body: String) -> Result<ChunkResponse> {
        let mut text = std::mem::take(&mut session.carry);
        text.push_str(&body);

        if !request.is_last_chunk {
            match text.rfind('\n') {
                Some(pos) => session.carry = text.split_off(pos + 1),
                None => {
                    session.carry = std::mem::take(&mut text);
                },
            }
        }

        let mut lines: Vec<&str> = vec![session.header_line.as_str()];
        lines.extend(split_lines(&text));
        let lines_processed = lines.len() - 1;

        let repaired = reconstruct_lines(&lines, session.header_len, self.options.max_join_lines);
        session.stats.merged_lines += repaired.merged;
        session.stats.dropped_rows += repaired.dropped;

        let tracker = ProgressTracker::noop();
        let rows = normalize_lines(&session.normalizer, &repaired.lines[1..], &mut session.stats, &tracker, (0, 100));
        let messages: Vec<_> = rows
            .into_iter()
            .filter_map(|row| session.assembler.assemble(row, &mut session.stats))
            .collect();

        let new_conversations: Vec<_> = session
            .assembler
            .conversations()
            .to_new_conversations(request.user_id, &self.options.country_code)
            .into_iter()
            .filter(|c| !session.persisted.contains(&c.id))
            .collect();

        let persister = BatchPersister::new(Arc::clone(&self.store), self.options.batch.clone());
        let cancel = CancellationToken::new();
        persister.persist_conversations(&new_conversations, &tracker, &cancel).await?;
        session.persisted.extend(new_conversations.iter().map(|c| c.id));
        let saved = persister.persist_messages(&messages, &tracker, &cancel).await?;

        debug!(
            upload_id = %request.upload_id,
            chunk = request.chunk_index,
            lines = lines_processed,
            messages = saved.inserted,
            "Chunk processed"
        );

        Ok(ChunkResponse {
            messages_found: saved.inserted,
            lines_processed,
            chunk_index: request.chunk_index,
            total_chunks: request.total_chunks,
            conversations: session.assembler.conversations().len(),
            is_last_chunk: request.is_last_chunk,
        })
    }

    async fn backfill_titles(&self, session: &UploadSession) {
        for conversation in session.assembler.conversations().iter() {
            let Some(title) = conversation
                .phone
                .as_deref()
                .and_then(|p| format_phone(p, &self.options.country_code))
            else {
                continue;
            };
            if let Err(e) = self.store.update_conversation_title(conversation.id, &title).await {
                warn!(conversation_id = %conversation.id, error = %e, "Title backfill failed");
            }
        }
    }
}
