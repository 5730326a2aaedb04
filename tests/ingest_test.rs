//! End-to-end ingestion tests against the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_log_ingest::error::{BatchKind, IngestError, StoreError, StoreResult};
use chat_log_ingest::models::{ConversationId, NewConversation, NewMessage};
use chat_log_ingest::persistence::BatchSettings;
use chat_log_ingest::progress::NoopProgress;
use chat_log_ingest::repository::{ConversationStore, MemoryStore};
use chat_log_ingest::resolver::hash_key;
use chat_log_ingest::service::{IngestOptions, IngestRequest, IngestStep, IngestionService};
use std::collections::HashSet;

const WRL_HEADER: &str = "chat_id,mobile_number,fromMe,direction,text,type,message_created";

fn wrl_export() -> String {
    [
        WRL_HEADER,
        "5511999990000,+5511999990000,true,out,Olá! Como posso ajudar?,text,2024-01-15T10:00:00Z",
        "5511999990000,+5511999990000,false,in,Quero um boné,text,2024-01-15T10:01:00Z",
        "abc123hash,,false,in,Oi,text,2024-01-15T11:00:00Z",
    ]
    .join("\n")
}

fn request(content: String) -> IngestRequest {
    IngestRequest {
        file_name: "wrl_export.csv".to_string(),
        content,
        user_id: 42,
        format_override: None,
    }
}

fn fast_options() -> IngestOptions {
    IngestOptions {
        batch: BatchSettings {
            batch_delay: Duration::ZERO,
            ..BatchSettings::default()
        },
        ..IngestOptions::default()
    }
}

#[tokio::test]
async fn test_wrl_export_builds_conversations() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());

    let summary = service
        .ingest(&request(wrl_export()), Arc::new(NoopProgress))
        .await
        .expect("ingestion should succeed");

    assert_eq!(summary.format, "WRL");
    assert_eq!(summary.total_messages, 3);
    assert_eq!(summary.conversations, 2);
    assert_eq!(summary.conversations_created, 2);
    assert_eq!(summary.phones_identified, 1);

    let conversations = store.conversations().expect("read conversations");
    let phone_id = ConversationId::new(999_990_000).expect("valid id");
    let hashed_id = hash_key("abc123hash");

    let by_phone = conversations.iter().find(|c| c.id == phone_id).expect("phone conversation");
    assert_eq!(by_phone.title, "(11) 99999-0000");
    assert_eq!(by_phone.user_id, 42);
    assert_eq!(by_phone.created_at, "2024-01-15T10:00:00Z");

    let by_hash = conversations.iter().find(|c| c.id == hashed_id).expect("hashed conversation");
    assert_eq!(by_hash.title, format!("Conversation {hashed_id}"));

    let messages = store.messages().expect("read messages");
    let senders: Vec<&str> = messages.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, vec!["WRL Bonés", "(11) 99999-0000", "Contact"]);
    assert!(messages[0].from_me);
    assert!(!messages[1].from_me);
    assert_eq!(messages[2].conversation_id, hashed_id);
}

#[tokio::test]
async fn test_non_content_rows_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());
    let csv = [
        WRL_HEADER,
        "5511999990000,+5511999990000,false,in,,note_action,2024-01-15T10:00:00Z",
        "5511999990000,+5511999990000,false,in,Oi,text,2024-01-15T10:05:00Z",
    ]
    .join("\n");

    let summary = service
        .ingest(&request(csv), Arc::new(NoopProgress))
        .await
        .expect("ingestion should succeed");

    assert_eq!(summary.total_messages, 1);
    assert_eq!(summary.skipped_rows, 1);
    assert_eq!(store.messages().expect("read messages")[0].content, "Oi");
}

#[tokio::test]
async fn test_rcws_export_with_epoch_timestamps() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());
    let csv = [
        "_id,chat,phone,is_out,wa_sender_id,type,text,timestamp",
        "m1,c9f8e7,5511977776666,false,Maria Silva,chat,Preciso de ajuda,1700000000",
        "m2,c9f8e7,5511977776666,true,,image,,1700000060",
        "m3,c9f8e7,5511977776666,false,,revoked,,1700000120",
    ]
    .join("\n");

    let summary = service
        .ingest(&request(csv), Arc::new(NoopProgress))
        .await
        .expect("ingestion should succeed");

    assert_eq!(summary.format, "RCWS");
    assert_eq!(summary.total_messages, 2);
    assert_eq!(summary.skipped_rows, 1);

    let messages = store.messages().expect("read messages");
    assert_eq!(messages[0].sender, "Maria Silva");
    assert_eq!(messages[0].timestamp, "2023-11-14T22:13:20.000Z");
    assert_eq!(messages[1].sender, "RCWS Advogados");
    assert_eq!(messages[1].content, "🖼️ Image sent");
    assert_eq!(messages[0].conversation_id, hash_key("c9f8e7"));

    let conversations = store.conversations().expect("read conversations");
    assert_eq!(conversations[0].title, "(11) 97777-6666");
}

#[tokio::test]
async fn test_unknown_header_is_rejected_before_any_write() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());
    let csv = "name,email,created\nAna,ana@example.com,2024-01-01\n".to_string();

    let failure = service
        .ingest(&request(csv), Arc::new(NoopProgress))
        .await
        .expect_err("unknown format must fail");

    assert_eq!(failure.step, IngestStep::Detecting);
    assert!(matches!(failure.error, IngestError::UnrecognizedFormat { .. }));
    let report = failure.report();
    assert_eq!(report.error, "ValidationError");
    assert_eq!(report.step.as_deref(), Some("detecting"));
    assert!(report.details.contains("name, email, created"));
    assert!(store.conversations().expect("read").is_empty());
}

#[tokio::test]
async fn test_byte_order_mark_header_is_accepted() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());
    let csv = format!("\u{feff}{}", wrl_export());

    let summary = service
        .ingest(&request(csv), Arc::new(NoopProgress))
        .await
        .expect("BOM-prefixed export should ingest");

    assert_eq!(summary.format, "WRL");
    assert_eq!(summary.total_messages, 3);
    let messages = store.messages().expect("read messages");
    assert_eq!(messages[0].conversation_id, ConversationId::new(999_990_000).expect("valid id"));
}

#[tokio::test]
async fn test_forced_format_skips_detection() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());
    let csv = "chat_id,text,type,message_created\n5511999990000,Oi,text,2024-01-15T10:00:00Z\n".to_string();
    let mut req = request(csv);
    req.format_override = Some(chat_log_ingest::CsvFormat::Wrl);

    let summary = service
        .ingest(&req, Arc::new(NoopProgress))
        .await
        .expect("forced format should ingest");
    assert_eq!(summary.total_messages, 1);
}

#[tokio::test]
async fn test_split_record_is_repaired() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());
    let csv = [
        WRL_HEADER,
        "5511999990000,+5511999990000,false,in,hello",
        "text,2024-01-15T10:00:00Z",
    ]
    .join("\n");

    let summary = service
        .ingest(&request(csv), Arc::new(NoopProgress))
        .await
        .expect("ingestion should succeed");

    assert_eq!(summary.merged_lines, 1);
    assert_eq!(summary.total_messages, 1);
    assert_eq!(store.messages().expect("read messages")[0].content, "hello");
}

#[tokio::test]
async fn test_reingest_is_idempotent_for_conversations() {
    let store = Arc::new(MemoryStore::new());
    let service = IngestionService::new(store.clone(), fast_options());

    let first = service
        .ingest(&request(wrl_export()), Arc::new(NoopProgress))
        .await
        .expect("first run");
    let second = service
        .ingest(&request(wrl_export()), Arc::new(NoopProgress))
        .await
        .expect("second run");

    assert_eq!(first.conversations_created, 2);
    assert_eq!(second.conversations_created, 0);
    assert_eq!(second.conversations, 2);
    assert_eq!(store.conversations().expect("read").len(), 2);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = Arc::new(move |percent: u8, _message: &str| {
        sink.lock().expect("progress lock").push(percent);
    });

    let service = IngestionService::new(Arc::new(MemoryStore::new()), fast_options());
    service
        .ingest(&request(wrl_export()), observer)
        .await
        .expect("ingestion should succeed");

    let seen = seen.lock().expect("progress lock");
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(100));
}

/// Store that fails one message batch
struct FlakyStore {
    inner: MemoryStore,
    message_calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn existing_conversation_ids(&self, ids: &[ConversationId]) -> StoreResult<HashSet<ConversationId>> {
        self.inner.existing_conversation_ids(ids).await
    }

    async fn insert_conversations(&self, rows: &[NewConversation]) -> StoreResult<usize> {
        self.inner.insert_conversations(rows).await
    }

    async fn insert_messages(&self, rows: &[NewMessage]) -> StoreResult<usize> {
        let call = self.message_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::Rejected("quota exceeded".to_string()));
        }
        self.inner.insert_messages(rows).await
    }

    async fn update_conversation_title(&self, id: ConversationId, title: &str) -> StoreResult<()> {
        self.inner.update_conversation_title(id, title).await
    }
}

#[tokio::test]
async fn test_failed_batch_reports_position_and_stops() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        message_calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let options = IngestOptions {
        batch: BatchSettings {
            message_batch_size: 2,
            batch_delay: Duration::ZERO,
            ..BatchSettings::default()
        },
        ..IngestOptions::default()
    };
    let service = IngestionService::new(store.clone(), options);

    let mut lines = vec![WRL_HEADER.to_string()];
    for i in 0..5 {
        lines.push(format!("5511999990000,+5511999990000,false,in,msg {i},text,2024-01-15T10:0{i}:00Z"));
    }

    let failure = service
        .ingest(&request(lines.join("\n")), Arc::new(NoopProgress))
        .await
        .expect_err("second batch must fail");

    assert_eq!(failure.step, IngestStep::PersistingMessages);
    match &failure.error {
        IngestError::Persistence {
            kind,
            batch_index,
            batches_succeeded,
            ..
        } => {
            assert_eq!(*kind, BatchKind::Message);
            assert_eq!(*batch_index, 2);
            assert_eq!(*batches_succeeded, 1);
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failure.report().error, "PersistenceError");
    assert_eq!(store.message_calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.inner.messages().expect("read messages").len(), 2);
}

#[tokio::test]
async fn test_compression_metrics_reported_when_enabled() {
    let options = IngestOptions {
        compression_metrics: true,
        ..fast_options()
    };
    let service = IngestionService::new(Arc::new(MemoryStore::new()), options);

    let summary = service
        .ingest(&request(wrl_export()), Arc::new(NoopProgress))
        .await
        .expect("ingestion should succeed");

    let compression = summary.compression.expect("compression stats");
    assert_eq!(compression.original_bytes, wrl_export().len() as u64);
}
