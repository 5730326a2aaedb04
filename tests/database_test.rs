use std::sync::Arc;
use std::time::Duration;

use chat_log_ingest::db::SqliteStore;
use chat_log_ingest::models::{ConversationId, NewConversation, NewMessage};
use chat_log_ingest::persistence::BatchSettings;
use chat_log_ingest::progress::NoopProgress;
use chat_log_ingest::repository::ConversationStore;
use chat_log_ingest::resolver::hash_key;
use chat_log_ingest::service::{IngestOptions, IngestRequest, IngestionService};
use tempfile::tempdir;

const WRL_EXPORT: &str = "chat_id,mobile_number,fromMe,direction,text,type,message_created
5511999990000,+5511999990000,true,out,Olá,text,2024-01-15T10:00:00Z
5511999990000,+5511999990000,false,in,\"Quero um boné, azul\",text,2024-01-15T10:01:00Z
abc123hash,,false,in,Oi,text,2024-01-15T11:00:00Z
";

fn conversation(id: u32, title: &str) -> NewConversation {
    NewConversation {
        id: ConversationId::new(id).expect("valid id"),
        title: title.to_string(),
        user_id: 7,
        created_at: "2024-01-15T10:00:00Z".to_string(),
    }
}

#[test]
fn test_database_creation_and_initialization() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db_url = format!("sqlite://{}", temp_dir.path().join("nested/test.db").display());

    let store = SqliteStore::new(&db_url, 4).expect("Failed to create database");
    let _conn = store.get_connection().expect("Failed to get database connection");
    assert_eq!(store.message_count().expect("count"), 0);
}

#[test]
fn test_reopening_runs_migrations_again() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let path = temp_dir.path().join("test.db");
    let db_url = path.display().to_string();

    SqliteStore::new(&db_url, 2).expect("first open");
    SqliteStore::new(&db_url, 2).expect("second open");
}

#[tokio::test]
async fn test_insert_conversations_ignores_existing() {
    let store = SqliteStore::new(":memory:", 1).expect("Failed to create database");

    let inserted = store
        .insert_conversations(&[conversation(1, "first"), conversation(2, "second")])
        .await
        .expect("insert");
    assert_eq!(inserted, 2);

    let inserted = store
        .insert_conversations(&[conversation(2, "renamed"), conversation(3, "third")])
        .await
        .expect("insert again");
    assert_eq!(inserted, 1);

    let stored = store.conversations_for_user(7).expect("list");
    let titles: Vec<&str> = stored.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["first", "second", "third"]);

    let ids = [1, 3, 99].map(|id| ConversationId::new(id).expect("valid id"));
    let existing = store.existing_conversation_ids(&ids).await.expect("lookup");
    assert_eq!(existing.len(), 2);
}

#[tokio::test]
async fn test_update_title() {
    let store = SqliteStore::new(":memory:", 1).expect("Failed to create database");
    store.insert_conversations(&[conversation(5, "Conversation 5")]).await.expect("insert");

    let id = ConversationId::new(5).expect("valid id");
    store.update_conversation_title(id, "(11) 98888-7777").await.expect("update");
    assert_eq!(store.conversations_for_user(7).expect("list")[0].title, "(11) 98888-7777");

    let missing = ConversationId::new(6).expect("valid id");
    assert!(store.update_conversation_title(missing, "x").await.is_err());
}

#[tokio::test]
async fn test_message_batch_is_atomic() {
    let store = SqliteStore::new(":memory:", 1).expect("Failed to create database");
    store.insert_conversations(&[conversation(1, "first")]).await.expect("insert");

    let message = |conversation: u32| NewMessage {
        conversation_id: ConversationId::new(conversation).expect("valid id"),
        sender: "Contact".to_string(),
        content: "oi".to_string(),
        timestamp: "2024-01-15T10:00:00Z".to_string(),
        from_me: false,
    };

    // The orphan aborts the whole batch
    let result = store.insert_messages(&[message(1), message(404)]).await;
    assert!(result.is_err());
    assert_eq!(store.message_count().expect("count"), 0);

    assert_eq!(store.insert_messages(&[message(1), message(1)]).await.expect("insert"), 2);
    assert_eq!(store.message_count().expect("count"), 2);
}

#[tokio::test]
async fn test_ingest_into_sqlite() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let db_url = format!("sqlite:{}", temp_dir.path().join("chat.db").display());
    let store = Arc::new(SqliteStore::new(&db_url, 4).expect("Failed to create database"));

    let options = IngestOptions {
        batch: BatchSettings {
            batch_delay: Duration::ZERO,
            ..BatchSettings::default()
        },
        ..IngestOptions::default()
    };
    let service = IngestionService::new(store.clone(), options);
    let request = IngestRequest {
        file_name: "export.csv".to_string(),
        content: WRL_EXPORT.to_string(),
        user_id: 7,
        format_override: None,
    };

    let summary = service.ingest(&request, Arc::new(NoopProgress)).await.expect("ingest");
    assert_eq!(summary.total_messages, 3);
    assert_eq!(summary.conversations_created, 2);

    let conversations = store.conversations_for_user(7).expect("list");
    assert_eq!(conversations.len(), 2);

    let phone_id = ConversationId::new(999_990_000).expect("valid id");
    let messages = store.messages_for(phone_id).expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, "WRL Bonés");
    assert!(messages[0].from_me);
    assert_eq!(messages[1].content, "Quero um boné, azul");

    let hashed = store.messages_for(hash_key("abc123hash")).expect("messages");
    assert_eq!(hashed.len(), 1);
    assert_eq!(hashed[0].sender, "Contact");

    // Second run creates no conversations but appends messages again
    let again = service.ingest(&request, Arc::new(NoopProgress)).await.expect("ingest again");
    assert_eq!(again.conversations_created, 0);
    assert_eq!(store.message_count().expect("count"), 6);
}
