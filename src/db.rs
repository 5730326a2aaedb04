use std::collections::HashSet;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::models::{ConversationId, NewConversation, NewMessage, StoredConversation};
use crate::repository::ConversationStore;
use crate::schema::{conversations, messages};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// SQLite-backed conversation store
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the database behind `database_url`.
    ///
    /// Accepts a plain path or a `sqlite:`/`sqlite://` url; `:memory:` opens a
    /// private in-memory database on a single connection.
    pub fn new(database_url: &str, pool_size: u32) -> StoreResult<Self> {
        let path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        let (manager, pool_size) = if path == ":memory:" {
            (SqliteConnectionManager::memory(), 1)
        } else {
            // Create parent directory if it doesn't exist
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| StoreError::Rejected(format!("cannot create {}: {e}", parent.display())))?;
            }
            (SqliteConnectionManager::file(path), pool_size.max(1))
        };

        let manager = manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        info!(path, pool_size, "SQLite store ready");

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(include_str!("../migrations/0001_create_tables/up.sql"))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Run blocking database work off the async executor
    async fn with_connection<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            work(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Conversations owned by `user_id`, ordered by id
    pub fn conversations_for_user(&self, user_id: i64) -> StoreResult<Vec<StoredConversation>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {}, {} FROM {} WHERE {} = ? ORDER BY {}",
            conversations::ID,
            conversations::TITLE,
            conversations::USER_ID,
            conversations::CREATED_AT,
            conversations::TABLE,
            conversations::USER_ID,
            conversations::ID
        ))?;
        let rows = stmt.query_map(params![user_id], |row| {
            let raw: u32 = row.get(0)?;
            Ok((raw, row.get::<_, String>(1)?, row.get::<_, i64>(2)?, row.get::<_, String>(3)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (raw, title, user_id, created_at) = row?;
            if let Some(id) = ConversationId::new(raw) {
                out.push(StoredConversation {
                    id,
                    title,
                    user_id,
                    created_at,
                });
            }
        }
        Ok(out)
    }

    /// Messages of one conversation in insertion order
    pub fn messages_for(&self, conversation_id: ConversationId) -> StoreResult<Vec<NewMessage>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {}, {} FROM {} WHERE {} = ? ORDER BY {}",
            messages::SENDER,
            messages::CONTENT,
            messages::TIMESTAMP,
            messages::FROM_ME,
            messages::TABLE,
            messages::CONVERSATION_ID,
            messages::ID
        ))?;
        let rows = stmt.query_map(params![conversation_id.get()], |row| {
            Ok(NewMessage {
                conversation_id,
                sender: row.get(0)?,
                content: row.get(1)?,
                timestamp: row.get(2)?,
                from_me: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Total number of stored messages
    pub fn message_count(&self) -> StoreResult<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", messages::TABLE), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn existing_conversation_ids(&self, ids: &[ConversationId]) -> StoreResult<HashSet<ConversationId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let raw: Vec<u32> = ids.iter().map(|id| id.get()).collect();
        self.with_connection(move |conn| {
            let placeholders = vec!["?"; raw.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE {} IN ({placeholders})",
                conversations::ID,
                conversations::TABLE,
                conversations::ID
            ))?;
            let rows = stmt.query_map(params_from_iter(raw.iter()), |row| row.get::<_, u32>(0))?;

            let mut found = HashSet::new();
            for row in rows {
                if let Some(id) = ConversationId::new(row?) {
                    found.insert(id);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn insert_conversations(&self, rows: &[NewConversation]) -> StoreResult<usize> {
        let rows = rows.to_vec();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT OR IGNORE INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                    conversations::TABLE,
                    conversations::ID,
                    conversations::TITLE,
                    conversations::USER_ID,
                    conversations::CREATED_AT
                ))?;
                for row in &rows {
                    inserted += stmt.execute(params![row.id.get(), row.title, row.user_id, row.created_at])?;
                }
            }
            tx.commit()?;
            debug!(requested = rows.len(), inserted, "Inserted conversation batch");
            Ok(inserted)
        })
        .await
    }

    async fn insert_messages(&self, rows: &[NewMessage]) -> StoreResult<usize> {
        let rows = rows.to_vec();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?)",
                    messages::TABLE,
                    messages::CONVERSATION_ID,
                    messages::SENDER,
                    messages::CONTENT,
                    messages::TIMESTAMP,
                    messages::FROM_ME
                ))?;
                for row in &rows {
                    stmt.execute(params![row.conversation_id.get(), row.sender, row.content, row.timestamp, row.from_me])?;
                }
            }
            tx.commit()?;
            debug!(inserted = rows.len(), "Inserted message batch");
            Ok(rows.len())
        })
        .await
    }

    async fn update_conversation_title(&self, id: ConversationId, title: &str) -> StoreResult<()> {
        let title = title.to_string();
        self.with_connection(move |conn| {
            let changed = conn.execute(
                &format!(
                    "UPDATE {} SET {} = ? WHERE {} = ?",
                    conversations::TABLE,
                    conversations::TITLE,
                    conversations::ID
                ),
                params![title, id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::Rejected(format!("conversation {id} does not exist")));
            }
            Ok(())
        })
        .await
    }
}
