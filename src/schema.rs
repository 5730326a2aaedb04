//! Database schema definitions
//!
//! Table and column names shared by the SQLite store and its migrations.

/// Conversations table schema
pub mod conversations {
    /// Table name
    pub const TABLE: &str = "conversations";
    /// Primary key column (derived conversation id)
    pub const ID: &str = "id";
    /// Display title column
    pub const TITLE: &str = "title";
    /// Owning user column
    pub const USER_ID: &str = "user_id";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
}

/// Messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to conversations table
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Sender display name column
    pub const SENDER: &str = "sender";
    /// Message body column
    pub const CONTENT: &str = "content";
    /// Message timestamp column
    pub const TIMESTAMP: &str = "timestamp";
    /// Flag indicating the business sent the message
    pub const FROM_ME: &str = "from_me";
}
