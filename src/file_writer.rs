//! File writing utilities for dry-run exports.
//!
//! Writes the conversations and messages an ingestion would create, without
//! touching a store, as CSV or JSON.

use anyhow::Result;
use csv::Writer;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::models::{ConversationId, NewConversation, NewMessage};

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<'a> {
    format: &'a str,
    conversations: &'a [NewConversation],
    messages: &'a [NewMessage],
}

/// Write an export to `file_path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if file creation or writing fails.
pub fn write_export(
    format_tag: &str, conversations: &[NewConversation], messages: &[NewMessage], format: ExportFormat, file_path: &Path,
) -> Result<()> {
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    match format {
        ExportFormat::Csv => write_csv_file(conversations, messages, file_path),
        ExportFormat::Json => write_json_file(format_tag, conversations, messages, file_path),
    }
}

/// Write messages to a CSV file.
///
/// Includes header row: `ID, Conversation ID, Conversation, Sender, Timestamp, From Me, Message`
fn write_csv_file(conversations: &[NewConversation], messages: &[NewMessage], file_path: &Path) -> Result<()> {
    let titles: HashMap<ConversationId, &str> = conversations.iter().map(|c| (c.id, c.title.as_str())).collect();
    let file = File::create(file_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["ID", "Conversation ID", "Conversation", "Sender", "Timestamp", "From Me", "Message"])?;

    // ID column starts from 1
    for (i, message) in messages.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string().as_str(),
            message.conversation_id.to_string().as_str(),
            titles.get(&message.conversation_id).copied().unwrap_or_default(),
            message.sender.as_str(),
            message.timestamp.as_str(),
            if message.from_me { "true" } else { "false" },
            message.content.as_str(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write conversations and messages to a JSON file.
fn write_json_file(format_tag: &str, conversations: &[NewConversation], messages: &[NewMessage], file_path: &Path) -> Result<()> {
    let file = File::create(file_path)?;
    let mut writer = BufWriter::new(file);

    let document = ExportDocument {
        format: format_tag,
        conversations,
        messages,
    };
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush()?;
    Ok(())
}
