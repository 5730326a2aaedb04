use std::path::Path;

use crate::error::{IngestError, Result};

fn invalid(message: impl Into<String>) -> IngestError {
    IngestError::Validation(message.into())
}

/// Validation utilities for uploads and run parameters
#[derive(Debug, Copy, Clone)]
pub struct UploadValidator;

impl UploadValidator {
    /// Validate the upload file name: non-empty, no control characters, `.csv` extension
    pub fn validate_file_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(invalid("File name cannot be empty"));
        }

        if name.contains('\0') || name.contains('\r') || name.contains('\n') {
            return Err(invalid("File name contains invalid characters"));
        }

        let is_csv = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return Err(invalid(format!("Only CSV files are accepted: {name}")));
        }

        Ok(())
    }

    /// Validate the upload size against the configured ceiling
    pub fn validate_size(bytes: u64, max_bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(invalid("File is empty"));
        }
        if bytes > max_bytes {
            return Err(invalid(format!(
                "File too large: {} (max {})",
                crate::utils::format_bytes(bytes),
                crate::utils::format_bytes(max_bytes)
            )));
        }
        Ok(())
    }

    /// Validate the owning user id
    pub fn validate_user_id(user_id: i64) -> Result<()> {
        if user_id <= 0 {
            return Err(invalid(format!("User id must be positive, got {user_id}")));
        }
        Ok(())
    }

    /// Validate a CSV body has a header and at least one data line
    pub fn validate_line_count(lines: usize) -> Result<()> {
        if lines < 2 {
            return Err(invalid("CSV must contain a header and at least one data row"));
        }
        Ok(())
    }

    /// Validate a batch size
    pub fn validate_batch_size(size: usize) -> Result<()> {
        if size == 0 {
            return Err(invalid("Batch size must be greater than 0"));
        }
        if size > 1000 {
            return Err(invalid("Batch size too large (max 1000)"));
        }
        Ok(())
    }

    /// Validate a transport chunk size in bytes
    pub fn validate_chunk_size(bytes: usize) -> Result<()> {
        if bytes < 1024 {
            return Err(invalid("Chunk size must be at least 1 KB"));
        }
        if bytes > 10 * 1024 * 1024 {
            return Err(invalid("Chunk size too large (max 10 MB)"));
        }
        Ok(())
    }
}
