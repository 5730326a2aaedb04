use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::inference::BusinessNames;
use crate::persistence::BatchSettings;
use crate::service::{IngestOptions, TimestampFallback};
use crate::transport::UploaderSettings;
use crate::validation::UploadValidator;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub transport: TransportConfig,
    pub formats: BusinessNames,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub conversation_batch_size: usize,
    pub message_batch_size: usize,
    pub lookup_chunk_size: usize,
    pub batch_delay_ms: u64,
    pub max_file_size_bytes: u64,
    pub max_join_lines: usize,
    pub country_code: String,
    pub timestamp_fallback: TimestampFallback,
    pub compression_metrics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub endpoint: String,
    pub chunk_size_bytes: usize,
    pub single_shot_limit_bytes: u64,
    pub chunk_timeout_secs: u64,
    pub chunk_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: "sqlite:data/chat_history.db".to_string(),
                max_connections: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            ingest: IngestConfig {
                conversation_batch_size: 100,
                message_batch_size: 100,
                lookup_chunk_size: 500,
                batch_delay_ms: 50,
                max_file_size_bytes: 50 * 1024 * 1024,
                max_join_lines: 10,
                country_code: "55".to_string(),
                timestamp_fallback: TimestampFallback::IngestionTime,
                compression_metrics: true,
            },
            transport: TransportConfig {
                endpoint: "http://localhost:3000/api/upload-chat-history".to_string(),
                chunk_size_bytes: 512 * 1024,
                single_shot_limit_bytes: 4 * 1024 * 1024,
                chunk_timeout_secs: 300,
                chunk_delay_ms: 200,
            },
            formats: BusinessNames::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence.
    ///
    /// Environment variables use the `CHAT_INGEST_` prefix and `__` between
    /// nested keys, e.g. `CHAT_INGEST_INGEST__MESSAGE_BATCH_SIZE=50`.
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .map_err(|e| anyhow::anyhow!("Failed to serialize default configuration: {}", e))?;

        let config = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("chat_ingest").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("CHAT_INGEST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate store config
        if self.store.url.trim().is_empty() {
            return Err(anyhow::anyhow!("store url must not be empty"));
        }
        if self.store.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate ingest config
        UploadValidator::validate_batch_size(self.ingest.conversation_batch_size)
            .map_err(|e| anyhow::anyhow!("conversation_batch_size: {}", e))?;
        UploadValidator::validate_batch_size(self.ingest.message_batch_size)
            .map_err(|e| anyhow::anyhow!("message_batch_size: {}", e))?;
        if self.ingest.lookup_chunk_size == 0 {
            return Err(anyhow::anyhow!("lookup_chunk_size must be greater than 0"));
        }
        if self.ingest.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("max_file_size_bytes must be greater than 0"));
        }
        if !self.ingest.country_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow::anyhow!("country_code must contain digits only: {}", self.ingest.country_code));
        }

        // Validate transport config
        if self.transport.chunk_size_bytes < 1024 {
            return Err(anyhow::anyhow!("chunk_size_bytes must be at least 1024"));
        }
        if self.transport.chunk_timeout_secs == 0 {
            return Err(anyhow::anyhow!("chunk_timeout_secs must be greater than 0"));
        }
        if !self.transport.endpoint.starts_with("http://") && !self.transport.endpoint.starts_with("https://") {
            return Err(anyhow::anyhow!("Invalid transport endpoint: {}", self.transport.endpoint));
        }

        // Validate display names
        if self.formats.wrl.trim().is_empty() || self.formats.rcws.trim().is_empty() {
            return Err(anyhow::anyhow!("business display names must not be empty"));
        }

        Ok(())
    }

    /// Get store URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.store.url.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }

    /// Batch sizing for the persistence driver
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            conversation_batch_size: self.ingest.conversation_batch_size,
            message_batch_size: self.ingest.message_batch_size,
            lookup_chunk_size: self.ingest.lookup_chunk_size,
            batch_delay: Duration::from_millis(self.ingest.batch_delay_ms),
        }
    }

    /// Options for the ingestion service
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch: self.batch_settings(),
            max_file_size_bytes: self.ingest.max_file_size_bytes,
            max_join_lines: self.ingest.max_join_lines,
            country_code: self.ingest.country_code.clone(),
            timestamp_fallback: self.ingest.timestamp_fallback,
            compression_metrics: self.ingest.compression_metrics,
            business_names: self.formats.clone(),
        }
    }

    /// Settings for the chunked uploader
    pub fn uploader_settings(&self) -> UploaderSettings {
        UploaderSettings {
            chunk_size: self.transport.chunk_size_bytes,
            chunk_timeout: Duration::from_secs(self.transport.chunk_timeout_secs),
            chunk_delay: Duration::from_millis(self.transport.chunk_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.store.url, "sqlite:data/chat_history.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ingest.message_batch_size, 100);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.store.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_survive_config_round_trip() {
        let defaults = Config::try_from(&AppConfig::default()).unwrap();
        let config: AppConfig = Config::builder().add_source(defaults).build().unwrap().try_deserialize().unwrap();
        assert_eq!(config.transport.chunk_size_bytes, 512 * 1024);
        assert_eq!(config.ingest.timestamp_fallback, TimestampFallback::IngestionTime);
    }
}
