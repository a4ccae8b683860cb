//! Application Configuration
//!
//! YAML configuration file with sensible defaults when the file is absent,
//! mirroring the deployment layout: storage root, temp spool directory,
//! metadata database and transcoder locations.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub media: MediaConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Uploads at or below this size are processed synchronously in memory;
    /// larger uploads are spooled to a temp file and processed in the
    /// background.
    pub max_sync_upload_bytes: usize,
}

/// File storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the permanent entry/preview tree.
    pub base_path: String,
    /// Spool directory for transport and worker temp files. Must live on
    /// the same filesystem as `base_path` so final renames stay atomic.
    pub temp_path: String,
}

/// Metadata database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub db_path: String,
}

/// External transcoder configuration. Empty paths mean "search PATH".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub ffmpeg_path: String,
    #[serde(default)]
    pub ffprobe_path: String,
}

/// Background ingest worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of long-lived worker tasks.
    pub workers: usize,
    /// Queue depth; asynchronous uploads beyond this are rejected with 503.
    pub queue_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Path to a log4rs YAML file; env_logger is used when it is missing.
    pub config_file: String,
}

impl AppConfig {
    /// Load configuration from `config.yaml`, falling back to defaults.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = "config.yaml";
        if Path::new(config_path).exists() {
            let content = fs::read_to_string(config_path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", config_path);
            Ok(config)
        } else {
            warn!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9710,
                max_sync_upload_bytes: 8 << 20, // 8 MiB
            },
            storage: StorageConfig {
                base_path: "./data/storage".to_string(),
                temp_path: "./data/temp".to_string(),
            },
            database: DatabaseConfig {
                db_path: "./data/mediastore.db".to_string(),
            },
            media: MediaConfig {
                ffmpeg_path: String::new(),
                ffprobe_path: String::new(),
            },
            ingest: IngestConfig {
                workers: 4,
                queue_capacity: 64,
            },
            logging: LoggingConfig {
                config_file: "server_log.yaml".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9710);
        assert_eq!(config.server.max_sync_upload_bytes, 8 << 20);
        assert!(config.ingest.workers > 0);
        assert!(config.ingest.queue_capacity > 0);
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = AppConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.host, config.server.host);
        assert_eq!(parsed.storage.base_path, config.storage.base_path);
    }
}
