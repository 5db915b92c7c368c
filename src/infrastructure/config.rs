use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{Result, TransferError};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where received artifacts are saved by the CLI
    pub download_directory: String,
    /// Address the TCP provider binds when allocating an identifier
    pub listen_address: String,
    /// Base URL embedded in the shareable send/receive links
    pub link_base_url: String,
    /// How long a sent file may stay unacknowledged before it is marked
    /// failed
    pub ack_timeout_secs: u64,
    /// Upper bound on a single FilePayload; everything is held in memory
    pub max_payload_size_mb: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_dir = format!("{}/.peerbeam", home);

        Self {
            download_directory: format!("{}/downloads", data_dir),
            listen_address: "127.0.0.1:0".to_string(),
            link_base_url: "https://peerbeam.app".to_string(),
            ack_timeout_secs: 60,
            max_payload_size_mb: 512,
        }
    }
}

impl AppConfig {
    /// Load configuration from file or create default
    pub fn load_or_default(config_path: Option<&str>) -> Self {
        if let Some(config) = config_path
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            return config;
        }
        Self::default()
    }

    /// Save configuration to file
    pub fn save_to_file(&self, config_path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Get the download directory as PathBuf
    pub fn download_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.download_directory)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn max_payload_bytes(&self) -> u64 {
        self.max_payload_size_mb * 1024 * 1024
    }

    /// Ensure all directories exist
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.download_directory)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.download_directory.is_empty() {
            return Err(TransferError::Config(
                "download directory must not be empty".to_string(),
            ));
        }

        if self.listen_address.is_empty() {
            return Err(TransferError::Config(
                "listen address must not be empty".to_string(),
            ));
        }

        if self.ack_timeout_secs == 0 {
            return Err(TransferError::Config(
                "acknowledgement timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_payload_size_mb == 0 {
            return Err(TransferError::Config(
                "max payload size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        config.validate().expect("Default config should be valid");
        assert!(config.ack_timeout_secs > 0);
        assert!(config.max_payload_bytes() > 0);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).expect("Should serialize");
        let deserialized: AppConfig = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(deserialized.listen_address, config.listen_address);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AppConfig {
            ack_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
