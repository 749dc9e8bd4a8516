//! Chronicle pipeline secrets management.
//!
//! The pipeline resolves `LLM_API_KEY` and `FAST_SCRAPER_TOKEN` through this
//! uniform provider abstraction rather than reading them as bare environment
//! variables, so a deployment can later swap in an encrypted store without
//! touching call sites. Supported backends:
//! - Environment variables (default)
//! - Encrypted local file storage (AES-256-GCM)
//!
//! ## Reference Formats
//!
//! - `encrypted:BASE64_CIPHERTEXT` - Local encrypted storage

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

mod encrypted;
mod env;

pub use encrypted::{generate_key, EncryptedProvider};
pub use env::EnvProvider;

mod service;
pub use service::{SecretService, ValidationResult};

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Secret not found: {0}")]
    NotFound(String),
    #[error("Invalid key format: {0}")]
    InvalidKey(String),
    #[error("Encryption error: {0}")]
    EncryptionError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Configuration for secrets providers.
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// Provider for single-provider mode: "env" or "encrypted".
    pub provider: String,
    /// Encryption key for local encrypted storage (base64-encoded 32-byte key).
    pub encryption_key: Option<String>,
    /// Directory for local encrypted storage.
    pub data_dir: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: "env".to_string(),
            encryption_key: None,
            data_dir: PathBuf::from("./data/secrets"),
        }
    }
}

/// Secrets provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, SecretsError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), SecretsError>;
    async fn delete(&self, key: &str) -> Result<(), SecretsError>;
    fn name(&self) -> &str;
}

/// Create a provider based on configuration.
pub async fn create_provider(config: &SecretsConfig) -> Result<Arc<dyn Provider>, SecretsError> {
    match config.provider.as_str() {
        "env" => {
            info!("Using environment variable secrets provider");
            Ok(Arc::new(EnvProvider::new()))
        }
        "encrypted" => {
            let key = config.encryption_key.as_ref().ok_or_else(|| {
                SecretsError::ProviderError("Encryption key required for encrypted provider".to_string())
            })?;
            info!("Using encrypted file secrets provider");
            let provider = EncryptedProvider::new(key, &config.data_dir)?;
            Ok(Arc::new(provider))
        }
        other => Err(SecretsError::ProviderError(format!("Unknown provider: {}", other))),
    }
}
