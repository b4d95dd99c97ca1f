use thiserror::Error;

pub type RetentionResult<T> = Result<T, RetentionError>;

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store write failed for {key}: {reason}")]
    StoreWrite { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
