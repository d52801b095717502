use std::path::PathBuf;

use thiserror::Error;

/// Errors that end an import pipeline.
///
/// Records failing their validity filter are not errors: they are skipped
/// and counted by the pipeline that decoded them.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data in {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("import cancelled")]
    Cancelled,

    #[error("batch channel closed before the source was exhausted")]
    ChannelClosed,

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ImportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }

    /// Short machine-readable name used in HTTP error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Open { .. } | ImportError::Read { .. } => "SourceError",
            ImportError::Decode { .. } => "DecodeError",
            ImportError::Store(_) => "StoreError",
            ImportError::Cancelled => "Cancelled",
            ImportError::ChannelClosed | ImportError::Task(_) => "InternalError",
            ImportError::Configuration(_) => "ConfigurationError",
        }
    }
}
