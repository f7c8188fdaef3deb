use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Corrupt job record for {target}: {reason}")]
    CorruptRecord { target: String, reason: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn corrupt(target: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::CorruptRecord {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
