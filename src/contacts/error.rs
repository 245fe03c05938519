use crate::crm::CrmError;
use thiserror::Error;

/// Errors that stop a job before or while it starts.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid date range: {from} is after {to}")]
    InvalidDateRange { from: String, to: String },
    #[error("custom period requires both date_from and date_to")]
    IncompleteDateRange,
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: usize, limit: usize },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("file is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("crm error: {0}")]
    Crm(#[from] CrmError),
}

impl SyncError {
    pub fn unsupported(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Whether the caller supplied bad input, as opposed to a remote or IO
    /// failure.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidDateRange { .. }
                | Self::IncompleteDateRange
                | Self::UnsupportedFormat(_)
                | Self::UploadTooLarge { .. }
                | Self::Csv(_)
                | Self::Utf8(_)
        )
    }
}
