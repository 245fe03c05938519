//! Tabular file formats for import and export.

pub mod csv;

use crate::contacts::{Row, SyncError};
use crate::crm::CodecConfig;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Csv,
}

impl FileFormat {
    /// Resolve a format from a bare extension such as `csv` or `.CSV`.
    pub fn from_extension(extension: &str) -> Result<Self, SyncError> {
        let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "csv" => Ok(Self::Csv),
            _ => Err(SyncError::unsupported(extension.trim())),
        }
    }

    /// Resolve a format from a file name or path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(extension) => Self::from_extension(extension),
            None => Err(SyncError::unsupported(path.display().to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
        }
    }
}

/// Reject uploads above the configured size limit.
pub fn check_upload_size(size: usize, config: &CodecConfig) -> Result<(), SyncError> {
    if size > config.max_upload_bytes {
        return Err(SyncError::UploadTooLarge {
            size,
            limit: config.max_upload_bytes,
        });
    }
    Ok(())
}

pub fn read_rows(format: FileFormat, bytes: &[u8], config: &CodecConfig) -> Result<Vec<Row>, SyncError> {
    check_upload_size(bytes.len(), config)?;
    match format {
        FileFormat::Csv => csv::read_rows(bytes, config.delimiter),
    }
}

pub fn write_rows(format: FileFormat, rows: &[Row], config: &CodecConfig) -> Result<Vec<u8>, SyncError> {
    match format {
        FileFormat::Csv => csv::write_rows(rows, config.delimiter),
    }
}
