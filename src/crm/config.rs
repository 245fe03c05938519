use super::types::MAX_BATCH_SIZE;
use std::env;
use std::time::Duration;

const MAX_CONCURRENT_CHUNKS: usize = 8;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Clamp a requested batch size into what the remote accepts.
pub fn clamp_batch_size(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_SIZE)
}

/// Connection and batching settings for the CRM client.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    /// Base REST URL including any webhook credentials, e.g.
    /// `https://portal.example.com/rest/1/secret/`.
    pub webhook_url: String,
    /// Calls per batch request, always within `1..=50`.
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Chunks allowed in flight at once for a single job.
    pub max_concurrent_chunks: usize,
    /// Upper bound on pages followed by a paginated list.
    pub list_page_limit: usize,
}

impl CrmConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: env_string("CRM_WEBHOOK_URL", "http://localhost:8080/rest/"),
            batch_size: clamp_batch_size(env_usize("CRM_BATCH_SIZE", MAX_BATCH_SIZE)),
            request_timeout: env_duration_millis("CRM_REQUEST_TIMEOUT_MS", 60_000),
            connect_timeout: env_duration_millis("CRM_CONNECT_TIMEOUT_MS", 10_000),
            max_concurrent_chunks: env_usize("CRM_MAX_CONCURRENT_CHUNKS", 1)
                .clamp(1, MAX_CONCURRENT_CHUNKS),
            list_page_limit: env_usize("CRM_LIST_PAGE_LIMIT", 10_000).max(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = clamp_batch_size(batch_size);
        self
    }

    pub fn with_max_concurrent_chunks(mut self, chunks: usize) -> Self {
        self.max_concurrent_chunks = chunks.clamp(1, MAX_CONCURRENT_CHUNKS);
        self
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Settings for reading and writing contact files.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub delimiter: u8,
    pub max_upload_bytes: usize,
}

impl CodecConfig {
    pub fn from_env() -> Self {
        let delimiter = env::var("CRM_CSV_DELIMITER")
            .ok()
            .and_then(|value| value.bytes().next())
            .unwrap_or(b',');

        Self {
            delimiter,
            max_upload_bytes: env_usize("CRM_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
