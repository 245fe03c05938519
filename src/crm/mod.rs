//! CRM access: configuration, the wire transport, and the batch client.

pub mod client;
pub mod config;
pub mod error;
pub mod transport;
pub mod types;

pub use client::{BatchClient, SubmitOptions};
pub use config::{CodecConfig, CrmConfig};
pub use error::CrmError;
pub use transport::{CallResponse, CrmTransport, HttpTransport};
pub use types::{BatchCall, CallId, CallKind, CallOutcome, ChunkResult, MAX_BATCH_SIZE, RemoteId};
