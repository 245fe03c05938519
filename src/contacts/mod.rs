pub mod chunking;
pub mod delete;
mod dispatch;
pub mod error;
pub mod export;
pub mod import;
pub mod mapper;
pub mod progress;
pub mod report;
pub mod resolver;
pub mod row;

pub use chunking::{ChunkPlan, Window};
pub use delete::ContactPurger;
pub use error::SyncError;
pub use export::{ContactExporter, DateRange, ExportPeriod};
pub use import::ContactImporter;
pub use progress::{JobContext, ProgressSink};
pub use report::AggregateReport;
pub use resolver::{CompanyIndex, CompanyResolver};
pub use row::{Column, Row};
