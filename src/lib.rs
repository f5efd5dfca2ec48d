pub mod catalog;
pub mod config;
pub mod error;
pub mod exporter;
pub mod model;
pub mod processor;
pub mod queue;
pub mod server;
pub mod source;
pub mod validator;

pub use error::{ApiError, ExportError};
pub use exporter::Exporter;
pub use processor::{DrainEvent, Processor};
pub use queue::JobQueue;
pub use source::{HttpProductSource, ProductSource};
