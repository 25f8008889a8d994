pub mod http;
pub mod traits;

pub use http::{HttpIngestion, IngestionConfig};
pub use traits::{Ingestion, IngestionError, IngestionEvent, IngestionResponse};
