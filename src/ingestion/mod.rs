pub mod media_ingestion;
pub mod staging;

pub use media_ingestion::{
    DeduplicationPolicy, IngestionResult, MediaIngestionRequest, MediaIngestionService,
};
pub use staging::StagedUpload;
