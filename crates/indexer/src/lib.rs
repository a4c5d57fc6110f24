//! Concrete collaborators for the ingestor: a JSON document parser and an
//! HTTP client for the indexer service.

pub mod client;
pub mod document;
pub mod response;

pub use client::{IndexerClient, IndexerError};
pub use document::{Document, JsonParser};
pub use response::{ApiError, ApiResponse};
