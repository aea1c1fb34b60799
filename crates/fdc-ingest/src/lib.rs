//! FDC Ingest Library
//!
//! Streaming normalization engine for the USDA FoodData Central JSON
//! releases. Each release is one very large document of the form
//! `{ "<rootKey>": [ record, record, ... ] }`; the engine parses it in a
//! single forward pass, decomposes every record into typed sub-records per a
//! schema registry, deduplicates structurally identical sub-records so they
//! are stored once and referenced by id, and persists everything through
//! capacity-bounded bulk writes with flow control between parser and writer.
//!
//! # Example
//!
//! ```no_run
//! use fdc_ingest::pipeline::{IngestOptions, IngestionPipeline};
//! use fdc_ingest::schema::StaticRegistry;
//! use fdc_ingest::source::stream_root_array;
//! use fdc_ingest::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = StaticRegistry::from_path("schemas/fdc.json")?;
//!     let store = MemoryStore::new();
//!     let options = IngestOptions::default();
//!
//!     let source = stream_root_array("./data/FoundationFoods.json", "FoundationFoods", 1);
//!     let pipeline = IngestionPipeline::new(registry, store, options);
//!     let report = pipeline
//!         .run("FoundationFoods", "FoundationFoodItem", source)
//!         .await?;
//!     println!("{} records, {} cache hits", report.records, report.cache_hits);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod batch;
pub mod datasets;
pub mod dedup;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod store;

pub use error::IngestError;
