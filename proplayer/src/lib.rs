//! Main proplayer crate: a normalization and codec layer between a document
//! database's typed properties and a fixed domain model.
//!
//! This crate is the primary entry point for users of proplayer. It re-exports
//! the core types from the sub-crates and provides access to the in-memory
//! backend.
//!
//! # Features
//!
//! - **Schema normalization** - Canonical, content-hashed property catalogues
//! - **Typed entities** - Declarative field mappings with per-field decode warnings
//! - **Query validation** - Every bad property reference or operator reported in one pass
//! - **Schema caching** - Concurrent misses coalesced into one fetch, stale fallback on failure
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use proplayer::{prelude::*, memory::InMemorySource};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Task {
//!     pub title: Option<String>,
//!     pub done: Option<bool>,
//! }
//!
//! impl Entity for Task {
//!     fn entity_name() -> &'static str { "task" }
//!     fn field_names() -> &'static [&'static str] { &["title", "done"] }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = InMemorySource::builder()
//!         .with_schema("tasks", RawSchema::from_value(json!({
//!             "Name": { "type": "title" },
//!             "Done": { "type": "checkbox" },
//!         }), Utc::now()))
//!         .build();
//!
//!     let mapping = DomainFieldMapping::<Task>::builder()
//!         .field("title", "Name", TitleCodec)
//!         .field("done", "Done", CheckboxCodec)
//!         .build()?;
//!
//!     let cache = Arc::new(SchemaCache::builder(source).build());
//!     let tasks = EntityRepository::new("tasks", cache, mapping);
//!
//!     let created = tasks.create(&json!({ "title": "Write report", "done": false })).await?;
//!     println!("created {}", created.system.id);
//!
//!     // Rejected before reaching the backend: `Done` is a checkbox.
//!     let err = tasks
//!         .query(&QueryRequest::new().with_filter(Filter::op("Done", "number", "equals", 1)))
//!         .await
//!         .unwrap_err();
//!     assert_eq!(err.code(), "bad_request");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory source for development and testing

pub mod prelude;

pub use proplayer_core::{cache, codec, error, mapping, query, repository, schema, source, validate};

// Re-export JSON types for convenience
pub use serde_json;

/// In-memory backend implementations.
pub mod memory {
    pub use proplayer_memory::{InMemorySource, InMemorySourceBuilder};
}
