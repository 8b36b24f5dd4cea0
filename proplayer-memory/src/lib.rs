//! In-memory backend for proplayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `SchemaSource` and `PageSource` traits. It uses async-aware read-write locks
//! for concurrent access and is meant for development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Seeded data** - Schemas and pages supplied through the builder
//! - **Fault injection** - Per-database transport failures and artificial latency
//! - **Observability** - Schema fetch counter and the last forwarded query payload
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use proplayer::{prelude::*, memory::InMemorySource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = InMemorySource::builder()
//!         .with_schema("tasks", RawSchema::from_value(json!({ "Name": { "type": "title" } }), Utc::now()))
//!         .build();
//!
//!     let cache = Arc::new(SchemaCache::builder(source).build());
//!     let schema = cache.get("tasks").await?.schema;
//!     assert_eq!(schema.title_property_name.as_deref(), Some("Name"));
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as proplayer_memory;

pub mod source;

pub use source::{InMemorySource, InMemorySourceBuilder};
