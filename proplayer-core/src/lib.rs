//! A normalization and codec layer between typed document-database properties and a fixed domain model.
//!
//! This crate is the core of the proplayer project and provides:
//!
//! - **Schema normalization** ([`schema`]) - Canonical, hashed property catalogues
//! - **Field codecs** ([`codec`]) - Bidirectional transforms between domain values and property shapes
//! - **Field mapping** ([`mapping`]) - Binding of entity fields to properties and codecs
//! - **Query model** ([`query`]) - Typed filter and sort AST with JSON boundary parsing
//! - **Query validation** ([`validate`]) - Static checks of queries against a schema
//! - **Schema cache** ([`cache`]) - Single-flight, degradable cache of normalized schemas
//! - **Source traits** ([`source`]) - Interfaces a backend client implements
//! - **Entity repository** ([`repository`]) - Typed get/create/update/query over one database
//! - **Error handling** ([`error`]) - Domain error taxonomy and status mapping
//!
//! # Example
//!
//! ```ignore
//! use proplayer::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Task {
//!     pub title: Option<String>,
//!     pub done: Option<bool>,
//! }
//!
//! impl Entity for Task {
//!     fn entity_name() -> &'static str {
//!         "task"
//!     }
//!
//!     fn field_names() -> &'static [&'static str] {
//!         &["title", "done"]
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as proplayer_core;

pub mod cache;
pub mod codec;
pub mod error;
pub mod mapping;
pub mod query;
pub mod repository;
pub mod schema;
pub mod source;
pub mod validate;
