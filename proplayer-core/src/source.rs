//! Backend collaborator interfaces.
//!
//! The property layer never talks to the network itself. A host supplies a
//! [`SchemaSource`] (used by the schema cache) and a [`PageSource`] (used by the
//! entity repository); both report failures as [`TransportError`](crate::error::TransportError)s that the
//! layer folds into its error taxonomy.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync` and support concurrent calls from
//! multiple async tasks.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    error::{DomainError, DomainResult, SourceResult},
    schema::RawSchema,
};

/// Reference to the user that created or last edited a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
}

/// A page as returned by the backend: system fields plus the property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePage {
    pub id: Uuid,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    pub created_by: UserRef,
    pub last_edited_by: UserRef,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl SourcePage {
    /// Parses a raw page envelope.
    ///
    /// Missing or malformed system fields are a hard error.
    pub fn from_json(value: Value) -> DomainResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| DomainError::internal(format!("malformed page envelope: {e}")))
    }
}

/// Filter and sort payload forwarded verbatim to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

/// Fetches raw schemas for databases.
#[async_trait]
pub trait SchemaSource: Send + Sync + Debug {
    /// Fetches the property catalogue of a database.
    ///
    /// Implementations may block on the network; the caller bounds the call
    /// with a timeout and may cancel it by dropping the future.
    async fn fetch_schema(&self, database_id: &str) -> SourceResult<RawSchema>;
}

/// Reads and writes individual pages (entities).
#[async_trait]
pub trait PageSource: Send + Sync + Debug {
    async fn read_page(&self, page_id: &Uuid) -> SourceResult<Value>;

    async fn create_page(&self, database_id: &str, properties: Map<String, Value>) -> SourceResult<Value>;

    async fn update_page(&self, page_id: &Uuid, properties: Map<String, Value>) -> SourceResult<Value>;

    async fn query_pages(&self, database_id: &str, query: &QueryPayload) -> SourceResult<Vec<Value>>;
}

#[async_trait]
impl<S> SchemaSource for Arc<S>
where
    S: SchemaSource + ?Sized,
{
    async fn fetch_schema(&self, database_id: &str) -> SourceResult<RawSchema> {
        (**self).fetch_schema(database_id).await
    }
}

#[async_trait]
impl<S> PageSource for Arc<S>
where
    S: PageSource + ?Sized,
{
    async fn read_page(&self, page_id: &Uuid) -> SourceResult<Value> {
        (**self).read_page(page_id).await
    }

    async fn create_page(&self, database_id: &str, properties: Map<String, Value>) -> SourceResult<Value> {
        (**self).create_page(database_id, properties).await
    }

    async fn update_page(&self, page_id: &Uuid, properties: Map<String, Value>) -> SourceResult<Value> {
        (**self).update_page(page_id, properties).await
    }

    async fn query_pages(&self, database_id: &str, query: &QueryPayload) -> SourceResult<Vec<Value>> {
        (**self).query_pages(database_id, query).await
    }
}
