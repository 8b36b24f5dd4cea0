//! Typed access to the entities of one database.
//!
//! An [`EntityRepository`] ties a backend source, the shared [`SchemaCache`]
//! and a [`DomainFieldMapping`] together. Reads decode pages into entities with
//! per-field warnings; writes encode patches into property bags; queries are
//! validated against the cached schema before anything is sent to the backend.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use proplayer::prelude::*;
//!
//! let cache = Arc::new(SchemaCache::builder(source).build());
//! let tasks = EntityRepository::new("tasks-db", cache, mapping);
//!
//! let created = tasks.create(&json!({ "title": "Write report" })).await?;
//! let open = tasks
//!     .query(&QueryRequest::new().with_filter(Filter::op("Done", "checkbox", "equals", false)))
//!     .await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    cache::SchemaCache,
    codec::codec_for,
    error::{DomainError, DomainResult},
    mapping::{DecodedEntity, DomainFieldMapping, Entity},
    query::QueryRequest,
    schema::NormalizedSchema,
    source::{PageSource, QueryPayload, SchemaSource, SourcePage},
    validate::validate_request,
};

/// One page returned by [`EntityRepository::query`].
#[derive(Debug, Clone)]
pub struct QueryHit<E> {
    pub item: DecodedEntity<E>,
    /// Plain text of the page's title property, if it could be decoded.
    pub title: Option<String>,
}

/// The outcome of [`EntityRepository::query`].
#[derive(Debug, Clone)]
pub struct QueryResult<E> {
    pub hits: Vec<QueryHit<E>>,
    /// The property used for [`QueryHit::title`]: the request override, or the
    /// schema's title property.
    pub title_property: Option<String>,
    /// Set when the query was validated against a stale schema.
    pub schema_warning: Option<String>,
}

impl<E> QueryResult<E> {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &E> {
        self.hits.iter().map(|hit| &hit.item.entity)
    }
}

/// Entity-level operations over a single database.
pub struct EntityRepository<S, E>
where
    S: SchemaSource + PageSource + 'static,
    E: Entity,
{
    database_id: String,
    cache: Arc<SchemaCache<S>>,
    mapping: Arc<DomainFieldMapping<E>>,
    page_size: Option<usize>,
}

impl<S, E> EntityRepository<S, E>
where
    S: SchemaSource + PageSource + 'static,
    E: Entity,
{
    /// Creates a repository. Pages are read and written through the cache's source.
    pub fn new(
        database_id: impl Into<String>,
        cache: Arc<SchemaCache<S>>,
        mapping: impl Into<Arc<DomainFieldMapping<E>>>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            cache,
            mapping: mapping.into(),
            page_size: None,
        }
    }

    /// Sets the page size forwarded with every query.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn mapping(&self) -> &DomainFieldMapping<E> {
        &self.mapping
    }

    pub fn cache(&self) -> &Arc<SchemaCache<S>> {
        &self.cache
    }

    fn source(&self) -> &S {
        self.cache.source()
    }

    /// Loads the current schema and reports mapped properties that drifted.
    pub async fn check_schema(&self) -> DomainResult<Vec<String>> {
        let cached = self.cache.get(&self.database_id).await?;
        Ok(self.mapping.check_schema(&cached.schema))
    }

    /// Reads and decodes one page.
    pub async fn get(&self, page_id: &Uuid) -> DomainResult<DecodedEntity<E>> {
        let raw = self
            .source()
            .read_page(page_id)
            .await
            .map_err(|e| e.into_domain().tap("read_page", &self.database_id))?;

        self.decode(raw)
    }

    /// Creates a page from the fields present in `patch`.
    pub async fn create<P: Serialize + Sync>(&self, patch: &P) -> DomainResult<DecodedEntity<E>> {
        let properties = self.encode(patch)?;
        let raw = self
            .source()
            .create_page(&self.database_id, properties)
            .await
            .map_err(|e| e.into_domain().tap("create_page", &self.database_id))?;

        self.decode(raw)
    }

    /// Updates the properties of `page_id` that are present in `patch`.
    pub async fn update<P: Serialize + Sync>(&self, page_id: &Uuid, patch: &P) -> DomainResult<DecodedEntity<E>> {
        let properties = self.encode(patch)?;
        let raw = self
            .source()
            .update_page(page_id, properties)
            .await
            .map_err(|e| e.into_domain().tap("update_page", &self.database_id))?;

        self.decode(raw)
    }

    /// Validates `request` against the cached schema and runs it.
    ///
    /// Every violation is reported at once as a single `BadRequest`; in that
    /// case the backend is never called.
    pub async fn query(&self, request: &QueryRequest) -> DomainResult<QueryResult<E>> {
        let cached = self.cache.get(&self.database_id).await?;

        let violations = validate_request(request, &cached.schema);
        if let Some(err) = DomainError::from_violations(&violations) {
            tracing::debug!(
                database_id = %self.database_id,
                violations = violations.len(),
                "rejected query"
            );
            return Err(err);
        }

        let payload = QueryPayload {
            filter: request.filter.as_ref().map(|filter| filter.to_json()),
            sorts: request.sorts.iter().map(|sort| sort.to_json()).collect(),
            page_size: self.page_size,
        };

        let pages = self
            .source()
            .query_pages(&self.database_id, &payload)
            .await
            .map_err(|e| e.into_domain().tap("query_pages", &self.database_id))?;

        let title_property = request
            .title_property
            .clone()
            .or_else(|| cached.schema.title_property_name.clone());

        let mut hits = Vec::with_capacity(pages.len());
        for raw in pages {
            let page = SourcePage::from_json(raw)?;
            let title = title_property
                .as_deref()
                .and_then(|name| title_text(&cached.schema, &page.properties, name));

            hits.push(QueryHit {
                item: self.mapping.from_source_page(&page)?,
                title,
            });
        }

        Ok(QueryResult {
            hits,
            title_property,
            schema_warning: cached.warning,
        })
    }

    fn encode<P: Serialize>(&self, patch: &P) -> DomainResult<Map<String, Value>> {
        Ok(self.mapping.to_source_properties(patch)?)
    }

    fn decode(&self, raw: Value) -> DomainResult<DecodedEntity<E>> {
        let page = SourcePage::from_json(raw)?;
        self.mapping.from_source_page(&page)
    }
}

fn title_text(schema: &NormalizedSchema, properties: &Map<String, Value>, name: &str) -> Option<String> {
    let codec = codec_for(schema.kind_of(name)?)?;

    match codec.decode_json(properties.get(name)?) {
        Ok(Value::String(text)) => Some(text),
        Ok(other) => {
            tracing::debug!(property = name, value = %other, "title property is not text");
            None
        }
        Err(reason) => {
            tracing::debug!(property = name, %reason, "cannot decode title property");
            None
        }
    }
}
