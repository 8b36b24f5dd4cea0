//! In-memory backend implementation of the source traits.
//!
//! This module provides a backend that keeps raw schemas and page envelopes in
//! HashMaps behind async-safe read-write locks. Queries are not evaluated: the
//! payload is recorded and every page of the database is returned in insertion
//! order.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use mea::rwlock::RwLock;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use proplayer_core::{
    error::{SourceResult, TransportError},
    schema::RawSchema,
    source::{PageSource, QueryPayload, SchemaSource},
};

const DEFAULT_ACTOR: &str = "memory-user";

#[derive(Debug, Clone)]
struct StoredPage {
    database_id: String,
    envelope: Value,
}

#[derive(Debug, Default)]
struct State {
    schemas: HashMap<String, RawSchema>,
    pages: HashMap<Uuid, StoredPage>,
    /// database_id -> page ids in insertion order
    order: HashMap<String, Vec<Uuid>>,
    failures: HashMap<String, TransportError>,
    last_query: Option<(String, QueryPayload)>,
}

/// Thread-safe in-memory implementation of [`SchemaSource`] and [`PageSource`].
///
/// `InMemorySource` is cloneable and keeps its state behind an `Arc`, so clones
/// share the same schemas, pages and counters.
///
/// Failures can be injected per database id with [`InMemorySource::fail`];
/// every operation touching that database then returns the injected error
/// until [`InMemorySource::recover`] is called.
///
/// # Example
///
/// ```ignore
/// use proplayer_memory::InMemorySource;
/// use proplayer::schema::RawSchema;
///
/// let source = InMemorySource::builder()
///     .with_schema("tasks", RawSchema::from_value(json!({ "Name": { "type": "title" } }), Utc::now()))
///     .build();
///
/// let raw = source.fetch_schema("tasks").await?;
/// assert_eq!(source.schema_fetches(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct InMemorySource {
    state: Arc<RwLock<State>>,
    schema_fetches: Arc<AtomicUsize>,
    latency: Option<Duration>,
    actor: Arc<str>,
}

impl InMemorySource {
    /// Creates an empty source with no databases.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> InMemorySourceBuilder {
        InMemorySourceBuilder::default()
    }

    /// Number of schema fetches served so far, including failed ones.
    pub fn schema_fetches(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }

    /// Replaces the schema of `database_id`, creating the database if needed.
    pub async fn set_schema(&self, database_id: &str, schema: RawSchema) {
        let mut state = self.state.write().await;
        state.schemas.insert(database_id.to_string(), schema);
        state.order.entry(database_id.to_string()).or_default();
    }

    /// Makes every operation on `database_id` fail with `err`.
    pub async fn fail(&self, database_id: &str, err: TransportError) {
        self.state
            .write()
            .await
            .failures
            .insert(database_id.to_string(), err);
    }

    /// Removes an injected failure. Returns whether one was set.
    pub async fn recover(&self, database_id: &str) -> bool {
        self.state
            .write()
            .await
            .failures
            .remove(database_id)
            .is_some()
    }

    /// The most recent query payload and the database it targeted.
    pub async fn last_query(&self) -> Option<(String, QueryPayload)> {
        self.state.read().await.last_query.clone()
    }

    /// The stored envelope of a page.
    pub async fn page(&self, page_id: &Uuid) -> Option<Value> {
        self.state
            .read()
            .await
            .pages
            .get(page_id)
            .map(|page| page.envelope.clone())
    }

    pub async fn page_count(&self, database_id: &str) -> usize {
        self.state
            .read()
            .await
            .order
            .get(database_id)
            .map_or(0, Vec::len)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn envelope(&self, id: Uuid, properties: Map<String, Value>) -> Value {
        let now = Utc::now();

        json!({
            "object": "page",
            "id": id,
            "created_time": now,
            "last_edited_time": now,
            "created_by": { "object": "user", "id": &*self.actor },
            "last_edited_by": { "object": "user", "id": &*self.actor },
            "properties": properties,
        })
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

fn database_not_found(database_id: &str) -> TransportError {
    TransportError::status(404, format!("Could not find database with ID: {database_id}"))
}

fn page_not_found(page_id: &Uuid) -> TransportError {
    TransportError::status(404, format!("Could not find page with ID: {page_id}"))
}

fn injected(state: &State, database_id: &str) -> SourceResult<()> {
    match state.failures.get(database_id) {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl SchemaSource for InMemorySource {
    async fn fetch_schema(&self, database_id: &str) -> SourceResult<RawSchema> {
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(database_id, "fetching schema from memory source");
        self.delay().await;

        let state = self.state.read().await;
        injected(&state, database_id)?;

        state
            .schemas
            .get(database_id)
            .cloned()
            .ok_or_else(|| database_not_found(database_id))
    }
}

#[async_trait]
impl PageSource for InMemorySource {
    async fn read_page(&self, page_id: &Uuid) -> SourceResult<Value> {
        self.delay().await;

        let state = self.state.read().await;
        let page = state.pages.get(page_id).ok_or_else(|| page_not_found(page_id))?;
        injected(&state, &page.database_id)?;

        Ok(page.envelope.clone())
    }

    async fn create_page(&self, database_id: &str, properties: Map<String, Value>) -> SourceResult<Value> {
        self.delay().await;

        let mut state = self.state.write().await;
        injected(&state, database_id)?;

        if !state.schemas.contains_key(database_id) {
            return Err(database_not_found(database_id));
        }

        let id = Uuid::new_v4();
        let envelope = self.envelope(id, properties);

        state.pages.insert(
            id,
            StoredPage {
                database_id: database_id.to_string(),
                envelope: envelope.clone(),
            },
        );
        state.order.entry(database_id.to_string()).or_default().push(id);

        Ok(envelope)
    }

    async fn update_page(&self, page_id: &Uuid, properties: Map<String, Value>) -> SourceResult<Value> {
        self.delay().await;

        let mut state = self.state.write().await;
        let database_id = match state.pages.get(page_id) {
            Some(page) => page.database_id.clone(),
            None => return Err(page_not_found(page_id)),
        };
        injected(&state, &database_id)?;

        let page = state.pages.get_mut(page_id).ok_or_else(|| page_not_found(page_id))?;
        let Some(envelope) = page.envelope.as_object_mut() else {
            return Err(TransportError::status(500, format!("page {page_id} is not an object")));
        };

        if let Some(Value::Object(existing)) = envelope.get_mut("properties") {
            existing.extend(properties);
        } else {
            envelope.insert("properties".to_string(), Value::Object(properties));
        }
        envelope.insert("last_edited_time".to_string(), json!(Utc::now()));
        envelope.insert(
            "last_edited_by".to_string(),
            json!({ "object": "user", "id": &*self.actor }),
        );

        Ok(page.envelope.clone())
    }

    async fn query_pages(&self, database_id: &str, query: &QueryPayload) -> SourceResult<Vec<Value>> {
        self.delay().await;

        let mut state = self.state.write().await;
        injected(&state, database_id)?;
        state.last_query = Some((database_id.to_string(), query.clone()));

        let Some(ids) = state.order.get(database_id) else {
            return Err(database_not_found(database_id));
        };

        let pages = ids
            .iter()
            .filter_map(|id| state.pages.get(id))
            .map(|page| page.envelope.clone())
            .take(query.page_size.unwrap_or(usize::MAX))
            .collect();

        Ok(pages)
    }
}

/// Builder for constructing [`InMemorySource`] instances.
///
/// # Example
///
/// ```ignore
/// use proplayer_memory::InMemorySource;
///
/// let source = InMemorySource::builder()
///     .with_schema("tasks", schema)
///     .with_page("tasks", page_id, properties)
///     .with_latency(Duration::from_millis(25))
///     .build();
/// ```
#[derive(Default)]
pub struct InMemorySourceBuilder {
    schemas: Vec<(String, RawSchema)>,
    pages: Vec<(String, Uuid, Map<String, Value>)>,
    latency: Option<Duration>,
    actor: Option<String>,
}

impl InMemorySourceBuilder {
    pub fn with_schema(mut self, database_id: impl Into<String>, schema: RawSchema) -> Self {
        self.schemas.push((database_id.into(), schema));
        self
    }

    /// Seeds a page. The page's database must also be seeded with a schema.
    pub fn with_page(mut self, database_id: impl Into<String>, page_id: Uuid, properties: Map<String, Value>) -> Self {
        self.pages.push((database_id.into(), page_id, properties));
        self
    }

    /// Delays every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// User id written to `created_by` / `last_edited_by`.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Builds and returns a new [`InMemorySource`] instance.
    pub fn build(self) -> InMemorySource {
        let mut source = InMemorySource {
            state: Arc::default(),
            schema_fetches: Arc::default(),
            latency: self.latency,
            actor: Arc::from(self.actor.as_deref().unwrap_or(DEFAULT_ACTOR)),
        };

        let mut state = State::default();
        for (database_id, schema) in self.schemas {
            state.order.entry(database_id.clone()).or_default();
            state.schemas.insert(database_id, schema);
        }
        for (database_id, id, properties) in self.pages {
            let envelope = source.envelope(id, properties);
            state.order.entry(database_id.clone()).or_default().push(id);
            state.pages.insert(id, StoredPage { database_id, envelope });
        }

        source.state = Arc::new(RwLock::new(state));
        source
    }
}
