//! Process-wide cache of normalized schemas.
//!
//! [`SchemaCache`] holds one [`NormalizedSchema`] per database id behind an
//! `Arc`. A refresh builds a brand-new schema and swaps the `Arc` in one write,
//! so readers either see the old snapshot or the new one.
//!
//! Concurrent misses for the same id share one upstream fetch: the first caller
//! starts a fetch future and parks a weak handle to it in the in-flight table;
//! later callers upgrade that handle and await the same result. When every
//! waiter has given up, the fetch future is dropped and the fetch is cancelled.
//! Handles to cancelled or completed fetches are pruned on the next join.
//!
//! # Example
//!
//! ```ignore
//! use std::{sync::Arc, time::Duration};
//! use proplayer::cache::SchemaCache;
//!
//! let cache = Arc::new(
//!     SchemaCache::builder(source)
//!         .fetch_timeout(Duration::from_secs(5))
//!         .max_age(Some(Duration::from_secs(60)))
//!         .build(),
//! );
//!
//! let cached = cache.get("tasks-db").await?;
//! if let Some(warning) = &cached.warning {
//!     tracing::warn!(%warning, "serving a stale schema");
//! }
//! ```

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared, WeakShared},
};
use mea::{mutex::Mutex, rwlock::RwLock};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DomainError, DomainResult},
    schema::{NormalizedSchema, normalize},
    source::SchemaSource,
};

type FetchFuture = BoxFuture<'static, DomainResult<Arc<NormalizedSchema>>>;
type EntryMap = HashMap<String, CacheEntry>;

/// Settings for a [`SchemaCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaCacheConfig {
    /// Upper bound for one upstream schema fetch.
    pub fetch_timeout: Duration,
    /// Age after which a cached schema is refreshed on the next read.
    /// `None` keeps entries until they are refreshed or invalidated explicitly.
    pub max_age: Option<Duration>,
}

impl SchemaCacheConfig {
    pub fn builder() -> SchemaCacheConfigBuilder {
        SchemaCacheConfigBuilder::default()
    }
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            max_age: Some(Duration::from_secs(300)),
        }
    }
}

/// Builder for [`SchemaCacheConfig`].
#[derive(Debug, Default)]
pub struct SchemaCacheConfigBuilder {
    fetch_timeout: Option<Duration>,
    max_age: Option<Option<Duration>>,
}

impl SchemaCacheConfigBuilder {
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Builds the config, using defaults for unset values.
    pub fn build(self) -> SchemaCacheConfig {
        let defaults = SchemaCacheConfig::default();

        SchemaCacheConfig {
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            max_age: self.max_age.unwrap_or(defaults.max_age),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    schema: Arc<NormalizedSchema>,
    fetched_at: Instant,
}

/// A schema served by the cache.
#[derive(Debug, Clone)]
pub struct CachedSchema {
    pub schema: Arc<NormalizedSchema>,
    /// Set when a stale schema is served because a refresh failed.
    pub warning: Option<String>,
}

impl CachedSchema {
    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }
}

/// Concurrency-safe cache of normalized schemas keyed by database id.
pub struct SchemaCache<S: SchemaSource> {
    source: Arc<S>,
    config: SchemaCacheConfig,
    entries: Arc<RwLock<EntryMap>>,
    in_flight: Mutex<HashMap<String, WeakShared<FetchFuture>>>,
}

impl<S: SchemaSource + 'static> SchemaCache<S> {
    pub fn new(source: S, config: SchemaCacheConfig) -> Self {
        Self::from_arc(Arc::new(source), config)
    }

    /// Creates a cache over a source that is shared with other components.
    pub fn from_arc(source: Arc<S>, config: SchemaCacheConfig) -> Self {
        Self {
            source,
            config,
            entries: Arc::new(RwLock::new(EntryMap::new())),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn builder(source: S) -> SchemaCacheBuilder<S> {
        SchemaCacheBuilder::new(source)
    }

    pub fn config(&self) -> &SchemaCacheConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Returns the schema for `database_id`, fetching it when missing or expired.
    ///
    /// If the fetch fails and an older schema is cached, that schema is
    /// returned with a warning. Otherwise the failure is returned.
    pub async fn get(&self, database_id: &str) -> DomainResult<CachedSchema> {
        if let Some(schema) = self.fresh(database_id).await {
            tracing::debug!(database_id, "schema cache hit");
            return Ok(CachedSchema { schema, warning: None });
        }

        tracing::debug!(database_id, "schema cache miss");
        self.load(database_id).await
    }

    /// Fetches the schema now, regardless of the cached entry's age.
    pub async fn refresh(&self, database_id: &str) -> DomainResult<CachedSchema> {
        self.load(database_id).await
    }

    /// The cached schema, without fetching and regardless of age.
    pub async fn peek(&self, database_id: &str) -> Option<Arc<NormalizedSchema>> {
        self.entries
            .read()
            .await
            .get(database_id)
            .map(|entry| Arc::clone(&entry.schema))
    }

    /// Drops the cached schema. Returns whether one was present.
    pub async fn invalidate(&self, database_id: &str) -> bool {
        self.entries.write().await.remove(database_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn fresh(&self, database_id: &str) -> Option<Arc<NormalizedSchema>> {
        let entries = self.entries.read().await;
        let entry = entries.get(database_id)?;

        match self.config.max_age {
            Some(max_age) if entry.fetched_at.elapsed() >= max_age => None,
            _ => Some(Arc::clone(&entry.schema)),
        }
    }

    async fn load(&self, database_id: &str) -> DomainResult<CachedSchema> {
        let flight = self.join_flight(database_id).await;
        let outcome = flight.clone().await;
        self.land(database_id, &flight).await;

        let err = match outcome {
            Ok(schema) => return Ok(CachedSchema { schema, warning: None }),
            Err(err) => err,
        };

        match self.peek(database_id).await {
            Some(stale) => {
                tracing::warn!(
                    database_id,
                    code = err.code(),
                    "schema refresh failed; serving cached schema"
                );

                Ok(CachedSchema {
                    schema: stale,
                    warning: Some(format!(
                        "serving cached schema for {database_id} after failed refresh: {err}"
                    )),
                })
            }
            None => Err(err),
        }
    }

    async fn join_flight(&self, database_id: &str) -> Shared<FetchFuture> {
        let mut in_flight = self.in_flight.lock().await;

        // Abandoned or already finished flights are never joined.
        in_flight.retain(|_, weak| weak.upgrade().is_some_and(|flight| flight.peek().is_none()));

        if let Some(flight) = in_flight.get(database_id).and_then(WeakShared::upgrade) {
            tracing::debug!(database_id, "joining in-flight schema fetch");
            return flight;
        }

        let flight = self.start_fetch(database_id);
        if let Some(weak) = flight.downgrade() {
            in_flight.insert(database_id.to_string(), weak);
        }

        flight
    }

    async fn land(&self, database_id: &str, flight: &Shared<FetchFuture>) {
        let mut in_flight = self.in_flight.lock().await;

        let finished = in_flight
            .get(database_id)
            .is_some_and(|weak| weak.upgrade().is_none_or(|current| current.ptr_eq(flight)));

        if finished {
            in_flight.remove(database_id);
        }
    }

    fn start_fetch(&self, database_id: &str) -> Shared<FetchFuture> {
        let source = Arc::clone(&self.source);
        let entries = Arc::clone(&self.entries);
        let timeout = self.config.fetch_timeout;
        let database_id = database_id.to_string();

        async move {
            let raw = match tokio::time::timeout(timeout, source.fetch_schema(&database_id)).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(err)) => return Err(err.into_domain().tap("fetch_schema", &database_id)),
                Err(_) => {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    return Err(DomainError::timeout(timeout_ms).tap("fetch_schema", &database_id));
                }
            };

            let schema = Arc::new(normalize(&database_id, raw));
            let mut entries = entries.write().await;

            if let Some(previous) = entries.get(&database_id) {
                if previous.schema.has_changed(&schema) {
                    tracing::info!(
                        database_id = %database_id,
                        previous = %previous.schema.content_hash,
                        current = %schema.content_hash,
                        "schema changed"
                    );
                }
            }

            entries.insert(
                database_id,
                CacheEntry {
                    schema: Arc::clone(&schema),
                    fetched_at: Instant::now(),
                },
            );

            Ok(schema)
        }
        .boxed()
        .shared()
    }
}

/// Builder for [`SchemaCache`].
pub struct SchemaCacheBuilder<S: SchemaSource> {
    source: S,
    config: SchemaCacheConfig,
}

impl<S: SchemaSource + 'static> SchemaCacheBuilder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            config: SchemaCacheConfig::default(),
        }
    }

    pub fn config(mut self, config: SchemaCacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
        self.config.max_age = max_age;
        self
    }

    pub fn build(self) -> SchemaCache<S> {
        SchemaCache::new(self.source, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{SourceResult, TransportError},
        schema::RawSchema,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Debug, Default)]
    struct ScriptedSource {
        fetches: AtomicUsize,
        delay: Duration,
        failure: StdMutex<Option<TransportError>>,
        kind: StdMutex<&'static str>,
    }

    impl ScriptedSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                kind: StdMutex::new("title"),
                ..Default::default()
            }
        }

        fn fail_with(&self, err: Option<TransportError>) {
            *self.failure.lock().unwrap() = err;
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaSource for ScriptedSource {
        async fn fetch_schema(&self, _database_id: &str) -> SourceResult<RawSchema> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            if let Some(err) = self.failure.lock().unwrap().clone() {
                return Err(err);
            }

            let kind = *self.kind.lock().unwrap();
            Ok(RawSchema::from_value(json!({ "Name": { "type": kind } }), chrono::Utc::now()))
        }
    }

    fn cache(source: Arc<ScriptedSource>, max_age: Option<Duration>) -> SchemaCache<ScriptedSource> {
        SchemaCache::from_arc(
            source,
            SchemaCacheConfig::builder()
                .with_fetch_timeout(Duration::from_millis(500))
                .with_max_age(max_age)
                .build(),
        )
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(50)));
        let cache = Arc::new(cache(Arc::clone(&source), None));

        let waiters = (0..16).map(|_| {
            let cache = Arc::clone(&cache);
            async move { cache.get("db").await }
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(source.fetches(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(&result.as_ref().unwrap().schema, &first.schema));
        }
        assert!(cache.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn fresh_entries_are_served_without_fetching() {
        let source = Arc::new(ScriptedSource::new(Duration::ZERO));
        let cache = cache(Arc::clone(&source), Some(Duration::from_secs(60)));

        cache.get("db").await.unwrap();
        cache.get("db").await.unwrap();
        assert_eq!(source.fetches(), 1);

        cache.refresh("db").await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refreshed() {
        let source = Arc::new(ScriptedSource::new(Duration::ZERO));
        let cache = cache(Arc::clone(&source), Some(Duration::from_millis(10)));

        let before = cache.get("db").await.unwrap().schema;
        *source.kind.lock().unwrap() = "rich_text";
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after = cache.get("db").await.unwrap().schema;

        assert_eq!(source.fetches(), 2);
        assert!(before.has_changed(&after));
        assert_eq!(before.title_property_name.as_deref(), Some("Name"));
        assert_eq!(after.title_property_name, None);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_stale_schema() {
        let source = Arc::new(ScriptedSource::new(Duration::ZERO));
        let cache = cache(Arc::clone(&source), None);

        let original = cache.get("db").await.unwrap().schema;
        source.fail_with(Some(TransportError::status(503, "maintenance")));

        let degraded = cache.refresh("db").await.unwrap();
        assert!(degraded.is_degraded());
        assert!(Arc::ptr_eq(&degraded.schema, &original));
        assert!(degraded.warning.unwrap().contains("Service unavailable"));
        assert!(Arc::ptr_eq(&cache.peek("db").await.unwrap(), &original));
    }

    #[tokio::test]
    async fn failure_without_cached_value_propagates() {
        let source = Arc::new(ScriptedSource::new(Duration::ZERO));
        source.fail_with(Some(TransportError::status(404, "no such database")));
        let cache = cache(Arc::clone(&source), None);

        let err = cache.get("db").await.unwrap_err();
        assert_eq!(err, DomainError::NotFound { cause: Some("no such database".into()) });
        assert!(cache.is_empty().await);

        // The failed flight is not reused.
        source.fail_with(None);
        assert!(cache.get("db").await.is_ok());
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn refresh_never_joins_a_finished_fetch() {
        let source = Arc::new(ScriptedSource::new(Duration::ZERO));
        let cache = cache(Arc::clone(&source), None);

        // A completed flight still held by a caller that has not landed yet.
        let held = cache.join_flight("db").await;
        let original = held.clone().await.unwrap();
        assert_eq!(source.fetches(), 1);

        *source.kind.lock().unwrap() = "rich_text";
        let refreshed = cache.refresh("db").await.unwrap().schema;

        assert_eq!(source.fetches(), 2);
        assert!(original.has_changed(&refreshed));
        assert!(!cache.in_flight.lock().await.contains_key("db"));
        drop(held);
    }

    #[tokio::test]
    async fn abandoned_fetches_are_pruned() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(200)));
        let cache = cache(Arc::clone(&source), None);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.get("db")).await;
        assert!(abandoned.is_err());
        assert!(cache.in_flight.lock().await.contains_key("db"));

        source.fail_with(Some(TransportError::status(404, "no such database")));
        assert!(cache.get("other").await.is_err());

        assert!(cache.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let source = Arc::new(ScriptedSource::new(Duration::from_millis(200)));
        let cache = SchemaCache::from_arc(
            source,
            SchemaCacheConfig::builder()
                .with_fetch_timeout(Duration::from_millis(20))
                .build(),
        );

        assert_eq!(cache.get("db").await.unwrap_err(), DomainError::timeout(20));
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_fetch() {
        let source = Arc::new(ScriptedSource::new(Duration::ZERO));
        let cache = cache(Arc::clone(&source), None);

        cache.get("db").await.unwrap();
        assert!(cache.invalidate("db").await);
        assert!(!cache.invalidate("db").await);
        assert_eq!(cache.len().await, 0);

        cache.get("db").await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[test]
    fn config_defaults() {
        let config = SchemaCacheConfig::builder().build();
        assert_eq!(config, SchemaCacheConfig::default());
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
    }
}
