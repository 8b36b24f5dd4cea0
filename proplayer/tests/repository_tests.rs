use std::sync::Arc;

use chrono::Utc;
use proplayer::{memory::InMemorySource, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    title: Option<String>,
    priority: Option<String>,
    estimate: Option<f64>,
    done: Option<bool>,
    score: Option<f64>,
}

impl Entity for Task {
    fn entity_name() -> &'static str {
        "task"
    }

    fn field_names() -> &'static [&'static str] {
        &["title", "priority", "estimate", "done", "score"]
    }
}

fn schema() -> RawSchema {
    RawSchema::from_value(
        json!({
            "Name": { "type": "title" },
            "Priority": { "type": "select" },
            "Estimate": { "type": "number" },
            "Done": { "type": "checkbox" },
            "Score": { "type": "formula", "formula": { "type": "number", "expression": "prop(\"Estimate\") * 2" } },
            "Notes": { "type": "rich_text" },
            "Location": { "type": "place" },
        }),
        Utc::now(),
    )
}

fn mapping() -> DomainFieldMapping<Task> {
    DomainFieldMapping::builder()
        .field("title", "Name", TitleCodec)
        .field("priority", "Priority", SelectCodec)
        .field("estimate", "Estimate", NumberCodec)
        .field("done", "Done", CheckboxCodec)
        .field("score", "Score", FormulaNumberCodec)
        .build()
        .unwrap()
}

fn properties(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn seeded_page(title: &str, estimate: Value) -> Map<String, Value> {
    properties(json!({
        "Name": { "title": [{ "plain_text": title }] },
        "Priority": { "select": { "name": "high" } },
        "Estimate": { "number": estimate },
        "Done": { "checkbox": false },
        "Score": { "formula": { "type": "number", "number": 4 } },
        "Notes": { "rich_text": [{ "plain_text": format!("notes for {title}") }] },
    }))
}

struct Fixture {
    source: InMemorySource,
    tasks: EntityRepository<InMemorySource, Task>,
    first: Uuid,
}

fn fixture() -> Fixture {
    let first = Uuid::new_v4();
    let source = InMemorySource::builder()
        .with_schema("tasks", schema())
        .with_page("tasks", first, seeded_page("Alpha", json!(2)))
        .with_page("tasks", Uuid::new_v4(), seeded_page("Beta", json!("lots")))
        .with_actor("u-bot")
        .build();

    let cache = Arc::new(SchemaCache::builder(source.clone()).build());
    let tasks = EntityRepository::new("tasks", cache, mapping());

    Fixture { source, tasks, first }
}

#[tokio::test]
async fn test_get_decodes_entity_and_system_fields() {
    let fx = fixture();

    let decoded = fx.tasks.get(&fx.first).await.unwrap();

    assert!(decoded.is_complete());
    assert_eq!(decoded.system.id, fx.first);
    assert_eq!(decoded.system.created_by, "u-bot");
    assert_eq!(
        decoded.entity,
        Task {
            title: Some("Alpha".into()),
            priority: Some("high".into()),
            estimate: Some(2.0),
            done: Some(false),
            score: Some(4.0),
        }
    );
}

#[tokio::test]
async fn test_create_skips_read_only_and_reports_missing_fields() {
    let fx = fixture();

    let created = fx
        .tasks
        .create(&json!({ "title": "Write report", "estimate": 3.5, "done": false, "score": 99 }))
        .await
        .unwrap();

    let stored = fx.source.page(&created.system.id).await.unwrap();
    assert!(stored["properties"].get("Score").is_none());
    assert_eq!(stored["properties"]["Estimate"], json!({ "number": 3.5 }));

    assert_eq!(created.entity.title.as_deref(), Some("Write report"));
    assert_eq!(created.entity.score, None);
    assert_eq!(
        created.warnings,
        vec![
            "priority (Priority): property is missing".to_string(),
            "score (Score): property is missing".to_string(),
        ]
    );
    assert_eq!(fx.source.page_count("tasks").await, 3);
}

#[tokio::test]
async fn test_update_only_touches_provided_fields() {
    let fx = fixture();

    let updated = fx
        .tasks
        .update(&fx.first, &json!({ "done": true, "priority": null }))
        .await
        .unwrap();

    assert_eq!(updated.entity.done, Some(true));
    assert_eq!(updated.entity.priority.as_deref(), Some("high"));
    assert_eq!(updated.entity.title.as_deref(), Some("Alpha"));
}

#[tokio::test]
async fn test_unknown_patch_field_is_bad_request() {
    let fx = fixture();

    let err = fx.tasks.create(&json!({ "colour": "red" })).await.unwrap_err();

    assert_eq!(
        err,
        DomainError::BadRequest {
            cause: Some("Entity task has no field named 'colour'".into())
        }
    );
    assert_eq!(fx.source.page_count("tasks").await, 2);
}

#[tokio::test]
async fn test_undecodable_title_leaves_hit_title_empty() {
    let source = InMemorySource::builder()
        .with_schema("tasks", schema())
        .with_page("tasks", Uuid::new_v4(), properties(json!({ "Name": { "title": "not runs" } })))
        .build();
    let cache = Arc::new(SchemaCache::builder(source).build());
    let tasks = EntityRepository::new("tasks", cache, mapping());

    let result = tasks.query(&QueryRequest::new()).await.unwrap();

    assert_eq!(result.title_property.as_deref(), Some("Name"));
    assert_eq!(result.hits[0].title, None);
    assert!(result.hits[0].item.warnings[0].starts_with("title (Name): "));
}

#[tokio::test]
async fn test_malformed_field_becomes_warning() {
    let fx = fixture();

    let result = fx.tasks.query(&QueryRequest::new()).await.unwrap();
    let beta = &result.hits[1].item;

    assert_eq!(beta.entity.title.as_deref(), Some("Beta"));
    assert_eq!(beta.entity.estimate, None);
    assert_eq!(beta.warnings.len(), 1);
    assert!(beta.warnings[0].starts_with("estimate (Estimate): "));
}

#[tokio::test]
async fn test_query_forwards_validated_payload() {
    let fx = fixture();

    let request = QueryRequest::new()
        .with_filter(
            Filter::op("Done", "checkbox", "equals", false).and(Filter::op("Score", "number", "greater_than", 3)),
        )
        .with_sort(SortSpec::property("Estimate", SortDirection::Descending))
        .with_sort(SortSpec::timestamp("created_time", SortDirection::Ascending));

    let result = fx.tasks.query(&request).await.unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.title_property.as_deref(), Some("Name"));
    assert_eq!(result.hits[0].title.as_deref(), Some("Alpha"));
    assert_eq!(result.schema_warning, None);

    let (database_id, payload) = fx.source.last_query().await.unwrap();
    assert_eq!(database_id, "tasks");
    assert_eq!(
        payload.filter,
        Some(json!({
            "and": [
                { "property": "Done", "checkbox": { "equals": false } },
                { "property": "Score", "number": { "greater_than": 3 } },
            ]
        }))
    );
    assert_eq!(
        payload.sorts,
        vec![
            json!({ "property": "Estimate", "direction": "descending" }),
            json!({ "timestamp": "created_time", "direction": "ascending" }),
        ]
    );
}

#[tokio::test]
async fn test_invalid_query_never_reaches_backend() {
    let fx = fixture();

    let request = QueryRequest::from_json(&json!({
        "filter": {
            "or": [
                { "property": "Ghost", "title": { "equals": "x" } },
                { "property": "Done", "number": { "equals": 1 } },
                { "property": "Location", "place": { "near": "home" } },
            ]
        },
        "sorts": [{ "property": "Estimate", "direction": "sideways" }],
        "title_property": "Heading",
    }))
    .unwrap();

    let err = fx.tasks.query(&request).await.unwrap_err();

    let DomainError::BadRequest { cause: Some(cause) } = err else {
        panic!("expected a bad request, got {err:?}");
    };
    let violations: Vec<&str> = cause.split("; ").collect();
    assert_eq!(
        violations,
        vec![
            "Unknown filter property: Ghost at filter.or[0]",
            "Invalid operator group 'number' for property 'Done' (kind 'checkbox'). Expected 'checkbox'. at filter.or[1]",
            "Property 'Location' (kind 'place') does not support filtering. at filter.or[2]",
            "Invalid sort direction 'sideways' at sorts[0].direction. Expected 'ascending' or 'descending'",
            "Unknown title property: Heading at title_property",
        ]
    );
    assert!(fx.source.last_query().await.is_none());
}

#[tokio::test]
async fn test_title_override_decodes_other_property() {
    let fx = fixture();

    let result = fx
        .tasks
        .query(&QueryRequest::new().with_title_property("Notes"))
        .await
        .unwrap();

    assert_eq!(result.title_property.as_deref(), Some("Notes"));
    assert_eq!(result.hits[0].title.as_deref(), Some("notes for Alpha"));
}

#[tokio::test]
async fn test_transport_failures_map_through_taxonomy() {
    let fx = fixture();

    let err = fx.tasks.get(&Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), "not_found");

    // Warm the schema so the failure comes from the page call.
    fx.tasks.check_schema().await.unwrap();
    fx.source
        .fail("tasks", TransportError::Connection("connection reset".into()))
        .await;

    let err = fx.tasks.query(&QueryRequest::new()).await.unwrap_err();
    assert_eq!(
        err,
        DomainError::ServiceUnavailable {
            cause: Some("connection reset".into())
        }
    );

    fx.source
        .fail(
            "tasks",
            TransportError::Status {
                status: 429,
                body: String::new(),
                retry_after_seconds: Some(7),
            },
        )
        .await;
    let err = fx.tasks.get(&fx.first).await.unwrap_err();
    assert_eq!(
        err,
        DomainError::RateLimited {
            retry_after_seconds: Some(7),
            cause: None
        }
    );
}

#[tokio::test]
async fn test_schema_drift_is_reported() {
    let fx = fixture();
    assert!(fx.tasks.check_schema().await.unwrap().is_empty());

    fx.source
        .set_schema(
            "tasks",
            RawSchema::from_value(
                json!({
                    "Name": { "type": "title" },
                    "Priority": { "type": "status" },
                    "Done": { "type": "checkbox" },
                    "Score": { "type": "formula", "formula": { "type": "number" } },
                }),
                Utc::now(),
            ),
        )
        .await;
    fx.tasks.cache().refresh("tasks").await.unwrap();

    let drift = fx.tasks.check_schema().await.unwrap();
    assert_eq!(drift.len(), 2);
    assert!(drift.iter().any(|line| line.contains("Priority")));
    assert!(drift.iter().any(|line| line.contains("Estimate")));
}

#[tokio::test]
async fn test_repositories_share_one_schema_fetch() {
    let source = InMemorySource::builder()
        .with_schema("tasks", schema())
        .with_latency(std::time::Duration::from_millis(20))
        .build();
    let cache = Arc::new(SchemaCache::builder(source.clone()).build());
    let mapping = Arc::new(mapping());

    let repositories: Vec<_> = (0..8)
        .map(|_| EntityRepository::new("tasks", Arc::clone(&cache), Arc::clone(&mapping)))
        .collect();

    let request = QueryRequest::new().with_filter(Filter::op("Name", "title", "contains", "a"));
    let results = futures::future::join_all(repositories.iter().map(|repo| repo.query(&request))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(source.schema_fetches(), 1);
}
