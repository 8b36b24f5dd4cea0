//! Canonical schema representation and the normalizer that produces it.
//!
//! A backend describes each database as a loosely-typed map of property
//! configurations. [`normalize`] turns that map into a [`NormalizedSchema`]:
//! an ordered list of [`PropertyDescriptor`]s with a closed [`PropertyKind`],
//! the detected title property and a content hash used for change detection.
//!
//! # Example
//!
//! ```ignore
//! use proplayer::schema::{normalize, RawSchema};
//! use serde_json::json;
//!
//! let raw = RawSchema::from_value(json!({
//!     "Name": { "type": "title", "title": {} },
//!     "Tags": { "type": "multi_select", "multi_select": { "options": [] } },
//! }), chrono::Utc::now());
//!
//! let schema = normalize("db-1", raw);
//! assert_eq!(schema.title_property_name.as_deref(), Some("Name"));
//! ```

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Version prefix mixed into every content hash.
pub const HASH_VERSION: &str = "v1";

/// The closed set of property kinds the layer understands.
///
/// Kinds the backend adds later are kept as [`PropertyKind::Unrecognized`]
/// so schema consumers can degrade instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum PropertyKind {
    Title,
    RichText,
    Select,
    MultiSelect,
    Status,
    Url,
    Email,
    Files,
    People,
    Relation,
    Date,
    Number,
    Checkbox,
    FormulaNumber,
    Unrecognized(String),
}

impl PropertyKind {
    /// Parses a backend kind discriminator.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "select" => PropertyKind::Select,
            "multi_select" => PropertyKind::MultiSelect,
            "status" => PropertyKind::Status,
            "url" => PropertyKind::Url,
            "email" => PropertyKind::Email,
            "files" => PropertyKind::Files,
            "people" => PropertyKind::People,
            "relation" => PropertyKind::Relation,
            "date" => PropertyKind::Date,
            "number" => PropertyKind::Number,
            "checkbox" => PropertyKind::Checkbox,
            "formula_number" => PropertyKind::FormulaNumber,
            other => PropertyKind::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Select => "select",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::Status => "status",
            PropertyKind::Url => "url",
            PropertyKind::Email => "email",
            PropertyKind::Files => "files",
            PropertyKind::People => "people",
            PropertyKind::Relation => "relation",
            PropertyKind::Date => "date",
            PropertyKind::Number => "number",
            PropertyKind::Checkbox => "checkbox",
            PropertyKind::FormulaNumber => "formula_number",
            PropertyKind::Unrecognized(raw) => raw,
        }
    }

    /// Whether the backend computes this property (writes have no effect).
    pub fn is_read_only(&self) -> bool {
        matches!(self, PropertyKind::FormulaNumber)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, PropertyKind::Unrecognized(_))
    }

    /// Whether a filter may reference a property of this kind.
    pub fn is_filterable(&self) -> bool {
        crate::validate::expected_group(self).is_some()
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PropertyKind> for String {
    fn from(kind: PropertyKind) -> Self {
        kind.as_str().to_string()
    }
}

impl From<String> for PropertyKind {
    fn from(raw: String) -> Self {
        PropertyKind::parse(&raw)
    }
}

/// One property of a database schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    /// Per-kind configuration as sent by the backend (options, formula, ...).
    /// Not part of the content hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Raw schema as returned by a backend fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSchema {
    /// Property name to property configuration, in backend order.
    pub properties: Map<String, Value>,
    pub last_modified: DateTime<Utc>,
}

impl RawSchema {
    pub fn new(properties: Map<String, Value>, last_modified: DateTime<Utc>) -> Self {
        Self { properties, last_modified }
    }

    /// Builds a raw schema from a JSON object; non-objects yield an empty map.
    pub fn from_value(properties: Value, last_modified: DateTime<Utc>) -> Self {
        match properties {
            Value::Object(map) => Self::new(map, last_modified),
            _ => Self::new(Map::new(), last_modified),
        }
    }
}

/// Canonical, hashed representation of a database's property catalogue.
///
/// Created by [`normalize`] and never mutated afterwards; a refresh produces a
/// new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSchema {
    pub database_id: String,
    pub title_property_name: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
    pub last_modified: DateTime<Utc>,
    /// Lowercase hex SHA-256 over the name-sorted `(name, kind)` pairs.
    pub content_hash: String,
    /// Additional title-kind properties ignored in favour of the first one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title_conflicts: Vec<String>,
}

impl NormalizedSchema {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<&PropertyKind> {
        self.property(name).map(|p| &p.kind)
    }

    /// Property names in schema order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.name.as_str())
    }

    /// Whether `other` describes a different `(name, kind)` catalogue.
    pub fn has_changed(&self, other: &NormalizedSchema) -> bool {
        self.content_hash != other.content_hash
    }
}

fn kind_of_config(config: &Value) -> PropertyKind {
    let discriminator = config
        .get("type")
        .or_else(|| config.get("kind"))
        .and_then(Value::as_str)
        .unwrap_or("");

    if discriminator != "formula" {
        return PropertyKind::parse(discriminator);
    }

    // A formula is only usable when its result type is known to be numeric.
    match config
        .get("formula")
        .and_then(|f| f.get("type"))
        .and_then(Value::as_str)
    {
        Some("number") => PropertyKind::FormulaNumber,
        Some(result) => PropertyKind::Unrecognized(format!("formula:{result}")),
        None => PropertyKind::Unrecognized("formula".to_string()),
    }
}

/// Computes the content hash over `(name, kind)` pairs.
///
/// Input order does not matter: pairs are sorted by name before hashing.
pub fn content_hash<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a PropertyKind)>) -> String {
    let mut sorted: Vec<(&str, &PropertyKind)> = pairs.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));

    let mut hasher = Sha256::new();
    hasher.update(HASH_VERSION.as_bytes());
    hasher.update(b"\n");

    for (name, kind) in sorted {
        hasher.update(name.as_bytes());
        hasher.update(b"\t");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\n");
    }

    hex::encode(hasher.finalize())
}

/// Normalizes a raw backend schema.
///
/// Property order is preserved. The first title-kind property becomes the
/// title property; any further ones are listed in `title_conflicts`.
///
/// Names are unique: a `name` override that matches another property's key or
/// an earlier override is ignored and the map key is kept.
pub fn normalize(database_id: &str, raw: RawSchema) -> NormalizedSchema {
    let mut properties = Vec::with_capacity(raw.properties.len());
    let keys: HashSet<String> = raw.properties.keys().cloned().collect();
    let mut renamed: HashSet<String> = HashSet::new();

    for (key, config) in raw.properties {
        let name = match config.get("name").and_then(Value::as_str) {
            Some(name) if name == key => key,
            // An override may not take another property's key or an earlier override.
            Some(name) if keys.contains(name) || renamed.contains(name) => {
                tracing::warn!(
                    database_id,
                    property = %key,
                    name,
                    "property name is already taken; keeping the original key"
                );
                key
            }
            Some(name) => {
                renamed.insert(name.to_string());
                name.to_string()
            }
            None => key,
        };
        let kind = kind_of_config(&config);

        properties.push(PropertyDescriptor {
            name,
            kind,
            config: Some(config),
        });
    }

    let mut titles = properties
        .iter()
        .filter(|p| p.kind == PropertyKind::Title)
        .map(|p| p.name.clone());
    let title_property_name = titles.next();
    let title_conflicts: Vec<String> = titles.collect();

    if !title_conflicts.is_empty() {
        tracing::warn!(
            database_id,
            title = title_property_name.as_deref().unwrap_or_default(),
            ignored = ?title_conflicts,
            "schema has more than one title property; using the first"
        );
    }

    let content_hash = content_hash(properties.iter().map(|p| (p.name.as_str(), &p.kind)));

    NormalizedSchema {
        database_id: database_id.to_string(),
        title_property_name,
        properties,
        last_modified: raw.last_modified,
        content_hash,
        title_conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn raw(value: Value) -> RawSchema {
        RawSchema::from_value(value, at())
    }

    #[test]
    fn preserves_order_and_detects_title() {
        let schema = normalize(
            "db",
            raw(json!({
                "Status": { "type": "status" },
                "Name": { "type": "title" },
                "Due": { "type": "date" },
            })),
        );

        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["Status", "Name", "Due"]);
        assert_eq!(schema.title_property_name.as_deref(), Some("Name"));
        assert!(schema.title_conflicts.is_empty());
        assert_eq!(schema.last_modified, at());
    }

    #[test]
    fn no_title_yields_none() {
        let schema = normalize("db", raw(json!({ "Count": { "type": "number" } })));
        assert_eq!(schema.title_property_name, None);
    }

    #[test]
    fn first_title_wins_and_others_are_recorded() {
        let schema = normalize(
            "db",
            raw(json!({
                "Primary": { "type": "title" },
                "Secondary": { "type": "title" },
            })),
        );

        assert_eq!(schema.title_property_name.as_deref(), Some("Primary"));
        assert_eq!(schema.title_conflicts, vec!["Secondary".to_string()]);
    }

    #[test]
    fn unknown_kinds_are_retained() {
        let schema = normalize(
            "db",
            raw(json!({
                "Place": { "type": "location" },
                "Broken": 42,
                "Label": { "type": "formula", "formula": { "type": "string" } },
                "Score": { "type": "formula", "formula": { "type": "number" } },
            })),
        );

        assert_eq!(schema.kind_of("Place"), Some(&PropertyKind::Unrecognized("location".into())));
        assert_eq!(schema.kind_of("Broken"), Some(&PropertyKind::Unrecognized(String::new())));
        assert_eq!(
            schema.kind_of("Label"),
            Some(&PropertyKind::Unrecognized("formula:string".into()))
        );
        assert_eq!(schema.kind_of("Score"), Some(&PropertyKind::FormulaNumber));
    }

    #[test]
    fn hash_ignores_order_and_config() {
        let a = normalize(
            "db",
            raw(json!({
                "Name": { "type": "title" },
                "Tags": { "type": "multi_select", "multi_select": { "options": [{ "name": "a" }] } },
            })),
        );
        let b = normalize(
            "db",
            raw(json!({
                "Tags": { "type": "multi_select", "multi_select": { "options": [] } },
                "Name": { "type": "title" },
            })),
        );

        assert_eq!(a.content_hash, b.content_hash);
        assert!(!a.has_changed(&b));
        assert_eq!(a.content_hash.len(), 64);
        assert!(a.content_hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_with_kind() {
        let a = normalize("db", raw(json!({ "Due": { "type": "date" } })));
        let b = normalize("db", raw(json!({ "Due": { "type": "rich_text" } })));
        assert!(a.has_changed(&b));
    }

    #[test]
    fn hash_is_stable_across_runs() {
        let kind = PropertyKind::Title;
        assert_eq!(content_hash([("Name", &kind)]), content_hash(vec![("Name", &kind)]));

        let schema = normalize("db", raw(json!({ "Name": { "type": "title" } })));
        assert_eq!(schema.content_hash, content_hash([("Name", &kind)]));
    }

    #[test]
    fn hash_matches_known_digests() {
        assert_eq!(
            content_hash([("Name", &PropertyKind::Title)]),
            "3872b150712f16d6529808cf6043515923cfc0d9117d7c1743ea488f468d7e30"
        );

        let schema = normalize(
            "db",
            raw(json!({
                "Tags": { "type": "multi_select" },
                "Name": { "type": "title" },
                "Score": { "type": "formula", "formula": { "type": "number" } },
                "Due": { "type": "date" },
            })),
        );
        assert_eq!(
            schema.content_hash,
            "99db681640098001a667579e874eb08dc2b9f6a8ec0a7023fb950ba69e99b44b"
        );
    }

    #[test]
    fn name_override_cannot_take_an_existing_name() {
        let schema = normalize(
            "db",
            raw(json!({
                "A": { "type": "title", "name": "B" },
                "B": { "type": "number" },
                "C": { "type": "date", "name": "Due" },
                "D": { "type": "checkbox", "name": "Due" },
            })),
        );

        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["A", "B", "Due", "D"]);
        assert_eq!(schema.kind_of("A"), Some(&PropertyKind::Title));
        assert_eq!(schema.kind_of("B"), Some(&PropertyKind::Number));
        assert_eq!(schema.kind_of("Due"), Some(&PropertyKind::Date));
        assert_eq!(schema.title_property_name.as_deref(), Some("A"));
    }

    #[test]
    fn kind_serializes_as_raw_string() {
        assert_eq!(serde_json::to_value(PropertyKind::MultiSelect).unwrap(), json!("multi_select"));
        let parsed: PropertyKind = serde_json::from_value(json!("rollup")).unwrap();
        assert_eq!(parsed, PropertyKind::Unrecognized("rollup".into()));
    }
}
