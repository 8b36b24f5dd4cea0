//! Typed filter and sort expressions for database queries.
//!
//! Clients submit filters and sorts as dynamically-structured JSON. The payload
//! is parsed once at the boundary into a [`QueryNode`] tree and a list of
//! [`SortSpec`]s; everything downstream (validation, forwarding) works on the
//! typed form.
//!
//! # Query Building
//!
//! ```ignore
//! use proplayer::query::{Filter, QueryNode};
//! use serde_json::json;
//!
//! let filter = Filter::op("Status", "status", "equals", "Done")
//!     .and(Filter::op("Estimate", "number", "greater_than", 3));
//!
//! assert_eq!(
//!     filter.to_json(),
//!     json!({ "and": [
//!         { "property": "Status", "status": { "equals": "Done" } },
//!         { "property": "Estimate", "number": { "greater_than": 3 } },
//!     ]})
//! );
//! ```
//!
//! # Wire shape
//!
//! - leaf: `{ "property": "<name>", "<operator group>": { ...operand } }`
//! - compound: `{ "and": [ ... ] }` or `{ "or": [ ... ] }`
//! - sort: `{ "property": "<name>", "direction": "ascending" | "descending" }`
//!   or `{ "timestamp": "created_time", "direction": ... }`

use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::QueryShapeError;

/// A node of a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// A condition on a single property.
    Leaf {
        /// The property the condition applies to.
        property: String,
        /// The operator group key (`"select"`, `"number"`, ...).
        group: String,
        /// The operator object inside the group, forwarded verbatim.
        operand: Value,
    },
    /// All children must match.
    And(Vec<QueryNode>),
    /// Any child must match.
    Or(Vec<QueryNode>),
}

impl QueryNode {
    pub fn leaf(property: impl Into<String>, group: impl Into<String>, operand: Value) -> Self {
        QueryNode::Leaf {
            property: property.into(),
            group: group.into(),
            operand,
        }
    }

    /// Combines this node with another using logical AND.
    ///
    /// If this node is already an AND, the other node is appended to it.
    pub fn and(self, other: QueryNode) -> Self {
        match self {
            QueryNode::And(mut children) => {
                children.push(other);
                QueryNode::And(children)
            }
            _ => QueryNode::And(vec![self, other]),
        }
    }

    /// Combines this node with another using logical OR.
    ///
    /// If this node is already an OR, the other node is appended to it.
    pub fn or(self, other: QueryNode) -> Self {
        match self {
            QueryNode::Or(mut children) => {
                children.push(other);
                QueryNode::Or(children)
            }
            _ => QueryNode::Or(vec![self, other]),
        }
    }

    /// Parses a client filter payload, reporting shape errors under `filter`.
    pub fn from_json(value: &Value) -> Result<Self, QueryShapeError> {
        parse_node(value, "filter")
    }

    /// Serializes the tree back into the wire shape.
    pub fn to_json(&self) -> Value {
        match self {
            QueryNode::Leaf { property, group, operand } => {
                let mut map = Map::new();
                map.insert("property".to_string(), Value::String(property.clone()));
                map.insert(group.clone(), operand.clone());
                Value::Object(map)
            }
            QueryNode::And(children) => json!({ "and": children.iter().map(QueryNode::to_json).collect::<Vec<_>>() }),
            QueryNode::Or(children) => json!({ "or": children.iter().map(QueryNode::to_json).collect::<Vec<_>>() }),
        }
    }
}

fn parse_children(value: &Value, path: &str) -> Result<Vec<QueryNode>, QueryShapeError> {
    let children = value
        .as_array()
        .ok_or_else(|| QueryShapeError::new(path, "expected an array of filters"))?;

    children
        .iter()
        .enumerate()
        .map(|(index, child)| parse_node(child, &format!("{path}[{index}]")))
        .collect()
}

fn parse_node(value: &Value, path: &str) -> Result<QueryNode, QueryShapeError> {
    let map = value
        .as_object()
        .ok_or_else(|| QueryShapeError::new(path, "expected an object"))?;

    for compound in ["and", "or"] {
        if let Some(children) = map.get(compound) {
            if map.len() != 1 {
                return Err(QueryShapeError::new(
                    path,
                    format!("'{compound}' cannot be combined with other keys"),
                ));
            }

            let children = parse_children(children, &format!("{path}.{compound}"))?;
            return Ok(if compound == "and" {
                QueryNode::And(children)
            } else {
                QueryNode::Or(children)
            });
        }
    }

    let property = map
        .get("property")
        .ok_or_else(|| QueryShapeError::new(path, "expected 'property', 'and' or 'or'"))?
        .as_str()
        .ok_or_else(|| QueryShapeError::new(format!("{path}.property"), "expected a string"))?;

    let mut groups = map.iter().filter(|(key, _)| *key != "property" && *key != "type");

    match (groups.next(), groups.next()) {
        (Some((group, operand)), None) => Ok(QueryNode::leaf(property, group.clone(), operand.clone())),
        (None, _) => Err(QueryShapeError::new(path, "expected an operator group")),
        (Some(_), Some(_)) => Err(QueryShapeError::new(path, "expected exactly one operator group")),
    }
}

/// Helper for constructing filter nodes.
pub struct Filter;

impl Filter {
    /// A leaf with an arbitrary operand.
    pub fn leaf(property: impl Into<String>, group: impl Into<String>, operand: Value) -> QueryNode {
        QueryNode::leaf(property, group, operand)
    }

    /// A leaf with a single operator: `{ "<group>": { "<op>": value } }`.
    pub fn op(
        property: impl Into<String>,
        group: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> QueryNode {
        let mut operand = Map::new();
        operand.insert(op.to_string(), value.into());
        QueryNode::leaf(property, group, Value::Object(operand))
    }

    pub fn and(nodes: impl IntoIterator<Item = QueryNode>) -> QueryNode {
        QueryNode::And(nodes.into_iter().collect())
    }

    pub fn or(nodes: impl IntoIterator<Item = QueryNode>) -> QueryNode {
        QueryNode::Or(nodes.into_iter().collect())
    }
}

/// Sort direction as submitted by the client.
///
/// Anything other than the two accepted values is kept verbatim so the
/// validator can report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
    Other(String),
}

impl SortDirection {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ascending" => SortDirection::Ascending,
            "descending" => SortDirection::Descending,
            other => SortDirection::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
            SortDirection::Other(raw) => raw,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sort orders by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortTarget {
    Property(String),
    /// A page timestamp (`created_time`, `last_edited_time`).
    Timestamp(String),
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub target: SortTarget,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn property(name: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            target: SortTarget::Property(name.into()),
            direction,
        }
    }

    pub fn timestamp(name: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            target: SortTarget::Timestamp(name.into()),
            direction,
        }
    }

    /// Parses a client sort list. `null` is an empty list.
    pub fn list_from_json(value: &Value) -> Result<Vec<SortSpec>, QueryShapeError> {
        let sorts = match value {
            Value::Null => return Ok(Vec::new()),
            Value::Array(sorts) => sorts,
            _ => return Err(QueryShapeError::new("sorts", "expected an array")),
        };

        sorts
            .iter()
            .enumerate()
            .map(|(index, sort)| SortSpec::from_json(sort, &format!("sorts[{index}]")))
            .collect()
    }

    fn from_json(value: &Value, path: &str) -> Result<SortSpec, QueryShapeError> {
        let map = value
            .as_object()
            .ok_or_else(|| QueryShapeError::new(path, "expected an object"))?;

        let target = match (text_field(map, path, "property")?, text_field(map, path, "timestamp")?) {
            (Some(property), None) => SortTarget::Property(property.to_string()),
            (None, Some(timestamp)) => SortTarget::Timestamp(timestamp.to_string()),
            (Some(_), Some(_)) => {
                return Err(QueryShapeError::new(path, "'property' and 'timestamp' are exclusive"));
            }
            (None, None) => return Err(QueryShapeError::new(path, "expected 'property' or 'timestamp'")),
        };

        // A missing direction is kept as an empty value and reported by the validator.
        let direction = SortDirection::parse(text_field(map, path, "direction")?.unwrap_or_default());

        Ok(SortSpec { target, direction })
    }

    pub fn to_json(&self) -> Value {
        match &self.target {
            SortTarget::Property(name) => json!({ "property": name, "direction": self.direction.as_str() }),
            SortTarget::Timestamp(name) => json!({ "timestamp": name, "direction": self.direction.as_str() }),
        }
    }
}

fn text_field<'a>(map: &'a Map<String, Value>, path: &str, key: &str) -> Result<Option<&'a str>, QueryShapeError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(QueryShapeError::new(format!("{path}.{key}"), "expected a string")),
    }
}

/// A complete client query: filter, sorts and an optional title override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub filter: Option<QueryNode>,
    pub sorts: Vec<SortSpec>,
    /// Property to treat as the title instead of the schema's title property.
    pub title_property: Option<String>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: QueryNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_title_property(mut self, name: impl Into<String>) -> Self {
        self.title_property = Some(name.into());
        self
    }

    /// Parses `{ "filter": ..., "sorts": [...], "title_property": "..." }`.
    pub fn from_json(value: &Value) -> Result<Self, QueryShapeError> {
        let map = value
            .as_object()
            .ok_or_else(|| QueryShapeError::new("query", "expected an object"))?;

        let filter = match map.get("filter") {
            None | Some(Value::Null) => None,
            Some(filter) => Some(QueryNode::from_json(filter)?),
        };
        let sorts = SortSpec::list_from_json(map.get("sorts").unwrap_or(&Value::Null))?;
        let title_property = match map.get("title_property") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(QueryShapeError::new("title_property", "expected a string")),
        };

        Ok(Self { filter, sorts, title_property })
    }
}

/// Walks a [`QueryNode`] tree while tracking the textual path of each node.
pub trait QueryVisitor {
    type Output;

    fn visit_leaf(&mut self, property: &str, group: &str, operand: &Value, path: &str) -> Self::Output;
    fn visit_and(&mut self, children: &[QueryNode], path: &str) -> Self::Output;
    fn visit_or(&mut self, children: &[QueryNode], path: &str) -> Self::Output;

    fn visit_node(&mut self, node: &QueryNode, path: &str) -> Self::Output {
        match node {
            QueryNode::Leaf { property, group, operand } => self.visit_leaf(property, group, operand, path),
            QueryNode::And(children) => self.visit_and(children, path),
            QueryNode::Or(children) => self.visit_or(children, path),
        }
    }
}

/// Path of the `index`-th child of a compound node at `path`.
pub fn child_path(path: &str, compound: &str, index: usize) -> String {
    format!("{path}.{compound}[{index}]")
}
