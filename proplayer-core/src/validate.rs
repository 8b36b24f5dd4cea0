//! Static validation of client queries against a normalized schema.
//!
//! The validator checks every property reference and operator group in a
//! filter tree, every sort criterion and the optional title override. It never
//! stops at the first problem: all violations are collected, in tree order, so
//! a client gets the complete list from one round trip. An empty list means the
//! query can be forwarded.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    query::{QueryNode, QueryRequest, QueryVisitor, SortDirection, SortSpec, SortTarget, child_path},
    schema::{NormalizedSchema, PropertyKind},
};

/// Page timestamps that can be sorted on.
pub const SORTABLE_TIMESTAMPS: [&str; 2] = ["created_time", "last_edited_time"];

/// The operator group a filter on `kind` must use, or `None` if the kind
/// cannot be filtered.
pub fn expected_group(kind: &PropertyKind) -> Option<&'static str> {
    Some(match kind {
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
        PropertyKind::FormulaNumber => "number",
        PropertyKind::Unrecognized(_) => return None,
    })
}

/// Validates queries against one schema snapshot.
pub struct QueryValidator<'a> {
    kinds: HashMap<&'a str, &'a PropertyKind>,
    violations: Vec<String>,
}

impl<'a> QueryValidator<'a> {
    pub fn new(schema: &'a NormalizedSchema) -> Self {
        let mut kinds = HashMap::with_capacity(schema.properties.len());
        for property in &schema.properties {
            // Same lookup rule as `NormalizedSchema::property`: first match wins.
            kinds.entry(property.name.as_str()).or_insert(&property.kind);
        }

        Self {
            kinds,
            violations: Vec::new(),
        }
    }

    /// Validates a filter tree rooted at `filter`.
    pub fn check_filter(&mut self, filter: &QueryNode) -> &mut Self {
        self.visit_node(filter, "filter");
        self
    }

    pub fn check_sorts(&mut self, sorts: &[SortSpec]) -> &mut Self {
        for (index, sort) in sorts.iter().enumerate() {
            match &sort.target {
                SortTarget::Property(name) => {
                    if !self.kinds.contains_key(name.as_str()) {
                        self.violations
                            .push(format!("Unknown sort property: {name} at sorts[{index}].property"));
                    }
                }
                SortTarget::Timestamp(name) => {
                    if !SORTABLE_TIMESTAMPS.contains(&name.as_str()) {
                        self.violations
                            .push(format!("Unknown sort timestamp: {name} at sorts[{index}].timestamp"));
                    }
                }
            }

            if let SortDirection::Other(direction) = &sort.direction {
                self.violations.push(format!(
                    "Invalid sort direction '{direction}' at sorts[{index}].direction. Expected 'ascending' or 'descending'"
                ));
            }
        }
        self
    }

    pub fn check_title_property(&mut self, name: &str) -> &mut Self {
        if !self.kinds.contains_key(name) {
            self.violations
                .push(format!("Unknown title property: {name} at title_property"));
        }
        self
    }

    pub fn finish(self) -> Vec<String> {
        self.violations
    }

    fn visit_children(&mut self, compound: &str, children: &[QueryNode], path: &str) {
        for (index, child) in children.iter().enumerate() {
            self.visit_node(child, &child_path(path, compound, index));
        }
    }
}

impl QueryVisitor for QueryValidator<'_> {
    type Output = ();

    fn visit_leaf(&mut self, property: &str, group: &str, _operand: &Value, path: &str) {
        let Some(kind) = self.kinds.get(property).copied() else {
            self.violations
                .push(format!("Unknown filter property: {property} at {path}"));
            return;
        };

        match expected_group(kind) {
            None => self.violations.push(format!(
                "Property '{property}' (kind '{kind}') does not support filtering. at {path}"
            )),
            Some(expected) if expected != group => self.violations.push(format!(
                "Invalid operator group '{group}' for property '{property}' (kind '{kind}'). Expected '{expected}'. at {path}"
            )),
            Some(_) => {}
        }
    }

    fn visit_and(&mut self, children: &[QueryNode], path: &str) {
        self.visit_children("and", children, path);
    }

    fn visit_or(&mut self, children: &[QueryNode], path: &str) {
        self.visit_children("or", children, path);
    }
}

/// Validates a filter and sort list; returns every violation found.
pub fn validate(filter: Option<&QueryNode>, sorts: &[SortSpec], schema: &NormalizedSchema) -> Vec<String> {
    let mut validator = QueryValidator::new(schema);

    if let Some(filter) = filter {
        validator.check_filter(filter);
    }
    validator.check_sorts(sorts);
    validator.finish()
}

/// Validates a full request, including its title override.
pub fn validate_request(request: &QueryRequest, schema: &NormalizedSchema) -> Vec<String> {
    let mut validator = QueryValidator::new(schema);

    if let Some(filter) = &request.filter {
        validator.check_filter(filter);
    }
    validator.check_sorts(&request.sorts);
    if let Some(title) = &request.title_property {
        validator.check_title_property(title);
    }
    validator.finish()
}
