//! Bidirectional codecs between domain values and backend property shapes.
//!
//! Each recognised [`PropertyKind`] has one stateless codec implementing
//! [`FieldCodec`]. Codecs are pure: `decode` either returns a domain value or a
//! [`DecodeError`] describing why the shape is malformed, and `encode` always
//! produces a complete property value object (absent values become an explicit
//! `null`, never a missing key).
//!
//! A few codecs are intentionally lossy:
//!
//! - [`TitleCodec`] / [`RichTextCodec`] collapse several text runs into one.
//! - [`FilesCodec`] replaces display names with positional `file-<n>` names.
//! - [`DateCodec`] keeps only the start of a range and drops the time zone.
//! - [`NumberCodec`] / [`FormulaNumberCodec`] write non-finite values (NaN,
//!   infinities) as `null`, which decodes back to `None`.
//!
//! [`DynFieldCodec`] erases the domain type so codecs of different kinds can be
//! stored side by side in a mapping table.

use std::fmt::Debug;

use chrono::{DateTime, NaiveDate};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{error::DecodeError, schema::PropertyKind};

/// A pure transform between one domain value type and one property shape.
pub trait FieldCodec: Send + Sync + Debug + 'static {
    /// Domain-side representation.
    type Value: Serialize + DeserializeOwned + Send + Sync;

    /// The property kind this codec reads and writes.
    fn kind(&self) -> PropertyKind;

    /// Decodes a property value object.
    fn decode(&self, source: &Value) -> Result<Self::Value, DecodeError>;

    /// Encodes a domain value into a property value object.
    fn encode(&self, value: &Self::Value) -> Value;
}

/// Type-erased codec operating on JSON on both sides.
///
/// Implemented for every [`FieldCodec`]; the domain value is carried as its
/// serde JSON form.
pub trait DynFieldCodec: Send + Sync + Debug {
    fn kind(&self) -> PropertyKind;
    fn decode_json(&self, source: &Value) -> Result<Value, DecodeError>;
    fn encode_json(&self, value: Value) -> Result<Value, serde_json::Error>;
}

impl<C: FieldCodec> DynFieldCodec for C {
    fn kind(&self) -> PropertyKind {
        FieldCodec::kind(self)
    }

    fn decode_json(&self, source: &Value) -> Result<Value, DecodeError> {
        let value = self.decode(source)?;

        serde_json::to_value(value).map_err(|e| DecodeError::InvalidValue {
            at: FieldCodec::kind(self).to_string(),
            reason: e.to_string(),
        })
    }

    fn encode_json(&self, value: Value) -> Result<Value, serde_json::Error> {
        let value: C::Value = serde_json::from_value(value)?;
        Ok(self.encode(&value))
    }
}

/// Returns the codec for a recognised kind, or `None` for unrecognised kinds.
pub fn codec_for(kind: &PropertyKind) -> Option<Box<dyn DynFieldCodec>> {
    Some(match kind {
        PropertyKind::Title => Box::new(TitleCodec),
        PropertyKind::RichText => Box::new(RichTextCodec),
        PropertyKind::Select => Box::new(SelectCodec),
        PropertyKind::MultiSelect => Box::new(MultiSelectCodec),
        PropertyKind::Status => Box::new(StatusCodec),
        PropertyKind::Url => Box::new(UrlCodec),
        PropertyKind::Email => Box::new(EmailCodec),
        PropertyKind::Files => Box::new(FilesCodec),
        PropertyKind::People => Box::new(PeopleCodec),
        PropertyKind::Relation => Box::new(RelationCodec),
        PropertyKind::Date => Box::new(DateCodec),
        PropertyKind::Number => Box::new(NumberCodec),
        PropertyKind::Checkbox => Box::new(CheckboxCodec),
        PropertyKind::FormulaNumber => Box::new(FormulaNumberCodec),
        PropertyKind::Unrecognized(_) => return None,
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn wrong_type(at: impl Into<String>, expected: &'static str, found: &Value) -> DecodeError {
    DecodeError::WrongType {
        at: at.into(),
        expected,
        found: json_type(found),
    }
}

fn key<'a>(shape: &'a Value, key: &str) -> Result<&'a Value, DecodeError> {
    match shape {
        Value::Object(map) => map.get(key).ok_or_else(|| DecodeError::MissingKey(key.to_string())),
        other => Err(wrong_type("$", "object", other)),
    }
}

fn array<'a>(value: &'a Value, at: &str) -> Result<&'a Vec<Value>, DecodeError> {
    value.as_array().ok_or_else(|| wrong_type(at, "array", value))
}

fn string<'a>(value: &'a Value, at: &str) -> Result<&'a str, DecodeError> {
    value.as_str().ok_or_else(|| wrong_type(at, "string", value))
}

fn nullable_string(value: &Value, at: &str) -> Result<Option<String>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(wrong_type(at, "string or null", other)),
    }
}

fn nullable_number(value: &Value, at: &str) -> Result<Option<f64>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| DecodeError::InvalidValue {
            at: at.to_string(),
            reason: "number is not representable as f64".to_string(),
        }),
        other => Err(wrong_type(at, "number or null", other)),
    }
}

fn decode_runs(source: &Value, field: &str) -> Result<String, DecodeError> {
    let runs = array(key(source, field)?, field)?;
    let mut text = String::new();

    for (index, run) in runs.iter().enumerate() {
        let at = format!("{field}[{index}]");

        if let Some(plain) = run.get("plain_text") {
            text.push_str(string(plain, &format!("{at}.plain_text"))?);
            continue;
        }

        let content = run
            .get("text")
            .and_then(|t| t.get("content"))
            .ok_or_else(|| DecodeError::MissingKey(format!("{at}.plain_text")))?;
        text.push_str(string(content, &format!("{at}.text.content"))?);
    }

    Ok(text)
}

fn encode_runs(field: &str, text: &str) -> Value {
    json!({
        field: [
            { "type": "text", "text": { "content": text } }
        ]
    })
}

/// `title` properties as a single string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleCodec;

impl FieldCodec for TitleCodec {
    type Value = String;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Title
    }

    fn decode(&self, source: &Value) -> Result<String, DecodeError> {
        decode_runs(source, "title")
    }

    fn encode(&self, value: &String) -> Value {
        encode_runs("title", value)
    }
}

/// `rich_text` properties as a single plain string.
#[derive(Debug, Clone, Copy, Default)]
pub struct RichTextCodec;

impl FieldCodec for RichTextCodec {
    type Value = String;

    fn kind(&self) -> PropertyKind {
        PropertyKind::RichText
    }

    fn decode(&self, source: &Value) -> Result<String, DecodeError> {
        decode_runs(source, "rich_text")
    }

    fn encode(&self, value: &String) -> Value {
        encode_runs("rich_text", value)
    }
}

fn decode_option_name(source: &Value, field: &str) -> Result<Option<String>, DecodeError> {
    match key(source, field)? {
        Value::Null => Ok(None),
        option @ Value::Object(_) => Ok(Some(string(key(option, "name")?, &format!("{field}.name"))?.to_string())),
        other => Err(wrong_type(field, "object or null", other)),
    }
}

fn encode_option_name(field: &str, value: &Option<String>) -> Value {
    match value {
        Some(name) => json!({ field: { "name": name } }),
        None => json!({ field: null }),
    }
}

/// `select` properties as the chosen option name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectCodec;

impl FieldCodec for SelectCodec {
    type Value = Option<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Select
    }

    fn decode(&self, source: &Value) -> Result<Option<String>, DecodeError> {
        decode_option_name(source, "select")
    }

    fn encode(&self, value: &Option<String>) -> Value {
        encode_option_name("select", value)
    }
}

/// `status` properties as the current status name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCodec;

impl FieldCodec for StatusCodec {
    type Value = Option<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Status
    }

    fn decode(&self, source: &Value) -> Result<Option<String>, DecodeError> {
        decode_option_name(source, "status")
    }

    fn encode(&self, value: &Option<String>) -> Value {
        encode_option_name("status", value)
    }
}

/// `multi_select` properties as the list of option names.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiSelectCodec;

impl FieldCodec for MultiSelectCodec {
    type Value = Vec<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::MultiSelect
    }

    fn decode(&self, source: &Value) -> Result<Vec<String>, DecodeError> {
        array(key(source, "multi_select")?, "multi_select")?
            .iter()
            .enumerate()
            .map(|(index, option)| {
                let at = format!("multi_select[{index}].name");
                let name = option.get("name").ok_or_else(|| DecodeError::MissingKey(at.clone()))?;
                Ok(string(name, &at)?.to_string())
            })
            .collect()
    }

    fn encode(&self, value: &Vec<String>) -> Value {
        json!({
            "multi_select": value
                .iter()
                .map(|name| json!({ "name": name }))
                .collect::<Vec<_>>()
        })
    }
}

/// `url` properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlCodec;

impl FieldCodec for UrlCodec {
    type Value = Option<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Url
    }

    fn decode(&self, source: &Value) -> Result<Option<String>, DecodeError> {
        nullable_string(key(source, "url")?, "url")
    }

    fn encode(&self, value: &Option<String>) -> Value {
        json!({ "url": value })
    }
}

/// `email` properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailCodec;

impl FieldCodec for EmailCodec {
    type Value = Option<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Email
    }

    fn decode(&self, source: &Value) -> Result<Option<String>, DecodeError> {
        nullable_string(key(source, "email")?, "email")
    }

    fn encode(&self, value: &Option<String>) -> Value {
        json!({ "email": value })
    }
}

/// `files` properties as a list of URLs.
///
/// Display names are not modelled: encoding names each entry `file-<n>`
/// (1-based), whatever the original name was.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesCodec;

impl FieldCodec for FilesCodec {
    type Value = Vec<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Files
    }

    fn decode(&self, source: &Value) -> Result<Vec<String>, DecodeError> {
        let files = array(key(source, "files")?, "files")?;
        let mut urls = Vec::with_capacity(files.len());

        for (index, file) in files.iter().enumerate() {
            let at = format!("files[{index}]");
            let hosting = match file.get("type").and_then(Value::as_str) {
                Some(hosting) => hosting,
                None if file.get("external").is_some() => "external",
                None => "file",
            };
            let url = file
                .get(hosting)
                .and_then(|h| h.get("url"))
                .ok_or_else(|| DecodeError::MissingKey(format!("{at}.{hosting}.url")))?;

            urls.push(string(url, &format!("{at}.{hosting}.url"))?.to_string());
        }

        Ok(urls)
    }

    fn encode(&self, value: &Vec<String>) -> Value {
        json!({
            "files": value
                .iter()
                .enumerate()
                .map(|(index, url)| json!({
                    "name": format!("file-{}", index + 1),
                    "type": "external",
                    "external": { "url": url },
                }))
                .collect::<Vec<_>>()
        })
    }
}

fn decode_ids(source: &Value, field: &str) -> Result<Vec<String>, DecodeError> {
    array(key(source, field)?, field)?
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let at = format!("{field}[{index}].id");
            let id = reference.get("id").ok_or_else(|| DecodeError::MissingKey(at.clone()))?;
            Ok(string(id, &at)?.to_string())
        })
        .collect()
}

/// `people` properties as user identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeopleCodec;

impl FieldCodec for PeopleCodec {
    type Value = Vec<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::People
    }

    fn decode(&self, source: &Value) -> Result<Vec<String>, DecodeError> {
        decode_ids(source, "people")
    }

    fn encode(&self, value: &Vec<String>) -> Value {
        json!({
            "people": value
                .iter()
                .map(|id| json!({ "object": "user", "id": id }))
                .collect::<Vec<_>>()
        })
    }
}

/// `relation` properties as related page identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationCodec;

impl FieldCodec for RelationCodec {
    type Value = Vec<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Relation
    }

    fn decode(&self, source: &Value) -> Result<Vec<String>, DecodeError> {
        decode_ids(source, "relation")
    }

    fn encode(&self, value: &Vec<String>) -> Value {
        json!({
            "relation": value
                .iter()
                .map(|id| json!({ "id": id }))
                .collect::<Vec<_>>()
        })
    }
}

/// Accepts RFC 3339 instants and `YYYY-MM-DD` calendar dates.
fn is_iso_date(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok() || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

/// `date` properties as the ISO-8601 start of the range.
///
/// `end` and `time_zone` are dropped on decode and never written.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateCodec;

impl FieldCodec for DateCodec {
    type Value = Option<String>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Date
    }

    fn decode(&self, source: &Value) -> Result<Option<String>, DecodeError> {
        let date = match key(source, "date")? {
            Value::Null => return Ok(None),
            date @ Value::Object(_) => date,
            other => return Err(wrong_type("date", "object or null", other)),
        };

        let Some(start) = nullable_string(key(date, "start")?, "date.start")? else {
            return Ok(None);
        };

        if !is_iso_date(&start) {
            return Err(DecodeError::InvalidValue {
                at: "date.start".to_string(),
                reason: format!("'{start}' is not an ISO-8601 date"),
            });
        }

        Ok(Some(start))
    }

    fn encode(&self, value: &Option<String>) -> Value {
        match value {
            Some(start) => json!({ "date": { "start": start } }),
            None => json!({ "date": null }),
        }
    }
}

/// `number` properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberCodec;

impl FieldCodec for NumberCodec {
    type Value = Option<f64>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Number
    }

    fn decode(&self, source: &Value) -> Result<Option<f64>, DecodeError> {
        nullable_number(key(source, "number")?, "number")
    }

    fn encode(&self, value: &Option<f64>) -> Value {
        json!({ "number": value })
    }
}

/// Numeric `formula` results.
///
/// The backend computes these; an encoded value is accepted syntactically but
/// has no effect when written.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaNumberCodec;

impl FieldCodec for FormulaNumberCodec {
    type Value = Option<f64>;

    fn kind(&self) -> PropertyKind {
        PropertyKind::FormulaNumber
    }

    fn decode(&self, source: &Value) -> Result<Option<f64>, DecodeError> {
        let formula = key(source, "formula")?;

        if let Some(result) = formula.get("type") {
            let result = string(result, "formula.type")?;
            if result != "number" {
                return Err(DecodeError::InvalidValue {
                    at: "formula.type".to_string(),
                    reason: format!("expected a number result, found '{result}'"),
                });
            }
        }

        nullable_number(key(formula, "number")?, "formula.number")
    }

    fn encode(&self, value: &Option<f64>) -> Value {
        json!({ "formula": { "type": "number", "number": value } })
    }
}

/// `checkbox` properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckboxCodec;

impl FieldCodec for CheckboxCodec {
    type Value = bool;

    fn kind(&self) -> PropertyKind {
        PropertyKind::Checkbox
    }

    fn decode(&self, source: &Value) -> Result<bool, DecodeError> {
        let checked = key(source, "checkbox")?;
        checked.as_bool().ok_or_else(|| wrong_type("checkbox", "boolean", checked))
    }

    fn encode(&self, value: &bool) -> Value {
        json!({ "checkbox": value })
    }
}
