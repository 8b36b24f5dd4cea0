//! Binding of domain entity fields to backend properties.
//!
//! A [`DomainFieldMapping`] is built once per entity type and maps every
//! logical field of the entity to a source property name and a codec. It is
//! checked for completeness when it is built, so a mapping that exists is
//! always usable.
//!
//! # Example
//!
//! ```ignore
//! use proplayer::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Task {
//!     pub title: Option<String>,
//!     pub tags: Option<Vec<String>>,
//! }
//!
//! impl Entity for Task {
//!     fn entity_name() -> &'static str { "task" }
//!     fn field_names() -> &'static [&'static str] { &["title", "tags"] }
//! }
//!
//! let mapping = DomainFieldMapping::<Task>::builder()
//!     .field("title", "Name", TitleCodec)
//!     .field("tags", "Tags", MultiSelectCodec)
//!     .build()?;
//! ```

use std::{collections::HashSet, marker::PhantomData};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    codec::{DynFieldCodec, FieldCodec},
    error::{DecodeError, DomainError, DomainResult, MappingError},
    schema::NormalizedSchema,
    source::SourcePage,
};

/// A domain entity decoded from backend pages.
///
/// Every field listed in [`Entity::field_names`] must tolerate being absent
/// (an `Option` or `#[serde(default)]`), because a field whose source property
/// is malformed is left out instead of failing the whole decode.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Name used in logs and error messages.
    fn entity_name() -> &'static str;

    /// The logical field names that must be mapped.
    fn field_names() -> &'static [&'static str];
}

/// System fields transcribed from the page envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFields {
    pub id: Uuid,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    pub created_by: String,
    pub last_edited_by: String,
}

impl From<&SourcePage> for SystemFields {
    fn from(page: &SourcePage) -> Self {
        Self {
            id: page.id,
            created_time: page.created_time,
            last_edited_time: page.last_edited_time,
            created_by: page.created_by.id.clone(),
            last_edited_by: page.last_edited_by.id.clone(),
        }
    }
}

/// An entity produced by [`DomainFieldMapping::from_source_page`].
#[derive(Debug, Clone)]
pub struct DecodedEntity<E> {
    pub system: SystemFields,
    pub entity: E,
    /// One entry per field that could not be decoded.
    pub warnings: Vec<String>,
}

impl<E> DecodedEntity<E> {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// One logical field bound to a source property.
#[derive(Debug)]
pub struct FieldBinding {
    logical: &'static str,
    property: String,
    codec: Box<dyn DynFieldCodec>,
}

impl FieldBinding {
    pub fn logical(&self) -> &'static str {
        self.logical
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn codec(&self) -> &dyn DynFieldCodec {
        self.codec.as_ref()
    }
}

/// Maps the logical fields of `E` to backend properties.
#[derive(Debug)]
pub struct DomainFieldMapping<E: Entity> {
    bindings: Vec<FieldBinding>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> DomainFieldMapping<E> {
    pub fn builder() -> DomainFieldMappingBuilder<E> {
        DomainFieldMappingBuilder::new()
    }

    pub fn bindings(&self) -> &[FieldBinding] {
        &self.bindings
    }

    pub fn binding(&self, logical: &str) -> Option<&FieldBinding> {
        self.bindings.iter().find(|b| b.logical == logical)
    }

    /// The source property a logical field is stored in.
    pub fn property_name(&self, logical: &str) -> Option<&str> {
        self.binding(logical).map(FieldBinding::property)
    }

    /// Encodes the fields present in `patch` into a source property bag.
    ///
    /// `patch` must serialize to an object keyed by logical field names. Keys
    /// that are absent or `null` are not provided and produce nothing; an empty
    /// collection is provided and encodes to an explicit empty shape. Fields
    /// backed by read-only kinds are skipped.
    pub fn to_source_properties<P: Serialize>(&self, patch: &P) -> Result<Map<String, Value>, MappingError> {
        let patch = match serde_json::to_value(patch) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(MappingError::Encode {
                    field: "<patch>".to_string(),
                    reason: "patch must serialize to an object".to_string(),
                });
            }
            Err(e) => {
                return Err(MappingError::Encode {
                    field: "<patch>".to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let mut properties = Map::new();

        for (logical, value) in patch {
            if value.is_null() {
                continue;
            }

            let binding = self.binding(&logical).ok_or_else(|| MappingError::UnknownField {
                entity: E::entity_name(),
                field: logical.clone(),
            })?;

            if binding.codec.kind().is_read_only() {
                tracing::debug!(
                    entity = E::entity_name(),
                    field = binding.logical,
                    "skipping read-only field on encode"
                );
                continue;
            }

            let encoded = binding
                .codec
                .encode_json(value)
                .map_err(|e| MappingError::Encode {
                    field: logical.clone(),
                    reason: e.to_string(),
                })?;

            properties.insert(binding.property.clone(), encoded);
        }

        Ok(properties)
    }

    /// Decodes a source page into an entity.
    ///
    /// Each mapped field is decoded independently. A field that fails to decode
    /// is left out and reported as `"<logical> (<property>): <reason>"` in
    /// `warnings`; the remaining fields are unaffected. Failing to assemble `E`
    /// from the decoded fields is a hard error.
    pub fn from_source_page(&self, page: &SourcePage) -> DomainResult<DecodedEntity<E>> {
        let (fields, warnings) = self.decode_fields(&page.properties);

        if !warnings.is_empty() {
            tracing::debug!(
                entity = E::entity_name(),
                page_id = %page.id,
                warnings = warnings.len(),
                "decoded entity with warnings"
            );
        }

        let entity = serde_json::from_value(Value::Object(fields)).map_err(|e| {
            DomainError::internal(format!(
                "cannot assemble {} from page {}: {e}",
                E::entity_name(),
                page.id
            ))
        })?;

        Ok(DecodedEntity {
            system: SystemFields::from(page),
            entity,
            warnings,
        })
    }

    /// Decodes the mapped fields of a property bag into a logical-name keyed object.
    pub fn decode_fields(&self, properties: &Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
        let mut fields = Map::new();
        let mut warnings = Vec::new();

        for binding in &self.bindings {
            let decoded = match properties.get(&binding.property) {
                Some(source) => binding.codec.decode_json(source),
                None => Err(DecodeError::Missing),
            };

            match decoded {
                Ok(value) => {
                    fields.insert(binding.logical.to_string(), value);
                }
                Err(reason) => {
                    warnings.push(format!("{} ({}): {}", binding.logical, binding.property, reason));
                }
            }
        }

        (fields, warnings)
    }

    /// Reports mapped properties that are missing from `schema` or whose kind
    /// no longer matches the codec.
    pub fn check_schema(&self, schema: &NormalizedSchema) -> Vec<String> {
        self.bindings
            .iter()
            .filter_map(|binding| {
                let expected = binding.codec.kind();

                match schema.kind_of(&binding.property) {
                    None => Some(format!(
                        "{} ({}): property is missing from database {}",
                        binding.logical, binding.property, schema.database_id
                    )),
                    Some(actual) if *actual != expected => Some(format!(
                        "{} ({}): expected kind '{}', database has '{}'",
                        binding.logical, binding.property, expected, actual
                    )),
                    Some(_) => None,
                }
            })
            .collect()
    }
}

/// Builder for [`DomainFieldMapping`].
pub struct DomainFieldMappingBuilder<E: Entity> {
    bindings: Vec<(String, String, Box<dyn DynFieldCodec>)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> DomainFieldMappingBuilder<E> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Binds `logical` to the source property `property` using `codec`.
    pub fn field<C: FieldCodec>(self, logical: impl Into<String>, property: impl Into<String>, codec: C) -> Self {
        self.field_dyn(logical, property, Box::new(codec))
    }

    /// Like [`field`](Self::field) with an already type-erased codec.
    pub fn field_dyn(
        mut self,
        logical: impl Into<String>,
        property: impl Into<String>,
        codec: Box<dyn DynFieldCodec>,
    ) -> Self {
        self.bindings.push((logical.into(), property.into(), codec));
        self
    }

    /// Validates the table against `E::field_names()` and builds the mapping.
    pub fn build(self) -> Result<DomainFieldMapping<E>, MappingError> {
        let fields = E::field_names();
        let mut seen = HashSet::new();
        let mut bindings = Vec::with_capacity(self.bindings.len());

        for (logical, property, codec) in self.bindings {
            let Some(name) = fields.iter().copied().find(|f| *f == logical) else {
                return Err(MappingError::UnknownField {
                    entity: E::entity_name(),
                    field: logical,
                });
            };

            if !seen.insert(name) {
                return Err(MappingError::DuplicateField {
                    entity: E::entity_name(),
                    field: logical,
                });
            }

            bindings.push(FieldBinding {
                logical: name,
                property,
                codec,
            });
        }

        let missing: Vec<String> = fields
            .iter()
            .filter(|f| !seen.contains(*f))
            .map(|f| f.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(MappingError::Incomplete {
                entity: E::entity_name(),
                fields: missing,
            });
        }

        Ok(DomainFieldMapping {
            bindings,
            _entity: PhantomData,
        })
    }
}

impl<E: Entity> Default for DomainFieldMappingBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
