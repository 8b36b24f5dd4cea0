//! Convenient re-exports of commonly used types from proplayer.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use proplayer::prelude::*;
//! ```

pub use proplayer_core::{
    cache::{CachedSchema, SchemaCache, SchemaCacheBuilder, SchemaCacheConfig},
    codec::{
        CheckboxCodec, DateCodec, DynFieldCodec, EmailCodec, FieldCodec, FilesCodec, FormulaNumberCodec,
        MultiSelectCodec, NumberCodec, PeopleCodec, RelationCodec, RichTextCodec, SelectCodec, StatusCodec,
        TitleCodec, UrlCodec, codec_for,
    },
    error::{DomainError, DomainResult, SourceResult, TransportError, map_status},
    mapping::{DecodedEntity, DomainFieldMapping, Entity, SystemFields},
    query::{Filter, QueryNode, QueryRequest, QueryVisitor, SortDirection, SortSpec, SortTarget},
    repository::{EntityRepository, QueryHit, QueryResult},
    schema::{NormalizedSchema, PropertyDescriptor, PropertyKind, RawSchema, normalize},
    source::{PageSource, QueryPayload, SchemaSource, SourcePage},
    validate::{QueryValidator, validate, validate_request},
};
