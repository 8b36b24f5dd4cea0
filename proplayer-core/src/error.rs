//! Error taxonomy and result types for property layer operations.
//!
//! Every failure that leaves this crate is a [`DomainError`]. Transport failures
//! reported by a backend collaborator are described by [`TransportError`] and
//! folded into the taxonomy through [`map_status`] / [`TransportError::into_domain`].
//! The remaining error types in this module are local: they describe why a codec,
//! a mapping table or a dynamic query could not be processed and are surfaced as
//! warnings or violation strings rather than propagated directly.

use thiserror::Error;

/// The closed set of failures a caller of the property layer can observe.
///
/// Values are only produced by the constructors in this module. The type is
/// `Clone` so a single failed upstream fetch can be handed to every waiter
/// that coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The backend rejected the integration credential.
    #[error("Invalid credential: {}", .cause.as_deref().unwrap_or("no detail"))]
    InvalidCredential { cause: Option<String> },
    /// The credential is valid but lacks access to the resource.
    #[error("Forbidden: {}", .cause.as_deref().unwrap_or("no detail"))]
    Forbidden { cause: Option<String> },
    /// The database or page does not exist or is not shared.
    #[error("Not found: {}", .cause.as_deref().unwrap_or("no detail"))]
    NotFound { cause: Option<String> },
    /// The request was malformed or failed validation.
    #[error("Bad request: {}", .cause.as_deref().unwrap_or("no detail"))]
    BadRequest { cause: Option<String> },
    /// The write conflicted with a concurrent change.
    #[error("Conflict: {}", .cause.as_deref().unwrap_or("no detail"))]
    Conflict { cause: Option<String> },
    /// The backend is throttling this client.
    #[error("Rate limited (retry after {}s): {}",
        .retry_after_seconds.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string()),
        .cause.as_deref().unwrap_or("no detail"))]
    RateLimited {
        retry_after_seconds: Option<u64>,
        cause: Option<String>,
    },
    /// The backend is temporarily unavailable.
    #[error("Service unavailable: {}", .cause.as_deref().unwrap_or("no detail"))]
    ServiceUnavailable { cause: Option<String> },
    /// Any other server-side or unexpected failure.
    #[error("Internal error: {cause}")]
    InternalError { cause: String },
    /// The backend call did not complete within its deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    RequestTimeout { timeout_ms: u64 },
}

/// A specialized `Result` type for property layer operations.
pub type DomainResult<T> = Result<T, DomainError>;

fn non_empty(body: &str) -> Option<String> {
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Maps a backend response status to a domain error.
///
/// Returns `None` for any status below 400. The function is total and performs
/// no I/O. An empty `body` is recorded as an absent cause.
pub fn map_status(status: u16, body: &str, retry_after_seconds: Option<u64>) -> Option<DomainError> {
    let cause = non_empty(body);

    match status {
        0..=399 => None,
        400 | 422 => Some(DomainError::BadRequest { cause }),
        401 => Some(DomainError::InvalidCredential { cause }),
        403 => Some(DomainError::Forbidden { cause }),
        404 => Some(DomainError::NotFound { cause }),
        409 => Some(DomainError::Conflict { cause }),
        429 => Some(DomainError::RateLimited { retry_after_seconds, cause }),
        503 => Some(DomainError::ServiceUnavailable { cause }),
        500.. => Some(DomainError::InternalError { cause: format!("{status}:{body}") }),
        // Remaining 4xx codes have no dedicated kind.
        _ => Some(DomainError::BadRequest { cause: Some(format!("{status}:{body}")) }),
    }
}

impl DomainError {
    /// Folds a list of validation violations into one composite `BadRequest`.
    ///
    /// Returns `None` when there is nothing to report.
    pub fn from_violations(violations: &[String]) -> Option<Self> {
        if violations.is_empty() {
            return None;
        }

        Some(DomainError::BadRequest {
            cause: Some(violations.join("; ")),
        })
    }

    /// An internal failure that did not originate from a backend status.
    pub fn internal(cause: impl Into<String>) -> Self {
        DomainError::InternalError { cause: cause.into() }
    }

    /// A call that exceeded its deadline.
    pub fn timeout(timeout_ms: u64) -> Self {
        DomainError::RequestTimeout { timeout_ms }
    }

    /// Stable snake_case tag for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidCredential { .. } => "invalid_credential",
            DomainError::Forbidden { .. } => "forbidden",
            DomainError::NotFound { .. } => "not_found",
            DomainError::BadRequest { .. } => "bad_request",
            DomainError::Conflict { .. } => "conflict",
            DomainError::RateLimited { .. } => "rate_limited",
            DomainError::ServiceUnavailable { .. } => "service_unavailable",
            DomainError::InternalError { .. } => "internal_error",
            DomainError::RequestTimeout { .. } => "request_timeout",
        }
    }

    /// The HTTP status a front end should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            DomainError::InvalidCredential { .. } => 401,
            DomainError::Forbidden { .. } => 403,
            DomainError::NotFound { .. } => 404,
            DomainError::BadRequest { .. } => 400,
            DomainError::Conflict { .. } => 409,
            DomainError::RateLimited { .. } => 429,
            DomainError::ServiceUnavailable { .. } => 503,
            DomainError::InternalError { .. } => 500,
            DomainError::RequestTimeout { .. } => 504,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::RateLimited { .. }
                | DomainError::ServiceUnavailable { .. }
                | DomainError::RequestTimeout { .. }
        )
    }

    /// Logs this error with its call-site tags and hands it back unchanged.
    ///
    /// ```ignore
    /// source.read_page(id).await.map_err(|e| e.into_domain().tap("read_page", "tasks"))?;
    /// ```
    pub fn tap(self, operation: &str, source: &str) -> Self {
        tracing::warn!(
            operation,
            source,
            code = self.code(),
            error = %self,
            "backend operation failed"
        );
        self
    }
}

/// A failure reported by a backend collaborator (network client).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The backend answered with a non-success status.
    #[error("Backend responded with status {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after_seconds: Option<u64>,
    },
    /// The collaborator gave up waiting for the backend.
    #[error("Backend call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// The backend could not be reached at all.
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type returned by backend collaborators.
pub type SourceResult<T> = Result<T, TransportError>;

impl TransportError {
    /// Shorthand for a status failure without a retry hint.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        TransportError::Status {
            status,
            body: body.into(),
            retry_after_seconds: None,
        }
    }

    /// Maps this transport failure into the domain taxonomy.
    pub fn into_domain(self) -> DomainError {
        match self {
            TransportError::Status { status, body, retry_after_seconds } => {
                map_status(status, &body, retry_after_seconds).unwrap_or_else(|| {
                    DomainError::internal(format!("unexpected failure with status {status}:{body}"))
                })
            }
            TransportError::Timeout { timeout_ms } => DomainError::timeout(timeout_ms),
            TransportError::Connection(cause) => DomainError::ServiceUnavailable { cause: Some(cause) },
        }
    }
}

impl From<TransportError> for DomainError {
    fn from(err: TransportError) -> Self {
        err.into_domain()
    }
}

/// Why a codec could not decode a source property.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The property is absent from the source bag.
    #[error("property is missing")]
    Missing,
    /// A required key is absent from the property shape.
    #[error("expected key '{0}'")]
    MissingKey(String),
    /// A value has the wrong JSON type.
    #[error("expected {expected} at '{at}', found {found}")]
    WrongType {
        at: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A value has the right type but is not acceptable.
    #[error("invalid value at '{at}': {reason}")]
    InvalidValue { at: String, reason: String },
}

/// Why a field mapping table could not be built or used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// A mapped logical name is not a field of the entity.
    #[error("Entity {entity} has no field named '{field}'")]
    UnknownField { entity: &'static str, field: String },
    /// The same logical name was mapped twice.
    #[error("Field '{field}' of entity {entity} is mapped more than once")]
    DuplicateField { entity: &'static str, field: String },
    /// An entity field has no mapping.
    #[error("Entity {entity} is missing mappings for: {}", .fields.join(", "))]
    Incomplete {
        entity: &'static str,
        fields: Vec<String>,
    },
    /// A patch could not be turned into source properties.
    #[error("Cannot encode field '{field}': {reason}")]
    Encode { field: String, reason: String },
}

/// A dynamic query payload whose JSON shape could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed query at {path}: {reason}")]
pub struct QueryShapeError {
    /// Textual path of the offending node (`filter.and[1]`, `sorts[0]`).
    pub path: String,
    /// What was wrong with the node.
    pub reason: String,
}

impl QueryShapeError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<MappingError> for DomainError {
    fn from(err: MappingError) -> Self {
        DomainError::BadRequest {
            cause: Some(err.to_string()),
        }
    }
}

impl From<QueryShapeError> for DomainError {
    fn from(err: QueryShapeError) -> Self {
        DomainError::BadRequest {
            cause: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_below_400_are_not_errors() {
        assert_eq!(map_status(200, "ok", None), None);
        assert_eq!(map_status(304, "", None), None);
    }

    #[test]
    fn client_statuses_map_to_their_kinds() {
        assert_eq!(
            map_status(400, "bad", None),
            Some(DomainError::BadRequest { cause: Some("bad".into()) })
        );
        assert_eq!(
            map_status(422, "unprocessable", None),
            Some(DomainError::BadRequest { cause: Some("unprocessable".into()) })
        );
        assert!(matches!(map_status(401, "x", None), Some(DomainError::InvalidCredential { .. })));
        assert!(matches!(map_status(403, "x", None), Some(DomainError::Forbidden { .. })));
        assert!(matches!(map_status(404, "x", None), Some(DomainError::NotFound { .. })));
        assert!(matches!(map_status(409, "x", None), Some(DomainError::Conflict { .. })));
    }

    #[test]
    fn service_unavailable_is_distinct_from_other_5xx() {
        assert!(matches!(
            map_status(503, "service unavailable", None),
            Some(DomainError::ServiceUnavailable { .. })
        ));
        assert_eq!(
            map_status(500, "x", None),
            Some(DomainError::InternalError { cause: "500:x".into() })
        );
        assert_eq!(
            map_status(502, "gateway", None),
            Some(DomainError::InternalError { cause: "502:gateway".into() })
        );
    }

    #[test]
    fn rate_limit_carries_retry_hint_and_drops_empty_body() {
        assert_eq!(
            map_status(429, "", Some(5)),
            Some(DomainError::RateLimited { retry_after_seconds: Some(5), cause: None })
        );
        assert_eq!(
            map_status(429, "slow down", None),
            Some(DomainError::RateLimited {
                retry_after_seconds: None,
                cause: Some("slow down".into()),
            })
        );
    }

    #[test]
    fn transport_errors_fold_into_taxonomy() {
        assert_eq!(TransportError::Timeout { timeout_ms: 250 }.into_domain(), DomainError::timeout(250));
        assert!(matches!(
            TransportError::Connection("refused".into()).into_domain(),
            DomainError::ServiceUnavailable { .. }
        ));
        assert!(matches!(
            TransportError::status(200, "odd").into_domain(),
            DomainError::InternalError { .. }
        ));
    }

    #[test]
    fn violations_become_one_bad_request() {
        assert_eq!(DomainError::from_violations(&[]), None);

        let err = DomainError::from_violations(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(err, DomainError::BadRequest { cause: Some("a; b".into()) });
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn local_errors_become_bad_requests() {
        let err = DomainError::from(MappingError::UnknownField {
            entity: "task",
            field: "colour".into(),
        });
        assert_eq!(
            err,
            DomainError::BadRequest {
                cause: Some("Entity task has no field named 'colour'".into())
            }
        );

        let err = DomainError::from(QueryShapeError::new("filter.and[0]", "expected an object"));
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn tap_returns_the_same_error() {
        let err = DomainError::NotFound { cause: Some("db".into()) };
        assert_eq!(err.clone().tap("fetch_schema", "tasks"), err);
    }
}
