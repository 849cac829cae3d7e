//! Error types and result alias for node control-plane operations.
//!
//! [`NodeError`] carries an [`ErrorKind`] classification, a description, optional
//! dynamic detail, an optional source error, and the callsite location. A `Many`
//! representation aggregates the independent failures collected by best-effort
//! teardown cascades.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for node control-plane operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Categories of failures raised by the node control plane.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Startup errors. These abort node startup and are never retried.
    ConfigError,
    NodeIdentityUnset,
    NodeAddressMismatch,

    // Assignment processing errors.
    InvalidAssignment,
    StageNotRegistered,
    StageStartFailed,
    StageShutdownFailed,

    // Shared resource errors.
    ResourceReleaseFailed,

    // Collaborator errors.
    ArbitrationFailed,
    CoordinationFailed,
    TransportFailed,

    // Gate wait errors.
    WaitTimeout,
    WaitCanceled,

    // Worker pool errors.
    WorkerPoolClosed,

    // General errors.
    SerializationFailed,
    Unknown,
}

/// Payload stored for single [`NodeError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload.
    Single(ErrorPayload),
    /// Multiple aggregated errors, collected by best-effort cascades.
    Many {
        errors: Vec<NodeError>,
        location: &'static Location<'static>,
    },
}

/// Main error type for node control-plane operations.
#[derive(Debug, Clone)]
pub struct NodeError {
    repr: ErrorRepr,
}

impl NodeError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] if the aggregation is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    /// Returns the callsite location captured when this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first contained
    /// error as the source instead.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`NodeError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        NodeError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl<D> From<(ErrorKind, D)> for NodeError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description): (ErrorKind, D)) -> Self {
        NodeError::from_components(kind, description.into(), None)
    }
}

impl<D, T> From<(ErrorKind, D, T)> for NodeError
where
    D: Into<Cow<'static, str>>,
    T: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, D, T)) -> Self {
        NodeError::from_components(kind, description.into(), Some(detail.into()))
    }
}

impl From<Vec<NodeError>> for NodeError {
    #[track_caller]
    fn from(errors: Vec<NodeError>) -> Self {
        NodeError {
            repr: ErrorRepr::Many {
                errors,
                location: Location::caller(),
            },
        }
    }
}

impl PartialEq for NodeError {
    fn eq(&self, other: &NodeError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    payload.location.file(),
                    payload.location.line(),
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  detail: {detail}")?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    for (line_index, line) in rendered.lines().enumerate() {
                        if line_index == 0 {
                            write!(f, "\n  {}. {}", index + 1, line)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for NodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // Aggregated errors forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}
