// src/core/errors.rs

//! Defines the primary error types for the client library.

use thiserror::Error;

/// A convenience alias used by every public operation of the library.
pub type CmsResult<T> = Result<T, CmsError>;

/// Failures raised by a `Connector` implementation.
///
/// The session never rewrites these; it wraps them in [`CmsError::Connector`]
/// together with the call site so callers can tell a broker-side problem from
/// a misuse of the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("connector unavailable: {0}")]
    Unavailable(String),

    #[error("unknown connector resource: {0}")]
    UnknownResource(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connector is closed")]
    Closed,
}

/// The main error enum, representing all failures surfaced by the library.
///
/// `Clone` lets listeners keep their own copy of a reported error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CmsError {
    /// The operation is not allowed in the current state, e.g. on a closed session
    /// or `commit` on a session that is not transacted.
    #[error("Illegal state: {0}")]
    InvalidState(String),

    /// A required input was missing when constructing an object.
    #[error("Null pointer: {0}")]
    NullPointer(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// A connector failure, marked with the operation that observed it.
    #[error("{at}: {source}")]
    Connector {
        at: &'static str,
        #[source]
        source: ConnectorError,
    },

    /// Any other failure, normalized so each public operation has one fallback kind.
    #[error("{0}")]
    Generic(String),
}

impl CmsError {
    /// Returns a closure that marks a connector error with the calling operation.
    pub fn connector(at: &'static str) -> impl FnOnce(ConnectorError) -> CmsError {
        move |source| CmsError::Connector { at, source }
    }

    pub fn closed(at: &str) -> CmsError {
        CmsError::InvalidState(format!("{at} - Session Already Closed"))
    }

    /// True if this error originated in the connector.
    pub fn is_connector(&self) -> bool {
        matches!(self, CmsError::Connector { .. })
    }
}
