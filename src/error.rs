//! Typed error surface for the growing-segment indexing core.
//!
//! Fatal misuse (a non-float vector field routed to the float build path, an
//! unrecognized scalar type reaching the factory) is not represented here —
//! those are schema/dispatch bugs and are raised as panics at the call site,
//! matching the "programmer-visible abort" policy described in the crate
//! docs. Everything a caller can legitimately hit at runtime — a missing
//! metadata key, a downcast to the wrong field kind, a backend failure — is
//! a variant below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("required parameter '{0}' missing from index metadata")]
    MissingParam(&'static str),

    #[error("index type '{0}' is not supported for growing segments")]
    UnsupportedIndexType(String),

    #[error("field indexing downcast mismatch: expected {expected}, found {found}")]
    InvalidIndexing {
        expected: &'static str,
        found: &'static str,
    },

    #[error("field {0:?} not present in collection index metadata")]
    UnknownField(crate::schema::FieldId),

    #[error("ann backend failed to build index")]
    BackendBuildFailure(#[source] anyhow::Error),

    #[error("ann backend failed to append to index")]
    BackendAppendFailure(#[source] anyhow::Error),

    #[error("ann backend failed to search index")]
    BackendSearchFailure(#[source] anyhow::Error),

    #[error("scalar field indexing does not support segment-wide append")]
    UnsupportedOperation(&'static str),
}

pub type Result<T> = std::result::Result<T, IndexingError>;
