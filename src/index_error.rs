//! IndexSyncError: unified error type for parindex public APIs
//!
//! Contract violations (wrong resize state, stale tables, unknown ids) are
//! reported before anything is mutated. Transport failures surface as
//! [`IndexSyncError::CommError`] or [`IndexSyncError::Timeout`] and leave the
//! structure that was being built unusable.

use thiserror::Error;

use crate::index::index_set::IndexSetState;

/// Unified error type for index-set, remote-table, sync and interface operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexSyncError {
    /// An operation was called in the wrong resize state.
    #[error("`{operation}` requires the index set to be {expected:?}, but it is {found:?}")]
    InvalidState {
        operation: &'static str,
        expected: IndexSetState,
        found: IndexSetState,
    },
    /// A (global, attribute) key was added twice.
    #[error("index {0} is already present with the same attribute")]
    DuplicateIndex(String),
    /// A position handed to `mark_as_deleted` lies outside the stable pairs.
    #[error("position {position} is out of range for an index set of length {len}")]
    InvalidPosition { position: usize, len: usize },
    /// The remote table was not built from one shared source/destination index set.
    #[error("operation requires a remote index table built with source == destination")]
    SharedListsRequired,
    /// The exchange strategy cannot run with the given configuration.
    #[error("invalid exchange configuration: {0}")]
    InvalidConfig(String),
    /// A modifier insert did not keep its list strictly ascending.
    #[error("remote index {global} inserted out of order for neighbour {neighbor}")]
    NonAscendingInsert { neighbor: usize, global: String },
    /// The remote table's sequence numbers disagree with the live index sets.
    #[error(
        "remote index table is stale (source seq {found_source:?} vs {expected_source}, \
         destination seq {found_dest:?} vs {expected_dest}); rebuild or sync first"
    )]
    StaleTable {
        expected_source: u64,
        found_source: Option<u64>,
        expected_dest: u64,
        found_dest: Option<u64>,
    },
    /// Lookup of a global id that is not present.
    #[error("global index {0} is not present in the index set")]
    UnknownGlobal(String),
    /// A remote index refers to a local (global, attribute) pair that does not exist.
    #[error("remote index for global {global} from neighbour {neighbor} has no local pair")]
    DanglingRemoteIndex { neighbor: usize, global: String },
    /// Transport-level failure while talking to `neighbor`.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// A probe or receive waited longer than the configured limit.
    #[error("communication timed out after {waited_ms} ms")]
    Timeout { waited_ms: u64 },
    /// A received buffer could not be decoded.
    #[error("wire decode error: {0}")]
    WireDecode(String),
    /// A received attribute byte has no meaning for the attribute type.
    #[error("unknown attribute code {0} on the wire")]
    UnknownAttribute(u8),
    /// Packing a scalar type that was never registered with the [`WireRegistry`](crate::algs::wire::WireRegistry).
    #[error("wire type `{0}` is not registered")]
    TypeNotRegistered(&'static str),
    /// A structural invariant does not hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
