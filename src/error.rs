//! Semantic error kinds shared by every public mutator on the core.
//!
//! The tick entry point (`Engine::update_for_vehicle`) never returns one of these —
//! it logs and falls back to a safe default instead. Snapshot/restore errors are the
//! only ones that reach an external caller verbatim without a fallback.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation (recovered): {0}")]
    InvariantViolation(String),

    /// Not really a failure: `Engine::assign_train_to_slot` returns this instead of
    /// `Ok` whenever the new assignment evicted at least one competing vehicle, so
    /// callers can tell "assigned cleanly" (`Ok(0)`) apart from "assigned, but bumped
    /// someone" without inspecting a side channel.
    #[error("conflict resolved, {evicted} assignment(s) evicted")]
    ConflictResolved { evicted: usize },

    #[error("unsupported snapshot version: {0}")]
    VersionUnsupported(u32),
}

pub type CoreResult<T> = Result<T, CoreError>;
