use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error taxonomy for the simulation kernel.
///
/// Build-time validation errors (`InvalidArgument`, `InvalidColumns`, `InvalidTz`, `InvalidId`)
/// are fatal and surfaced to the caller before the first tick. Per-tick errors raised inside a
/// single [`Strategy`](crate::strategy::Strategy)'s `next()` are caught by the
/// [`Engine`](crate::engine::Engine), logged, and disable that strategy for the remainder of the
/// run rather than aborting it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum HydraError {
    /// Input dataset unreadable or malformed.
    #[error("invalid io: {0}")]
    InvalidIO(String),

    /// Missing required column, empty datetime vector, or mismatched lengths.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reference to an unknown asset/exchange/portfolio/strategy.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Cursor moved outside `[0, rows]`.
    #[error("invalid memory op: {0}")]
    InvalidMemoryOp(String),

    /// Header mismatch at load: a required column (e.g. "close") is absent.
    #[error("invalid columns: {0}")]
    InvalidColumns(String),

    /// Asset time zone could not be resolved or conflicts with its Exchange.
    #[error("invalid timezone: {0}")]
    InvalidTz(String),

    /// Feature lookup before warmup is satisfied, or offset beyond the current cursor.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A requested trade-exit/alloc type is unrecognized.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// `step()`/`run()` called before `build()`, or `reset()` while mid-run in a way that's unsafe.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Convenience alias used throughout the crate.
pub type HydraResult<T> = Result<T, HydraError>;
