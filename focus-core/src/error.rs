//! Internal error kinds (spec §7).
//!
//! Orchestration code never unwinds the stack for an expected failure mode;
//! every fallible operation that the state machine must react to returns a
//! `FocusError` so the caller can pattern-match on `.kind()` and decide
//! whether to retry, displace participants, or surface a wire error. This
//! mirrors the source's `OperationFailedException(code)` but replaces the
//! exception with a typed result, per spec §9 ("Design Notes").

use jid::Jid;
use thiserror::Error;

use crate::source::SourceValidationError;

#[derive(Debug, Error)]
pub enum FocusError {
  #[error("invalid sources: {0}")]
  InvalidSources(#[from] SourceValidationError),

  #[error("no bridge available for participant")]
  NoBridgeAvailable,

  #[error("bridge allocation failed")]
  BridgeFailure,

  #[error("not allowed: {0}")]
  NotAllowed(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("no gateway available")]
  NoGatewayAvailable,

  #[error("room not found: {0}")]
  RoomNotFound(Jid),

  #[error("allocation cancelled")]
  Cancelled,

  #[error("timed out waiting for a reply")]
  Timeout,

  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

pub type FocusResult<T> = Result<T, FocusError>;
