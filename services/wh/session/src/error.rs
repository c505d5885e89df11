//! Errors returned by session entry operations.

use crate::ledger::ErrorCode;
use crate::state::{ConnectMode, SessionState};
use crate::step::Step;
use thiserror::Error;

/// Session entry errors.
///
/// An `Ok` from an entry operation only means the first request was queued;
/// the end-to-end outcome shows up later in the session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not valid in the current state
    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: SessionState,
    },

    /// Operation not valid for this connect mode
    #[error("{operation} not allowed in mode {mode:?}")]
    InvalidMode {
        /// Rejected operation
        operation: &'static str,
        /// Mode at the time of the call
        mode: Option<ConnectMode>,
    },

    /// Channel out of range
    #[error("invalid channel {0}")]
    InvalidChannel(u8),

    /// Payload exceeds the configured limit
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// The survey holds no channel to resolve
    #[error("no measured channel to resolve")]
    NoChannel,

    /// A request was refused or a synchronous call failed
    #[error("{step:?} failed: {code}")]
    Failed {
        /// Step that failed
        step: Step,
        /// Failure code
        code: ErrorCode,
    },
}
