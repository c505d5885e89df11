//! Sticky error ledger.
//!
//! Holds the last failure and the step that raised it. Once the session is in
//! Error or Fatal, later failures are logged but do not overwrite the entry,
//! so the first cause survives until a reset brings the session back to a
//! non-failed state.

use crate::state::SessionState;
use crate::step::Step;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use wh_gateway::GatewayCode;

/// Failure codes recorded in the ledger
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The gateway reported a failure
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayCode),
    /// The coordinator dropped this peer
    #[error("disconnected by peer")]
    Disconnected,
    /// No channel is usable here
    #[error("no radio available")]
    NoRadio,
    /// Radio library not initialized
    #[error("radio not initialized")]
    RadioNotInitialized,
    /// No allowed channel left to visit
    #[error("no more channel")]
    NoMoreChannel,
}

/// One recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// What went wrong
    pub code: ErrorCode,
    /// Which step raised it
    pub step: Step,
}

/// Last error plus the step that raised it
#[derive(Debug, Clone, Default)]
pub struct ErrorLedger {
    last: Option<LedgerEntry>,
    suppressed: u32,
}

impl ErrorLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure unless `state` already is Error or Fatal.
    ///
    /// Returns whether the entry was stored.
    pub fn record(&mut self, step: Step, code: ErrorCode, state: SessionState) -> bool {
        if state.is_failed() {
            self.suppressed += 1;
            debug!(
                "ledger keeps {:?}, suppressing {:?} from {:?}",
                self.last, code, step
            );
            return false;
        }
        warn!("{:?} failed: {} (state {})", step, code, state);
        self.last = Some(LedgerEntry { code, step });
        true
    }

    /// Last recorded failure
    pub fn last(&self) -> Option<LedgerEntry> {
        self.last
    }

    /// Code of the last recorded failure
    pub fn last_code(&self) -> Option<ErrorCode> {
        self.last.map(|entry| entry.code)
    }

    /// Failures dropped because the session was already failed
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins_while_failed() {
        let mut ledger = ErrorLedger::new();
        assert!(ledger.record(Step::StartChild, ErrorCode::Disconnected, SessionState::Connected));
        assert!(!ledger.record(
            Step::Indication,
            GatewayCode::FifoError.into(),
            SessionState::Error
        ));
        assert_eq!(
            ledger.last(),
            Some(LedgerEntry {
                code: ErrorCode::Disconnected,
                step: Step::StartChild
            })
        );
        assert_eq!(ledger.suppressed(), 1);
    }

    #[test]
    fn test_overwrites_outside_failed_states() {
        let mut ledger = ErrorLedger::new();
        ledger.record(Step::SendData, GatewayCode::SendQueueFull.into(), SessionState::Connected);
        ledger.record(Step::Receive, GatewayCode::Failed.into(), SessionState::Connected);
        assert_eq!(ledger.last_code(), Some(ErrorCode::Gateway(GatewayCode::Failed)));
    }
}
