//! Coarse session state and connect mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable session state. Exactly one value is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Radio down
    Stop,
    /// Radio up, no link
    Idle,
    /// Looking for a coordinator
    Scanning,
    /// A request chain is in progress
    Busy,
    /// Linked, direct messaging only
    Connected,
    /// Linked with data sharing active
    DataSharing,
    /// Linked with key sharing active
    KeySharing,
    /// Channel survey finished, waiting for resolution
    MeasureChannel,
    /// Join failed because the coordinator vanished or timed out; reset to retry
    ConnectFail,
    /// Recoverable failure; reset to continue
    Error,
    /// The radio can no longer be driven
    Fatal,
}

impl SessionState {
    /// Error or Fatal
    pub fn is_failed(self) -> bool {
        matches!(self, SessionState::Error | SessionState::Fatal)
    }

    /// Connected, DataSharing or KeySharing
    pub fn is_linked(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::DataSharing | SessionState::KeySharing
        )
    }

    /// States a chain concludes in; link scratch is cleared on entry
    pub fn is_base(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stop)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Stop => "stop",
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Busy => "busy",
            SessionState::Connected => "connected",
            SessionState::DataSharing => "data-sharing",
            SessionState::KeySharing => "key-sharing",
            SessionState::MeasureChannel => "measure-channel",
            SessionState::ConnectFail => "connect-fail",
            SessionState::Error => "error",
            SessionState::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// What runs on top of multiplexed messaging once linked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// Direct datagrams only
    Direct,
    /// Per-cycle shared table
    Data,
    /// Shared key table
    Key,
}

/// Role and communication mode, fixed when a connect operation starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectMode {
    /// Coordinator, direct messaging
    MpParent,
    /// Peer, direct messaging
    MpChild,
    /// Coordinator, key sharing
    KsParent,
    /// Peer, key sharing
    KsChild,
    /// Coordinator, data sharing
    DsParent,
    /// Peer, data sharing
    DsChild,
}

impl ConnectMode {
    /// Build a mode from role and sharing flavor
    pub fn new(parent: bool, sharing: Sharing) -> Self {
        match (parent, sharing) {
            (true, Sharing::Direct) => ConnectMode::MpParent,
            (true, Sharing::Data) => ConnectMode::DsParent,
            (true, Sharing::Key) => ConnectMode::KsParent,
            (false, Sharing::Direct) => ConnectMode::MpChild,
            (false, Sharing::Data) => ConnectMode::DsChild,
            (false, Sharing::Key) => ConnectMode::KsChild,
        }
    }

    /// Coordinator role
    pub fn is_parent(self) -> bool {
        matches!(
            self,
            ConnectMode::MpParent | ConnectMode::KsParent | ConnectMode::DsParent
        )
    }

    /// Sharing flavor
    pub fn sharing(self) -> Sharing {
        match self {
            ConnectMode::MpParent | ConnectMode::MpChild => Sharing::Direct,
            ConnectMode::DsParent | ConnectMode::DsChild => Sharing::Data,
            ConnectMode::KsParent | ConnectMode::KsChild => Sharing::Key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_role_and_sharing() {
        for mode in [
            ConnectMode::MpParent,
            ConnectMode::MpChild,
            ConnectMode::KsParent,
            ConnectMode::KsChild,
            ConnectMode::DsParent,
            ConnectMode::DsChild,
        ] {
            assert_eq!(ConnectMode::new(mode.is_parent(), mode.sharing()), mode);
        }
    }

    #[test]
    fn test_state_classes() {
        assert!(SessionState::DataSharing.is_linked());
        assert!(!SessionState::Busy.is_linked());
        assert!(SessionState::Fatal.is_failed());
        assert!(!SessionState::ConnectFail.is_failed());
        assert!(SessionState::Stop.is_base());
    }
}
