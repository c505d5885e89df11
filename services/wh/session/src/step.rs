//! Steps of the request chains and the failure policy attached to them.

use crate::ledger::ErrorCode;
use crate::state::SessionState;
use serde::{Deserialize, Serialize};

/// Where in the session lifecycle a step belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Radio bring-up
    BringUp,
    /// Connect chains, scanning, channel measurement
    Setup,
    /// Work done while linked
    Active,
    /// Graceful teardown
    Teardown,
    /// Forced reset
    Recovery,
    /// Radio shutdown
    Shutdown,
}

/// One entry of the transition table: a request (or synchronous call) the
/// session can issue, also used to tag ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Synchronous system init (detailed bring-up)
    InitSystem,
    /// Combined bring-up request
    Initialize,
    /// Enable the hardware
    Enable,
    /// Power on
    PowerOn,
    /// Route indications to the session
    EnableIndications,
    /// Apply coordinator parameters
    SetParentParam,
    /// Apply coordinator key material
    SetParentKey,
    /// Start the coordinator role
    StartParent,
    /// Start messaging as coordinator
    StartParentMp,
    /// Listen on the next channel
    StartScan,
    /// Stop scanning
    EndScan,
    /// Apply peer key material
    SetChildKey,
    /// Join the target coordinator
    StartChild,
    /// Start messaging as peer
    StartChildMp,
    /// Activate data sharing
    StartDataSharing,
    /// Activate key sharing
    StartKeySharing,
    /// Measure the next channel
    MeasureChannel,
    /// Link supervision (peer-initiated disconnect)
    Link,
    /// Drop a peer refused by admission control
    RejectPeer,
    /// Caller-requested peer drop
    DisconnectPeers,
    /// Direct datagram send
    SendData,
    /// Direct datagram receive
    Receive,
    /// Per-cycle data-sharing step
    StepDataSharing,
    /// Key table fetch
    ReadKeySet,
    /// Unsolicited indication
    Indication,
    /// Deactivate key sharing
    EndKeySharing,
    /// Deactivate data sharing
    EndDataSharing,
    /// Stop messaging
    EndMp,
    /// Stop the coordinator role
    EndParent,
    /// Leave the coordinator
    EndChild,
    /// Unconditional reset
    Reset,
    /// Power off
    PowerOff,
    /// Disable the hardware
    Disable,
    /// Combined shutdown request
    End,
}

impl Step {
    /// Phase this step belongs to when it starts a chain of its own
    pub fn phase(self) -> Phase {
        match self {
            Step::InitSystem
            | Step::Initialize
            | Step::Enable
            | Step::PowerOn
            | Step::EnableIndications => Phase::BringUp,
            Step::SetParentParam
            | Step::SetParentKey
            | Step::StartParent
            | Step::StartParentMp
            | Step::StartScan
            | Step::EndScan
            | Step::SetChildKey
            | Step::StartChild
            | Step::StartChildMp
            | Step::StartDataSharing
            | Step::StartKeySharing
            | Step::MeasureChannel => Phase::Setup,
            Step::Link
            | Step::RejectPeer
            | Step::DisconnectPeers
            | Step::SendData
            | Step::Receive
            | Step::StepDataSharing
            | Step::ReadKeySet
            | Step::Indication => Phase::Active,
            Step::EndKeySharing
            | Step::EndDataSharing
            | Step::EndMp
            | Step::EndParent
            | Step::EndChild => Phase::Teardown,
            Step::Reset => Phase::Recovery,
            Step::PowerOff | Step::Disable | Step::End => Phase::Shutdown,
        }
    }
}

/// Result of an entry step or a completion handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Nothing more to do until the next event
    Wait,
    /// Chain concluded in this state
    Enter(SessionState),
    /// Issue the next step
    Next(Step),
    /// The step failed; apply the phase policy
    Fail(Step, ErrorCode),
}

impl Phase {
    /// What a failure during this phase leads to
    pub(crate) fn on_failure(self) -> Transition {
        match self {
            Phase::BringUp | Phase::Shutdown | Phase::Recovery => {
                Transition::Enter(SessionState::Fatal)
            }
            Phase::Setup | Phase::Active => Transition::Enter(SessionState::Error),
            Phase::Teardown => Transition::Next(Step::Reset),
        }
    }
}
