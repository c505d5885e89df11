//! Multiplexed messaging once linked: direct datagrams, data sharing and
//! key sharing.

use crate::error::SessionError;
use crate::session::WhSession;
use crate::state::{SessionState, Sharing};
use crate::step::{Phase, Step, Transition};
use crate::strategy::Inbound;
use bytes::Bytes;
use std::fmt;
use tracing::{debug, info, trace};
use wh_gateway::{
    AidBitmap, DataSet, DataSharingParam, Gateway, GatewayCode, GatewayResult, KeySet, MpNotice,
    PortNotice, Request, SendTag,
};

/// Destination bitmap addressing every linked node
const BROADCAST_DESTINATION: u16 = 0xffff;

/// Final outcome of one direct send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Sent in a messaging cycle
    Delivered,
    /// The gateway reported a failure
    Failed(GatewayCode),
    /// The link was torn down before completion
    Cancelled,
}

impl SendOutcome {
    /// True for [`SendOutcome::Delivered`]
    pub fn is_delivered(self) -> bool {
        self == SendOutcome::Delivered
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Delivered => write!(f, "delivered"),
            SendOutcome::Failed(code) => write!(f, "failed: {}", code),
            SendOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Completion callback for a direct send
pub type SendCallback = Box<dyn FnOnce(SendOutcome) + Send>;

/// Result of one data-sharing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A merged table is available
    Shared,
    /// No table this cycle; try again next cycle
    Pending,
    /// Nobody else is linked; the table is empty
    Alone,
}

/// Per-cycle failures that leave the link up
pub(crate) fn is_soft_cycle_failure(code: GatewayCode) -> bool {
    matches!(
        code,
        GatewayCode::SendFailed | GatewayCode::Timeout | GatewayCode::InvalidPollBitmap
    )
}

impl<G: Gateway> WhSession<G> {
    /// Queue one datagram to every linked node.
    ///
    /// `on_complete` runs exactly once: when the send completes, or with
    /// [`SendOutcome::Cancelled`] if the link goes down first. Valid while
    /// linked.
    pub fn send_data<F>(&mut self, payload: Bytes, on_complete: F) -> Result<SendTag, SessionError>
    where
        F: FnOnce(SendOutcome) + Send + 'static,
    {
        if !self.state.is_linked() {
            return Err(SessionError::InvalidState {
                operation: "send_data",
                state: self.state,
            });
        }
        let max = if self.is_parent() {
            self.config.parent_max_size
        } else {
            self.config.child_max_size
        } as usize;
        if payload.len() > max {
            return Err(SessionError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        let tag = SendTag(self.next_tag);
        self.next_tag += 1;
        let request = Request::SetMpData {
            port: self.config.data_port,
            destination: BROADCAST_DESTINATION,
            payload,
            tag,
            priority: self.config.data_priority,
        };
        if let Err(code) = self.gateway.submit(request) {
            self.note_failure(Step::SendData, code.into());
            return Err(SessionError::Failed {
                step: Step::SendData,
                code: code.into(),
            });
        }

        trace!("send {} queued", tag);
        self.in_flight.insert(tag, Box::new(on_complete));
        Ok(tag)
    }

    /// Contribute to this cycle's shared table and fetch the merge.
    ///
    /// Valid in DataSharing.
    pub fn step_data_sharing(&mut self, contribution: &[u8]) -> Result<StepOutcome, SessionError> {
        self.expect_state("step_data_sharing", &[SessionState::DataSharing])?;
        let max = usize::from(self.config.ds_data_size);
        if contribution.len() > max {
            return Err(SessionError::PayloadTooLarge {
                len: contribution.len(),
                max,
            });
        }

        match self.gateway.step_data_sharing(contribution) {
            Ok(set) => {
                trace!("shared table {}", set.bitmap);
                self.dataset = Some(set);
                Ok(StepOutcome::Shared)
            }
            Err(GatewayCode::NoChild) => {
                self.dataset = Some(DataSet::default());
                Ok(StepOutcome::Alone)
            }
            Err(GatewayCode::NoDataSet) => {
                trace!("no shared table this cycle");
                Ok(StepOutcome::Pending)
            }
            Err(code) => {
                self.note_failure(Step::StepDataSharing, code.into());
                Err(SessionError::Failed {
                    step: Step::StepDataSharing,
                    code: code.into(),
                })
            }
        }
    }

    /// Contribution of `aid` in the last shared table
    pub fn shared_contribution(&self, aid: u16) -> Option<&Bytes> {
        if self.state != SessionState::DataSharing {
            return None;
        }
        self.dataset.as_ref()?.contribution(aid)
    }

    /// Contributors to the last shared table
    pub fn shared_bitmap(&self) -> AidBitmap {
        self.dataset
            .as_ref()
            .map_or(AidBitmap::NONE, |set| set.bitmap)
    }

    /// Latest merged key table. Valid in KeySharing.
    pub fn key_set(&self) -> Result<KeySet, SessionError> {
        self.expect_state("key_set", &[SessionState::KeySharing])?;
        if self.sharing() != Sharing::Key {
            return Err(SessionError::InvalidMode {
                operation: "key_set",
                mode: self.mode,
            });
        }
        self.gateway
            .read_key_set()
            .map_err(|code| SessionError::Failed {
                step: Step::ReadKeySet,
                code: code.into(),
            })
    }

    /// Drop the given peers. Coordinator only, while linked.
    ///
    /// Bits of peers that are not joined, and the coordinator's own bit, are
    /// ignored.
    pub fn disconnect_peers(&mut self, aids: AidBitmap) -> Result<(), SessionError> {
        if !self.is_parent() {
            return Err(SessionError::InvalidMode {
                operation: "disconnect_peers",
                mode: self.mode,
            });
        }
        if !self.state.is_linked() {
            return Err(SessionError::InvalidState {
                operation: "disconnect_peers",
                state: self.state,
            });
        }

        let mut targets = aids.intersection(self.bitmap);
        targets.remove(0);
        if targets.is_empty() {
            return Err(SessionError::Failed {
                step: Step::DisconnectPeers,
                code: GatewayCode::NoChild.into(),
            });
        }

        if let Err(code) = self.gateway.submit(Request::Disconnect { aids: targets }) {
            self.note_failure(Step::DisconnectPeers, code.into());
            return Err(SessionError::Failed {
                step: Step::DisconnectPeers,
                code: code.into(),
            });
        }
        self.bitmap.remove_all(targets);
        info!("dropping peers {}, joined {}", targets, self.bitmap);
        Ok(())
    }

    pub(crate) fn activate_sharing(&mut self, step: Step) -> Transition {
        match step {
            Step::StartDataSharing => {
                let param = DataSharingParam {
                    port: self.config.sharing_port,
                    aids: AidBitmap::all(self.config.max_children),
                    data_size: self.config.ds_data_size,
                    double_mode: true,
                };
                match self.gateway.start_data_sharing(&param) {
                    Ok(()) => {
                        self.data_sharing_active = true;
                        info!("data sharing on port {}", param.port);
                        Transition::Enter(SessionState::DataSharing)
                    }
                    Err(code) => Transition::Fail(step, code.into()),
                }
            }
            Step::StartKeySharing => match self.gateway.start_key_sharing(self.config.sharing_port) {
                Ok(()) => {
                    self.key_sharing_active = true;
                    info!("key sharing on port {}", self.config.sharing_port);
                    Transition::Enter(SessionState::KeySharing)
                }
                Err(code) => Transition::Fail(step, code.into()),
            },
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_mp(&mut self, result: GatewayResult, notice: MpNotice) -> Transition {
        if let Err(code) = result {
            if !self.owns_error("messaging", code) {
                return Transition::Wait;
            }
            if !self.is_parent() && is_soft_cycle_failure(code) {
                trace!("messaging cycle failed: {}", code);
                return Transition::Wait;
            }
            let step = if self.is_parent() {
                Step::StartParentMp
            } else {
                Step::StartChildMp
            };
            return Transition::Fail(step, code.into());
        }

        match notice {
            MpNotice::Started => {
                if self.state != SessionState::Busy || self.chain != Some(Phase::Setup) {
                    return Transition::Wait;
                }
                match self.sharing() {
                    Sharing::Direct => {
                        info!("linked, direct messaging");
                        Transition::Enter(SessionState::Connected)
                    }
                    Sharing::Data => Transition::Next(Step::StartDataSharing),
                    Sharing::Key => Transition::Next(Step::StartKeySharing),
                }
            }
            MpNotice::CycleEnded | MpNotice::Acked => Transition::Wait,
        }
    }

    pub(crate) fn on_mp_ended(&mut self, result: GatewayResult) -> Transition {
        if !self.expects(Phase::Teardown, "messaging end") {
            return Transition::Wait;
        }
        match result {
            Ok(()) if self.is_parent() => Transition::Next(Step::EndParent),
            Ok(()) => Transition::Next(Step::EndChild),
            Err(code) => Transition::Fail(Step::EndMp, code.into()),
        }
    }

    pub(crate) fn on_port_send(&mut self, result: GatewayResult, tag: SendTag) -> Transition {
        let Some(callback) = self.in_flight.remove(&tag) else {
            debug!("completion for unknown send {}", tag);
            return Transition::Wait;
        };
        match result {
            Ok(()) => {
                callback(SendOutcome::Delivered);
                Transition::Wait
            }
            Err(code) if is_soft_cycle_failure(code) => {
                debug!("send {} not delivered: {}", tag, code);
                callback(SendOutcome::Failed(code));
                Transition::Wait
            }
            Err(code) => {
                callback(SendOutcome::Failed(code));
                if !self.owns_error("send", code) {
                    return Transition::Wait;
                }
                Transition::Fail(Step::SendData, code.into())
            }
        }
    }

    pub(crate) fn on_port_recv(&mut self, result: GatewayResult, notice: PortNotice) -> Transition {
        if let Err(code) = result {
            self.note_failure(Step::Receive, code.into());
            return Transition::Wait;
        }

        let (aid, inbound) = match notice {
            PortNotice::Received { aid, payload } => (aid, Inbound::Data(payload)),
            PortNotice::PeerDisconnected { aid } => {
                debug!("peer {} gone from data port", aid);
                (aid, Inbound::Disconnected)
            }
            PortNotice::Opened | PortNotice::PeerConnected { .. } | PortNotice::LocalDisconnect => {
                trace!("data port {:?}", notice);
                return Transition::Wait;
            }
        };
        if let Some(receiver) = self.strategies.receiver.as_mut() {
            receiver.on_receive(aid, inbound);
        }
        Transition::Wait
    }
}
