//! Graceful teardown and forced reset.

use crate::error::SessionError;
use crate::session::WhSession;
use crate::state::{SessionState, Sharing};
use crate::step::{Phase, Step, Transition};
use tracing::{debug, info, warn};
use wh_gateway::{AidBitmap, Gateway, GatewayResult, Request};

impl<G: Gateway> WhSession<G> {
    /// Leave the current activity and return to Idle.
    ///
    /// A linked session unwinds sharing, messaging and its role in reverse
    /// order; a scan stops after the step in flight. Idle and Stop are left
    /// untouched, anything else is reset.
    pub fn finalize(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Stop => {
                debug!("nothing to finalize in {}", self.state);
                Ok(())
            }
            SessionState::Scanning => {
                if let Some(run) = self.scan.as_mut() {
                    run.auto_connect = false;
                }
                self.chain = Some(Phase::Teardown);
                self.set_state(SessionState::Busy);
                Ok(())
            }
            state if state.is_linked() => {
                info!("finalizing {:?} session", self.mode);
                self.set_state(SessionState::Busy);
                let first = match self.sharing() {
                    Sharing::Key => Step::EndKeySharing,
                    Sharing::Data => Step::EndDataSharing,
                    Sharing::Direct => Step::EndMp,
                };
                self.begin(first)
            }
            _ => self.reset(),
        }
    }

    /// Unconditionally reset the radio back to Idle.
    ///
    /// Valid in any state. A reset that cannot be queued or completes with an
    /// error leaves the session Fatal.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        info!("resetting from {}", self.state);
        self.scan = None;
        self.begin(Step::Reset)
    }

    pub(crate) fn issue_teardown(&mut self, step: Step) -> Transition {
        match step {
            Step::EndKeySharing => match self.gateway.end_key_sharing() {
                Ok(()) => {
                    self.key_sharing_active = false;
                    Transition::Next(Step::EndMp)
                }
                Err(code) => Transition::Fail(step, code.into()),
            },
            Step::EndDataSharing => match self.gateway.end_data_sharing() {
                Ok(()) => {
                    self.data_sharing_active = false;
                    Transition::Next(Step::EndMp)
                }
                Err(code) => Transition::Fail(step, code.into()),
            },
            Step::EndMp => self.submit(step, Request::EndMp),
            Step::EndParent => self.submit(step, Request::EndParent),
            Step::EndChild => self.submit(
                step,
                Request::Disconnect {
                    aids: AidBitmap::single(0),
                },
            ),
            Step::Reset => {
                if self.data_sharing_active {
                    if let Err(code) = self.gateway.end_data_sharing() {
                        warn!("closing data sharing before reset: {}", code);
                    }
                    self.data_sharing_active = false;
                }
                self.key_sharing_active = false;
                self.set_state(SessionState::Busy);
                self.submit(step, Request::Reset)
            }
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_disconnected(&mut self, result: GatewayResult, aids: AidBitmap) -> Transition {
        if self.chain == Some(Phase::Teardown) && !self.is_parent() {
            return match result {
                Ok(()) => {
                    info!("left coordinator");
                    Transition::Enter(SessionState::Idle)
                }
                Err(code) => Transition::Fail(Step::EndChild, code.into()),
            };
        }

        match result {
            Ok(()) => debug!("peers {} dropped", aids),
            Err(code) => self.note_failure(Step::DisconnectPeers, code.into()),
        }
        Transition::Wait
    }

    pub(crate) fn on_reset(&mut self, result: GatewayResult) -> Transition {
        if !self.expects(Phase::Recovery, "reset completion") {
            return Transition::Wait;
        }
        match result {
            Ok(()) => {
                info!("reset complete");
                Transition::Enter(SessionState::Idle)
            }
            Err(code) => Transition::Fail(Step::Reset, code.into()),
        }
    }
}
