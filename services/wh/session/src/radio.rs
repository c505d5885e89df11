//! Radio bring-up, shutdown and unsolicited indications.

use crate::config::BringUp;
use crate::error::SessionError;
use crate::ledger::ErrorLedger;
use crate::session::WhSession;
use crate::state::SessionState;
use crate::step::{Phase, Step, Transition};
use tracing::{error, info, trace, warn};
use wh_gateway::{Gateway, GatewayCode, GatewayResult, IndicationKind, Request};

impl<G: Gateway> WhSession<G> {
    /// Bring the radio up. Valid in Stop only; the session reaches Idle when
    /// the chain completes, or Fatal if any step fails.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        self.expect_state("initialize", &[SessionState::Stop])?;

        self.ledger = ErrorLedger::new();
        self.mode = None;
        self.clear_link();
        self.set_state(SessionState::Busy);

        info!("bringing radio up ({:?})", self.config.bring_up);
        match self.config.bring_up {
            BringUp::Combined => self.begin(Step::Initialize),
            BringUp::Detailed => self.begin(Step::InitSystem),
        }
    }

    /// Take the radio down. Valid in Idle only; the session reaches Stop, or
    /// Fatal if any step fails.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        self.expect_state("shutdown", &[SessionState::Idle])?;
        self.set_state(SessionState::Busy);

        info!("taking radio down ({:?})", self.config.bring_up);
        match self.config.bring_up {
            BringUp::Combined => self.begin(Step::End),
            BringUp::Detailed => self.begin(Step::PowerOff),
        }
    }

    pub(crate) fn issue_radio(&mut self, step: Step) -> Transition {
        match step {
            Step::InitSystem => match self.gateway.init_system() {
                Ok(()) => Transition::Next(Step::Enable),
                Err(code) => Transition::Fail(step, code.into()),
            },
            Step::Initialize => self.submit(step, Request::Initialize),
            Step::Enable => self.submit(step, Request::Enable),
            Step::PowerOn => self.submit(step, Request::PowerOn),
            Step::EnableIndications => match self.gateway.enable_indications() {
                Ok(()) => {
                    info!("radio up, allowed channels {:?}", self.allowed_channels());
                    Transition::Enter(SessionState::Idle)
                }
                Err(code) => Transition::Fail(step, code.into()),
            },
            Step::PowerOff => self.submit(step, Request::PowerOff),
            Step::Disable => self.submit(step, Request::Disable),
            Step::End => self.submit(step, Request::End),
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_bring_up(&mut self, step: Step, result: GatewayResult) -> Transition {
        if !self.expects(Phase::BringUp, "bring-up completion") {
            return Transition::Wait;
        }
        if let Err(code) = result {
            return Transition::Fail(step, code.into());
        }
        match step {
            Step::Enable => Transition::Next(Step::PowerOn),
            Step::Initialize | Step::PowerOn => Transition::Next(Step::EnableIndications),
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_shutdown(&mut self, step: Step, result: GatewayResult) -> Transition {
        if !self.expects(Phase::Shutdown, "shutdown completion") {
            return Transition::Wait;
        }
        if let Err(code) = result {
            return Transition::Fail(step, code.into());
        }
        match step {
            Step::PowerOff => Transition::Next(Step::Disable),
            _ => {
                info!("radio down");
                Transition::Enter(SessionState::Stop)
            }
        }
    }

    pub(crate) fn on_indication(
        &mut self,
        result: GatewayResult,
        kind: IndicationKind,
    ) -> Transition {
        if let Some(observer) = self.strategies.indication.as_mut() {
            observer.on_indication(kind, result);
        }

        match result {
            Ok(()) => {
                trace!("indication {:?}", kind);
                Transition::Wait
            }
            Err(GatewayCode::FifoError) => {
                error!("indication queue overflow ({:?})", kind);
                let unwinding = matches!(
                    self.chain,
                    Some(Phase::Teardown | Phase::Recovery | Phase::Shutdown)
                );
                if unwinding || matches!(self.state, SessionState::Stop | SessionState::Fatal) {
                    self.note_failure(Step::Indication, GatewayCode::FifoError.into());
                    return Transition::Wait;
                }
                Transition::Fail(Step::Indication, GatewayCode::FifoError.into())
            }
            Err(code) => {
                warn!("indication {:?} reported {}", kind, code);
                Transition::Wait
            }
        }
    }
}
