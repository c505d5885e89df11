//! Coordinator role: parameter setup, beaconing and peer admission.

use crate::error::SessionError;
use crate::session::WhSession;
use crate::state::{ConnectMode, SessionState, Sharing};
use crate::step::{Phase, Step, Transition};
use crate::strategy::JoinRequest;
use tracing::{info, trace};
use wh_gateway::{
    AidBitmap, Gateway, GatewayCode, GatewayResult, MpParam, ParentNotice, ParentParam, Request,
    MAX_CHANNEL,
};

impl<G: Gateway> WhSession<G> {
    /// Start a coordinator session on `channel`.
    ///
    /// Valid in Idle with a coordinator mode. The session passes through Busy
    /// and lands in Connected, DataSharing or KeySharing depending on `mode`.
    pub fn start_parent_connect(
        &mut self,
        mode: ConnectMode,
        tgid: u16,
        channel: u8,
    ) -> Result<(), SessionError> {
        self.expect_state("start_parent_connect", &[SessionState::Idle])?;
        if !mode.is_parent() {
            return Err(SessionError::InvalidMode {
                operation: "start_parent_connect",
                mode: Some(mode),
            });
        }
        if !(1..=MAX_CHANNEL).contains(&channel) {
            return Err(SessionError::InvalidChannel(channel));
        }

        self.mode = Some(mode);
        self.parent_param = Some(ParentParam {
            ggid: self.config.ggid,
            tgid,
            channel,
            beacon_period: self.gateway.dispersion_beacon_period(),
            parent_max_size: self.config.parent_max_size,
            child_max_size: self.config.child_max_size,
            max_entry: self.config.max_children,
            entry_enabled: true,
            key_sharing: mode.sharing() == Sharing::Key,
            multi_boot: false,
            user_game_info: self.user_game_info(),
        });

        info!(
            "starting coordinator: mode={:?} ggid={:#010x} tgid={} channel={}",
            mode, self.config.ggid, tgid, channel
        );
        self.set_state(SessionState::Busy);
        self.begin(Step::SetParentParam)
    }

    pub(crate) fn issue_parent(&mut self, step: Step) -> Transition {
        match step {
            Step::SetParentParam => match self.parent_param.clone() {
                Some(param) => self.submit(step, Request::SetParentParam(param)),
                None => Transition::Fail(step, GatewayCode::IllegalState.into()),
            },
            Step::SetParentKey => {
                let key = match (&self.strategies.parent_key, &self.parent_param) {
                    (Some(generator), Some(param)) => generator.generate(param),
                    _ => return Transition::Next(Step::StartParent),
                };
                self.submit_key(step, key)
            }
            Step::StartParent => {
                self.own_aid = 0;
                self.bitmap = AidBitmap::PARENT_ONLY;
                self.submit(step, Request::StartParent)
            }
            Step::StartParentMp => {
                let param = MpParam {
                    recv_capacity: self
                        .config
                        .child_max_size
                        .saturating_mul(self.config.max_children),
                    send_capacity: self.config.parent_max_size,
                    frequency: self.config.mp_frequency,
                };
                self.submit(step, Request::StartMp(param))
            }
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_parent_param_set(&mut self, result: GatewayResult) -> Transition {
        if !self.expects(Phase::Setup, "coordinator parameter completion") {
            return Transition::Wait;
        }
        if let Err(code) = result {
            return Transition::Fail(Step::SetParentParam, code.into());
        }
        if self.strategies.parent_key.is_some() {
            Transition::Next(Step::SetParentKey)
        } else {
            Transition::Next(Step::StartParent)
        }
    }

    pub(crate) fn on_key_set(&mut self, result: GatewayResult) -> Transition {
        if !self.expects(Phase::Setup, "key completion") {
            return Transition::Wait;
        }
        let (step, next) = if self.is_parent() {
            (Step::SetParentKey, Step::StartParent)
        } else {
            (Step::SetChildKey, Step::StartChild)
        };
        match result {
            Ok(()) => Transition::Next(next),
            Err(code) => Transition::Fail(step, code.into()),
        }
    }

    pub(crate) fn on_parent(&mut self, result: GatewayResult, notice: ParentNotice) -> Transition {
        if let Err(code) = result {
            if !self.owns_error("coordinator", code) {
                return Transition::Wait;
            }
            return Transition::Fail(Step::StartParent, code.into());
        }

        match notice {
            ParentNotice::Started => {
                if self.state == SessionState::Busy && self.chain == Some(Phase::Setup) {
                    Transition::Next(Step::StartParentMp)
                } else {
                    Transition::Wait
                }
            }
            ParentNotice::BeaconSent => Transition::Wait,
            ParentNotice::Joined { aid, mac, ssid } => {
                self.admit_peer(JoinRequest { aid, mac, ssid })
            }
            ParentNotice::Left { aid, mac } => {
                self.bitmap.remove(aid);
                info!(aid, "peer {} left, joined {}", mac, self.bitmap);
                Transition::Wait
            }
            ParentNotice::LeftByLocal { aid } => {
                trace!("peer {} dropped locally", aid);
                Transition::Wait
            }
        }
    }

    fn admit_peer(&mut self, request: JoinRequest) -> Transition {
        let admitted = self
            .strategies
            .admission
            .as_ref()
            .map_or(true, |policy| policy.admit(&request));

        if admitted {
            self.bitmap.insert(request.aid);
            info!(aid = request.aid, "peer {} joined, joined {}", request.mac, self.bitmap);
            return Transition::Wait;
        }

        info!(aid = request.aid, "refusing peer {}", request.mac);
        self.submit(
            Step::RejectPeer,
            Request::Disconnect {
                aids: AidBitmap::single(request.aid),
            },
        )
    }

    pub(crate) fn on_parent_ended(&mut self, result: GatewayResult) -> Transition {
        if !self.expects(Phase::Teardown, "coordinator end") {
            return Transition::Wait;
        }
        match result {
            Ok(()) => {
                info!("coordinator session finished");
                Transition::Enter(SessionState::Idle)
            }
            Err(code) => Transition::Fail(Step::EndParent, code.into()),
        }
    }
}
