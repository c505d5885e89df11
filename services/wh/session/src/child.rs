//! Peer role: joining a coordinator, directly or after a scan.

use crate::error::SessionError;
use crate::scan::ScanRun;
use crate::session::WhSession;
use crate::state::{ConnectMode, SessionState};
use crate::step::{Phase, Step, Transition};
use tracing::{debug, info, warn};
use wh_gateway::{
    AuthMode, BeaconDescriptor, ConnectNotice, Gateway, GatewayCode, GatewayResult, MacAddress,
    MpParam, Request, MAX_CHANNEL,
};

impl<G: Gateway> WhSession<G> {
    /// Join a coordinator already known from an earlier scan.
    ///
    /// Valid in Idle with a peer mode.
    pub fn connect_to_known(
        &mut self,
        mode: ConnectMode,
        target: BeaconDescriptor,
    ) -> Result<(), SessionError> {
        self.expect_child_entry("connect_to_known", mode)?;

        info!("joining coordinator {} as {:?}", target.bssid, mode);
        self.mode = Some(mode);
        self.target = Some(target);
        self.set_state(SessionState::Busy);
        let first = self.join_step();
        self.begin(first)
    }

    /// Scan for a matching coordinator and join the first one found.
    ///
    /// `filter` restricts the scan to one coordinator address (broadcast for
    /// any). `channel` 0 cycles through every allowed channel, anything else
    /// pins the scan to that channel.
    pub fn connect_auto(
        &mut self,
        mode: ConnectMode,
        filter: MacAddress,
        channel: u8,
    ) -> Result<(), SessionError> {
        self.expect_child_entry("connect_auto", mode)?;
        if channel > MAX_CHANNEL {
            return Err(SessionError::InvalidChannel(channel));
        }

        info!("auto-connect as {:?}, filter {} channel {}", mode, filter, channel);
        self.mode = Some(mode);
        self.scan = Some(ScanRun::new(filter, channel, true, None));
        self.set_state(SessionState::Scanning);
        self.begin(Step::StartScan)
    }

    fn expect_child_entry(
        &self,
        operation: &'static str,
        mode: ConnectMode,
    ) -> Result<(), SessionError> {
        self.expect_state(operation, &[SessionState::Idle])?;
        if mode.is_parent() {
            return Err(SessionError::InvalidMode {
                operation,
                mode: Some(mode),
            });
        }
        Ok(())
    }

    /// First step of the join chain
    pub(crate) fn join_step(&self) -> Step {
        if self.strategies.child_key.is_some() {
            Step::SetChildKey
        } else {
            Step::StartChild
        }
    }

    pub(crate) fn issue_child(&mut self, step: Step) -> Transition {
        match step {
            Step::SetChildKey => {
                let key = match (&self.strategies.child_key, &self.target) {
                    (Some(generator), Some(target)) => generator.generate(target),
                    _ => return Transition::Next(Step::StartChild),
                };
                self.submit_key(step, key)
            }
            Step::StartChild => {
                let Some(target) = self.target.clone() else {
                    return Transition::Fail(step, GatewayCode::IllegalState.into());
                };
                let auth = if self.strategies.child_key.is_some() {
                    AuthMode::SharedKey
                } else {
                    AuthMode::OpenSystem
                };
                let ssid = self.config.connection_ssid();
                self.submit(step, Request::StartConnect { target, ssid, auth })
            }
            Step::StartChildMp => {
                let param = MpParam {
                    recv_capacity: self.config.parent_max_size,
                    send_capacity: self.config.child_max_size,
                    frequency: self.config.mp_frequency,
                };
                self.submit(step, Request::StartMp(param))
            }
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_connect(&mut self, result: GatewayResult, notice: ConnectNotice) -> Transition {
        if let Err(code) = result {
            if !self.owns_error("join", code) {
                return Transition::Wait;
            }
            return match code {
                GatewayCode::Failed | GatewayCode::Timeout => {
                    warn!("coordinator unreachable: {}", code);
                    self.note_failure(Step::StartChild, code.into());
                    Transition::Enter(SessionState::ConnectFail)
                }
                _ => Transition::Fail(Step::StartChild, code.into()),
            };
        }

        match notice {
            ConnectNotice::Started => Transition::Wait,
            ConnectNotice::Connected { aid } => {
                self.own_aid = aid;
                info!("joined as aid {}", aid);
                if self.chain == Some(Phase::Setup) {
                    Transition::Next(Step::StartChildMp)
                } else {
                    Transition::Wait
                }
            }
            ConnectNotice::Disconnected => {
                if !self.owns_link_event() {
                    debug!("disconnect notice in {}", self.state);
                    return Transition::Wait;
                }
                warn!("coordinator dropped this peer");
                Transition::Fail(Step::Link, crate::ledger::ErrorCode::Disconnected)
            }
            ConnectNotice::BeaconLost => {
                debug!("coordinator beacon lost");
                Transition::Wait
            }
            ConnectNotice::DisconnectedByLocal => Transition::Wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SessionConfig;
    use crate::ledger::ErrorCode;
    use crate::session::WhSession;
    use crate::state::{ConnectMode, SessionState};
    use bytes::Bytes;
    use wh_gateway::{
        AuthMode, BeaconDescriptor, ConnectNotice, GameAttributes, GameInfo, GatewayCode,
        GatewayEvent, KeyMaterial, KeyMode, LinkLevel, MacAddress, MpNotice, Request,
        RequestKind, SimGateway,
    };

    fn idle_session() -> WhSession<SimGateway> {
        let mut session = WhSession::new(SimGateway::new(), SessionConfig::default());
        session.initialize().unwrap();
        session.handle_event(GatewayEvent::Initialized { result: Ok(()) });
        session.gateway_mut().take_requests();
        session
    }

    fn coordinator() -> BeaconDescriptor {
        BeaconDescriptor {
            bssid: MacAddress([2, 0, 0, 0, 0, 1]),
            ssid: Bytes::new(),
            channel: 7,
            beacon_period: 200,
            link_level: LinkLevel::Level3,
            game_info: Some(GameInfo::new(
                SessionConfig::default().ggid,
                1,
                GameAttributes::ENTRY,
            )),
        }
    }

    fn connected(aid: u16) -> GatewayEvent {
        GatewayEvent::Connect {
            result: Ok(()),
            notice: ConnectNotice::Connected { aid },
        }
    }

    #[test]
    fn test_known_target_join_chain() {
        let mut session = idle_session();
        session
            .connect_to_known(ConnectMode::MpChild, coordinator())
            .unwrap();
        assert_eq!(session.state(), SessionState::Busy);

        session.handle_event(connected(4));
        assert_eq!(session.state(), SessionState::Busy);
        session.handle_event(GatewayEvent::Mp {
            result: Ok(()),
            notice: MpNotice::Started,
        });
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.own_aid(), 4);

        match &session.gateway().requests()[0] {
            Request::StartConnect { ssid, auth, .. } => {
                assert_eq!(ssid.len(), wh_gateway::SSID_LENGTH);
                assert_eq!(*auth, AuthMode::OpenSystem);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_child_key_switches_to_shared_key() {
        let mut session = idle_session();
        session
            .set_child_key_generator(|_: &BeaconDescriptor| KeyMaterial {
                mode: KeyMode::Bits104,
                key: Bytes::from_static(b"0123456789abc"),
            })
            .unwrap();
        session
            .connect_to_known(ConnectMode::DsChild, coordinator())
            .unwrap();
        session.handle_event(GatewayEvent::KeySet { result: Ok(()) });
        assert_eq!(
            session.gateway().request_kinds(),
            vec![RequestKind::SetKey, RequestKind::StartConnect]
        );
        assert!(matches!(
            session.gateway().last_request(),
            Some(Request::StartConnect {
                auth: AuthMode::SharedKey,
                ..
            })
        ));
    }

    #[test]
    fn test_timeout_is_connect_fail() {
        let mut session = idle_session();
        session
            .connect_to_known(ConnectMode::MpChild, coordinator())
            .unwrap();
        session.handle_event(GatewayEvent::Connect {
            result: Err(GatewayCode::Timeout),
            notice: ConnectNotice::Started,
        });
        assert_eq!(session.state(), SessionState::ConnectFail);
        assert_eq!(
            session.last_error(),
            Some(ErrorCode::Gateway(GatewayCode::Timeout))
        );
    }

    #[test]
    fn test_full_coordinator_is_an_error() {
        let mut session = idle_session();
        session
            .connect_to_known(ConnectMode::MpChild, coordinator())
            .unwrap();
        session.handle_event(GatewayEvent::Connect {
            result: Err(GatewayCode::OverMaxEntry),
            notice: ConnectNotice::Started,
        });
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn test_parent_side_disconnect_is_recorded() {
        let mut session = idle_session();
        session
            .connect_to_known(ConnectMode::MpChild, coordinator())
            .unwrap();
        session.handle_event(connected(1));
        session.handle_event(GatewayEvent::Mp {
            result: Ok(()),
            notice: MpNotice::Started,
        });

        session.handle_event(GatewayEvent::Connect {
            result: Ok(()),
            notice: ConnectNotice::BeaconLost,
        });
        assert_eq!(session.state(), SessionState::Connected);

        session.handle_event(GatewayEvent::Connect {
            result: Ok(()),
            notice: ConnectNotice::Disconnected,
        });
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.last_error(), Some(ErrorCode::Disconnected));
    }

    #[test]
    fn test_rejects_parent_mode() {
        let mut session = idle_session();
        assert!(session
            .connect_to_known(ConnectMode::DsParent, coordinator())
            .is_err());
        assert!(session
            .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 20)
            .is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }
}
