//! End-to-end session scenarios against the in-memory gateway.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wh_gateway::{
    AidBitmap, BeaconDescriptor, ConnectNotice, GameAttributes, GameInfo, GatewayCode,
    GatewayEvent, IndicationKind, LinkLevel, MacAddress, MpNotice, ParentNotice, Request,
    RequestKind, ScanNotice, SimGateway,
};
use wh_session::{
    shared, ConnectMode, Discovery, Dispatcher, ErrorCode, JoinRequest, SendOutcome,
    SessionConfig, SessionError, SessionState, StepOutcome, WhSession,
};

struct Harness {
    session: WhSession<SimGateway>,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with(SimGateway::new(), 7)
    }

    fn with(gateway: SimGateway, seed: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SessionConfig {
            rng_seed: Some(seed),
            ..SessionConfig::default()
        };
        Self {
            session: WhSession::new(gateway.with_responder(tx), config),
            events: rx,
        }
    }

    fn idle() -> Self {
        let mut h = Self::new();
        h.bring_up();
        h
    }

    fn bring_up(&mut self) {
        self.session.initialize().unwrap();
        self.pump();
        assert_eq!(self.session.state(), SessionState::Idle);
    }

    /// Deliver queued completions until the session goes quiet
    fn pump(&mut self) -> usize {
        self.pump_at_most(10_000)
    }

    fn pump_at_most(&mut self, limit: usize) -> usize {
        let mut handled = 0;
        while handled < limit {
            match self.events.try_recv() {
                Ok(event) => {
                    self.session.handle_event(event);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Throw away queued completions
    fn discard(&mut self) {
        while self.events.try_recv().is_ok() {}
    }

    fn state(&self) -> SessionState {
        self.session.state()
    }

    fn scanned_channels(&self) -> Vec<u8> {
        self.session
            .gateway()
            .requests()
            .iter()
            .filter_map(|r| match r {
                Request::StartScan(param) => Some(param.channel),
                _ => None,
            })
            .collect()
    }
}

fn coordinator_beacon(channel: u8) -> BeaconDescriptor {
    BeaconDescriptor {
        bssid: MacAddress([0x02, 0x09, 0xbf, 0x00, 0x00, 0x10]),
        ssid: Bytes::from_static(b"wh"),
        channel,
        beacon_period: 200,
        link_level: LinkLevel::Level3,
        game_info: Some(GameInfo::new(
            SessionConfig::default().ggid,
            1,
            GameAttributes::ENTRY,
        )),
    }
}

fn joined(aid: u16) -> GatewayEvent {
    GatewayEvent::Parent {
        result: Ok(()),
        notice: ParentNotice::Joined {
            aid,
            mac: MacAddress([0x02, 0, 0, 0, 0, aid as u8]),
            ssid: Bytes::new(),
        },
    }
}

fn linked(mode: ConnectMode) -> Harness {
    let mut h = Harness::idle();
    if mode.is_parent() {
        h.session.start_parent_connect(mode, 1, 6).unwrap();
    } else {
        h.session
            .connect_to_known(mode, coordinator_beacon(7))
            .unwrap();
    }
    h.pump();
    h
}

#[test]
fn coordinator_reaches_connected() {
    let mut h = Harness::idle();
    h.session
        .start_parent_connect(ConnectMode::MpParent, 1, 6)
        .unwrap();
    assert_eq!(h.state(), SessionState::Busy);

    h.pump();
    assert_eq!(h.state(), SessionState::Connected);
    assert_eq!(h.session.connect_mode(), Some(ConnectMode::MpParent));
    assert_eq!(h.session.own_aid(), 0);
    assert_eq!(h.session.connection_bitmap(), AidBitmap::PARENT_ONLY);
}

#[test]
fn refused_peer_is_dropped_immediately() {
    let mut h = Harness::idle();
    h.session
        .set_admission_policy(|request: &JoinRequest| request.aid != 3)
        .unwrap();
    h.session
        .start_parent_connect(ConnectMode::MpParent, 1, 6)
        .unwrap();
    h.pump();

    h.session.handle_event(joined(3));
    assert_eq!(
        h.session.gateway().last_request(),
        Some(&Request::Disconnect {
            aids: AidBitmap::single(3)
        })
    );
    assert!(!h.session.connection_bitmap().contains(3));

    h.session.handle_event(joined(4));
    h.pump();
    assert!(h.session.connection_bitmap().contains(4));
    assert_eq!(h.state(), SessionState::Connected);
}

#[test]
fn auto_connect_scans_until_told_to_stop() {
    let mut h = Harness::idle();
    h.session
        .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 0)
        .unwrap();

    h.pump_at_most(30);
    assert_eq!(h.state(), SessionState::Scanning);
    assert_eq!(h.session.last_error(), None);
    let channels = h.scanned_channels();
    assert_eq!(channels.len(), 31);
    assert_eq!(&channels[..7], &[1, 7, 13, 1, 7, 13, 1]);

    h.session.end_scan().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);
    assert_eq!(h.session.gateway().count(RequestKind::EndScan), 1);
    assert_eq!(h.session.gateway().count(RequestKind::StartConnect), 0);
}

#[test]
fn scan_visits_only_allowed_channels() {
    // channels 2, 9 and 14
    let gateway = SimGateway::new().with_allowed_channels(0x2102);
    let mut h = Harness::with(gateway, 1);
    h.bring_up();
    h.session
        .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 0)
        .unwrap();
    h.pump_at_most(8);

    assert_eq!(h.scanned_channels(), vec![2, 9, 14, 2, 9, 14, 2, 9, 14]);
}

#[test]
fn peer_disconnect_is_an_error() {
    let mut h = linked(ConnectMode::MpChild);
    assert_eq!(h.state(), SessionState::Connected);

    h.session.handle_event(GatewayEvent::Connect {
        result: Ok(()),
        notice: ConnectNotice::Disconnected,
    });
    assert_eq!(h.state(), SessionState::Error);
    assert_eq!(h.session.last_error(), Some(ErrorCode::Disconnected));

    // first error wins while failed
    h.session.handle_event(GatewayEvent::Indication {
        result: Err(GatewayCode::FifoError),
        kind: IndicationKind::LinkFault,
    });
    assert_eq!(h.session.last_error(), Some(ErrorCode::Disconnected));
}

#[test]
fn timed_out_join_is_retryable_after_reset() {
    let mut h = Harness::idle();
    h.session
        .connect_to_known(ConnectMode::MpChild, coordinator_beacon(7))
        .unwrap();
    h.discard();
    h.session.handle_event(GatewayEvent::Connect {
        result: Err(GatewayCode::Timeout),
        notice: ConnectNotice::Started,
    });
    assert_eq!(h.state(), SessionState::ConnectFail);
    assert!(h
        .session
        .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 0)
        .is_err());

    h.session.reset().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);

    h.session.gateway_mut().add_beacon(coordinator_beacon(7));
    h.session.gateway_mut().set_assigned_aid(5);
    h.session
        .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 0)
        .unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Connected);
    assert_eq!(h.session.own_aid(), 5);
}

fn drive_to(state: SessionState) -> Harness {
    let mut h = Harness::new();
    match state {
        SessionState::Stop => {}
        SessionState::Idle => h.bring_up(),
        SessionState::Scanning => {
            h.bring_up();
            h.session
                .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 0)
                .unwrap();
            h.pump_at_most(3);
        }
        SessionState::Busy => {
            h.bring_up();
            h.session
                .start_parent_connect(ConnectMode::DsParent, 1, 1)
                .unwrap();
        }
        SessionState::Connected => h = linked(ConnectMode::MpParent),
        SessionState::DataSharing => h = linked(ConnectMode::DsChild),
        SessionState::KeySharing => h = linked(ConnectMode::KsParent),
        SessionState::MeasureChannel => {
            h.bring_up();
            h.session.start_measure_channel().unwrap();
            h.pump();
        }
        SessionState::ConnectFail => {
            h.bring_up();
            h.session
                .connect_to_known(ConnectMode::MpChild, coordinator_beacon(7))
                .unwrap();
            h.discard();
            h.session.handle_event(GatewayEvent::Connect {
                result: Err(GatewayCode::Failed),
                notice: ConnectNotice::Started,
            });
        }
        SessionState::Error => {
            h = linked(ConnectMode::MpChild);
            h.session.handle_event(GatewayEvent::Connect {
                result: Ok(()),
                notice: ConnectNotice::Disconnected,
            });
        }
        SessionState::Fatal => {
            h.session
                .gateway_mut()
                .reject(RequestKind::Initialize, GatewayCode::Failed);
            assert!(h.session.initialize().is_err());
            h.session.gateway_mut().accept(RequestKind::Initialize);
        }
    }
    assert_eq!(h.state(), state);
    h
}

#[test]
fn reset_converges_to_idle_from_every_state() {
    for state in [
        SessionState::Stop,
        SessionState::Idle,
        SessionState::Scanning,
        SessionState::Busy,
        SessionState::Connected,
        SessionState::DataSharing,
        SessionState::KeySharing,
        SessionState::MeasureChannel,
        SessionState::ConnectFail,
        SessionState::Error,
        SessionState::Fatal,
    ] {
        let mut h = drive_to(state);
        h.session.reset().unwrap();
        h.pump();
        assert_eq!(h.state(), SessionState::Idle, "reset from {}", state);
        assert_eq!(h.session.pending_sends(), 0);
    }
}

#[test]
fn late_errors_leave_idle_alone() {
    let mut h = linked(ConnectMode::MpChild);
    h.session.reset().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);

    for event in [
        GatewayEvent::Connect {
            result: Err(GatewayCode::Timeout),
            notice: ConnectNotice::Started,
        },
        GatewayEvent::Connect {
            result: Ok(()),
            notice: ConnectNotice::Disconnected,
        },
        GatewayEvent::Scan {
            result: Err(GatewayCode::Failed),
            notice: ScanNotice::Started,
        },
        GatewayEvent::Mp {
            result: Err(GatewayCode::Failed),
            notice: MpNotice::Started,
        },
        GatewayEvent::Parent {
            result: Err(GatewayCode::Failed),
            notice: ParentNotice::Started,
        },
    ] {
        h.session.handle_event(event);
        assert_eq!(h.state(), SessionState::Idle);
    }
    assert_eq!(h.session.last_error(), None);
}

#[test]
fn scan_error_during_reset_does_not_stop_it() {
    let mut h = Harness::idle();
    h.session
        .connect_auto(ConnectMode::MpChild, MacAddress::BROADCAST, 0)
        .unwrap();
    h.pump_at_most(3);
    h.session.reset().unwrap();
    h.discard();

    h.session.handle_event(GatewayEvent::Scan {
        result: Err(GatewayCode::Failed),
        notice: ScanNotice::Started,
    });
    h.session.handle_event(GatewayEvent::Indication {
        result: Err(GatewayCode::FifoError),
        kind: IndicationKind::LinkFault,
    });
    assert_eq!(h.state(), SessionState::Busy);

    h.session.handle_event(GatewayEvent::Reset { result: Ok(()) });
    assert_eq!(h.state(), SessionState::Idle);
}

#[test]
fn send_failing_during_reset_still_reports() {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let mut h = linked(ConnectMode::MpParent);
    let sink = Arc::clone(&outcomes);
    let tag = h
        .session
        .send_data(Bytes::from_static(b"ping"), move |outcome| {
            sink.lock().unwrap().push(outcome)
        })
        .unwrap();
    h.session.reset().unwrap();
    h.discard();

    h.session.handle_event(GatewayEvent::PortSend {
        result: Err(GatewayCode::FifoError),
        tag,
    });
    assert_eq!(h.state(), SessionState::Busy);
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![SendOutcome::Failed(GatewayCode::FifoError)]
    );

    h.session.handle_event(GatewayEvent::Reset { result: Ok(()) });
    assert_eq!(h.state(), SessionState::Idle);
}

#[test]
fn fatal_holds_until_reset() {
    let mut h = drive_to(SessionState::Fatal);
    let failure = h.session.last_error();

    h.session.handle_event(GatewayEvent::Indication {
        result: Err(GatewayCode::FifoError),
        kind: IndicationKind::LinkFault,
    });
    h.session.handle_event(GatewayEvent::Mp {
        result: Err(GatewayCode::Failed),
        notice: MpNotice::Started,
    });
    assert_eq!(h.state(), SessionState::Fatal);
    assert_eq!(h.session.last_error(), failure);

    h.session.reset().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);
}

#[test]
fn coordinator_round_trip_needs_no_reset() {
    for channel in 1..=16u8 {
        for tgid in [0u16, 1, 0x7fff, u16::MAX] {
            let mut h = Harness::idle();
            h.session
                .start_parent_connect(ConnectMode::MpParent, tgid, channel)
                .unwrap();
            h.pump();
            assert_eq!(h.state(), SessionState::Connected);

            h.session.finalize().unwrap();
            h.pump();
            assert_eq!(h.state(), SessionState::Idle);
            assert_eq!(h.session.gateway().count(RequestKind::Reset), 0);
        }
    }
}

#[test]
fn child_teardown_leaves_coordinator() {
    let mut h = linked(ConnectMode::KsChild);
    assert_eq!(h.state(), SessionState::KeySharing);
    assert!(h.session.gateway().is_key_sharing());

    h.session.finalize().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);
    assert!(!h.session.gateway().is_key_sharing());
    assert_eq!(
        h.session.gateway().last_request(),
        Some(&Request::Disconnect {
            aids: AidBitmap::single(0)
        })
    );
}

#[test]
fn finalize_during_scan_stops_it() {
    let mut h = drive_to(SessionState::Scanning);
    h.session.finalize().unwrap();
    assert_eq!(h.state(), SessionState::Busy);
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);
}

#[test]
fn second_entry_is_rejected_while_busy_or_linked() {
    let mut h = Harness::idle();
    h.session
        .start_parent_connect(ConnectMode::MpParent, 1, 1)
        .unwrap();
    let requests = h.session.gateway().requests().len();

    assert!(matches!(
        h.session.start_parent_connect(ConnectMode::MpParent, 1, 1),
        Err(SessionError::InvalidState {
            state: SessionState::Busy,
            ..
        })
    ));
    assert!(h.session.start_measure_channel().is_err());
    assert!(h.session.shutdown().is_err());
    assert_eq!(h.session.gateway().requests().len(), requests);

    h.pump();
    assert!(h
        .session
        .start_parent_connect(ConnectMode::MpParent, 1, 1)
        .is_err());
    assert!(h.session.set_ggid(1).is_err());
}

#[test]
fn single_quietest_channel_is_picked() {
    let mut h = Harness::idle();
    for (channel, ratio) in [(1, 20), (7, 5), (13, 20)] {
        h.session.gateway_mut().set_busy_ratio(channel, ratio);
    }
    h.session.start_measure_channel().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::MeasureChannel);
    assert_eq!(h.session.resolve_channel(), Ok(7));
    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.session.resolve_channel().is_err());
}

#[test]
fn ties_are_spread_across_seeds() {
    let mut picked = BTreeSet::new();
    for seed in 0..64 {
        let mut h = Harness::with(SimGateway::new(), seed);
        h.bring_up();
        for (channel, ratio) in [(1, 40), (7, 10), (13, 10)] {
            h.session.gateway_mut().set_busy_ratio(channel, ratio);
        }
        h.session.start_measure_channel().unwrap();
        h.pump();
        picked.insert(h.session.resolve_channel().unwrap());
    }
    assert_eq!(picked, BTreeSet::from([7, 13]));
}

#[test]
fn unusable_radio_fails_measurement() {
    for (raw, code) in [
        (0x8000, ErrorCode::RadioNotInitialized),
        (0x0000, ErrorCode::NoRadio),
    ] {
        let mut h = Harness::with(SimGateway::new().with_allowed_channels(raw), 3);
        h.bring_up();
        assert!(h.session.start_measure_channel().is_err());
        assert_eq!(h.state(), SessionState::Error);
        assert_eq!(h.session.last_error(), Some(code));
    }
}

#[test]
fn data_sharing_peer_steps_each_cycle() {
    let mut h = linked(ConnectMode::DsChild);
    assert_eq!(h.state(), SessionState::DataSharing);
    assert_eq!(h.session.step_data_sharing(b"abc"), Ok(StepOutcome::Shared));
    assert_eq!(
        h.session.shared_contribution(0),
        Some(&Bytes::from_static(b"abc"))
    );
    assert_eq!(h.session.shared_contribution(3), None);
}

#[test]
fn manual_scan_reports_matches_and_alternate_protocol() {
    let found = Arc::new(Mutex::new(Vec::new()));
    let mut h = Harness::idle();
    let mut foreign = coordinator_beacon(13);
    foreign.bssid = MacAddress([0x02, 0, 0, 0, 0, 0x99]);
    foreign.game_info = None;
    h.session.gateway_mut().add_beacon(coordinator_beacon(7));
    h.session.gateway_mut().add_beacon(foreign);
    h.session
        .set_alternate_detector(|b: &BeaconDescriptor| b.game_info.is_none())
        .unwrap();
    h.session.set_alternate_detection(true);

    let sink = Arc::clone(&found);
    h.session
        .start_scan(
            move |b: &BeaconDescriptor, d: Discovery| sink.lock().unwrap().push((b.channel, d)),
            MacAddress::BROADCAST,
            0,
        )
        .unwrap();
    h.pump_at_most(3);
    assert_eq!(h.state(), SessionState::Scanning);
    assert_eq!(
        *found.lock().unwrap(),
        vec![(7, Discovery::Match), (13, Discovery::AlternateProtocol)]
    );

    h.session.end_scan().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Idle);
    assert_eq!(h.session.gateway().count(RequestKind::StartConnect), 0);
}

#[test]
fn shutdown_returns_to_stop() {
    let mut h = Harness::idle();
    h.session.shutdown().unwrap();
    h.pump();
    assert_eq!(h.state(), SessionState::Stop);
    assert!(h.session.initialize().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_drives_a_full_session() {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = shared(WhSession::new(
        SimGateway::new().with_responder(tx),
        SessionConfig::default(),
    ));
    let mut states = session.lock().await.subscribe();
    let handle = Dispatcher::new(Arc::clone(&session), rx).spawn();

    async fn reach(
        states: &mut tokio::sync::watch::Receiver<SessionState>,
        target: SessionState,
    ) {
        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == target),
        )
        .await;
        assert!(matches!(reached, Ok(Ok(_))), "never reached {}", target);
    }

    session.lock().await.initialize().unwrap();
    reach(&mut states, SessionState::Idle).await;

    session
        .lock()
        .await
        .start_parent_connect(ConnectMode::DsParent, 9, 7)
        .unwrap();
    reach(&mut states, SessionState::DataSharing).await;

    session.lock().await.handle_event(joined(2));
    assert!(session.lock().await.connection_bitmap().contains(2));

    session.lock().await.finalize().unwrap();
    reach(&mut states, SessionState::Idle).await;

    session.lock().await.shutdown().unwrap();
    reach(&mut states, SessionState::Stop).await;

    handle.abort();
}
