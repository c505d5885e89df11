//! Core session object for the wh connection layer.
//!
//! `WhSession` owns the gateway and turns fire-and-accept requests into one
//! observable `SessionState`. Entry operations validate the state, set up the
//! chain and issue its first step; completion events go through
//! [`WhSession::handle_event`], which maps each event to a [`Transition`] and
//! keeps issuing steps until the chain waits, concludes, or fails.

use crate::config::SessionConfig;
use crate::data::{SendCallback, SendOutcome};
use crate::error::SessionError;
use crate::ledger::{ErrorCode, ErrorLedger, LedgerEntry};
use crate::measure::ChannelSurvey;
use crate::scan::ScanRun;
use crate::state::{ConnectMode, SessionState, Sharing};
use crate::step::{Phase, Step, Transition};
use crate::strategy::{
    AdmissionPolicy, AlternateProtocolDetector, ChildKeyGenerator, DataReceiver,
    IndicationObserver, ParentKeyGenerator,
};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, trace};
use wh_gateway::{
    AidBitmap, AllowedChannels, BeaconDescriptor, DataSet, Gateway, GatewayCode, GatewayEvent,
    KeyMaterial,
    LinkLevel, ParentParam, Request, SendTag, MAX_KEY_LENGTH,
};

/// Maximum user payload a coordinator can advertise
pub const MAX_USER_GAME_INFO: usize = 112;

/// Injected strategies, bound while the session is stopped or idle
#[derive(Default)]
pub(crate) struct Strategies {
    pub(crate) parent_key: Option<Box<dyn ParentKeyGenerator>>,
    pub(crate) child_key: Option<Box<dyn ChildKeyGenerator>>,
    pub(crate) admission: Option<Box<dyn AdmissionPolicy>>,
    pub(crate) receiver: Option<Box<dyn DataReceiver>>,
    pub(crate) indication: Option<Box<dyn IndicationObserver>>,
    pub(crate) alternate: Option<Box<dyn AlternateProtocolDetector>>,
}

/// One radio session
pub struct WhSession<G: Gateway> {
    pub(crate) gateway: G,
    pub(crate) config: SessionConfig,
    pub(crate) state: SessionState,
    /// Phase of the request chain in progress, if any
    pub(crate) chain: Option<Phase>,
    pub(crate) mode: Option<ConnectMode>,
    pub(crate) ledger: ErrorLedger,
    /// Joined peers; bit 0 is the coordinator
    pub(crate) bitmap: AidBitmap,
    pub(crate) own_aid: u16,
    pub(crate) parent_param: Option<ParentParam>,
    pub(crate) target: Option<BeaconDescriptor>,
    pub(crate) scan: Option<ScanRun>,
    pub(crate) survey: ChannelSurvey,
    pub(crate) rng: StdRng,
    pub(crate) in_flight: BTreeMap<SendTag, SendCallback>,
    pub(crate) next_tag: u64,
    pub(crate) dataset: Option<DataSet>,
    pub(crate) data_sharing_active: bool,
    pub(crate) key_sharing_active: bool,
    pub(crate) alternate_detection: bool,
    pub(crate) strategies: Strategies,
    state_tx: watch::Sender<SessionState>,
}

impl<G: Gateway> WhSession<G> {
    /// Create a stopped session driving `gateway`
    pub fn new(gateway: G, config: SessionConfig) -> Self {
        let seed = config
            .rng_seed
            .unwrap_or_else(|| gateway.tick_count() ^ gateway.mac_address().to_u64());
        let (state_tx, _) = watch::channel(SessionState::Stop);
        Self {
            gateway,
            config,
            state: SessionState::Stop,
            chain: None,
            mode: None,
            ledger: ErrorLedger::new(),
            bitmap: AidBitmap::PARENT_ONLY,
            own_aid: 0,
            parent_param: None,
            target: None,
            scan: None,
            survey: ChannelSurvey::new(),
            rng: StdRng::seed_from_u64(seed),
            in_flight: BTreeMap::new(),
            next_tag: 1,
            dataset: None,
            data_sharing_active: false,
            key_sharing_active: false,
            alternate_detection: false,
            strategies: Strategies::default(),
            state_tx,
        }
    }

    // ---- configuration -------------------------------------------------

    fn expect_configurable(&self, operation: &'static str) -> Result<(), SessionError> {
        self.expect_state(operation, &[SessionState::Stop, SessionState::Idle])
    }

    /// Set the application identifier
    pub fn set_ggid(&mut self, ggid: u32) -> Result<(), SessionError> {
        self.expect_configurable("set_ggid")?;
        self.config.ggid = ggid;
        Ok(())
    }

    /// Set the connection SSID presented when joining
    pub fn set_ssid(&mut self, ssid: impl Into<String>) -> Result<(), SessionError> {
        self.expect_configurable("set_ssid")?;
        self.config.ssid = ssid.into();
        Ok(())
    }

    /// Set the user payload advertised by the coordinator
    pub fn set_user_game_info(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.expect_configurable("set_user_game_info")?;
        let payload = payload.into();
        if payload.len() > MAX_USER_GAME_INFO {
            return Err(SessionError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_USER_GAME_INFO,
            });
        }
        self.config.user_game_info = payload;
        Ok(())
    }

    /// Set the coordinator key generator
    pub fn set_parent_key_generator<T>(&mut self, generator: T) -> Result<(), SessionError>
    where
        T: ParentKeyGenerator + 'static,
    {
        self.expect_configurable("set_parent_key_generator")?;
        self.strategies.parent_key = Some(Box::new(generator));
        Ok(())
    }

    /// Set the peer key generator; joins then use shared-key authentication
    pub fn set_child_key_generator<T>(&mut self, generator: T) -> Result<(), SessionError>
    where
        T: ChildKeyGenerator + 'static,
    {
        self.expect_configurable("set_child_key_generator")?;
        self.strategies.child_key = Some(Box::new(generator));
        Ok(())
    }

    /// Set the admission predicate for joining peers
    pub fn set_admission_policy<T>(&mut self, policy: T) -> Result<(), SessionError>
    where
        T: AdmissionPolicy + 'static,
    {
        self.expect_configurable("set_admission_policy")?;
        self.strategies.admission = Some(Box::new(policy));
        Ok(())
    }

    /// Set the direct datagram receiver
    pub fn set_receiver<T>(&mut self, receiver: T) -> Result<(), SessionError>
    where
        T: DataReceiver + 'static,
    {
        self.expect_configurable("set_receiver")?;
        self.strategies.receiver = Some(Box::new(receiver));
        Ok(())
    }

    /// Set the indication observer
    pub fn set_indication_observer<T>(&mut self, observer: T) -> Result<(), SessionError>
    where
        T: IndicationObserver + 'static,
    {
        self.expect_configurable("set_indication_observer")?;
        self.strategies.indication = Some(Box::new(observer));
        Ok(())
    }

    /// Set the alternate-protocol detector used while detection is on
    pub fn set_alternate_detector<T>(&mut self, detector: T) -> Result<(), SessionError>
    where
        T: AlternateProtocolDetector + 'static,
    {
        self.expect_configurable("set_alternate_detector")?;
        self.strategies.alternate = Some(Box::new(detector));
        Ok(())
    }

    // ---- introspection -------------------------------------------------

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Watch channel following every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Connect mode of the current (or last) session
    pub fn connect_mode(&self) -> Option<ConnectMode> {
        self.mode
    }

    /// Last recorded error code
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.ledger.last_code()
    }

    /// Last recorded error with the step that raised it
    pub fn last_failure(&self) -> Option<LedgerEntry> {
        self.ledger.last()
    }

    /// Joined peers; bit 0 is the coordinator itself
    pub fn connection_bitmap(&self) -> AidBitmap {
        self.bitmap
    }

    /// Own association id (0 as coordinator)
    pub fn own_aid(&self) -> u16 {
        self.own_aid
    }

    /// Current link quality
    pub fn link_level(&self) -> LinkLevel {
        self.gateway.link_level()
    }

    /// Channels the radio may use
    pub fn allowed_channels(&self) -> AllowedChannels {
        AllowedChannels::from_raw(self.gateway.allowed_channels())
    }

    /// Active configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Sends still waiting for their completion
    pub fn pending_sends(&self) -> usize {
        self.in_flight.len()
    }

    /// The gateway
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The gateway, mutably
    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    // ---- dispatch ------------------------------------------------------

    /// Handle one event from the gateway's dispatch path
    pub fn handle_event(&mut self, event: GatewayEvent) {
        if event.is_periodic() {
            trace!("event {:?}", event);
        } else {
            debug!("event {:?} in state {}", event, self.state);
        }

        let transition = match event {
            GatewayEvent::Initialized { result } => self.on_bring_up(Step::Initialize, result),
            GatewayEvent::Enabled { result } => self.on_bring_up(Step::Enable, result),
            GatewayEvent::PoweredOn { result } => self.on_bring_up(Step::PowerOn, result),
            GatewayEvent::ParentParamSet { result } => self.on_parent_param_set(result),
            GatewayEvent::KeySet { result } => self.on_key_set(result),
            GatewayEvent::Parent { result, notice } => self.on_parent(result, notice),
            GatewayEvent::ParentEnded { result } => self.on_parent_ended(result),
            GatewayEvent::Scan { result, notice } => self.on_scan(result, notice),
            GatewayEvent::ScanEnded { result } => self.on_scan_ended(result),
            GatewayEvent::Connect { result, notice } => self.on_connect(result, notice),
            GatewayEvent::Disconnected { result, aids } => self.on_disconnected(result, aids),
            GatewayEvent::Mp { result, notice } => self.on_mp(result, notice),
            GatewayEvent::MpEnded { result } => self.on_mp_ended(result),
            GatewayEvent::ChannelMeasured {
                result,
                channel,
                busy_ratio,
            } => self.on_channel_measured(result, channel, busy_ratio),
            GatewayEvent::PortSend { result, tag } => self.on_port_send(result, tag),
            GatewayEvent::PortRecv { result, notice } => self.on_port_recv(result, notice),
            GatewayEvent::Reset { result } => self.on_reset(result),
            GatewayEvent::PoweredOff { result } => self.on_shutdown(Step::PowerOff, result),
            GatewayEvent::Disabled { result } => self.on_shutdown(Step::Disable, result),
            GatewayEvent::Ended { result } => self.on_shutdown(Step::End, result),
            GatewayEvent::Indication { result, kind } => self.on_indication(result, kind),
        };

        if let Err(e) = self.advance(transition) {
            debug!("chain stopped: {}", e);
        }
    }

    /// Start a chain at `step`
    pub(crate) fn begin(&mut self, step: Step) -> Result<(), SessionError> {
        self.chain = Some(step.phase());
        let transition = self.issue(step);
        self.advance(transition)
    }

    /// Run transitions until the chain waits or concludes.
    ///
    /// Returns the first failure hit on the way, after its policy was applied.
    pub(crate) fn advance(&mut self, mut transition: Transition) -> Result<(), SessionError> {
        let mut first_failure = None;
        loop {
            transition = match transition {
                Transition::Wait => break,
                Transition::Enter(state) => {
                    self.conclude(state);
                    break;
                }
                Transition::Next(step) => self.issue(step),
                Transition::Fail(step, code) => {
                    first_failure.get_or_insert(SessionError::Failed { step, code });
                    self.fail(step, code)
                }
            };
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Issue one step of the transition table
    pub(crate) fn issue(&mut self, step: Step) -> Transition {
        match step {
            Step::InitSystem
            | Step::Initialize
            | Step::Enable
            | Step::PowerOn
            | Step::EnableIndications
            | Step::PowerOff
            | Step::Disable
            | Step::End => self.issue_radio(step),
            Step::SetParentParam
            | Step::SetParentKey
            | Step::StartParent
            | Step::StartParentMp => self.issue_parent(step),
            Step::StartScan | Step::EndScan => self.issue_scan(step),
            Step::SetChildKey | Step::StartChild | Step::StartChildMp => self.issue_child(step),
            Step::StartDataSharing | Step::StartKeySharing => self.activate_sharing(step),
            Step::MeasureChannel => self.issue_measure(),
            Step::EndKeySharing
            | Step::EndDataSharing
            | Step::EndMp
            | Step::EndParent
            | Step::EndChild
            | Step::Reset => self.issue_teardown(step),
            Step::Link
            | Step::RejectPeer
            | Step::DisconnectPeers
            | Step::SendData
            | Step::Receive
            | Step::StepDataSharing
            | Step::ReadKeySet
            | Step::Indication => {
                debug!("{:?} does not belong to a chain", step);
                Transition::Wait
            }
        }
    }

    /// Queue `request`; a refusal fails `step`
    pub(crate) fn submit(&mut self, step: Step, request: Request) -> Transition {
        match self.gateway.submit(request) {
            Ok(()) => {
                trace!("{:?} queued", step);
                Transition::Wait
            }
            Err(code) => Transition::Fail(step, code.into()),
        }
    }

    /// Queue key material for `step`
    pub(crate) fn submit_key(&mut self, step: Step, key: KeyMaterial) -> Transition {
        if key.key.len() > MAX_KEY_LENGTH {
            return Transition::Fail(step, GatewayCode::InvalidParam.into());
        }
        self.submit(step, Request::SetKey(key))
    }

    /// Record a failure and pick the follow-up for the current phase
    fn fail(&mut self, step: Step, code: ErrorCode) -> Transition {
        self.ledger.record(step, code, self.state);
        let phase = self.chain.unwrap_or_else(|| step.phase());
        let next = phase.on_failure();
        if next == Transition::Next(Step::Reset) {
            debug!("teardown failed at {:?}, forcing reset", step);
            self.chain = Some(Phase::Recovery);
            self.scan = None;
        }
        next
    }

    /// Record a failure without changing state
    pub(crate) fn note_failure(&mut self, step: Step, code: ErrorCode) {
        self.ledger.record(step, code, self.state);
    }

    /// Conclude the current chain in `state`
    pub(crate) fn conclude(&mut self, state: SessionState) {
        if self.state == SessionState::Fatal {
            debug!("staying fatal, {} refused", state);
            return;
        }
        self.chain = None;
        if state.is_base() {
            self.clear_link();
        }
        self.set_state(state);
    }

    /// True when a chain of `phase` is in progress; logs stray completions
    pub(crate) fn expects(&self, phase: Phase, event: &str) -> bool {
        if self.chain == Some(phase) {
            return true;
        }
        debug!("ignoring {} outside {:?} (chain {:?})", event, phase, self.chain);
        false
    }

    /// True when an error completion of a setup or link request belongs to
    /// the running connect chain or to an established link; logs the rest
    pub(crate) fn owns_error(&self, event: &str, code: GatewayCode) -> bool {
        if self.owns_link_event() {
            return true;
        }
        debug!(
            "ignoring {} error {} in {} (chain {:?})",
            event, code, self.state, self.chain
        );
        false
    }

    /// A connect chain is running or the link is up
    pub(crate) fn owns_link_event(&self) -> bool {
        match self.chain {
            Some(Phase::Setup) => true,
            None => self.state.is_linked(),
            _ => false,
        }
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "wh state change");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    pub(crate) fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    pub(crate) fn is_parent(&self) -> bool {
        self.mode.map_or(false, ConnectMode::is_parent)
    }

    pub(crate) fn sharing(&self) -> Sharing {
        self.mode.map_or(Sharing::Direct, ConnectMode::sharing)
    }

    /// Clear per-link scratch; pending sends complete as cancelled
    pub(crate) fn clear_link(&mut self) {
        self.bitmap = AidBitmap::PARENT_ONLY;
        self.own_aid = 0;
        self.parent_param = None;
        self.target = None;
        self.scan = None;
        self.survey = ChannelSurvey::new();
        self.dataset = None;
        self.data_sharing_active = false;
        self.key_sharing_active = false;
        for (tag, callback) in std::mem::take(&mut self.in_flight) {
            debug!("send {} cancelled", tag);
            callback(SendOutcome::Cancelled);
        }
    }

    pub(crate) fn user_game_info(&self) -> Bytes {
        Bytes::from(self.config.user_game_info.clone())
    }
}

impl<G: Gateway> fmt::Debug for WhSession<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhSession")
            .field("state", &self.state)
            .field("chain", &self.chain)
            .field("mode", &self.mode)
            .field("bitmap", &self.bitmap)
            .field("own_aid", &self.own_aid)
            .field("last_error", &self.ledger.last())
            .field("pending_sends", &self.in_flight.len())
            .finish()
    }
}
