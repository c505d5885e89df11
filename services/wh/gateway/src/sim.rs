//! In-memory gateway for development and testing
//!
//! `SimGateway` records every accepted request and can be scripted to refuse
//! requests or fail synchronous calls. With a responder attached it also
//! answers each accepted request with a plausible successful completion on an
//! mpsc channel, which is enough to drive a whole session without a radio.

use crate::error::GatewayCode;
use crate::event::{
    ConnectNotice, GatewayEvent, GatewayResult, MpNotice, ParentNotice, ScanNotice,
};
use crate::gateway::Gateway;
use crate::request::{DataSharingParam, Request, RequestKind};
use crate::types::{
    AidBitmap, BeaconDescriptor, DataSet, KeySet, LinkLevel, MacAddress, MAX_AID, MAX_CHANNEL,
};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Synchronous gateway calls that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCall {
    /// [`Gateway::init_system`]
    InitSystem,
    /// [`Gateway::enable_indications`]
    EnableIndications,
    /// [`Gateway::start_data_sharing`]
    StartDataSharing,
    /// [`Gateway::step_data_sharing`]
    StepDataSharing,
    /// [`Gateway::end_data_sharing`]
    EndDataSharing,
    /// [`Gateway::start_key_sharing`]
    StartKeySharing,
    /// [`Gateway::end_key_sharing`]
    EndKeySharing,
    /// [`Gateway::read_key_set`]
    ReadKeySet,
}

/// Answers accepted requests with successful completions
#[derive(Debug)]
struct Responder {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    beacons: Vec<BeaconDescriptor>,
    busy: [u8; MAX_CHANNEL as usize],
    assigned_aid: u16,
}

impl Responder {
    fn answer(&mut self, request: &Request) -> Vec<GatewayEvent> {
        let ok: GatewayResult = Ok(());
        match request {
            Request::Initialize => vec![GatewayEvent::Initialized { result: ok }],
            Request::Enable => vec![GatewayEvent::Enabled { result: ok }],
            Request::PowerOn => vec![GatewayEvent::PoweredOn { result: ok }],
            Request::SetParentParam(_) => vec![GatewayEvent::ParentParamSet { result: ok }],
            Request::SetKey(_) => vec![GatewayEvent::KeySet { result: ok }],
            Request::StartParent => vec![GatewayEvent::Parent {
                result: ok,
                notice: ParentNotice::Started,
            }],
            Request::EndParent => vec![GatewayEvent::ParentEnded { result: ok }],
            Request::StartScan(param) => {
                let found = self
                    .beacons
                    .iter()
                    .find(|b| b.channel == param.channel && param.bssid.accepts(&b.bssid));
                let notice = match found {
                    Some(beacon) => ScanNotice::Found(Box::new(beacon.clone())),
                    None => ScanNotice::NotFound,
                };
                vec![GatewayEvent::Scan { result: ok, notice }]
            }
            Request::EndScan => vec![GatewayEvent::ScanEnded { result: ok }],
            Request::StartConnect { .. } => vec![GatewayEvent::Connect {
                result: ok,
                notice: ConnectNotice::Connected {
                    aid: self.assigned_aid,
                },
            }],
            Request::Disconnect { aids } => vec![GatewayEvent::Disconnected {
                result: ok,
                aids: *aids,
            }],
            Request::StartMp(_) => vec![GatewayEvent::Mp {
                result: ok,
                notice: MpNotice::Started,
            }],
            Request::EndMp => vec![GatewayEvent::MpEnded { result: ok }],
            Request::SetMpData { tag, .. } => vec![GatewayEvent::PortSend {
                result: ok,
                tag: *tag,
            }],
            Request::MeasureChannel(param) => {
                let idx = usize::from(param.channel.clamp(1, MAX_CHANNEL) - 1);
                vec![GatewayEvent::ChannelMeasured {
                    result: ok,
                    channel: param.channel,
                    busy_ratio: self.busy[idx],
                }]
            }
            Request::Reset => vec![GatewayEvent::Reset { result: ok }],
            Request::PowerOff => vec![GatewayEvent::PoweredOff { result: ok }],
            Request::Disable => vec![GatewayEvent::Disabled { result: ok }],
            Request::End => vec![GatewayEvent::Ended { result: ok }],
        }
    }
}

/// Accepted requests kept for inspection by default
pub const DEFAULT_REQUEST_HISTORY: usize = 1024;

/// In-memory gateway implementation
#[derive(Debug)]
pub struct SimGateway {
    requests: Vec<Request>,
    history_limit: usize,
    rejections: HashMap<RequestKind, GatewayCode>,
    sync_failures: HashMap<SyncCall, GatewayCode>,
    allowed: u16,
    mac: MacAddress,
    tick: u64,
    link_level: LinkLevel,
    beacon_period: u16,
    scan_period: u16,
    data_sets: VecDeque<Result<DataSet, GatewayCode>>,
    key_set: KeySet,
    sharing: Option<DataSharingParam>,
    key_sharing_port: Option<u16>,
    indications_enabled: bool,
    responder: Option<Responder>,
}

impl SimGateway {
    /// Create a new in-memory gateway allowing channels 1, 7 and 13
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            history_limit: DEFAULT_REQUEST_HISTORY,
            rejections: HashMap::new(),
            sync_failures: HashMap::new(),
            allowed: 0x1041,
            mac: MacAddress([0x00, 0x09, 0xbf, 0x00, 0x00, 0x01]),
            tick: 0,
            link_level: LinkLevel::Level3,
            beacon_period: 200,
            scan_period: 30,
            data_sets: VecDeque::new(),
            key_set: KeySet::default(),
            sharing: None,
            key_sharing_port: None,
            indications_enabled: false,
            responder: None,
        }
    }

    /// Answer accepted requests with successful completions on `tx`
    pub fn with_responder(mut self, tx: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        self.responder = Some(Responder {
            tx,
            beacons: Vec::new(),
            busy: [0; MAX_CHANNEL as usize],
            assigned_aid: 1,
        });
        self
    }

    /// Keep at most `limit` accepted requests; older ones are dropped first
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self.trim_history();
        self
    }

    /// Replace the raw allowed-channel pattern
    pub fn with_allowed_channels(mut self, raw: u16) -> Self {
        self.allowed = raw;
        self
    }

    /// Replace the hardware address
    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac = mac;
        self
    }

    /// Replace the frame counter
    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// Make the responder report this beacon when its channel is scanned
    pub fn add_beacon(&mut self, beacon: BeaconDescriptor) {
        if let Some(responder) = self.responder.as_mut() {
            responder.beacons.push(beacon);
        }
    }

    /// Busy ratio the responder reports for `channel`
    pub fn set_busy_ratio(&mut self, channel: u8, ratio: u8) {
        if let Some(responder) = self.responder.as_mut() {
            if (1..=MAX_CHANNEL).contains(&channel) {
                responder.busy[usize::from(channel - 1)] = ratio;
            }
        }
    }

    /// Association id the responder hands out on join
    pub fn set_assigned_aid(&mut self, aid: u16) {
        if let Some(responder) = self.responder.as_mut() {
            responder.assigned_aid = aid.clamp(1, MAX_AID);
        }
    }

    /// Refuse every request of `kind` with `code`
    pub fn reject(&mut self, kind: RequestKind, code: GatewayCode) {
        self.rejections.insert(kind, code);
    }

    /// Stop refusing requests of `kind`
    pub fn accept(&mut self, kind: RequestKind) {
        self.rejections.remove(&kind);
    }

    /// Fail every `call` with `code`
    pub fn fail_sync(&mut self, call: SyncCall, code: GatewayCode) {
        self.sync_failures.insert(call, code);
    }

    /// Stop failing `call`
    pub fn clear_sync_failure(&mut self, call: SyncCall) {
        self.sync_failures.remove(&call);
    }

    /// Queue the outcome of the next data-sharing step
    pub fn push_data_set(&mut self, outcome: Result<DataSet, GatewayCode>) {
        self.data_sets.push_back(outcome);
    }

    /// Replace the key table
    pub fn set_key_set(&mut self, key_set: KeySet) {
        self.key_set = key_set;
    }

    fn trim_history(&mut self) {
        if self.requests.len() > self.history_limit {
            let excess = self.requests.len() - self.history_limit;
            self.requests.drain(..excess);
        }
    }

    /// Accepted requests still in the history, oldest first
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Most recently accepted request
    pub fn last_request(&self) -> Option<&Request> {
        self.requests.last()
    }

    /// Drain the request log
    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    /// Kinds of every accepted request, oldest first
    pub fn request_kinds(&self) -> Vec<RequestKind> {
        self.requests.iter().map(Request::kind).collect()
    }

    /// Number of accepted requests of `kind`
    pub fn count(&self, kind: RequestKind) -> usize {
        self.requests.iter().filter(|r| r.kind() == kind).count()
    }

    /// Active data-sharing parameters
    pub fn data_sharing(&self) -> Option<&DataSharingParam> {
        self.sharing.as_ref()
    }

    /// Key sharing is active
    pub fn is_key_sharing(&self) -> bool {
        self.key_sharing_port.is_some()
    }

    /// Indications are routed
    pub fn indications_enabled(&self) -> bool {
        self.indications_enabled
    }

    fn sync(&self, call: SyncCall) -> Result<(), GatewayCode> {
        match self.sync_failures.get(&call) {
            Some(code) => {
                debug!("sim gateway fails {:?} with {}", call, code);
                Err(*code)
            }
            None => Ok(()),
        }
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway for SimGateway {
    fn submit(&mut self, request: Request) -> Result<(), GatewayCode> {
        let kind = request.kind();
        if let Some(code) = self.rejections.get(&kind) {
            debug!("sim gateway refuses {:?}: {}", kind, code);
            return Err(*code);
        }

        trace!("sim gateway accepted {:?}", kind);
        if let Some(responder) = self.responder.as_mut() {
            for event in responder.answer(&request) {
                if responder.tx.send(event).is_err() {
                    warn!("sim gateway event channel closed, dropping completion for {:?}", kind);
                }
            }
        }
        if matches!(request, Request::Reset) {
            self.sharing = None;
            self.key_sharing_port = None;
        }
        self.requests.push(request);
        self.trim_history();
        Ok(())
    }

    fn init_system(&mut self) -> Result<(), GatewayCode> {
        self.sync(SyncCall::InitSystem)
    }

    fn enable_indications(&mut self) -> Result<(), GatewayCode> {
        self.sync(SyncCall::EnableIndications)?;
        self.indications_enabled = true;
        Ok(())
    }

    fn allowed_channels(&self) -> u16 {
        self.allowed
    }

    fn start_data_sharing(&mut self, param: &DataSharingParam) -> Result<(), GatewayCode> {
        self.sync(SyncCall::StartDataSharing)?;
        self.sharing = Some(*param);
        Ok(())
    }

    fn step_data_sharing(&mut self, contribution: &[u8]) -> Result<DataSet, GatewayCode> {
        self.sync(SyncCall::StepDataSharing)?;
        if self.sharing.is_none() {
            return Err(GatewayCode::IllegalState);
        }
        match self.data_sets.pop_front() {
            Some(outcome) => outcome,
            None => Ok(DataSet {
                bitmap: AidBitmap::PARENT_ONLY,
                slots: vec![Some(Bytes::copy_from_slice(contribution))],
            }),
        }
    }

    fn end_data_sharing(&mut self) -> Result<(), GatewayCode> {
        self.sync(SyncCall::EndDataSharing)?;
        self.sharing = None;
        Ok(())
    }

    fn start_key_sharing(&mut self, port: u16) -> Result<(), GatewayCode> {
        self.sync(SyncCall::StartKeySharing)?;
        self.key_sharing_port = Some(port);
        Ok(())
    }

    fn end_key_sharing(&mut self) -> Result<(), GatewayCode> {
        self.sync(SyncCall::EndKeySharing)?;
        self.key_sharing_port = None;
        Ok(())
    }

    fn read_key_set(&self) -> Result<KeySet, GatewayCode> {
        self.sync(SyncCall::ReadKeySet)?;
        Ok(self.key_set.clone())
    }

    fn link_level(&self) -> LinkLevel {
        self.link_level
    }

    fn dispersion_beacon_period(&mut self) -> u16 {
        self.beacon_period
    }

    fn dispersion_scan_period(&mut self) -> u16 {
        self.scan_period
    }

    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn tick_count(&self) -> u64 {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameAttributes, GameInfo, ScanParam};

    #[test]
    fn test_records_and_rejects() {
        let mut gw = SimGateway::new();
        assert!(gw.submit(Request::StartParent).is_ok());
        gw.reject(RequestKind::EndParent, GatewayCode::IllegalState);
        assert_eq!(gw.submit(Request::EndParent), Err(GatewayCode::IllegalState));
        assert_eq!(gw.request_kinds(), vec![RequestKind::StartParent]);
        gw.accept(RequestKind::EndParent);
        assert!(gw.submit(Request::EndParent).is_ok());
        assert_eq!(gw.count(RequestKind::EndParent), 1);
    }

    #[test]
    fn test_history_keeps_newest_requests() {
        let mut gateway = SimGateway::new().with_history_limit(2);
        gateway.submit(Request::Initialize).unwrap();
        gateway.submit(Request::EndScan).unwrap();
        gateway.submit(Request::Reset).unwrap();

        assert_eq!(
            gateway.request_kinds(),
            vec![RequestKind::EndScan, RequestKind::Reset]
        );
        assert_eq!(gateway.count(RequestKind::Initialize), 0);
    }

    #[test]
    fn test_step_without_sharing_is_illegal() {
        let mut gw = SimGateway::new();
        assert_eq!(gw.step_data_sharing(b"x"), Err(GatewayCode::IllegalState));
    }

    #[tokio::test]
    async fn test_responder_reports_beacon_on_its_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut gw = SimGateway::new().with_responder(tx);
        let beacon = BeaconDescriptor {
            bssid: MacAddress([2, 0, 0, 0, 0, 9]),
            ssid: Bytes::new(),
            channel: 7,
            beacon_period: 200,
            link_level: LinkLevel::Level2,
            game_info: Some(GameInfo::new(1, 1, GameAttributes::ENTRY)),
        };
        gw.add_beacon(beacon.clone());

        let scan = |channel| {
            Request::StartScan(ScanParam {
                channel,
                bssid: MacAddress::BROADCAST,
                scan_period: 30,
            })
        };
        gw.submit(scan(1)).unwrap();
        gw.submit(scan(7)).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(GatewayEvent::Scan {
                result: Ok(()),
                notice: ScanNotice::NotFound
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(GatewayEvent::Scan {
                result: Ok(()),
                notice: ScanNotice::Found(Box::new(beacon))
            })
        );
    }
}
