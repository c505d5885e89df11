//! Completion events and unsolicited indications delivered by the gateway.
//!
//! Several completions fire more than once per request. The coordinator start
//! completion, for example, reports the start itself, each beacon, and every
//! peer that joins or leaves afterwards. Those sub-events are carried as a
//! tagged notice so consumers can match on them exhaustively.

use crate::error::GatewayCode;
use crate::request::SendTag;
use crate::types::{AidBitmap, BeaconDescriptor, MacAddress};
use bytes::Bytes;

/// Completion result carried by every event
pub type GatewayResult = Result<(), GatewayCode>;

/// Sub-events of the coordinator start completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentNotice {
    /// Coordinator role is up
    Started,
    /// A beacon went out
    BeaconSent,
    /// A peer joined
    Joined {
        /// Association id assigned to the peer
        aid: u16,
        /// Peer address
        mac: MacAddress,
        /// Connection SSID presented by the peer
        ssid: Bytes,
    },
    /// A peer left on its own
    Left {
        /// Association id of the peer
        aid: u16,
        /// Peer address
        mac: MacAddress,
    },
    /// A peer left because this side dropped it
    LeftByLocal {
        /// Association id of the peer
        aid: u16,
    },
}

/// Sub-events of a scan step completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanNotice {
    /// Listening began
    Started,
    /// Nothing heard on this channel
    NotFound,
    /// A beacon was heard
    Found(Box<BeaconDescriptor>),
}

/// Sub-events of the join completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectNotice {
    /// Join in progress
    Started,
    /// Joined; the coordinator assigned `aid`
    Connected {
        /// Own association id
        aid: u16,
    },
    /// Coordinator beacons are no longer heard
    BeaconLost,
    /// The coordinator dropped this peer
    Disconnected,
    /// This side left
    DisconnectedByLocal,
}

/// Sub-events of the multiplexed messaging completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpNotice {
    /// Messaging is running
    Started,
    /// One communication cycle finished
    CycleEnded,
    /// A cycle was acknowledged
    Acked,
}

/// Sub-events of the data port receive notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortNotice {
    /// Port opened
    Opened,
    /// A peer became reachable on the port
    PeerConnected {
        /// Association id of the peer
        aid: u16,
    },
    /// One inbound datagram
    Received {
        /// Sender association id
        aid: u16,
        /// Payload
        payload: Bytes,
    },
    /// A peer is gone
    PeerDisconnected {
        /// Association id of the peer
        aid: u16,
    },
    /// This side disconnected
    LocalDisconnect,
}

/// Kind of an unsolicited indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicationKind {
    /// Periodic beacon timing tick
    BeaconTick,
    /// Link-layer fault report
    LinkFault,
    /// Anything else, raw code
    Other(u16),
}

/// Everything the gateway can deliver on its single dispatch path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Combined bring-up finished
    Initialized {
        /// Outcome
        result: GatewayResult,
    },
    /// Hardware enabled
    Enabled {
        /// Outcome
        result: GatewayResult,
    },
    /// Radio powered on
    PoweredOn {
        /// Outcome
        result: GatewayResult,
    },
    /// Coordinator parameters applied
    ParentParamSet {
        /// Outcome
        result: GatewayResult,
    },
    /// Key material applied
    KeySet {
        /// Outcome
        result: GatewayResult,
    },
    /// Coordinator role notice
    Parent {
        /// Outcome
        result: GatewayResult,
        /// Sub-event
        notice: ParentNotice,
    },
    /// Coordinator role stopped
    ParentEnded {
        /// Outcome
        result: GatewayResult,
    },
    /// Scan step notice
    Scan {
        /// Outcome
        result: GatewayResult,
        /// Sub-event
        notice: ScanNotice,
    },
    /// Scanning stopped
    ScanEnded {
        /// Outcome
        result: GatewayResult,
    },
    /// Join notice
    Connect {
        /// Outcome
        result: GatewayResult,
        /// Sub-event
        notice: ConnectNotice,
    },
    /// Disconnect request finished
    Disconnected {
        /// Outcome
        result: GatewayResult,
        /// Aids that were dropped
        aids: AidBitmap,
    },
    /// Multiplexed messaging notice
    Mp {
        /// Outcome
        result: GatewayResult,
        /// Sub-event
        notice: MpNotice,
    },
    /// Multiplexed messaging stopped
    MpEnded {
        /// Outcome
        result: GatewayResult,
    },
    /// One channel measured
    ChannelMeasured {
        /// Outcome
        result: GatewayResult,
        /// Measured channel
        channel: u8,
        /// Busy ratio in percent
        busy_ratio: u8,
    },
    /// A queued datagram was sent (or not)
    PortSend {
        /// Outcome
        result: GatewayResult,
        /// Tag of the send
        tag: SendTag,
    },
    /// Data port notice
    PortRecv {
        /// Outcome
        result: GatewayResult,
        /// Sub-event
        notice: PortNotice,
    },
    /// Reset finished
    Reset {
        /// Outcome
        result: GatewayResult,
    },
    /// Radio powered off
    PoweredOff {
        /// Outcome
        result: GatewayResult,
    },
    /// Hardware disabled
    Disabled {
        /// Outcome
        result: GatewayResult,
    },
    /// Combined shutdown finished
    Ended {
        /// Outcome
        result: GatewayResult,
    },
    /// Unsolicited indication
    Indication {
        /// Reported code
        result: GatewayResult,
        /// Kind of indication
        kind: IndicationKind,
    },
}

impl GatewayEvent {
    /// Completion result of this event
    pub fn result(&self) -> GatewayResult {
        match self {
            GatewayEvent::Initialized { result }
            | GatewayEvent::Enabled { result }
            | GatewayEvent::PoweredOn { result }
            | GatewayEvent::ParentParamSet { result }
            | GatewayEvent::KeySet { result }
            | GatewayEvent::Parent { result, .. }
            | GatewayEvent::ParentEnded { result }
            | GatewayEvent::Scan { result, .. }
            | GatewayEvent::ScanEnded { result }
            | GatewayEvent::Connect { result, .. }
            | GatewayEvent::Disconnected { result, .. }
            | GatewayEvent::Mp { result, .. }
            | GatewayEvent::MpEnded { result }
            | GatewayEvent::ChannelMeasured { result, .. }
            | GatewayEvent::PortSend { result, .. }
            | GatewayEvent::PortRecv { result, .. }
            | GatewayEvent::Reset { result }
            | GatewayEvent::PoweredOff { result }
            | GatewayEvent::Disabled { result }
            | GatewayEvent::Ended { result }
            | GatewayEvent::Indication { result, .. } => *result,
        }
    }

    /// Per-cycle or per-datagram chatter that is only worth a trace line
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            GatewayEvent::Parent { notice: ParentNotice::BeaconSent, .. }
                | GatewayEvent::Mp { notice: MpNotice::CycleEnded | MpNotice::Acked, .. }
                | GatewayEvent::PortRecv { notice: PortNotice::Received { .. }, .. }
                | GatewayEvent::Indication { kind: IndicationKind::BeaconTick, .. }
        )
    }
}
