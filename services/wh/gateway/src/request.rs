//! Requests submitted to the hardware gateway.
//!
//! Every request is fire-and-accept: submission returns immediately and the
//! outcome arrives later as a [`GatewayEvent`](crate::GatewayEvent).

use crate::types::{AidBitmap, AuthMode, BeaconDescriptor, KeyMaterial, ParentParam, ScanParam};
use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates a data send with its completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SendTag(pub u64);

impl fmt::Display for SendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Clear-channel assessment method for busy-ratio measurement
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CcaMode: u8 {
        /// Carrier sense
        const CARRIER_SENSE = 1 << 0;
        /// Energy detection
        const ENERGY_DETECT = 1 << 1;
    }
}

/// Multiplexed messaging parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpParam {
    /// Receive region size
    pub recv_capacity: u16,
    /// Send region size
    pub send_capacity: u16,
    /// Cycles per frame
    pub frequency: u16,
}

/// Busy-ratio measurement of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureParam {
    /// Channel to measure
    pub channel: u8,
    /// Assessment method
    pub mode: CcaMode,
    /// Energy-detect threshold
    pub ed_threshold: u8,
    /// Measurement window in milliseconds
    pub duration_ms: u16,
}

/// Data-sharing activation parameters (synchronous call)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSharingParam {
    /// Port the shared table travels on
    pub port: u16,
    /// Slots taking part in the merge
    pub aids: AidBitmap,
    /// Bytes each node contributes per cycle
    pub data_size: u16,
    /// Double-buffered merge
    pub double_mode: bool,
}

/// A request accepted by [`Gateway::submit`](crate::Gateway::submit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Combined bring-up
    Initialize,
    /// Enable the radio hardware
    Enable,
    /// Power the radio on
    PowerOn,
    /// Apply coordinator parameters
    SetParentParam(ParentParam),
    /// Apply key material
    SetKey(KeyMaterial),
    /// Start the coordinator role
    StartParent,
    /// Stop the coordinator role
    EndParent,
    /// Listen for beacons on one channel
    StartScan(ScanParam),
    /// Stop scanning
    EndScan,
    /// Join a coordinator
    StartConnect {
        /// Coordinator to join
        target: BeaconDescriptor,
        /// Connection SSID, exactly [`SSID_LENGTH`](crate::SSID_LENGTH) bytes
        ssid: Bytes,
        /// Authentication method
        auth: AuthMode,
    },
    /// Drop peers (coordinator) or leave the coordinator (peer, aid 0)
    Disconnect {
        /// Association ids to drop
        aids: AidBitmap,
    },
    /// Start multiplexed messaging
    StartMp(MpParam),
    /// Stop multiplexed messaging
    EndMp,
    /// Queue one datagram for the next cycle
    SetMpData {
        /// Destination port
        port: u16,
        /// Destination aid bitmap (0xffff = everyone)
        destination: u16,
        /// Payload, owned by the gateway until completion
        payload: Bytes,
        /// Correlation tag echoed by the completion
        tag: SendTag,
        /// Send priority
        priority: u8,
    },
    /// Measure the busy ratio of one channel
    MeasureChannel(MeasureParam),
    /// Unconditional reset
    Reset,
    /// Power the radio off
    PowerOff,
    /// Disable the radio hardware
    Disable,
    /// Combined shutdown
    End,
}

/// Request discriminant, for logging and for scripting the simulated gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// [`Request::Initialize`]
    Initialize,
    /// [`Request::Enable`]
    Enable,
    /// [`Request::PowerOn`]
    PowerOn,
    /// [`Request::SetParentParam`]
    SetParentParam,
    /// [`Request::SetKey`]
    SetKey,
    /// [`Request::StartParent`]
    StartParent,
    /// [`Request::EndParent`]
    EndParent,
    /// [`Request::StartScan`]
    StartScan,
    /// [`Request::EndScan`]
    EndScan,
    /// [`Request::StartConnect`]
    StartConnect,
    /// [`Request::Disconnect`]
    Disconnect,
    /// [`Request::StartMp`]
    StartMp,
    /// [`Request::EndMp`]
    EndMp,
    /// [`Request::SetMpData`]
    SetMpData,
    /// [`Request::MeasureChannel`]
    MeasureChannel,
    /// [`Request::Reset`]
    Reset,
    /// [`Request::PowerOff`]
    PowerOff,
    /// [`Request::Disable`]
    Disable,
    /// [`Request::End`]
    End,
}

impl Request {
    /// Discriminant of this request
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Initialize => RequestKind::Initialize,
            Request::Enable => RequestKind::Enable,
            Request::PowerOn => RequestKind::PowerOn,
            Request::SetParentParam(_) => RequestKind::SetParentParam,
            Request::SetKey(_) => RequestKind::SetKey,
            Request::StartParent => RequestKind::StartParent,
            Request::EndParent => RequestKind::EndParent,
            Request::StartScan(_) => RequestKind::StartScan,
            Request::EndScan => RequestKind::EndScan,
            Request::StartConnect { .. } => RequestKind::StartConnect,
            Request::Disconnect { .. } => RequestKind::Disconnect,
            Request::StartMp(_) => RequestKind::StartMp,
            Request::EndMp => RequestKind::EndMp,
            Request::SetMpData { .. } => RequestKind::SetMpData,
            Request::MeasureChannel(_) => RequestKind::MeasureChannel,
            Request::Reset => RequestKind::Reset,
            Request::PowerOff => RequestKind::PowerOff,
            Request::Disable => RequestKind::Disable,
            Request::End => RequestKind::End,
        }
    }
}
