//! Gateway result codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw code the gateway uses for a completed request
pub const RAW_SUCCESS: u16 = 0;

/// Raw code the gateway uses for "request accepted, completion pending"
pub const RAW_OPERATING: u16 = 2;

/// Failure codes reported by the hardware gateway.
///
/// A request either gets accepted (the entry returns `Ok`) or refused with one
/// of these codes. Completion events carry `Result<(), GatewayCode>` as well.
#[repr(u16)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayCode {
    /// Generic failure
    #[error("failed")]
    Failed = 1,
    /// Request not valid in the gateway's current state
    #[error("illegal state")]
    IllegalState = 3,
    /// Radio disabled
    #[error("radio disabled")]
    Disabled = 4,
    /// No data set available for this cycle
    #[error("no data set")]
    NoDataSet = 5,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam = 6,
    /// No peer is joined
    #[error("no child")]
    NoChild = 7,
    /// Request/indication queue overflow
    #[error("fifo error")]
    FifoError = 8,
    /// Peer did not answer in time
    #[error("timeout")]
    Timeout = 9,
    /// Send queue full
    #[error("send queue full")]
    SendQueueFull = 10,
    /// Coordinator is not accepting new peers
    #[error("no entry")]
    NoEntry = 11,
    /// Coordinator reached its peer capacity
    #[error("over max entry")]
    OverMaxEntry = 12,
    /// Poll bitmap did not include this peer
    #[error("invalid poll bitmap")]
    InvalidPollBitmap = 13,
    /// No data
    #[error("no data")]
    NoData = 14,
    /// Delivery failed for this cycle
    #[error("send failed")]
    SendFailed = 15,
    /// Test mode active
    #[error("dcf test")]
    DcfTest = 16,
    /// Link layer rejected a parameter
    #[error("link invalid parameter")]
    LinkInvalidParam = 17,
    /// Link layer length error
    #[error("link length error")]
    LinkLength = 18,
    /// Flash access failed
    #[error("flash error")]
    FlashError = 19,
}

impl GatewayCode {
    /// Raw wire value of this code
    pub fn as_raw(self) -> u16 {
        self as u16
    }
}

/// Errors decoding raw gateway result codes
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    /// The raw value is a success or pending sentinel, not a failure
    #[error("code {0} is not a failure")]
    NotAFailure(u16),

    /// Unknown raw code
    #[error("unknown code {0}")]
    Unknown(u16),
}

impl TryFrom<u16> for GatewayCode {
    type Error = GatewayError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            RAW_SUCCESS | RAW_OPERATING => Err(GatewayError::NotAFailure(value)),
            1 => Ok(GatewayCode::Failed),
            3 => Ok(GatewayCode::IllegalState),
            4 => Ok(GatewayCode::Disabled),
            5 => Ok(GatewayCode::NoDataSet),
            6 => Ok(GatewayCode::InvalidParam),
            7 => Ok(GatewayCode::NoChild),
            8 => Ok(GatewayCode::FifoError),
            9 => Ok(GatewayCode::Timeout),
            10 => Ok(GatewayCode::SendQueueFull),
            11 => Ok(GatewayCode::NoEntry),
            12 => Ok(GatewayCode::OverMaxEntry),
            13 => Ok(GatewayCode::InvalidPollBitmap),
            14 => Ok(GatewayCode::NoData),
            15 => Ok(GatewayCode::SendFailed),
            16 => Ok(GatewayCode::DcfTest),
            17 => Ok(GatewayCode::LinkInvalidParam),
            18 => Ok(GatewayCode::LinkLength),
            19 => Ok(GatewayCode::FlashError),
            _ => Err(GatewayError::Unknown(value)),
        }
    }
}

/// Decode a raw completion result
pub fn decode_result(raw: u16) -> Result<Result<(), GatewayCode>, GatewayError> {
    match GatewayCode::try_from(raw) {
        Ok(code) => Ok(Err(code)),
        Err(GatewayError::NotAFailure(RAW_SUCCESS)) => Ok(Ok(())),
        Err(e) => Err(e),
    }
}
