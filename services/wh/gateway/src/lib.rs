//! Hardware gateway contract for the wh connection layer.
//!
//! The radio firmware is driven through fire-and-accept requests. A request
//! is either refused on the spot or queued, and a queued request later
//! produces one or more completion events on a single dispatch path. This
//! crate describes that contract in types; it does not implement radio
//! framing.
//!
//! ## Contents
//!
//! - **Result codes**: [`GatewayCode`] and raw-code decoding
//! - **Requests**: [`Request`] and its parameter blocks
//! - **Events**: [`GatewayEvent`] with tagged sub-events for multi-purpose completions
//! - **Link types**: beacons, channel masks, association-id bitmaps, key and data sets
//! - **Trait**: [`Gateway`], what the session layer consumes
//! - **Simulation**: [`SimGateway`], an in-memory gateway for tests and demos
//!
//! ## Request lifecycle
//!
//! ```text
//! session ── submit(Request) ──► gateway
//!    ▲            │
//!    │        Ok / Err(code)        (accepted or refused immediately)
//!    │
//!    └──── GatewayEvent ◄────────── completion, later, possibly repeated
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod gateway;
pub mod request;
pub mod sim;
pub mod types;

// Re-export main types
pub use error::{decode_result, GatewayCode, GatewayError, RAW_OPERATING, RAW_SUCCESS};
pub use event::{
    ConnectNotice, GatewayEvent, GatewayResult, IndicationKind, MpNotice, ParentNotice,
    PortNotice, ScanNotice,
};
pub use gateway::Gateway;
pub use request::{
    CcaMode, DataSharingParam, MeasureParam, MpParam, Request, RequestKind, SendTag,
};
pub use sim::{SimGateway, SyncCall, DEFAULT_REQUEST_HISTORY};
pub use types::{
    AidBitmap, AllowedChannels, AuthMode, BeaconDescriptor, ChannelMask, DataSet, GameAttributes,
    GameInfo, KeyMaterial, KeyMode, KeySet, LinkLevel, MacAddress, ParentParam, ScanParam,
    GAME_INFO_MAGIC, MAX_AID, MAX_CHANNEL, MAX_KEY_LENGTH, SSID_LENGTH,
};
