//! The hardware gateway contract consumed by the session layer.

use crate::error::GatewayCode;
use crate::request::{DataSharingParam, Request};
use crate::types::{DataSet, KeySet, LinkLevel, MacAddress};

/// Downstream interface to the radio.
///
/// `submit` never blocks: `Ok(())` means the request was queued and a
/// completion event will follow on the gateway's event channel. An `Err` means
/// the request was refused outright and nothing is pending.
///
/// The data-sharing and key-sharing calls are synchronous; their result is
/// final when they return.
pub trait Gateway: Send {
    /// Queue a request
    fn submit(&mut self, request: Request) -> Result<(), GatewayCode>;

    /// Synchronous system init used by the detailed bring-up path
    fn init_system(&mut self) -> Result<(), GatewayCode>;

    /// Route unsolicited indications to the event channel
    fn enable_indications(&mut self) -> Result<(), GatewayCode>;

    /// Raw allowed-channel pattern; see [`AllowedChannels`](crate::AllowedChannels)
    fn allowed_channels(&self) -> u16;

    /// Activate data sharing
    fn start_data_sharing(&mut self, param: &DataSharingParam) -> Result<(), GatewayCode>;

    /// Contribute to and fetch the merged table for this cycle
    fn step_data_sharing(&mut self, contribution: &[u8]) -> Result<DataSet, GatewayCode>;

    /// Deactivate data sharing
    fn end_data_sharing(&mut self) -> Result<(), GatewayCode>;

    /// Activate key sharing on `port`
    fn start_key_sharing(&mut self, port: u16) -> Result<(), GatewayCode>;

    /// Deactivate key sharing
    fn end_key_sharing(&mut self) -> Result<(), GatewayCode>;

    /// Latest merged key table
    fn read_key_set(&self) -> Result<KeySet, GatewayCode>;

    /// Current link quality
    fn link_level(&self) -> LinkLevel;

    /// Beacon interval spread to avoid collisions with nearby coordinators
    fn dispersion_beacon_period(&mut self) -> u16;

    /// Scan window spread the same way
    fn dispersion_scan_period(&mut self) -> u16;

    /// Own hardware address
    fn mac_address(&self) -> MacAddress;

    /// Monotonic frame counter
    fn tick_count(&self) -> u64;
}
