//! Capabilities injected into a session at configuration time.
//!
//! Each trait has a blanket implementation for the matching closure shape,
//! so simple strategies can be passed as closures.

use bytes::Bytes;
use wh_gateway::{
    BeaconDescriptor, GatewayResult, IndicationKind, KeyMaterial, MacAddress, ParentParam,
};

/// A peer asking to join the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Association id the gateway assigned
    pub aid: u16,
    /// Peer address
    pub mac: MacAddress,
    /// Connection SSID presented by the peer
    pub ssid: Bytes,
}

/// Inbound data-port notification for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One datagram
    Data(Bytes),
    /// The sender disconnected
    Disconnected,
}

/// How a beacon matched during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Advertises this application and admits peers
    Match,
    /// Belongs to the alternate protocol being watched for
    AlternateProtocol,
}

/// Key material for the coordinator role
pub trait ParentKeyGenerator: Send {
    /// Derive key material from the parameters about to be applied
    fn generate(&self, param: &ParentParam) -> KeyMaterial;
}

impl<F> ParentKeyGenerator for F
where
    F: Fn(&ParentParam) -> KeyMaterial + Send,
{
    fn generate(&self, param: &ParentParam) -> KeyMaterial {
        self(param)
    }
}

/// Key material for the peer role
pub trait ChildKeyGenerator: Send {
    /// Derive key material for joining `target`
    fn generate(&self, target: &BeaconDescriptor) -> KeyMaterial;
}

impl<F> ChildKeyGenerator for F
where
    F: Fn(&BeaconDescriptor) -> KeyMaterial + Send,
{
    fn generate(&self, target: &BeaconDescriptor) -> KeyMaterial {
        self(target)
    }
}

/// Admission control for joining peers
pub trait AdmissionPolicy: Send {
    /// Return false to drop the peer immediately
    fn admit(&self, request: &JoinRequest) -> bool;
}

impl<F> AdmissionPolicy for F
where
    F: Fn(&JoinRequest) -> bool + Send,
{
    fn admit(&self, request: &JoinRequest) -> bool {
        self(request)
    }
}

/// Receives direct datagrams
pub trait DataReceiver: Send {
    /// One inbound datagram or disconnect notice from `aid`
    fn on_receive(&mut self, aid: u16, inbound: Inbound);
}

impl<F> DataReceiver for F
where
    F: FnMut(u16, Inbound) + Send,
{
    fn on_receive(&mut self, aid: u16, inbound: Inbound) {
        self(aid, inbound)
    }
}

/// Observes unsolicited indications
pub trait IndicationObserver: Send {
    /// Called for every indication before the session reacts to it
    fn on_indication(&mut self, kind: IndicationKind, result: GatewayResult);
}

impl<F> IndicationObserver for F
where
    F: FnMut(IndicationKind, GatewayResult) + Send,
{
    fn on_indication(&mut self, kind: IndicationKind, result: GatewayResult) {
        self(kind, result)
    }
}

/// Recognizes beacons of the alternate protocol
pub trait AlternateProtocolDetector: Send {
    /// True if `beacon` belongs to the alternate protocol
    fn detect(&self, beacon: &BeaconDescriptor) -> bool;
}

impl<F> AlternateProtocolDetector for F
where
    F: Fn(&BeaconDescriptor) -> bool + Send,
{
    fn detect(&self, beacon: &BeaconDescriptor) -> bool {
        self(beacon)
    }
}

/// Receives scan discoveries
pub trait DiscoveryHandler: Send {
    /// Called for each beacon that matched
    fn on_beacon(&mut self, beacon: &BeaconDescriptor, discovery: Discovery);
}

impl<F> DiscoveryHandler for F
where
    F: FnMut(&BeaconDescriptor, Discovery) + Send,
{
    fn on_beacon(&mut self, beacon: &BeaconDescriptor, discovery: Discovery) {
        self(beacon, discovery)
    }
}
