//! Channel scanning and beacon classification.

use crate::error::SessionError;
use crate::ledger::ErrorCode;
use crate::session::WhSession;
use crate::state::SessionState;
use crate::step::{Phase, Step, Transition};
use crate::strategy::{AlternateProtocolDetector, Discovery, DiscoveryHandler};
use std::fmt;
use tracing::{debug, info, trace};
use wh_gateway::{
    AllowedChannels, BeaconDescriptor, ChannelMask, GameAttributes, Gateway, GatewayCode,
    GatewayResult, MacAddress, Request, ScanNotice, ScanParam, MAX_CHANNEL,
};

/// Picks the channel for each scan step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    fixed: Option<u8>,
    current: u8,
}

impl ScanCursor {
    /// Cursor for `channel`; 0 cycles through every allowed channel
    pub fn new(channel: u8) -> Self {
        Self {
            fixed: (channel != 0).then_some(channel),
            current: 0,
        }
    }

    /// Channel for the next step.
    ///
    /// Cycling visits allowed channels in ascending order and wraps past the
    /// top. A pinned channel is returned as long as it is allowed.
    pub fn advance(&mut self, allowed: ChannelMask) -> Option<u8> {
        let next = match self.fixed {
            Some(channel) => allowed.contains(channel).then_some(channel),
            None => allowed.next_after(self.current),
        }?;
        self.current = next;
        Some(next)
    }

    /// Last channel handed out, 0 before the first step
    pub fn current(&self) -> u8 {
        self.current
    }
}

/// An active scan
pub(crate) struct ScanRun {
    pub(crate) cursor: ScanCursor,
    pub(crate) filter: MacAddress,
    /// Join the first match once scanning stops
    pub(crate) auto_connect: bool,
    pub(crate) handler: Option<Box<dyn DiscoveryHandler>>,
}

impl ScanRun {
    pub(crate) fn new(
        filter: MacAddress,
        channel: u8,
        auto_connect: bool,
        handler: Option<Box<dyn DiscoveryHandler>>,
    ) -> Self {
        Self {
            cursor: ScanCursor::new(channel),
            filter,
            auto_connect,
            handler,
        }
    }
}

impl fmt::Debug for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRun")
            .field("cursor", &self.cursor)
            .field("filter", &self.filter)
            .field("auto_connect", &self.auto_connect)
            .finish()
    }
}

/// Classify one beacon.
///
/// With a detector the alternate-protocol check runs first and skips the
/// normal match. A normal match needs a valid advertisement for `ggid` that
/// admits new peers and is not a boot-program coordinator.
pub fn classify(
    beacon: &BeaconDescriptor,
    ggid: u32,
    alternate: Option<&dyn AlternateProtocolDetector>,
) -> Option<Discovery> {
    if let Some(detector) = alternate {
        if detector.detect(beacon) {
            return Some(Discovery::AlternateProtocol);
        }
    }

    let info = beacon.valid_game_info()?;
    if info.ggid != ggid {
        return None;
    }
    let relevant = GameAttributes::ENTRY | GameAttributes::MULTIBOOT;
    if info.attributes & relevant != GameAttributes::ENTRY {
        return None;
    }
    Some(Discovery::Match)
}

impl<G: Gateway> WhSession<G> {
    /// Scan without joining; every match is reported to `handler`.
    ///
    /// Runs until [`end_scan`](Self::end_scan). Valid in Idle.
    pub fn start_scan<H>(
        &mut self,
        handler: H,
        filter: MacAddress,
        channel: u8,
    ) -> Result<(), SessionError>
    where
        H: DiscoveryHandler + 'static,
    {
        self.expect_state("start_scan", &[SessionState::Idle])?;
        if channel > MAX_CHANNEL {
            return Err(SessionError::InvalidChannel(channel));
        }

        info!("scanning, filter {} channel {}", filter, channel);
        self.scan = Some(ScanRun::new(filter, channel, false, Some(Box::new(handler))));
        self.set_state(SessionState::Scanning);
        self.begin(Step::StartScan)
    }

    /// Stop a scan. The session returns to Idle once the radio confirms.
    pub fn end_scan(&mut self) -> Result<(), SessionError> {
        self.expect_state("end_scan", &[SessionState::Scanning])?;
        if let Some(run) = self.scan.as_mut() {
            run.auto_connect = false;
        }
        self.set_state(SessionState::Busy);
        Ok(())
    }

    /// Toggle alternate-protocol detection during scans
    pub fn set_alternate_detection(&mut self, enabled: bool) {
        debug!("alternate-protocol detection {}", if enabled { "on" } else { "off" });
        self.alternate_detection = enabled;
    }

    pub(crate) fn issue_scan(&mut self, step: Step) -> Transition {
        match step {
            Step::StartScan => {
                let allowed = match self.allowed_channels() {
                    AllowedChannels::Uninitialized => {
                        return Transition::Fail(step, ErrorCode::RadioNotInitialized)
                    }
                    AllowedChannels::NoRadio => return Transition::Fail(step, ErrorCode::NoRadio),
                    AllowedChannels::Mask(mask) => mask,
                };
                let Some(run) = self.scan.as_mut() else {
                    return Transition::Fail(step, GatewayCode::IllegalState.into());
                };
                let Some(channel) = run.cursor.advance(allowed) else {
                    return Transition::Fail(step, ErrorCode::NoMoreChannel);
                };
                let param = ScanParam {
                    channel,
                    bssid: run.filter,
                    scan_period: self.gateway.dispersion_scan_period(),
                };
                trace!("scanning channel {}", channel);
                self.submit(step, Request::StartScan(param))
            }
            Step::EndScan => self.submit(step, Request::EndScan),
            _ => Transition::Wait,
        }
    }

    pub(crate) fn on_scan(&mut self, result: GatewayResult, notice: ScanNotice) -> Transition {
        if let Err(code) = result {
            // a scan stopped by finalize still owns its error
            if self.scan.is_none() || !matches!(self.chain, Some(Phase::Setup | Phase::Teardown)) {
                debug!("ignoring scan error {} in {}", code, self.state);
                return Transition::Wait;
            }
            return Transition::Fail(Step::StartScan, code.into());
        }
        if self.scan.is_none() {
            debug!("scan result without an active scan");
            return Transition::Wait;
        }
        if notice == ScanNotice::Started {
            return Transition::Wait;
        }
        match self.state {
            SessionState::Scanning => {}
            // stop requested while this step was in flight
            SessionState::Busy => return Transition::Next(Step::EndScan),
            _ => return Transition::Wait,
        }

        match notice {
            ScanNotice::Started => Transition::Wait,
            ScanNotice::NotFound => Transition::Next(Step::StartScan),
            ScanNotice::Found(beacon) => self.on_beacon(*beacon),
        }
    }

    fn on_beacon(&mut self, beacon: BeaconDescriptor) -> Transition {
        let detector = if self.alternate_detection {
            self.strategies.alternate.as_deref()
        } else {
            None
        };
        let Some(discovery) = classify(&beacon, self.config.ggid, detector) else {
            trace!("ignoring beacon {}", beacon);
            return Transition::Next(Step::StartScan);
        };
        debug!("{:?}: {}", discovery, beacon);

        let Some(run) = self.scan.as_mut() else {
            return Transition::Wait;
        };
        if let Some(handler) = run.handler.as_mut() {
            handler.on_beacon(&beacon, discovery);
        }
        if discovery == Discovery::Match && run.auto_connect {
            info!("found coordinator {} on channel {}", beacon.bssid, beacon.channel);
            self.target = Some(beacon);
            self.set_state(SessionState::Busy);
            return Transition::Next(Step::EndScan);
        }
        Transition::Next(Step::StartScan)
    }

    pub(crate) fn on_scan_ended(&mut self, result: GatewayResult) -> Transition {
        if !matches!(self.chain, Some(Phase::Setup | Phase::Teardown)) {
            debug!("ignoring scan end (chain {:?})", self.chain);
            return Transition::Wait;
        }
        if let Err(code) = result {
            return Transition::Fail(Step::EndScan, code.into());
        }

        let join = self.chain == Some(Phase::Setup)
            && self.target.is_some()
            && self.scan.as_ref().map_or(false, |run| run.auto_connect);
        self.scan = None;
        if join {
            Transition::Next(self.join_step())
        } else {
            info!("scan stopped");
            Transition::Enter(SessionState::Idle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wh_gateway::{GameInfo, LinkLevel};

    fn beacon(ggid: u32, attributes: GameAttributes) -> BeaconDescriptor {
        BeaconDescriptor {
            bssid: MacAddress([2, 0, 0, 0, 0, 1]),
            ssid: Bytes::new(),
            channel: 1,
            beacon_period: 200,
            link_level: LinkLevel::Level2,
            game_info: Some(GameInfo::new(ggid, 1, attributes)),
        }
    }

    #[test]
    fn test_cursor_cycles_with_wraparound() {
        let allowed = ChannelMask(0x1041);
        let mut cursor = ScanCursor::new(0);
        let visited: Vec<u8> = (0..5).filter_map(|_| cursor.advance(allowed)).collect();
        assert_eq!(visited, vec![1, 7, 13, 1, 7]);
    }

    #[test]
    fn test_pinned_cursor_stays_put() {
        let mut cursor = ScanCursor::new(7);
        assert_eq!(cursor.advance(ChannelMask(0x1041)), Some(7));
        assert_eq!(cursor.advance(ChannelMask(0x1041)), Some(7));
        assert_eq!(cursor.advance(ChannelMask(0x0001)), None);
    }

    #[test]
    fn test_classify_rules() {
        let ggid = 0x1234;
        assert_eq!(
            classify(&beacon(ggid, GameAttributes::ENTRY), ggid, None),
            Some(Discovery::Match)
        );
        assert_eq!(classify(&beacon(ggid, GameAttributes::empty()), ggid, None), None);
        assert_eq!(
            classify(
                &beacon(ggid, GameAttributes::ENTRY | GameAttributes::MULTIBOOT),
                ggid,
                None
            ),
            None
        );
        assert_eq!(classify(&beacon(ggid + 1, GameAttributes::ENTRY), ggid, None), None);

        let mut broken = beacon(ggid, GameAttributes::ENTRY);
        if let Some(info) = broken.game_info.as_mut() {
            info.magic = 0xdead;
        }
        assert_eq!(classify(&broken, ggid, None), None);
    }

    #[test]
    fn test_alternate_protocol_wins_over_match() {
        let detector = |b: &BeaconDescriptor| b.channel == 1;
        let found = classify(
            &beacon(0x1234, GameAttributes::ENTRY),
            0x1234,
            Some(&detector as &dyn AlternateProtocolDetector),
        );
        assert_eq!(found, Some(Discovery::AlternateProtocol));
    }
}
