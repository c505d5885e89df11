//! Channel survey: measure every allowed channel, pick the least busy.

use crate::error::SessionError;
use crate::ledger::ErrorCode;
use crate::session::WhSession;
use crate::state::SessionState;
use crate::step::{Phase, Step, Transition};
use rand::Rng;
use tracing::{debug, info};
use wh_gateway::{
    AllowedChannels, CcaMode, ChannelMask, Gateway, GatewayResult, MeasureParam, Request,
};

/// Upper bound of a busy ratio, in percent
pub const MAX_BUSY_RATIO: u8 = 100;

const MEASURE_ED_THRESHOLD: u8 = 17;
const MEASURE_DURATION_MS: u16 = 30;

/// Running result of a channel survey
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSurvey {
    last: u8,
    min_ratio: u8,
    tied: ChannelMask,
    measured: ChannelMask,
}

impl ChannelSurvey {
    /// Empty survey
    pub fn new() -> Self {
        Self {
            last: 0,
            min_ratio: MAX_BUSY_RATIO + 1,
            tied: ChannelMask::EMPTY,
            measured: ChannelMask::EMPTY,
        }
    }

    /// Next allowed channel above the last one measured; no wraparound
    pub fn next_channel(&self, allowed: ChannelMask) -> Option<u8> {
        allowed.channels().find(|c| *c > self.last)
    }

    /// Fold in one measurement
    pub fn record(&mut self, channel: u8, busy_ratio: u8) {
        let ratio = busy_ratio.min(MAX_BUSY_RATIO);
        self.last = channel;
        self.measured.insert(channel);
        if ratio < self.min_ratio {
            self.min_ratio = ratio;
            self.tied = ChannelMask::EMPTY;
            self.tied.insert(channel);
        } else if ratio == self.min_ratio {
            self.tied.insert(channel);
        }
    }

    /// Lowest busy ratio seen so far
    pub fn min_ratio(&self) -> Option<u8> {
        (self.min_ratio <= MAX_BUSY_RATIO).then_some(self.min_ratio)
    }

    /// Channels sharing the lowest ratio
    pub fn tied(&self) -> ChannelMask {
        self.tied
    }

    /// Channels measured so far
    pub fn measured(&self) -> ChannelMask {
        self.measured
    }

    /// Pick one of the tied channels, uniformly at random
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u8> {
        match self.tied.len() {
            0 => None,
            1 => self.tied.nth(0),
            n => self.tied.nth(rng.gen_range(0..n)),
        }
    }
}

impl Default for ChannelSurvey {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Gateway> WhSession<G> {
    /// Measure the busy ratio of every allowed channel.
    ///
    /// Valid in Idle. The session ends in MeasureChannel; call
    /// [`resolve_channel`](Self::resolve_channel) to pick the result.
    pub fn start_measure_channel(&mut self) -> Result<(), SessionError> {
        self.expect_state("start_measure_channel", &[SessionState::Idle])?;

        info!("measuring channels {:?}", self.allowed_channels());
        self.survey = ChannelSurvey::new();
        self.set_state(SessionState::Busy);
        self.begin(Step::MeasureChannel)
    }

    /// Pick the least busy channel and return to Idle.
    ///
    /// Ties between equally busy channels are broken at random.
    pub fn resolve_channel(&mut self) -> Result<u8, SessionError> {
        self.expect_state("resolve_channel", &[SessionState::MeasureChannel])?;

        let channel = self
            .survey
            .resolve(&mut self.rng)
            .ok_or(SessionError::NoChannel)?;
        info!(
            "picked channel {} (busy {:?}%, tied {})",
            channel,
            self.survey.min_ratio(),
            self.survey.tied()
        );
        self.conclude(SessionState::Idle);
        Ok(channel)
    }

    /// Survey collected by the last measurement
    pub fn channel_survey(&self) -> &ChannelSurvey {
        &self.survey
    }

    pub(crate) fn issue_measure(&mut self) -> Transition {
        let step = Step::MeasureChannel;
        let allowed = match self.allowed_channels() {
            AllowedChannels::Uninitialized => {
                return Transition::Fail(step, ErrorCode::RadioNotInitialized)
            }
            AllowedChannels::NoRadio => return Transition::Fail(step, ErrorCode::NoRadio),
            AllowedChannels::Mask(mask) => mask,
        };

        match self.survey.next_channel(allowed) {
            Some(channel) => {
                debug!("measuring channel {}", channel);
                let param = MeasureParam {
                    channel,
                    mode: CcaMode::CARRIER_SENSE | CcaMode::ENERGY_DETECT,
                    ed_threshold: MEASURE_ED_THRESHOLD,
                    duration_ms: MEASURE_DURATION_MS,
                };
                self.submit(step, Request::MeasureChannel(param))
            }
            None if self.survey.tied().is_empty() => {
                Transition::Fail(step, ErrorCode::NoMoreChannel)
            }
            None => Transition::Enter(SessionState::MeasureChannel),
        }
    }

    pub(crate) fn on_channel_measured(
        &mut self,
        result: GatewayResult,
        channel: u8,
        busy_ratio: u8,
    ) -> Transition {
        if !self.expects(Phase::Setup, "channel measurement") {
            return Transition::Wait;
        }
        if let Err(code) = result {
            return Transition::Fail(Step::MeasureChannel, code.into());
        }
        debug!("channel {} busy {}%", channel, busy_ratio);
        self.survey.record(channel, busy_ratio);
        Transition::Next(Step::MeasureChannel)
    }
}
