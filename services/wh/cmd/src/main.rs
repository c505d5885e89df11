//! wh link demo binary.
//!
//! Drives a complete connection lifecycle against the in-memory gateway:
//! radio bring-up, an optional channel survey, coordinator start or peer
//! auto-connect, a run of traffic cycles, then finalize and shutdown.

use anyhow::{anyhow, bail};
use bytes::Bytes;
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;
use wh_gateway::{
    BeaconDescriptor, GameAttributes, GameInfo, GatewayEvent, LinkLevel, MacAddress,
    ParentNotice, SimGateway, MAX_CHANNEL,
};
use wh_session::{
    shared, Dispatcher, Inbound, JoinRequest, SendOutcome, SessionConfig, SessionState,
    SharedSession, StepOutcome, WhSession,
};

mod config;
mod logging;

use config::{DemoConfig, Role, Traffic, WhConfig};
use logging::WhLogFormatter;

/// Channel peers find the simulated coordinator on when none is given
const DEFAULT_PEER_CHANNEL: u8 = 7;

/// Requests the simulated radio remembers; one send per cycle accumulates
const DEMO_REQUEST_HISTORY: usize = 64;

/// wh connection lifecycle demo
#[derive(Parser, Debug)]
#[command(name = "whlink", version, about = "wh connection lifecycle demo on a simulated radio")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Side of the link
    #[arg(long, value_enum)]
    role: Option<Role>,

    /// Traffic once linked
    #[arg(long, value_enum)]
    mode: Option<Traffic>,

    /// Radio channel, 0 to survey or cycle
    #[arg(long)]
    channel: Option<u8>,

    /// Session identifier advertised by the coordinator
    #[arg(long)]
    tgid: Option<u16>,

    /// Simulated peers joining the coordinator
    #[arg(long)]
    peers: Option<u16>,

    /// Traffic cycles before finalizing
    #[arg(long)]
    cycles: Option<u32>,

    /// Pause between traffic cycles, e.g. 100ms
    #[arg(long)]
    cycle_interval: Option<humantime::Duration>,

    /// Survey channels before starting a coordinator
    #[arg(long)]
    measure: Option<bool>,

    /// How long to wait for each lifecycle step
    #[arg(long, default_value = "5s")]
    step_timeout: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply_to(&self, demo: &mut DemoConfig) {
        if let Some(role) = self.role {
            demo.role = role;
        }
        if let Some(traffic) = self.mode {
            demo.traffic = traffic;
        }
        if let Some(channel) = self.channel {
            demo.channel = channel;
        }
        if let Some(tgid) = self.tgid {
            demo.tgid = tgid;
        }
        if let Some(peers) = self.peers {
            demo.peers = peers;
        }
        if let Some(cycles) = self.cycles {
            demo.cycles = cycles;
        }
        if let Some(interval) = self.cycle_interval {
            demo.cycle_interval_ms = Duration::from(interval).as_millis() as u64;
        }
        if let Some(measure) = self.measure {
            demo.measure = measure;
        }
    }
}

/// Session plus the handles the demo needs around it
struct Demo {
    session: SharedSession<SimGateway>,
    states: watch::Receiver<SessionState>,
    inject: mpsc::UnboundedSender<GatewayEvent>,
    config: DemoConfig,
    step_timeout: Duration,
    delivered: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("whlink={}", args.log_level).parse()?)
        .add_directive(format!("wh_session={}", args.log_level).parse()?)
        .add_directive(format!("wh_gateway={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(WhLogFormatter::new("whlink"))
        .init();

    info!("Starting wh link demo v{}", env!("CARGO_PKG_VERSION"));

    let mut wh_config = WhConfig::load_from_file(&args.config)?;
    args.apply_to(&mut wh_config.demo);

    let (tx, rx) = mpsc::unbounded_channel();
    let gateway = build_gateway(&wh_config, tx.clone());
    let session = shared(WhSession::new(gateway, wh_config.session.clone()));

    let mut demo = Demo::new(
        Arc::clone(&session),
        tx,
        wh_config.demo,
        Duration::from(args.step_timeout),
    )
    .await?;
    let dispatcher = Dispatcher::new(session, rx).spawn();

    let outcome = demo.run().await;
    if let Err(e) = &outcome {
        component_warn!("demo", "Lifecycle aborted: {}", e);
        demo.recover().await;
    }

    demo.power_down().await?;
    dispatcher.abort();

    component_info!(
        "demo",
        "Done: {} datagrams delivered, {} received",
        demo.delivered.load(Ordering::Relaxed),
        demo.received.load(Ordering::Relaxed)
    );

    outcome
}

/// Simulated radio populated for the configured scenario
fn build_gateway(config: &WhConfig, tx: mpsc::UnboundedSender<GatewayEvent>) -> SimGateway {
    let mut gateway = SimGateway::new()
        .with_allowed_channels(0x1fff)
        .with_history_limit(DEMO_REQUEST_HISTORY)
        .with_responder(tx);

    let mut rng = rand::thread_rng();
    for channel in 1..=MAX_CHANNEL {
        gateway.set_busy_ratio(channel, rng.gen_range(0..=60));
    }

    if config.demo.role == Role::Child {
        let channel = match config.demo.channel {
            0 => DEFAULT_PEER_CHANNEL,
            ch => ch,
        };
        gateway.add_beacon(coordinator_beacon(&config.session, config.demo.tgid, channel));
    }
    gateway
}

fn coordinator_beacon(session: &SessionConfig, tgid: u16, channel: u8) -> BeaconDescriptor {
    BeaconDescriptor {
        bssid: MacAddress([0x02, 0x09, 0xbf, 0x00, 0x00, 0x01]),
        ssid: Bytes::from_static(b"whlink"),
        channel,
        beacon_period: 200,
        link_level: LinkLevel::Level3,
        game_info: Some(GameInfo::new(session.ggid, tgid, GameAttributes::ENTRY)),
    }
}

impl Demo {
    async fn new(
        session: SharedSession<SimGateway>,
        inject: mpsc::UnboundedSender<GatewayEvent>,
        config: DemoConfig,
        step_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let received = Arc::new(AtomicU64::new(0));
        let states = {
            let mut guard = session.lock().await;

            let counter = Arc::clone(&received);
            guard.set_receiver(move |aid: u16, inbound: Inbound| match inbound {
                Inbound::Data(payload) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    trace!("{} bytes from aid {}", payload.len(), aid);
                }
                Inbound::Disconnected => info!("aid {} left the data port", aid),
            })?;

            let capacity = config.peers;
            guard.set_admission_policy(move |request: &JoinRequest| request.aid <= capacity)?;
            guard.set_user_game_info(b"whlink demo".to_vec())?;
            guard.subscribe()
        };

        Ok(Self {
            session,
            states,
            inject,
            config,
            step_timeout,
            delivered: Arc::new(AtomicU64::new(0)),
            received,
        })
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.session.lock().await.initialize()?;
        self.wait_until("radio bring-up", |s| s == SessionState::Idle)
            .await?;
        component_info!("radio", "Radio is up");

        match self.config.role {
            Role::Parent => self.start_coordinator().await?,
            Role::Child => self.join_coordinator().await?,
        }

        self.traffic_cycles().await?;

        self.session.lock().await.finalize()?;
        self.wait_until("finalize", |s| s == SessionState::Idle)
            .await?;
        component_info!("demo", "Link closed");
        Ok(())
    }

    async fn start_coordinator(&mut self) -> anyhow::Result<()> {
        let channel = if self.config.measure || self.config.channel == 0 {
            self.survey_channels().await?
        } else {
            self.config.channel
        };

        let mode = self.config.traffic.connect_mode(Role::Parent);
        self.session
            .lock()
            .await
            .start_parent_connect(mode, self.config.tgid, channel)?;
        self.wait_until("coordinator start", SessionState::is_linked)
            .await?;
        component_info!("demo", "Coordinator up on channel {} as {:?}", channel, mode);

        for aid in 1..=self.config.peers {
            let joined = GatewayEvent::Parent {
                result: Ok(()),
                notice: ParentNotice::Joined {
                    aid,
                    mac: MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, aid as u8]),
                    ssid: Bytes::new(),
                },
            };
            self.inject
                .send(joined)
                .map_err(|_| anyhow!("dispatcher is gone"))?;
        }
        Ok(())
    }

    async fn survey_channels(&mut self) -> anyhow::Result<u8> {
        self.session.lock().await.start_measure_channel()?;
        self.wait_until("channel survey", |s| s == SessionState::MeasureChannel)
            .await?;

        let mut session = self.session.lock().await;
        let survey = session.channel_survey();
        debug!(
            "survey: min busy ratio {:?}, tied {}",
            survey.min_ratio(),
            survey.tied()
        );
        let channel = session.resolve_channel()?;
        component_info!("radio", "Quietest channel is {}", channel);
        Ok(channel)
    }

    async fn join_coordinator(&mut self) -> anyhow::Result<()> {
        let mode = self.config.traffic.connect_mode(Role::Child);
        self.session
            .lock()
            .await
            .connect_auto(mode, MacAddress::BROADCAST, self.config.channel)?;
        self.wait_until("auto-connect", SessionState::is_linked)
            .await?;

        let aid = self.session.lock().await.own_aid();
        component_info!("demo", "Joined coordinator as aid {} ({:?})", aid, mode);
        Ok(())
    }

    async fn traffic_cycles(&mut self) -> anyhow::Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.cycle_interval_ms.max(1)));

        for cycle in 0..self.config.cycles {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, finalizing early");
                    return Ok(());
                }
            }

            let mut session = self.session.lock().await;
            if !session.state().is_linked() {
                bail!("link lost in state {}", session.state());
            }

            match self.config.traffic {
                Traffic::Mp => {
                    let delivered = Arc::clone(&self.delivered);
                    let payload = Bytes::from(format!("cycle {}", cycle));
                    session.send_data(payload, move |outcome: SendOutcome| {
                        if outcome.is_delivered() {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        } else {
                            debug!("send {}", outcome);
                        }
                    })?;
                }
                Traffic::Ds => {
                    let contribution = cycle.to_be_bytes();
                    match session.step_data_sharing(&contribution)? {
                        StepOutcome::Shared => trace!(
                            "cycle {} shared with {}",
                            cycle,
                            session.shared_bitmap()
                        ),
                        StepOutcome::Pending => trace!("cycle {} pending", cycle),
                        StepOutcome::Alone => trace!("cycle {} alone", cycle),
                    }
                }
                Traffic::Ks => {
                    let keys = session.key_set()?;
                    trace!("cycle {} keys {:?}", cycle, keys);
                }
            }
        }

        let session = self.session.lock().await;
        component_info!(
            "demo",
            "{} cycles done, peers {}",
            self.config.cycles,
            session.connection_bitmap()
        );
        Ok(())
    }

    /// Best effort: reset back to Idle after a failed run
    async fn recover(&mut self) {
        if let Some(failure) = self.session.lock().await.last_failure() {
            warn!("last failure: {:?}", failure);
        }
        if let Err(e) = self.session.lock().await.reset() {
            warn!("reset refused: {}", e);
            return;
        }
        if let Err(e) = self.wait_until("reset", |s| s == SessionState::Idle).await {
            warn!("reset did not settle: {}", e);
        }
    }

    async fn power_down(&mut self) -> anyhow::Result<()> {
        let state = self.session.lock().await.state();
        if state != SessionState::Idle {
            warn!("skipping shutdown from state {}", state);
            return Ok(());
        }
        self.session.lock().await.shutdown()?;
        self.wait_until("shutdown", |s| s == SessionState::Stop)
            .await?;
        component_info!("radio", "Radio is down");
        Ok(())
    }

    /// Wait until `done` holds, failing early on a failure state
    async fn wait_until<F>(&mut self, what: &str, done: F) -> anyhow::Result<SessionState>
    where
        F: Fn(SessionState) -> bool,
    {
        let settled = |s: &SessionState| {
            done(*s) || s.is_failed() || *s == SessionState::ConnectFail
        };
        let state = match tokio::time::timeout(self.step_timeout, self.states.wait_for(settled))
            .await
        {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => bail!("session dropped while waiting for {}", what),
            Err(_) => bail!("timed out waiting for {}", what),
        };

        if done(state) {
            Ok(state)
        } else {
            Err(anyhow!("{} ended in state {}", what, state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_demo_config() {
        let args = Args::parse_from([
            "whlink",
            "--role",
            "child",
            "--mode",
            "mp",
            "--channel",
            "13",
            "--cycle-interval",
            "250ms",
            "--measure",
            "false",
        ]);
        let mut demo = DemoConfig::default();
        args.apply_to(&mut demo);

        assert_eq!(demo.role, Role::Child);
        assert_eq!(demo.traffic, Traffic::Mp);
        assert_eq!(demo.channel, 13);
        assert_eq!(demo.cycle_interval_ms, 250);
        assert!(!demo.measure);
        assert_eq!(demo.peers, DemoConfig::default().peers);
    }

    #[test]
    fn test_peer_gateway_advertises_coordinator() {
        let mut config = WhConfig::default();
        config.demo.role = Role::Child;
        let (tx, _rx) = mpsc::unbounded_channel();
        let gateway = build_gateway(&config, tx);
        assert!(gateway.requests().is_empty());

        let beacon = coordinator_beacon(&config.session, 9, DEFAULT_PEER_CHANNEL);
        let info = beacon.valid_game_info().unwrap();
        assert_eq!(info.ggid, config.session.ggid);
        assert_eq!(info.tgid, 9);
    }

    #[tokio::test]
    async fn test_demo_runs_coordinator_lifecycle() {
        let mut config = WhConfig::default();
        config.session.rng_seed = Some(3);
        config.demo.cycles = 3;
        config.demo.cycle_interval_ms = 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = build_gateway(&config, tx.clone());
        let session = shared(WhSession::new(gateway, config.session.clone()));
        let mut demo = Demo::new(Arc::clone(&session), tx, config.demo, Duration::from_secs(5))
            .await
            .unwrap();
        let handle = Dispatcher::new(Arc::clone(&session), rx).spawn();

        demo.run().await.unwrap();
        demo.power_down().await.unwrap();
        assert_eq!(session.lock().await.state(), SessionState::Stop);

        handle.abort();
    }

    #[tokio::test]
    async fn test_demo_runs_peer_lifecycle() {
        let mut config = WhConfig::default();
        config.demo.role = Role::Child;
        config.demo.traffic = Traffic::Mp;
        config.demo.cycles = 2 * DEMO_REQUEST_HISTORY as u32;
        config.demo.cycle_interval_ms = 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = build_gateway(&config, tx.clone());
        let session = shared(WhSession::new(gateway, config.session.clone()));
        let mut demo = Demo::new(Arc::clone(&session), tx, config.demo, Duration::from_secs(5))
            .await
            .unwrap();
        let handle = Dispatcher::new(Arc::clone(&session), rx).spawn();

        demo.run().await.unwrap();
        let guard = session.lock().await;
        assert_eq!(guard.state(), SessionState::Idle);
        assert_eq!(guard.gateway().requests().len(), DEMO_REQUEST_HISTORY);
        drop(guard);

        handle.abort();
    }
}
