//! Connection lifecycle for the wh wireless layer.
//!
//! One node acts as coordinator (parent) and up to fifteen peers (children)
//! join it. Every radio operation is fire-and-accept: it is refused on the
//! spot or queued, and completes later on the gateway's event path. This
//! crate folds those completions into one observable [`SessionState`].
//!
//! ## Features
//!
//! - **Bring-up / shutdown**: combined or detailed radio power sequences
//! - **Coordinator**: parameter setup, beaconing, admission control
//! - **Peer**: join a known coordinator or scan and auto-connect
//! - **Channel survey**: measure every allowed channel, pick the least busy
//! - **Messaging**: direct datagrams, data sharing, key sharing
//! - **Teardown**: graceful finalize and unconditional reset
//! - **Error ledger**: sticky last error plus the step that raised it
//!
//! ## Example
//!
//! ```rust,no_run
//! use wh_gateway::SimGateway;
//! use wh_session::{shared, ConnectMode, Dispatcher, SessionConfig, SessionState, WhSession};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (tx, rx) = mpsc::unbounded_channel();
//! let session = shared(WhSession::new(
//!     SimGateway::new().with_responder(tx),
//!     SessionConfig::default(),
//! ));
//! let mut states = session.lock().await.subscribe();
//! Dispatcher::new(session.clone(), rx).spawn();
//!
//! session.lock().await.initialize()?;
//! states.wait_for(|s| *s == SessionState::Idle).await?;
//!
//! session.lock().await.start_parent_connect(ConnectMode::DsParent, 1, 7)?;
//! states.wait_for(|s| *s == SessionState::DataSharing).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod child;
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod measure;
pub mod parent;
pub mod radio;
pub mod scan;
pub mod session;
pub mod state;
pub mod step;
pub mod strategy;
pub mod teardown;

// Re-export main types
pub use config::{system_ggid, BringUp, SessionConfig};
pub use data::{SendCallback, SendOutcome, StepOutcome};
pub use driver::{shared, Dispatcher, SharedSession};
pub use error::SessionError;
pub use ledger::{ErrorCode, ErrorLedger, LedgerEntry};
pub use measure::{ChannelSurvey, MAX_BUSY_RATIO};
pub use scan::{classify, ScanCursor};
pub use session::{WhSession, MAX_USER_GAME_INFO};
pub use state::{ConnectMode, SessionState, Sharing};
pub use step::{Phase, Step};
pub use strategy::{
    AdmissionPolicy, AlternateProtocolDetector, ChildKeyGenerator, DataReceiver, Discovery,
    DiscoveryHandler, IndicationObserver, Inbound, JoinRequest, ParentKeyGenerator,
};
