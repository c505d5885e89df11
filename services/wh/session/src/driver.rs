//! Async dispatch path between a gateway's event channel and a session.
//!
//! The gateway delivers completions on an mpsc channel; the dispatcher feeds
//! them one at a time into the session behind a tokio mutex. Callers share the
//! same mutex to start operations, so entry operations and event handling
//! never interleave.

use crate::session::WhSession;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wh_gateway::{Gateway, GatewayEvent};

/// Session shared between the dispatcher and its callers
pub type SharedSession<G> = Arc<Mutex<WhSession<G>>>;

/// Wrap a session for sharing with a dispatcher
pub fn shared<G: Gateway>(session: WhSession<G>) -> SharedSession<G> {
    Arc::new(Mutex::new(session))
}

/// Feeds gateway events into a shared session
pub struct Dispatcher<G: Gateway> {
    session: SharedSession<G>,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    processed: u64,
}

impl<G: Gateway + 'static> Dispatcher<G> {
    /// Create a dispatcher reading `events`
    pub fn new(session: SharedSession<G>, events: mpsc::UnboundedReceiver<GatewayEvent>) -> Self {
        Self {
            session,
            events,
            processed: 0,
        }
    }

    /// Handle events until every sender is gone; returns the event count
    pub async fn run(mut self) -> u64 {
        info!("wh dispatcher started");
        while let Some(event) = self.events.recv().await {
            self.dispatch(event).await;
        }
        info!("wh dispatcher stopped after {} events", self.processed);
        self.processed
    }

    /// Handle every event already queued, including ones queued while
    /// draining; returns how many were handled
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event).await;
            handled += 1;
        }
        handled
    }

    /// Run on a tokio task
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    /// Events handled so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    async fn dispatch(&mut self, event: GatewayEvent) {
        let mut session = self.session.lock().await;
        session.handle_event(event);
        self.processed += 1;
        debug!("dispatched event {}, state {}", self.processed, session.state());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::state::{ConnectMode, SessionState};
    use std::time::Duration;
    use wh_gateway::SimGateway;

    #[tokio::test]
    async fn test_drain_runs_chains_to_completion() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = shared(WhSession::new(
            SimGateway::new().with_responder(tx),
            SessionConfig::default(),
        ));
        let mut dispatcher = Dispatcher::new(Arc::clone(&session), rx);

        session.lock().await.initialize().unwrap();
        assert_eq!(dispatcher.drain().await, 1);
        assert_eq!(session.lock().await.state(), SessionState::Idle);

        session
            .lock()
            .await
            .start_parent_connect(ConnectMode::DsParent, 1, 13)
            .unwrap();
        dispatcher.drain().await;
        assert_eq!(session.lock().await.state(), SessionState::DataSharing);
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_reaches_idle() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = shared(WhSession::new(
            SimGateway::new().with_responder(tx),
            SessionConfig::default(),
        ));
        let mut states = session.lock().await.subscribe();
        let handle = Dispatcher::new(Arc::clone(&session), rx).spawn();

        session.lock().await.initialize().unwrap();
        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == SessionState::Idle),
        )
        .await;
        assert!(matches!(reached, Ok(Ok(_))));

        handle.abort();
    }
}
