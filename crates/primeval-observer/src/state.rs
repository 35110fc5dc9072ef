//! Shared application state for the Observer server.
//!
//! [`AppState`] carries the [`EngineHandle`] used to attach `WebSocket`
//! subscribers and forward overrides, the shared [`OperatorState`], and a
//! read-only copy of the world that the REST endpoints serve. The copy is
//! refreshed by the engine after each tick so a slow HTTP client never
//! holds up the simulation loop.

use std::sync::Arc;

use primeval_core::command::EngineHandle;
use primeval_core::engine::Engine;
use primeval_core::operator::{OperatorState, SimulationStatus};
use primeval_types::{DeltaEvent, WorldSnapshot};
use tokio::sync::RwLock;

/// Default outbound queue length for a `WebSocket` subscriber.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 64;

/// Read-only copy of the simulation served by the REST endpoints.
#[derive(Debug, Clone)]
pub struct ObserverSnapshot {
    /// The world as of the last refresh.
    pub world: WorldSnapshot,
    /// The retained event log, oldest first.
    pub events: Vec<DeltaEvent>,
    /// Engine-side status at the last refresh.
    pub status: Option<SimulationStatus>,
}

impl ObserverSnapshot {
    /// Copy the parts of `engine` the REST views need.
    pub fn capture(engine: &Engine, operator: &OperatorState) -> Self {
        Self {
            world: engine.world().clone(),
            events: engine.broadcaster().events().cloned().collect(),
            status: Some(engine.status(operator)),
        }
    }
}

impl Default for ObserverSnapshot {
    fn default() -> Self {
        Self {
            world: WorldSnapshot::empty(0.0, 0.0),
            events: Vec::new(),
            status: None,
        }
    }
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command channel into the simulation loop.
    pub engine: EngineHandle,
    /// Shared operator control state.
    pub operator: Arc<OperatorState>,
    /// The latest copy of the world (updated after each tick).
    pub snapshot: Arc<RwLock<ObserverSnapshot>>,
    /// Outbound queue length for each `WebSocket` subscriber.
    pub subscriber_queue: usize,
}

impl AppState {
    /// Create application state with an empty snapshot.
    pub fn new(engine: EngineHandle, operator: Arc<OperatorState>) -> Self {
        Self {
            engine,
            operator,
            snapshot: Arc::new(RwLock::new(ObserverSnapshot::default())),
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
        }
    }

    /// Use a specific outbound queue length for new subscribers.
    #[must_use]
    pub fn with_subscriber_queue(mut self, capacity: usize) -> Self {
        self.subscriber_queue = capacity.max(1);
        self
    }

    /// Replace the served copy of the world.
    pub async fn publish(&self, snapshot: ObserverSnapshot) {
        let mut guard = self.snapshot.write().await;
        *guard = snapshot;
    }
}
