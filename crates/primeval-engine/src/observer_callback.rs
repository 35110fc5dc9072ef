//! Tick callback that refreshes the Observer's read-only copy of the world.
//!
//! Subscribers get their updates from the engine's own broadcaster; this
//! callback only keeps the REST views current.

use std::sync::Arc;

use primeval_core::engine::{Engine, TickSummary};
use primeval_core::runner::TickCallback;
use primeval_observer::{AppState, ObserverSnapshot};
use tracing::debug;

/// Callback that bridges the tick loop to the Observer REST views.
pub struct ObserverCallback {
    state: Arc<AppState>,
    /// A refresh was skipped because a reader held the lock.
    stale: bool,
}

impl ObserverCallback {
    /// Create a new observer callback backed by the given app state.
    pub const fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            stale: false,
        }
    }

    fn refresh(&mut self, engine: &Engine) {
        // try_write so the tick loop never waits on a REST reader; a
        // skipped refresh is retried on the next call.
        if let Ok(mut snap) = self.state.snapshot.try_write() {
            *snap = ObserverSnapshot::capture(engine, &self.state.operator);
            self.stale = false;
        } else {
            self.stale = true;
            debug!(tick = engine.world().tick, "Observer snapshot busy, refresh deferred");
        }
    }

    /// Whether the last refresh was skipped.
    pub const fn is_stale(&self) -> bool {
        self.stale
    }
}

impl TickCallback for ObserverCallback {
    fn on_tick(&mut self, summary: &TickSummary, engine: &Engine) {
        debug!(
            tick = summary.tick,
            agents_alive = summary.agents_alive,
            events = summary.events,
            "Tick complete"
        );
        self.refresh(engine);
    }

    fn on_world_changed(&mut self, engine: &Engine) {
        self.refresh(engine);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use primeval_core::command::EngineHandle;
    use primeval_core::config::{SimulationBoundsConfig, SimulationConfig};
    use primeval_core::decision::StubDecisionProvider;
    use primeval_core::operator::OperatorState;
    use primeval_types::{Agent, AgentKind, Vec2, WorldSnapshot};

    use super::*;

    fn setup() -> (Engine, Arc<AppState>) {
        let mut world = WorldSnapshot::empty(50.0, 50.0);
        world.insert_agent(Agent::new("Ash", AgentKind::Npc, Vec2::new(5.0, 5.0)));
        let engine = Engine::new(
            SimulationConfig::default(),
            world,
            Arc::new(StubDecisionProvider::new()),
        )
        .unwrap();
        let operator = Arc::new(OperatorState::new(100, &SimulationBoundsConfig::default()));
        let (handle, _rx) = EngineHandle::channel(4);
        (engine, Arc::new(AppState::new(handle, operator)))
    }

    #[tokio::test]
    async fn world_change_refreshes_snapshot() {
        let (engine, state) = setup();
        let mut callback = ObserverCallback::new(Arc::clone(&state));

        callback.on_world_changed(&engine);

        let snap = state.snapshot.read().await;
        assert_eq!(snap.world.agents.len(), 1);
        assert!(snap.status.is_some());
        assert!(!callback.is_stale());
    }

    #[tokio::test]
    async fn busy_snapshot_is_retried() {
        let (engine, state) = setup();
        let mut callback = ObserverCallback::new(Arc::clone(&state));

        {
            let _reader = state.snapshot.read().await;
            callback.on_world_changed(&engine);
            assert!(callback.is_stale());
        }

        callback.on_world_changed(&engine);
        assert!(!callback.is_stale());
        assert_eq!(state.snapshot.read().await.world.agents.len(), 1);
    }
}
