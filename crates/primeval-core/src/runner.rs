//! Simulation loop runner with operator controls.
//!
//! [`run_simulation`] drives an [`Engine`] until a termination condition
//! is met:
//!
//! - **Commands**: subscriber lifecycle and overrides are applied between
//!   ticks, also while paused or unobserved
//! - **Activation gate**: ticks only run while a subscriber is ready
//! - **Pause/resume** and **variable tick speed** from the operator API
//! - **Bounded simulation**: stop after `max_ticks` or
//!   `max_real_time_seconds`
//! - **Clean shutdown** on operator stop or when every command sender is
//!   gone
//!
//! Each tick is handed the wall-clock time that actually passed since the
//! previous one, so a late tick advances the world by more.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::command::EngineCommand;
use crate::engine::{Engine, TickError, TickSummary};
use crate::operator::{OperatorState, SimulationEndReason};

/// Consecutive failed ticks after which the run is abandoned.
///
/// Faults in a single agent or action are absorbed inside the tick, so a
/// tick only fails when the clock cannot advance. An overflowed clock never
/// recovers; a lone failure is logged and the next tick is tried.
const MAX_CONSECUTIVE_TICK_FAILURES: u32 = 10;

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Ticks kept failing.
    ///
    /// [`TickError`] only carries clock failures, which repeat on every
    /// retry once the tick counter or simulated time has overflowed. The
    /// run gives up after 10 in a row rather than spin on a world that can
    /// no longer advance.
    #[error("tick failed {failures} times in a row: {source}")]
    Tick {
        /// Number of consecutive failures.
        failures: u32,
        /// The last failure.
        source: TickError,
    },
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The reason the simulation ended.
    pub end_reason: SimulationEndReason,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
}

/// Callback invoked as the world changes.
///
/// Implementations can use this to refresh the observer's read-only copy
/// of the world.
pub trait TickCallback: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, summary: &TickSummary, engine: &Engine);

    /// Called after a command changed the world between ticks.
    fn on_world_changed(&mut self, _engine: &Engine) {}
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _engine: &Engine) {}
}

fn make_ticker(interval_ms: u64) -> Interval {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Run the simulation loop until a termination condition is met.
///
/// # Errors
///
/// Returns [`RunnerError`] if ticks fail repeatedly. A single failed tick
/// is logged and the loop continues.
pub async fn run_simulation(
    engine: &mut Engine,
    commands: &mut mpsc::Receiver<EngineCommand>,
    operator: &Arc<OperatorState>,
    callback: &mut dyn TickCallback,
) -> Result<SimulationResult, RunnerError> {
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;
    let mut failures: u32 = 0;
    let mut interval_ms = operator.tick_interval_ms();
    let mut ticker = make_ticker(interval_ms);
    let mut last_tick: Option<Instant> = None;

    info!(
        max_ticks = operator.max_ticks(),
        max_real_time_seconds = operator.max_real_time_seconds(),
        tick_interval_ms = interval_ms,
        "Simulation starting"
    );

    let end_reason = loop {
        if operator.is_stop_requested() {
            info!("Operator stop requested");
            break SimulationEndReason::OperatorStop;
        }
        if operator.time_limit_reached() {
            info!(
                max_seconds = operator.max_real_time_seconds(),
                elapsed = operator.elapsed_seconds(),
                "Real-time limit reached"
            );
            break SimulationEndReason::MaxRealTimeReached;
        }

        let requested = operator.tick_interval_ms();
        if requested != interval_ms {
            info!(from = interval_ms, to = requested, "Tick interval changed");
            interval_ms = requested;
            ticker = make_ticker(interval_ms);
        }

        let running = engine.is_active() && !operator.is_paused();
        if !running {
            last_tick = None;
        }

        tokio::select! {
            biased;

            command = commands.recv() => {
                let Some(command) = command else {
                    info!("Engine command channel closed");
                    break SimulationEndReason::ChannelClosed;
                };
                engine.handle_command(command);
                callback.on_world_changed(engine);
            }

            () = operator.changed() => {}

            now = ticker.tick() => {
                if !running {
                    continue;
                }
                let elapsed = last_tick.map_or(Duration::from_millis(interval_ms), |previous| {
                    now.saturating_duration_since(previous)
                });
                last_tick = Some(now);

                match engine.tick(elapsed) {
                    Ok(Some(summary)) => {
                        failures = 0;
                        total_ticks = total_ticks.saturating_add(1);
                        callback.on_tick(&summary, engine);
                        let done = operator.tick_limit_reached(summary.tick);
                        last_summary = Some(summary);
                        if done {
                            info!(max_ticks = operator.max_ticks(), "Tick limit reached");
                            break SimulationEndReason::MaxTicksReached;
                        }
                    }
                    Ok(None) => {}
                    Err(source) => {
                        failures = failures.saturating_add(1);
                        error!(
                            tick = engine.clock().tick(),
                            failures,
                            error = %source,
                            "Tick failed"
                        );
                        if failures >= MAX_CONSECUTIVE_TICK_FAILURES {
                            return Err(RunnerError::Tick { failures, source });
                        }
                    }
                }
            }
        }
    };

    operator.set_end_reason(end_reason).await;
    Ok(SimulationResult {
        end_reason,
        final_summary: last_summary,
        total_ticks,
    })
}

/// Log the simulation end sequence.
///
/// Called after [`run_simulation`] returns. The HTTP server should remain
/// running after this returns.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_summary.as_ref().map(|s| s.tick),
        final_agents_alive = result.final_summary.as_ref().map(|s| s.agents_alive),
        "Simulation ended"
    );

    if let Some(ref summary) = result.final_summary {
        info!(
            tick = summary.tick,
            sim_time_ms = summary.sim_time.as_millis(),
            agents_alive = summary.agents_alive,
            "Final tick summary"
        );
    } else {
        warn!("Simulation ended with no ticks executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use primeval_types::{Agent, AgentKind, SubscriberId, Vec2, WorldSnapshot};

    use super::*;
    use crate::command::EngineHandle;
    use crate::config::{SimulationBoundsConfig, SimulationConfig};
    use crate::decision::StubDecisionProvider;

    struct CountingCallback {
        ticks: u64,
        changes: u64,
    }

    impl TickCallback for CountingCallback {
        fn on_tick(&mut self, _summary: &TickSummary, _engine: &Engine) {
            self.ticks += 1;
        }

        fn on_world_changed(&mut self, _engine: &Engine) {
            self.changes += 1;
        }
    }

    fn make_engine() -> Engine {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        world.insert_agent(Agent::new("Ash", AgentKind::Npc, Vec2::new(10.0, 10.0)));
        Engine::new(
            SimulationConfig::default(),
            world,
            Arc::new(StubDecisionProvider::new()),
        )
        .unwrap()
    }

    fn operator(max_ticks: u64) -> Arc<OperatorState> {
        Arc::new(OperatorState::new(
            100,
            &SimulationBoundsConfig {
                max_ticks,
                max_real_time_seconds: 0,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_by_max_ticks_once_observed() {
        let mut engine = make_engine();
        let (handle, mut commands) = EngineHandle::channel(8);
        let operator = operator(5);
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let id = SubscriberId::new();
        handle.attach(id, tx).await.unwrap();
        handle.ready(id).await.unwrap();

        let mut cb = CountingCallback {
            ticks: 0,
            changes: 0,
        };
        let result = run_simulation(&mut engine, &mut commands, &operator, &mut cb)
            .await
            .unwrap();

        assert_eq!(result.end_reason, SimulationEndReason::MaxTicksReached);
        assert_eq!(result.total_ticks, 5);
        assert_eq!(cb.ticks, 5);
        assert_eq!(cb.changes, 2);
        assert_eq!(
            operator.end_reason().await,
            Some(SimulationEndReason::MaxTicksReached)
        );
        assert_eq!(result.final_summary.map(|s| s.sim_time.as_millis()), Some(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn operator_stop_before_start() {
        let mut engine = make_engine();
        let (_handle, mut commands) = EngineHandle::channel(8);
        let operator = operator(0);
        operator.request_stop();

        let result = run_simulation(&mut engine, &mut commands, &operator, &mut NoOpCallback)
            .await
            .unwrap();
        assert_eq!(result.end_reason, SimulationEndReason::OperatorStop);
        assert_eq!(result.total_ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unobserved_world_does_not_tick() {
        let mut engine = make_engine();
        let (_handle, mut commands) = EngineHandle::channel(8);
        let operator = operator(0);
        let stopper = Arc::clone(&operator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            stopper.request_stop();
        });

        let result = run_simulation(&mut engine, &mut commands, &operator, &mut NoOpCallback)
            .await
            .unwrap();
        assert_eq!(result.end_reason, SimulationEndReason::OperatorStop);
        assert_eq!(result.total_ticks, 0);
        assert_eq!(engine.world().tick, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_world_does_not_tick() {
        let mut engine = make_engine();
        let (handle, mut commands) = EngineHandle::channel(8);
        let operator = operator(0);
        operator.pause();
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let id = SubscriberId::new();
        handle.attach(id, tx).await.unwrap();
        handle.ready(id).await.unwrap();

        let stopper = Arc::clone(&operator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            stopper.request_stop();
        });

        let result = run_simulation(&mut engine, &mut commands, &operator, &mut NoOpCallback)
            .await
            .unwrap();
        assert_eq!(result.total_ticks, 0);
        assert!(engine.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn overflowed_clock_aborts_the_run() {
        let mut config = SimulationConfig::default();
        config.world.time_scale = f64::MAX;
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        world.insert_agent(Agent::new("Ash", AgentKind::Npc, Vec2::new(10.0, 10.0)));
        let mut engine =
            Engine::new(config, world, Arc::new(StubDecisionProvider::new())).unwrap();
        let (handle, mut commands) = EngineHandle::channel(8);
        let operator = operator(0);
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let id = SubscriberId::new();
        handle.attach(id, tx).await.unwrap();
        handle.ready(id).await.unwrap();

        let err = run_simulation(&mut engine, &mut commands, &operator, &mut NoOpCallback)
            .await
            .unwrap_err();
        let RunnerError::Tick { failures, source } = err;
        assert_eq!(failures, MAX_CONSECUTIVE_TICK_FAILURES);
        assert!(matches!(
            source,
            TickError::Clock {
                source: crate::clock::ClockError::Overflow
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_ends_run() {
        let mut engine = make_engine();
        let (handle, mut commands) = EngineHandle::channel(8);
        drop(handle);
        let operator = operator(0);

        let result = run_simulation(&mut engine, &mut commands, &operator, &mut NoOpCallback)
            .await
            .unwrap();
        assert_eq!(result.end_reason, SimulationEndReason::ChannelClosed);
    }
}
