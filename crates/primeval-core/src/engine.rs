//! The simulation engine: one explicit instance owning all world state.
//!
//! [`Engine::tick`] runs the fixed phase order:
//!
//! 1. **Clock** -- advance simulated time by the reported elapsed time
//!    (no-op while the clock is inactive).
//! 2. **Decisions** -- apply decisions that finished since the last tick,
//!    in agent id order, then dispatch new requests for eligible agents.
//! 3. **Execution** -- advance every action state machine, apply
//!    environment effects and refill resource nodes whose regrowth delay
//!    has passed.
//! 4. **Collision** -- push agents out of static obstacles.
//! 5. **Broadcast** -- record the tick's events and fan out deltas.
//!
//! Commands from other tasks (subscriber lifecycle, operator overrides) are
//! applied through [`Engine::handle_command`] strictly between ticks.

use std::sync::Arc;
use std::time::Duration;

use primeval_types::{
    DeltaEvent, EntityId, EventKind, Importance, OverrideCommand, OverrideOutcome, OverrideTarget,
    SimTime, WorldSnapshot,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::{ClockError, SimClock};
use crate::collision;
use crate::command::EngineCommand;
use crate::config::SimulationConfig;
use crate::decision::DecisionProvider;
use crate::delta::{BroadcastReport, DeltaBroadcaster};
use crate::executor::{
    ActionError, ActionExecutor, AdvanceReport, TickContext, regrow_resources, release_slot,
};
use crate::operator::{OperatorState, SimulationStatus};
use crate::scheduler::{ApplyReport, DecisionScheduler, DispatchReport};
use crate::spatial::{DEFAULT_CELL_SIZE, SpatialIndex};

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Errors that reject an operator override. Nothing is changed when one
/// is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideError {
    /// The target matched no agent.
    #[error("no agent matches {target}")]
    NoMatchingAgent {
        /// Description of the target.
        target: String,
    },

    /// No entity with this id exists.
    #[error("unknown entity {entity}")]
    UnknownEntity {
        /// The missing entity.
        entity: EntityId,
    },

    /// A targeted agent has no memory at this position.
    #[error("agent {agent_id} has {len} memories, no index {index}")]
    MemoryIndexOutOfRange {
        /// The agent.
        agent_id: EntityId,
        /// Requested position.
        index: usize,
        /// Number of memories it has.
        len: usize,
    },

    /// Memory text is blank.
    #[error("memory text is empty")]
    EmptyMemory,

    /// Interrupting an agent failed.
    #[error("action error: {source}")]
    Action {
        /// The underlying action error.
        #[from]
        source: ActionError,
    },
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// Simulated time at the end of the tick.
    pub sim_time: SimTime,
    /// Simulated milliseconds this tick covered.
    pub sim_elapsed_ms: u64,
    /// Finished decisions applied this tick.
    pub decisions: ApplyReport,
    /// Decision requests sent this tick.
    pub dispatch: DispatchReport,
    /// Action state machine results.
    pub actions: AdvanceReport,
    /// Collision pushes applied.
    pub collisions: usize,
    /// Resource nodes refilled.
    pub regrown: usize,
    /// Events emitted.
    pub events: usize,
    /// Delta fan-out results.
    pub broadcast: BroadcastReport,
    /// Living agents at end of tick.
    pub agents_alive: usize,
}

/// Owns the world and every subsystem that mutates or observes it.
#[derive(Debug)]
pub struct Engine {
    config: SimulationConfig,
    world: WorldSnapshot,
    clock: SimClock,
    index: SpatialIndex,
    scheduler: DecisionScheduler,
    executor: ActionExecutor,
    broadcaster: DeltaBroadcaster,
}

impl Engine {
    /// Create an engine around `world` with an inactive clock.
    pub fn new(
        config: SimulationConfig,
        mut world: WorldSnapshot,
        provider: Arc<dyn DecisionProvider>,
    ) -> Result<Self, ClockError> {
        let clock = SimClock::new(config.world.time_scale)?;
        world.tick = clock.tick();
        world.sim_time = clock.sim_time();
        let index = SpatialIndex::from_world(&world, DEFAULT_CELL_SIZE);
        let scheduler =
            DecisionScheduler::new(provider, config.decision.clone(), config.world.seed);
        let executor = ActionExecutor::new(config.actions.clone());
        let broadcaster = DeltaBroadcaster::new(config.broadcast.clone());
        Ok(Self {
            config,
            world,
            clock,
            index,
            scheduler,
            executor,
            broadcaster,
        })
    }

    /// The live world.
    pub const fn world(&self) -> &WorldSnapshot {
        &self.world
    }

    /// The engine's configuration.
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The simulation clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Whether ticks currently advance time.
    pub const fn is_active(&self) -> bool {
        self.clock.is_active()
    }

    /// The delta broadcaster, for its event log and subscriber counts.
    pub const fn broadcaster(&self) -> &DeltaBroadcaster {
        &self.broadcaster
    }

    /// Decision calls currently running.
    pub fn decisions_in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Wait until every running decision call has posted its outcome.
    pub async fn settle_decisions(&self) {
        self.scheduler.wait_idle().await;
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick covering `elapsed` wall-clock time.
    ///
    /// Returns `Ok(None)` while the clock is inactive.
    pub fn tick(&mut self, elapsed: Duration) -> Result<Option<TickSummary>, TickError> {
        let Some(step) = self.clock.advance(elapsed)? else {
            return Ok(None);
        };
        self.world.tick = step.tick;
        self.world.sim_time = step.sim_time;
        let ctx = TickContext {
            tick: step.tick,
            sim_time: step.sim_time,
        };
        let mut events = Vec::new();

        self.index.rebuild(&self.world);
        let decisions = self.scheduler.apply_completed(
            &mut self.world,
            &self.index,
            &self.executor,
            ctx,
            &mut events,
        );
        let dispatch = self.scheduler.dispatch(&mut self.world, &self.index, ctx);

        let actions = self
            .executor
            .advance(&mut self.world, ctx, step.sim_elapsed_ms, &mut events);
        let regrown = regrow_resources(&mut self.world, ctx, &mut events);

        self.index.rebuild(&self.world);
        let collisions = collision::resolve(&mut self.world, &mut self.index);

        let event_count = events.len();
        self.broadcaster.record(events);
        let broadcast = self.broadcaster.broadcast(&self.world);
        if broadcast.dropped > 0 {
            self.deactivate_if_unobserved();
        }

        let summary = TickSummary {
            tick: step.tick,
            sim_time: step.sim_time,
            sim_elapsed_ms: step.sim_elapsed_ms,
            decisions,
            dispatch,
            actions,
            collisions,
            regrown,
            events: event_count,
            broadcast,
            agents_alive: self.world.alive_agents(),
        };
        debug!(
            tick = summary.tick,
            sim_time_ms = summary.sim_time.as_millis(),
            dispatched = summary.dispatch.dispatched,
            completed = summary.actions.completed,
            regrown = summary.regrown,
            events = summary.events,
            "tick complete"
        );
        Ok(Some(summary))
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Apply a command from another task.
    pub fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Attach { id, tx } => {
                if let Err(error) = self.broadcaster.attach(id, tx, &self.world) {
                    warn!(subscriber = %id, error = %error, "subscriber attach failed");
                }
            }
            EngineCommand::Ready { id } => match self.broadcaster.mark_ready(id) {
                Ok(_) => self.activate(),
                Err(error) => warn!(subscriber = %id, error = %error, "ready from unknown subscriber"),
            },
            EngineCommand::Detach { id } => {
                if self.broadcaster.detach(id).is_some() {
                    debug!(subscriber = %id, "subscriber detached");
                }
                self.deactivate_if_unobserved();
            }
            EngineCommand::Resync { id } => {
                if let Err(error) = self.broadcaster.resync(id, &self.world) {
                    warn!(subscriber = %id, error = %error, "resync failed");
                    self.deactivate_if_unobserved();
                }
            }
            EngineCommand::Override { command, reply } => {
                let outcome = match self.apply_override(command) {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        info!(error = %error, "override rejected");
                        OverrideOutcome::rejected(error.to_string())
                    }
                };
                if reply.send(outcome).is_err() {
                    debug!("override requester went away");
                }
            }
        }
    }

    fn activate(&mut self) {
        if self.clock.is_active() {
            return;
        }
        let first = self.clock.activate();
        info!(tick = self.clock.tick(), first, "world activated");
        if first {
            let event = DeltaEvent::new(
                self.world.tick,
                self.world.sim_time,
                EventKind::WorldStarted,
                None,
                json!({
                    "width": self.world.width,
                    "height": self.world.height,
                    "agents": self.world.agents.len(),
                    "obstacles": self.world.obstacles.len(),
                }),
                Importance::High,
            );
            self.broadcaster.record([event]);
        }
    }

    fn deactivate_if_unobserved(&mut self) {
        if self.config.world.pause_when_unobserved
            && self.clock.is_active()
            && self.broadcaster.ready_count() == 0
        {
            self.clock.deactivate();
            info!(tick = self.clock.tick(), "no ready subscribers, world paused");
        }
    }

    // -----------------------------------------------------------------------
    // Overrides
    // -----------------------------------------------------------------------

    /// Apply an operator override atomically.
    pub fn apply_override(
        &mut self,
        command: OverrideCommand,
    ) -> Result<OverrideOutcome, OverrideError> {
        let ctx = TickContext {
            tick: self.world.tick,
            sim_time: self.world.sim_time,
        };
        let mut events = Vec::new();
        let kind = override_name(&command);

        let outcome = match command {
            OverrideCommand::AddMemory { target, memory } => {
                let memory = non_empty(memory)?;
                let ids = self.resolve_target(&target)?;
                let cap = self.config.actions.memory_cap;
                for id in &ids {
                    if let Some(agent) = self.world.agents.get_mut(id) {
                        agent.remember(memory.clone(), cap);
                    }
                }
                OverrideOutcome::applied(format!("added memory to {} agent(s)", ids.len()), ids)
            }
            OverrideCommand::ModifyMemory {
                target,
                index,
                memory,
            } => {
                let memory = non_empty(memory)?;
                let ids = self.resolve_target(&target)?;
                for id in &ids {
                    let len = self.world.agents.get(id).map_or(0, |a| a.memories.len());
                    if index >= len {
                        return Err(OverrideError::MemoryIndexOutOfRange {
                            agent_id: *id,
                            index,
                            len,
                        });
                    }
                }
                for id in &ids {
                    if let Some(slot) = self
                        .world
                        .agents
                        .get_mut(id)
                        .and_then(|a| a.memories.get_mut(index))
                    {
                        slot.clone_from(&memory);
                    }
                }
                OverrideOutcome::applied(format!("replaced memory {index}"), ids)
            }
            OverrideCommand::ClearMemories { target } => {
                let ids = self.resolve_target(&target)?;
                for id in &ids {
                    if let Some(agent) = self.world.agents.get_mut(id) {
                        agent.memories.clear();
                    }
                }
                OverrideOutcome::applied(format!("cleared memories of {} agent(s)", ids.len()), ids)
            }
            OverrideCommand::ResetAgent { target } => {
                let ids = self.resolve_target(&target)?;
                for id in &ids {
                    self.executor
                        .interrupt(&mut self.world, *id, "operator reset", ctx, &mut events)?;
                    if let Some(agent) = self.world.agents.get_mut(id) {
                        agent.cooldown_until = ctx.sim_time;
                        agent.generation = agent.generation.saturating_add(1);
                    }
                }
                OverrideOutcome::applied(format!("reset {} agent(s)", ids.len()), ids)
            }
            OverrideCommand::RemoveEntity { entity } => {
                self.remove_entity(entity, ctx, &mut events)?;
                OverrideOutcome::applied("entity removed", vec![entity])
            }
        };

        events.push(DeltaEvent::new(
            ctx.tick,
            ctx.sim_time,
            EventKind::OverrideApplied,
            None,
            json!({ "command": kind, "affected": outcome.affected }),
            Importance::Medium,
        ));
        info!(command = kind, affected = outcome.affected.len(), "override applied");
        self.broadcaster.record(events);
        Ok(outcome)
    }

    fn remove_entity(
        &mut self,
        entity: EntityId,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<(), OverrideError> {
        if self.world.agents.contains_key(&entity) {
            release_slot(&mut self.world, entity);
            self.world.agents.remove(&entity);
        } else if self.world.obstacles.contains_key(&entity) {
            let holders: Vec<EntityId> = self
                .world
                .agents
                .values()
                .filter(|a| a.claimed_slot == Some(entity))
                .map(|a| a.id)
                .collect();
            for holder in holders {
                self.executor
                    .interrupt(&mut self.world, holder, "target removed", ctx, events)?;
            }
            self.world.obstacles.remove(&entity);
        } else {
            return Err(OverrideError::UnknownEntity { entity });
        }
        self.index.remove(entity);

        events.push(DeltaEvent::new(
            ctx.tick,
            ctx.sim_time,
            EventKind::EntityRemoved,
            Some(entity),
            json!({ "entity": entity }),
            Importance::High,
        ));
        Ok(())
    }

    fn resolve_target(&self, target: &OverrideTarget) -> Result<Vec<EntityId>, OverrideError> {
        let ids: Vec<EntityId> = match target {
            OverrideTarget::All => self.world.agents.keys().copied().collect(),
            OverrideTarget::Id { id } => self
                .world
                .agents
                .contains_key(id)
                .then_some(*id)
                .into_iter()
                .collect(),
            OverrideTarget::Name { name } => self
                .world
                .agents
                .values()
                .filter(|a| a.name == *name)
                .map(|a| a.id)
                .collect(),
        };
        if ids.is_empty() {
            return Err(OverrideError::NoMatchingAgent {
                target: describe_target(target),
            });
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Current status for the operator API.
    pub fn status(&self, operator: &OperatorState) -> SimulationStatus {
        SimulationStatus {
            tick: self.clock.tick(),
            sim_time_ms: self.clock.sim_time().as_millis(),
            calendar: self.clock.calendar().to_string(),
            active: self.clock.is_active(),
            paused: operator.is_paused(),
            stop_requested: operator.is_stop_requested(),
            tick_interval_ms: operator.tick_interval_ms(),
            time_scale: self.clock.time_scale(),
            elapsed_seconds: operator.elapsed_seconds(),
            max_ticks: operator.max_ticks(),
            agents_alive: self.world.alive_agents(),
            agents_total: self.world.agents.len(),
            decisions_in_flight: self.scheduler.in_flight(),
            subscribers_ready: self.broadcaster.ready_count(),
            end_reason: None,
            started_at: operator.started_at().to_rfc3339(),
        }
    }
}

const fn override_name(command: &OverrideCommand) -> &'static str {
    match command {
        OverrideCommand::AddMemory { .. } => "add_memory",
        OverrideCommand::ModifyMemory { .. } => "modify_memory",
        OverrideCommand::ClearMemories { .. } => "clear_memories",
        OverrideCommand::ResetAgent { .. } => "reset_agent",
        OverrideCommand::RemoveEntity { .. } => "remove_entity",
    }
}

fn describe_target(target: &OverrideTarget) -> String {
    match target {
        OverrideTarget::All => "all agents".to_owned(),
        OverrideTarget::Id { id } => format!("id {id}"),
        OverrideTarget::Name { name } => format!("name {name:?}"),
    }
}

fn non_empty(memory: String) -> Result<String, OverrideError> {
    if memory.trim().is_empty() {
        return Err(OverrideError::EmptyMemory);
    }
    Ok(memory)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use primeval_types::{
        ActionKind, ActionProposal, ActionState, ActionTarget, Agent, AgentKind, Footprint, Item,
        ServerMessage, StaticObstacle, SubscriberId, Vec2,
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::SimulationBoundsConfig;
    use crate::decision::StubDecisionProvider;

    const TICK: Duration = Duration::from_millis(100);

    fn make_world() -> (WorldSnapshot, EntityId, EntityId) {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let agent = Agent::new("Ash", AgentKind::Npc, Vec2::new(40.0, 50.0));
        let agent_id = agent.id;
        world.insert_agent(agent);
        world.insert_agent(Agent::new("Birch", AgentKind::Npc, Vec2::new(60.0, 50.0)));
        let tree = StaticObstacle::resource_node(
            "Oak",
            Vec2::new(50.0, 50.0),
            Footprint::square(2.0),
            Item::Wood,
            10,
        );
        let tree_id = tree.id;
        world.insert_obstacle(tree);
        (world, agent_id, tree_id)
    }

    fn make_engine() -> (Engine, EntityId, EntityId) {
        let (world, agent_id, tree_id) = make_world();
        let engine = Engine::new(
            SimulationConfig::default(),
            world,
            Arc::new(StubDecisionProvider::new()),
        )
        .unwrap();
        (engine, agent_id, tree_id)
    }

    fn attach_ready(engine: &mut Engine) -> (SubscriberId, mpsc::Receiver<Arc<ServerMessage>>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(64);
        engine.handle_command(EngineCommand::Attach { id, tx });
        engine.handle_command(EngineCommand::Ready { id });
        (id, rx)
    }

    fn events_of(engine: &Engine, kind: EventKind) -> usize {
        engine
            .broadcaster()
            .events()
            .filter(|e| e.kind == kind)
            .count()
    }

    #[tokio::test]
    async fn inactive_engine_does_not_advance() {
        let (mut engine, _, _) = make_engine();
        assert!(engine.tick(TICK).unwrap().is_none());
        assert_eq!(engine.world().tick, 0);
        assert_eq!(engine.decisions_in_flight(), 0);
    }

    #[tokio::test]
    async fn first_ready_subscriber_starts_the_world_once() {
        let (mut engine, _, _) = make_engine();
        let (first, _rx1) = attach_ready(&mut engine);
        assert!(engine.is_active());
        assert_eq!(events_of(&engine, EventKind::WorldStarted), 1);

        let summary = engine.tick(TICK).unwrap().unwrap();
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.sim_time, SimTime::from_millis(6_000));

        engine.handle_command(EngineCommand::Detach { id: first });
        assert!(!engine.is_active());
        assert!(engine.tick(TICK).unwrap().is_none());

        let (_second, _rx2) = attach_ready(&mut engine);
        assert!(engine.is_active());
        assert_eq!(events_of(&engine, EventKind::WorldStarted), 1);
    }

    #[tokio::test]
    async fn late_tick_reports_larger_elapsed() {
        let (mut engine, _, _) = make_engine();
        let _sub = attach_ready(&mut engine);
        let summary = engine.tick(TICK * 2).unwrap().unwrap();
        assert_eq!(summary.sim_elapsed_ms, 12_000);
    }

    #[tokio::test]
    async fn ticks_drive_decisions_and_deltas() {
        let (mut engine, agent_id, _) = make_engine();
        let (_, mut rx) = attach_ready(&mut engine);

        let first = engine.tick(TICK).unwrap().unwrap();
        assert_eq!(first.dispatch.dispatched, 2);
        engine.settle_decisions().await;
        let second = engine.tick(TICK).unwrap().unwrap();
        assert_eq!(second.decisions.started, 2);

        let agent = engine.world().agents.get(&agent_id).unwrap();
        assert_eq!(agent.action_state, ActionState::Executing);

        let mut saw_snapshot_first = false;
        let mut deltas = 0;
        let mut index = 0;
        while let Ok(message) = rx.try_recv() {
            match message.as_ref() {
                ServerMessage::Snapshot { .. } => saw_snapshot_first = index == 0,
                ServerMessage::Delta(_) => deltas += 1,
                ServerMessage::OverrideResult(_) => {}
            }
            index += 1;
        }
        assert!(saw_snapshot_first);
        assert!(deltas >= 1);
    }

    #[tokio::test]
    async fn memory_overrides_respect_cap_and_bounds() {
        let (mut engine, agent_id, _) = make_engine();
        let target = OverrideTarget::Id { id: agent_id };

        for i in 0..55 {
            engine
                .apply_override(OverrideCommand::AddMemory {
                    target: target.clone(),
                    memory: format!("memory {i}"),
                })
                .unwrap();
        }
        let memories = &engine.world().agents.get(&agent_id).unwrap().memories;
        assert_eq!(memories.len(), 50);
        assert_eq!(memories.first().map(String::as_str), Some("memory 5"));

        let out_of_range = engine.apply_override(OverrideCommand::ModifyMemory {
            target: target.clone(),
            index: 50,
            memory: "nope".to_owned(),
        });
        assert!(matches!(
            out_of_range,
            Err(OverrideError::MemoryIndexOutOfRange { index: 50, len: 50, .. })
        ));

        engine
            .apply_override(OverrideCommand::ModifyMemory {
                target: target.clone(),
                index: 0,
                memory: "first".to_owned(),
            })
            .unwrap();
        assert_eq!(
            engine.world().agents.get(&agent_id).unwrap().memories[0],
            "first"
        );

        engine
            .apply_override(OverrideCommand::ClearMemories { target })
            .unwrap();
        assert!(engine.world().agents.get(&agent_id).unwrap().memories.is_empty());
    }

    #[tokio::test]
    async fn blank_memory_and_unknown_names_are_rejected() {
        let (mut engine, agent_id, _) = make_engine();
        let blank = engine.apply_override(OverrideCommand::AddMemory {
            target: OverrideTarget::Id { id: agent_id },
            memory: "   ".to_owned(),
        });
        assert_eq!(blank, Err(OverrideError::EmptyMemory));

        let nobody = engine.apply_override(OverrideCommand::ClearMemories {
            target: OverrideTarget::Name {
                name: "Nobody".to_owned(),
            },
        });
        assert!(matches!(nobody, Err(OverrideError::NoMatchingAgent { .. })));
    }

    #[tokio::test]
    async fn reset_interrupts_and_discards_in_flight_decision() {
        let (mut engine, agent_id, _) = make_engine();
        let _sub = attach_ready(&mut engine);
        engine.tick(TICK).unwrap();
        assert!(engine.world().agents.get(&agent_id).unwrap().in_flight_decision);

        let outcome = engine
            .apply_override(OverrideCommand::ResetAgent {
                target: OverrideTarget::Id { id: agent_id },
            })
            .unwrap();
        assert_eq!(outcome.affected, vec![agent_id]);
        let agent = engine.world().agents.get(&agent_id).unwrap();
        assert_eq!(agent.generation, 1);
        assert_eq!(agent.cooldown_until, engine.world().sim_time);

        engine.settle_decisions().await;
        let summary = engine.tick(TICK).unwrap().unwrap();
        assert_eq!(summary.decisions.discarded, 1);
        let agent = engine.world().agents.get(&agent_id).unwrap();
        assert!(!agent.in_flight_decision);
        // Eligible again in the same tick the stale result was dropped.
        assert_eq!(summary.dispatch.dispatched, 1);
    }

    #[tokio::test]
    async fn removing_a_resource_node_interrupts_its_gatherer() {
        let (mut engine, agent_id, tree_id) = make_engine();
        let mut events = Vec::new();
        let ctx = TickContext {
            tick: 0,
            sim_time: SimTime::ZERO,
        };
        engine
            .executor
            .start(
                &mut engine.world,
                agent_id,
                &ActionProposal::new(ActionKind::Gather, ActionTarget::Entity { entity: tree_id }),
                ctx,
                &mut events,
            )
            .unwrap();

        engine
            .apply_override(OverrideCommand::RemoveEntity { entity: tree_id })
            .unwrap();
        assert!(!engine.world().obstacles.contains_key(&tree_id));
        let agent = engine.world().agents.get(&agent_id).unwrap();
        assert_eq!(agent.action_state, ActionState::Idle);
        assert!(agent.claimed_slot.is_none());
        assert_eq!(events_of(&engine, EventKind::EntityRemoved), 1);
        assert_eq!(events_of(&engine, EventKind::ActionInterrupted), 1);

        let again = engine.apply_override(OverrideCommand::RemoveEntity { entity: tree_id });
        assert_eq!(again, Err(OverrideError::UnknownEntity { entity: tree_id }));
    }

    #[tokio::test]
    async fn override_command_replies_with_outcome() {
        let (mut engine, _, _) = make_engine();
        let (reply, outcome) = tokio::sync::oneshot::channel();
        engine.handle_command(EngineCommand::Override {
            command: OverrideCommand::ResetAgent {
                target: OverrideTarget::Name {
                    name: "Nobody".to_owned(),
                },
            },
            reply,
        });
        let outcome = outcome.await.unwrap();
        assert!(!outcome.ok);
        assert!(outcome.message.contains("Nobody"));
    }

    #[tokio::test]
    async fn status_reflects_engine_and_operator() {
        let (mut engine, _, _) = make_engine();
        let operator = OperatorState::new(100, &SimulationBoundsConfig::default());
        let _sub = attach_ready(&mut engine);
        engine.tick(TICK).unwrap();
        operator.pause();

        let status = engine.status(&operator);
        assert_eq!(status.tick, 1);
        assert!(status.active);
        assert!(status.paused);
        assert_eq!(status.agents_total, 2);
        assert_eq!(status.subscribers_ready, 1);
        assert_eq!(status.calendar, "day 1 08:00");
        engine.settle_decisions().await;
    }
}
