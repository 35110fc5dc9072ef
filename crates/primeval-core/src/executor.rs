//! Action execution state machine.
//!
//! Every agent cycles `Idle -> Moving -> Executing -> Cooling -> Idle`.
//! Actions that need no travel enter `Executing` directly. Any state can be
//! forced back to `Idle` by interruption (death, operator reset, lost
//! target). Partially applied effects are not rolled back: progressive
//! effects (resting) accrue per tick, and completion effects (items,
//! skills, stock) are committed exactly once, on the `Executing ->
//! Cooling` transition.
//!
//! Every committed transition appends at most one [`DeltaEvent`].
//! Completions, interruptions and deaths are also written to the agent's
//! bounded memory, which later decision requests carry.
//!
//! A resource node emptied by gathering records when it ran out;
//! [`regrow_resources`] refills it once its item's regrowth delay passes.
//!
//! # Fault isolation
//!
//! [`ActionExecutor::advance`] processes agents one at a time. An error for
//! one agent is logged with the tick and agent id, that agent is forced
//! back to `Idle`, and the remaining agents are still advanced.

use primeval_types::{
    ActionKind, ActionProposal, ActionState, ActionTarget, Agent, CurrentAction, DeltaEvent,
    EntityId, EventKind, Importance, Item, MILLIS_PER_MINUTE, ResourceStock, SimTime, Skill, Vec2,
    Vital, WorldSnapshot,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::clock::f64_to_millis;
use crate::config::ActionConfig;

/// Gap left between an agent and the edge of the obstacle it works at.
const APPROACH_MARGIN: f64 = 0.05;

/// Errors raised while starting or advancing an action.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// No agent with this id exists.
    #[error("unknown agent {agent_id}")]
    UnknownAgent {
        /// The missing agent.
        agent_id: EntityId,
    },

    /// The agent is dead.
    #[error("agent {agent_id} is dead")]
    AgentDead {
        /// The dead agent.
        agent_id: EntityId,
    },

    /// A new action can only start from `Idle`.
    #[error("agent {agent_id} is busy ({state:?})")]
    NotIdle {
        /// The busy agent.
        agent_id: EntityId,
        /// Its current state.
        state: ActionState,
    },

    /// The state machine does not permit this transition.
    #[error("agent {agent_id} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        /// The agent.
        agent_id: EntityId,
        /// Current state.
        from: ActionState,
        /// Requested state.
        to: ActionState,
    },

    /// The action needs a target of a different shape.
    #[error("{kind} needs a different target, got {target:?}")]
    InvalidTarget {
        /// The action.
        kind: ActionKind,
        /// What was supplied.
        target: ActionTarget,
    },

    /// The target entity does not exist or is gone.
    #[error("unknown target entity {entity}")]
    UnknownTarget {
        /// The missing entity.
        entity: EntityId,
    },

    /// The target is not a resource node.
    #[error("entity {entity} is not a resource node")]
    NotAResource {
        /// The entity.
        entity: EntityId,
    },

    /// The resource node has no stock left.
    #[error("resource node {entity} is depleted")]
    Depleted {
        /// The empty node.
        entity: EntityId,
    },

    /// Another agent holds the resource node's interaction slot.
    #[error("resource node {entity} is occupied by {occupant}")]
    SlotOccupied {
        /// The node.
        entity: EntityId,
        /// Current holder.
        occupant: EntityId,
    },

    /// The agent does not carry the item.
    #[error("no {item:?} in inventory")]
    MissingItem {
        /// The item.
        item: Item,
    },

    /// The item cannot be eaten.
    #[error("{item:?} is not edible")]
    Inedible {
        /// The item.
        item: Item,
    },

    /// A target position is not finite.
    #[error("invalid target position")]
    InvalidPosition,

    /// Agent bookkeeping is inconsistent with its state.
    #[error("agent {agent_id} has inconsistent action state: {reason}")]
    CorruptState {
        /// The agent.
        agent_id: EntityId,
        /// What is inconsistent.
        reason: String,
    },
}

/// Tick number and simulated time stamped onto events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// Current tick.
    pub tick: u64,
    /// Current simulated time.
    pub sim_time: SimTime,
}

/// Counts of what happened during one [`ActionExecutor::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// Actions whose effects were committed.
    pub completed: usize,
    /// Actions cut short.
    pub interrupted: usize,
    /// Agents that died.
    pub died: usize,
    /// Agents that hit an error and were reset.
    pub faults: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Unchanged,
    Completed,
    Interrupted,
    Died,
}

/// Validated start parameters for an action.
#[derive(Debug, Clone, Copy)]
struct ActionPlan {
    kind: ActionKind,
    target: ActionTarget,
    destination: Option<Vec2>,
    duration_ms: u64,
    claim: Option<EntityId>,
}

/// Runs the action state machine for every agent.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    config: ActionConfig,
}

impl ActionExecutor {
    /// Create an executor.
    pub const fn new(config: ActionConfig) -> Self {
        Self { config }
    }

    /// The executor's configuration.
    pub const fn config(&self) -> &ActionConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Validate `proposal` and start it for an idle agent.
    ///
    /// On success the agent is `Moving` (travel needed) or `Executing`, and
    /// an `action_started` event is appended. On error nothing changes.
    pub fn start(
        &self,
        world: &mut WorldSnapshot,
        agent_id: EntityId,
        proposal: &ActionProposal,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<ActionKind, ActionError> {
        let plan = self.plan(world, agent_id, proposal)?;

        let agent = world
            .agents
            .get_mut(&agent_id)
            .ok_or(ActionError::UnknownAgent { agent_id })?;
        let next = if plan.destination.is_some() {
            ActionState::Moving
        } else {
            ActionState::Executing
        };
        transition(agent, next)?;
        agent.current_action = Some(CurrentAction {
            kind: plan.kind,
            target: plan.target,
            destination: plan.destination,
            started_at: ctx.sim_time,
            duration_ms: plan.duration_ms,
            execution_started_at: (next == ActionState::Executing).then_some(ctx.sim_time),
        });
        agent.cooling_until = None;

        if let Some(slot) = plan.claim {
            agent.claimed_slot = Some(slot);
            if let Some(obstacle) = world.obstacles.get_mut(&slot) {
                obstacle.occupied_by = Some(agent_id);
            }
        }

        events.push(make_event(
            ctx,
            EventKind::ActionStarted,
            agent_id,
            json!({
                "kind": plan.kind,
                "target": plan.target,
                "destination": plan.destination,
                "duration_ms": plan.duration_ms,
                "reasoning": proposal.reasoning,
            }),
            Importance::Low,
        ));
        Ok(plan.kind)
    }

    fn plan(
        &self,
        world: &WorldSnapshot,
        agent_id: EntityId,
        proposal: &ActionProposal,
    ) -> Result<ActionPlan, ActionError> {
        let agent = world
            .agents
            .get(&agent_id)
            .ok_or(ActionError::UnknownAgent { agent_id })?;
        if !agent.alive {
            return Err(ActionError::AgentDead { agent_id });
        }
        if agent.action_state != ActionState::Idle {
            return Err(ActionError::NotIdle {
                agent_id,
                state: agent.action_state,
            });
        }

        let kind = proposal.kind;
        let invalid_target = || ActionError::InvalidTarget {
            kind,
            target: proposal.target,
        };

        let mut target = proposal.target;
        let mut destination = None;
        let mut claim = None;
        let mut stock = None;

        match kind {
            ActionKind::Rest => target = ActionTarget::None,
            ActionKind::Eat => {
                let item = match proposal.target {
                    ActionTarget::Item { item } => item,
                    ActionTarget::None => [Item::Meat, Item::Berry, Item::Water]
                        .into_iter()
                        .find(|item| agent.inventory.count(*item) > 0)
                        .ok_or(ActionError::MissingItem { item: Item::Berry })?,
                    ActionTarget::Position { .. } | ActionTarget::Entity { .. } => {
                        return Err(invalid_target());
                    }
                };
                if item.nutrition().is_none() {
                    return Err(ActionError::Inedible { item });
                }
                if agent.inventory.count(item) == 0 {
                    return Err(ActionError::MissingItem { item });
                }
                target = ActionTarget::Item { item };
            }
            ActionKind::Gather => {
                let ActionTarget::Entity { entity } = proposal.target else {
                    return Err(invalid_target());
                };
                let obstacle = world
                    .obstacles
                    .get(&entity)
                    .filter(|o| o.alive)
                    .ok_or(ActionError::UnknownTarget { entity })?;
                let node_stock = obstacle
                    .resource
                    .ok_or(ActionError::NotAResource { entity })?;
                if node_stock.quantity == 0 {
                    return Err(ActionError::Depleted { entity });
                }
                if let Some(occupant) = obstacle.occupied_by.filter(|o| *o != agent_id) {
                    return Err(ActionError::SlotOccupied { entity, occupant });
                }
                let reach = obstacle.collision_radius() + agent.radius + APPROACH_MARGIN;
                destination = self.travel(
                    world,
                    agent.position,
                    approach_point(agent.position, obstacle.position, reach),
                );
                claim = Some(entity);
                stock = Some(node_stock);
            }
            ActionKind::Explore => match proposal.target {
                ActionTarget::None => {}
                ActionTarget::Position { position } => {
                    if !position.is_finite() {
                        return Err(ActionError::InvalidPosition);
                    }
                    destination = self.travel(world, agent.position, position);
                }
                ActionTarget::Entity { .. } | ActionTarget::Item { .. } => {
                    return Err(invalid_target());
                }
            },
            ActionKind::Flee => {
                let ActionTarget::Entity { entity } = proposal.target else {
                    return Err(invalid_target());
                };
                let threat = world
                    .position_of(entity)
                    .ok_or(ActionError::UnknownTarget { entity })?;
                let away = (agent.position - threat)
                    .normalized()
                    .unwrap_or(Vec2::new(1.0, 0.0));
                let goal = agent.position + away.scale(self.config.flee_distance);
                destination = self.travel(world, agent.position, goal);
            }
            ActionKind::Move => {
                let ActionTarget::Position { position } = proposal.target else {
                    return Err(invalid_target());
                };
                if !position.is_finite() {
                    return Err(ActionError::InvalidPosition);
                }
                destination = self.travel(world, agent.position, position);
            }
        }

        Ok(ActionPlan {
            kind,
            target,
            destination,
            duration_ms: self.duration_ms(kind, agent, stock),
            claim,
        })
    }

    /// Clamp `goal` to the world and drop it if the agent is already there.
    fn travel(&self, world: &WorldSnapshot, from: Vec2, goal: Vec2) -> Option<Vec2> {
        let goal = goal.clamp_to(world.width, world.height);
        (from.distance(goal) > self.config.arrival_epsilon).then_some(goal)
    }

    /// Length of the execution phase after all modifiers.
    fn duration_ms(&self, kind: ActionKind, agent: &Agent, stock: Option<ResourceStock>) -> u64 {
        if kind == ActionKind::Move {
            return 0;
        }
        let mut minutes = kind.base_minutes();

        if let Some(stock) = stock {
            minutes *= stock.item.gather_difficulty();
            minutes *= 0.5 + 0.5 * stock.fill_ratio();
        }

        let skill = match kind {
            ActionKind::Gather => Some(Skill::Gathering),
            ActionKind::Explore => Some(Skill::Survival),
            ActionKind::Rest | ActionKind::Eat | ActionKind::Flee | ActionKind::Move => None,
        };
        if let Some(skill) = skill {
            let reduction = (agent.skills.level(skill) * 0.005).min(0.5);
            minutes *= 1.0 - reduction;
        }

        if agent.attributes.stamina() < 30.0 {
            minutes *= 1.3;
        }
        if agent.attributes.health() < 50.0 {
            minutes *= 1.2;
        }

        let minutes = minutes.clamp(
            self.config.min_duration_minutes,
            self.config.max_duration_minutes,
        );
        f64_to_millis(minutes * MILLIS_PER_MINUTE as f64)
    }

    // -----------------------------------------------------------------------
    // Advance
    // -----------------------------------------------------------------------

    /// Advance every alive agent by `sim_elapsed_ms` of simulated time.
    pub fn advance(
        &self,
        world: &mut WorldSnapshot,
        ctx: TickContext,
        sim_elapsed_ms: u64,
        events: &mut Vec<DeltaEvent>,
    ) -> AdvanceReport {
        let minutes = sim_elapsed_ms as f64 / MILLIS_PER_MINUTE as f64;
        let ids: Vec<EntityId> = world
            .agents
            .values()
            .filter(|a| a.alive)
            .map(|a| a.id)
            .collect();

        let mut report = AdvanceReport::default();
        for agent_id in ids {
            match self.advance_agent(world, agent_id, ctx, minutes, events) {
                Ok(Step::Unchanged) => {}
                Ok(Step::Completed) => report.completed = report.completed.saturating_add(1),
                Ok(Step::Interrupted) => {
                    report.interrupted = report.interrupted.saturating_add(1);
                }
                Ok(Step::Died) => report.died = report.died.saturating_add(1),
                Err(error) => {
                    warn!(
                        tick = ctx.tick,
                        agent_id = %agent_id,
                        error = %error,
                        "agent advance failed, resetting to idle"
                    );
                    report.faults = report.faults.saturating_add(1);
                    force_idle(world, agent_id);
                }
            }
        }
        report
    }

    fn advance_agent(
        &self,
        world: &mut WorldSnapshot,
        agent_id: EntityId,
        ctx: TickContext,
        minutes: f64,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<Step, ActionError> {
        let (dead, state) = {
            let agent = world
                .agents
                .get_mut(&agent_id)
                .ok_or(ActionError::UnknownAgent { agent_id })?;
            apply_drift(agent, minutes);
            (agent.attributes.health() <= 0.0, agent.action_state)
        };
        if dead {
            self.kill(world, agent_id, "health depleted", ctx, events)?;
            return Ok(Step::Died);
        }

        match state {
            ActionState::Idle => Ok(Step::Unchanged),
            ActionState::Moving => {
                if self.step_moving(world, agent_id, ctx, minutes, events)? {
                    return Ok(Step::Interrupted);
                }
                self.try_complete(world, agent_id, ctx, events)
            }
            ActionState::Executing => self.try_complete(world, agent_id, ctx, events),
            ActionState::Cooling => finish_cooling(world, agent_id, ctx),
        }
    }

    /// Move toward the destination. Returns `true` if the action had to be
    /// interrupted because its target is gone.
    fn step_moving(
        &self,
        world: &mut WorldSnapshot,
        agent_id: EntityId,
        ctx: TickContext,
        minutes: f64,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<bool, ActionError> {
        let action = current_action(world, agent_id)?;
        let destination = action.destination.ok_or_else(|| ActionError::CorruptState {
            agent_id,
            reason: "moving without a destination".to_owned(),
        })?;

        if let (ActionKind::Gather, ActionTarget::Entity { entity }) = (action.kind, action.target)
        {
            let held = world
                .obstacles
                .get(&entity)
                .is_some_and(|o| o.alive && o.occupied_by == Some(agent_id));
            if !held {
                self.interrupt(world, agent_id, "gather target lost", ctx, events)?;
                return Ok(true);
            }
        }

        let agent = world
            .agents
            .get_mut(&agent_id)
            .ok_or(ActionError::UnknownAgent { agent_id })?;
        let step = agent.effective_speed() * minutes;
        let remaining = agent.position.distance(destination);

        if remaining <= step || remaining <= self.config.arrival_epsilon {
            agent.position = destination;
            transition(agent, ActionState::Executing)?;
            if let Some(current) = agent.current_action.as_mut() {
                current.execution_started_at = Some(ctx.sim_time);
            }
        } else if let Some(direction) = (destination - agent.position).normalized() {
            agent.position = (agent.position + direction.scale(step))
                .clamp_to(world.width, world.height);
        }
        Ok(false)
    }

    /// Commit the action's effects if its execution phase is over.
    fn try_complete(
        &self,
        world: &mut WorldSnapshot,
        agent_id: EntityId,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<Step, ActionError> {
        let action = current_action(world, agent_id)?;
        let Some(execution_started_at) = action.execution_started_at else {
            // Still travelling.
            return Ok(Step::Unchanged);
        };
        if ctx.sim_time.since(execution_started_at) < action.duration_ms {
            return Ok(Step::Unchanged);
        }

        let result = commit_effects(world, agent_id, &action, ctx)?;

        let cooling_until = ctx.sim_time.plus_millis(self.config.cooling_ms());
        let agent = world
            .agents
            .get_mut(&agent_id)
            .ok_or(ActionError::UnknownAgent { agent_id })?;
        transition(agent, ActionState::Cooling)?;
        agent.current_action = None;
        agent.cooling_until = Some(cooling_until);
        agent.remember(result.clone(), self.config.memory_cap);
        agent.last_action_result = Some(result.clone());
        debug!(tick = ctx.tick, agent_id = %agent_id, kind = %action.kind, "action completed");

        events.push(make_event(
            ctx,
            EventKind::ActionCompleted,
            agent_id,
            json!({ "kind": action.kind, "result": result }),
            Importance::Medium,
        ));
        Ok(Step::Completed)
    }

    // -----------------------------------------------------------------------
    // Interruption
    // -----------------------------------------------------------------------

    /// Force an agent back to `Idle` from any state. Effects already applied
    /// stay applied. Returns `true` if the agent was doing something.
    pub fn interrupt(
        &self,
        world: &mut WorldSnapshot,
        agent_id: EntityId,
        reason: &str,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<bool, ActionError> {
        let agent = world
            .agents
            .get(&agent_id)
            .ok_or(ActionError::UnknownAgent { agent_id })?;
        let previous = agent.action_state;
        let kind = agent.current_action.map(|a| a.kind);
        force_idle(world, agent_id);

        if previous == ActionState::Idle {
            return Ok(false);
        }
        if let Some(agent) = world.agents.get_mut(&agent_id) {
            let what = kind.map_or_else(|| "action".to_owned(), |k| k.to_string());
            agent.remember(format!("stopped {what}: {reason}"), self.config.memory_cap);
        }
        events.push(make_event(
            ctx,
            EventKind::ActionInterrupted,
            agent_id,
            json!({ "kind": kind, "state": previous, "reason": reason }),
            Importance::Medium,
        ));
        Ok(true)
    }

    /// Kill an agent: interrupt it, mark it dead and bump its generation so
    /// any in-flight decision is discarded on arrival.
    pub fn kill(
        &self,
        world: &mut WorldSnapshot,
        agent_id: EntityId,
        cause: &str,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) -> Result<(), ActionError> {
        self.interrupt(world, agent_id, cause, ctx, events)?;
        let agent = world
            .agents
            .get_mut(&agent_id)
            .ok_or(ActionError::UnknownAgent { agent_id })?;
        agent.alive = false;
        agent.generation = agent.generation.saturating_add(1);
        agent.remember(format!("died: {cause}"), self.config.memory_cap);
        agent.last_action_result = Some(format!("died: {cause}"));
        warn!(tick = ctx.tick, agent_id = %agent_id, name = agent.name, cause, "agent died");

        events.push(make_event(
            ctx,
            EventKind::AgentDied,
            agent_id,
            json!({ "name": agent.name, "cause": cause }),
            Importance::Critical,
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn transition(agent: &mut Agent, next: ActionState) -> Result<(), ActionError> {
    if !agent.action_state.can_transition_to(next) {
        return Err(ActionError::InvalidTransition {
            agent_id: agent.id,
            from: agent.action_state,
            to: next,
        });
    }
    agent.action_state = next;
    Ok(())
}

fn current_action(world: &WorldSnapshot, agent_id: EntityId) -> Result<CurrentAction, ActionError> {
    let agent = world
        .agents
        .get(&agent_id)
        .ok_or(ActionError::UnknownAgent { agent_id })?;
    agent.current_action.ok_or_else(|| ActionError::CorruptState {
        agent_id,
        reason: format!("{:?} without an action", agent.action_state),
    })
}

/// Point at distance `reach` from `center`, on the side facing `from`.
fn approach_point(from: Vec2, center: Vec2, reach: f64) -> Vec2 {
    let direction = (from - center)
        .normalized()
        .unwrap_or(Vec2::new(1.0, 0.0));
    center + direction.scale(reach)
}

/// Environment effects for `minutes` of simulated time.
fn apply_drift(agent: &mut Agent, minutes: f64) {
    let attrs = &mut agent.attributes;
    attrs.adjust(Vital::Hunger, 0.05 * minutes);
    if attrs.hunger() > 90.0 {
        attrs.adjust(Vital::Health, -0.05 * minutes);
    }

    let kind = agent.current_action.map(|a| a.kind);
    match (agent.action_state, kind) {
        (ActionState::Executing, Some(ActionKind::Rest)) => {
            attrs.adjust(Vital::Stamina, 1.5 * minutes);
            attrs.adjust(Vital::Health, 0.8 * minutes);
        }
        (ActionState::Moving | ActionState::Executing, Some(kind)) if kind.is_strenuous() => {
            attrs.adjust(Vital::Stamina, -0.15 * minutes);
        }
        (ActionState::Idle, _) => attrs.adjust(Vital::Stamina, 0.2 * minutes),
        _ => {}
    }

    if attrs.stamina() < 10.0 {
        attrs.adjust(Vital::Health, -0.02 * minutes);
    }
}

/// Apply completion effects once. Returns a short human-readable result.
fn commit_effects(
    world: &mut WorldSnapshot,
    agent_id: EntityId,
    action: &CurrentAction,
    ctx: TickContext,
) -> Result<String, ActionError> {
    let WorldSnapshot {
        agents, obstacles, ..
    } = world;
    let agent = agents
        .get_mut(&agent_id)
        .ok_or(ActionError::UnknownAgent { agent_id })?;

    let result = match (action.kind, action.target) {
        (ActionKind::Eat, ActionTarget::Item { item }) => {
            let nutrition = item.nutrition().unwrap_or(0.0);
            if agent.inventory.remove(item, 1) {
                agent.attributes.adjust(Vital::Hunger, -nutrition);
                format!("ate {item:?}")
            } else {
                format!("had no {item:?} left to eat")
            }
        }
        (ActionKind::Gather, ActionTarget::Entity { entity }) => {
            let stock = obstacles
                .get_mut(&entity)
                .filter(|o| o.alive)
                .and_then(|o| o.resource.as_mut());
            match stock {
                Some(stock) if stock.quantity > 0 => {
                    let bonus = whole_units(agent.skills.level(Skill::Gathering) / 25.0);
                    let amount = 1_u32.saturating_add(bonus).min(stock.quantity);
                    stock.quantity = stock.quantity.saturating_sub(amount);
                    if stock.quantity == 0 {
                        stock.depleted_at = Some(ctx.sim_time);
                    }
                    agent.inventory.add(stock.item, amount);
                    agent.skills.improve(Skill::Gathering, 1.0);
                    format!("gathered {amount} {:?}", stock.item)
                }
                _ => "found nothing to gather".to_owned(),
            }
        }
        (ActionKind::Explore, _) => {
            agent.skills.improve(Skill::Survival, 0.5);
            "explored the area".to_owned()
        }
        (ActionKind::Rest, _) => "rested".to_owned(),
        (ActionKind::Flee, _) => "fled".to_owned(),
        (ActionKind::Move, _) => "arrived".to_owned(),
        (kind, target) => {
            return Err(ActionError::InvalidTarget { kind, target });
        }
    };
    Ok(result)
}

/// Refill depleted resource nodes whose regrowth delay has passed.
///
/// A node found empty without a depletion time starts its delay now.
/// Returns the number of nodes refilled.
pub fn regrow_resources(
    world: &mut WorldSnapshot,
    ctx: TickContext,
    events: &mut Vec<DeltaEvent>,
) -> usize {
    let mut regrown = 0_usize;
    for obstacle in world.obstacles.values_mut().filter(|o| o.alive) {
        let Some(stock) = obstacle.resource.as_mut() else {
            continue;
        };
        if stock.quantity > 0 {
            stock.depleted_at = None;
            continue;
        }
        let Some(since) = stock.depleted_at else {
            stock.depleted_at = Some(ctx.sim_time);
            continue;
        };
        let delay = stock.item.regrow_minutes().saturating_mul(MILLIS_PER_MINUTE);
        if ctx.sim_time.since(since) < delay {
            continue;
        }
        stock.quantity = stock.max_quantity;
        stock.depleted_at = None;
        regrown = regrown.saturating_add(1);
        debug!(tick = ctx.tick, obstacle = %obstacle.id, item = ?stock.item, "resource regenerated");
        events.push(make_event(
            ctx,
            EventKind::ResourceRegenerated,
            obstacle.id,
            json!({ "name": obstacle.name, "item": stock.item, "quantity": stock.quantity }),
            Importance::Low,
        ));
    }
    regrown
}

/// Leave `Cooling` once the window has passed, releasing any held slot.
fn finish_cooling(
    world: &mut WorldSnapshot,
    agent_id: EntityId,
    ctx: TickContext,
) -> Result<Step, ActionError> {
    let agent = world
        .agents
        .get_mut(&agent_id)
        .ok_or(ActionError::UnknownAgent { agent_id })?;
    let until = agent.cooling_until.ok_or_else(|| ActionError::CorruptState {
        agent_id,
        reason: "cooling without an end time".to_owned(),
    })?;
    if ctx.sim_time < until {
        return Ok(Step::Unchanged);
    }
    transition(agent, ActionState::Idle)?;
    agent.cooling_until = None;
    release_slot(world, agent_id);
    Ok(Step::Unchanged)
}

/// Reset an agent to `Idle` unconditionally, releasing its slot.
pub(crate) fn force_idle(world: &mut WorldSnapshot, agent_id: EntityId) {
    release_slot(world, agent_id);
    if let Some(agent) = world.agents.get_mut(&agent_id) {
        agent.action_state = ActionState::Idle;
        agent.current_action = None;
        agent.cooling_until = None;
    }
}

/// Free the interaction slot an agent holds, if any.
pub(crate) fn release_slot(world: &mut WorldSnapshot, agent_id: EntityId) {
    let Some(slot) = world
        .agents
        .get_mut(&agent_id)
        .and_then(|a| a.claimed_slot.take())
    else {
        return;
    };
    if let Some(obstacle) = world.obstacles.get_mut(&slot) {
        if obstacle.occupied_by == Some(agent_id) {
            obstacle.occupied_by = None;
        }
    }
}

/// Whole units in a non-negative amount, saturating.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_units(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        value.floor() as u32
    }
}

pub(crate) fn make_event(
    ctx: TickContext,
    kind: EventKind,
    entity_id: EntityId,
    payload: serde_json::Value,
    importance: Importance,
) -> DeltaEvent {
    DeltaEvent::new(
        ctx.tick,
        ctx.sim_time,
        kind,
        Some(entity_id),
        payload,
        importance,
    )
}
