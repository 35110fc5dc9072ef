//! Per-agent decision cooldowns with global admission control.
//!
//! Each tick the scheduler dispatches a decision request for every eligible
//! agent (alive, idle, no decision in flight, cooldown elapsed) in ascending
//! id order, up to the free capacity of a global semaphore. Calls run on
//! spawned tasks under a hard timeout and post their outcome to an inbox.
//! The inbox is drained synchronously at the start of a later tick, so the
//! tick loop never waits on a provider.
//!
//! A successful proposal is started on the executor and the agent's
//! cooldown is pushed out by a jittered interval. Any failure (provider
//! error, timeout, malformed or rejected proposal) sets the shorter retry
//! cooldown and starts the fallback action instead. Either way the choice
//! is written to the agent's memory.

use std::sync::Arc;

use primeval_types::{
    ActionKind, ActionProposal, ActionState, ActionTarget, Agent, DeltaEvent, EntityId, EventKind,
    Importance, SimTime, WorldSnapshot,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::config::DecisionConfig;
use crate::decision::{DecisionError, DecisionProvider, FallbackPolicy};
use crate::executor::{ActionExecutor, TickContext, make_event};
use crate::perception::{build_request, build_view};
use crate::spatial::SpatialIndex;

/// Result of one decision call, posted back to the tick loop.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    /// The agent the decision was for.
    pub agent_id: EntityId,
    /// The agent's generation when the call was dispatched.
    pub generation: u64,
    /// The proposal, or why there is none.
    pub result: Result<ActionProposal, DecisionError>,
}

/// Counts from one [`DecisionScheduler::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Requests sent to the provider.
    pub dispatched: usize,
    /// Eligible agents left for a later tick for lack of capacity.
    pub deferred: usize,
}

/// Counts from one [`DecisionScheduler::apply_completed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Proposals started as returned.
    pub started: usize,
    /// Failures recovered with the fallback policy.
    pub fallbacks: usize,
    /// Outcomes dropped for a dead, removed, reset or busy agent.
    pub discarded: usize,
}

/// Admits, tracks and applies decision calls.
pub struct DecisionScheduler {
    provider: Arc<dyn DecisionProvider>,
    permits: Arc<Semaphore>,
    capacity: usize,
    inbox_tx: mpsc::UnboundedSender<DecisionOutcome>,
    inbox_rx: mpsc::UnboundedReceiver<DecisionOutcome>,
    fallback: FallbackPolicy,
    rng: StdRng,
    config: DecisionConfig,
}

impl std::fmt::Debug for DecisionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionScheduler")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DecisionScheduler {
    /// Create a scheduler. `seed` drives cooldown jitter.
    pub fn new(provider: Arc<dyn DecisionProvider>, config: DecisionConfig, seed: u64) -> Self {
        let capacity = config.max_concurrent.max(1);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            provider,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            inbox_tx,
            inbox_rx,
            fallback: FallbackPolicy,
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    /// Number of decision calls currently running.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.permits.available_permits())
    }

    /// Wait until no decision call is running. Outcomes are left in the
    /// inbox for [`Self::apply_completed`].
    pub async fn wait_idle(&self) {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        // The semaphore is never closed, so acquisition only fails if it is.
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Dispatch requests for eligible agents up to the free capacity.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(
        &self,
        world: &mut WorldSnapshot,
        index: &SpatialIndex,
        ctx: TickContext,
    ) -> DispatchReport {
        let eligible: Vec<EntityId> = world
            .agents
            .values()
            .filter(|a| is_eligible(a, ctx.sim_time))
            .map(|a| a.id)
            .collect();

        let mut report = DispatchReport::default();
        for (position, agent_id) in eligible.iter().enumerate() {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                report.deferred = eligible.len().saturating_sub(position);
                break;
            };
            let Some(request) = build_request(world, index, *agent_id, &self.config) else {
                continue;
            };
            let Some(agent) = world.agents.get_mut(agent_id) else {
                continue;
            };
            agent.in_flight_decision = true;
            let generation = agent.generation;

            let provider = Arc::clone(&self.provider);
            let inbox = self.inbox_tx.clone();
            let deadline = self.config.timeout();
            let agent_id = *agent_id;
            tokio::spawn(async move {
                let result = match tokio::time::timeout(deadline, provider.propose(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(DecisionError::Timeout {
                        agent_id,
                        deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    }),
                };
                if inbox
                    .send(DecisionOutcome {
                        agent_id,
                        generation,
                        result,
                    })
                    .is_err()
                {
                    debug!(agent_id = %agent_id, "scheduler gone, dropping decision");
                }
                drop(permit);
            });

            debug!(tick = ctx.tick, agent_id = %agent_id, "decision dispatched");
            report.dispatched = report.dispatched.saturating_add(1);
        }
        report
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    /// Drain finished decisions and apply them in ascending agent id order.
    pub fn apply_completed(
        &mut self,
        world: &mut WorldSnapshot,
        index: &SpatialIndex,
        executor: &ActionExecutor,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) -> ApplyReport {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.inbox_rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|o| o.agent_id);

        let mut report = ApplyReport::default();
        for outcome in outcomes {
            let agent_id = outcome.agent_id;
            let Some(agent) = world.agents.get_mut(&agent_id) else {
                report.discarded = report.discarded.saturating_add(1);
                continue;
            };
            agent.in_flight_decision = false;
            if !agent.alive
                || agent.generation != outcome.generation
                || agent.action_state != ActionState::Idle
            {
                debug!(
                    tick = ctx.tick,
                    agent_id = %agent_id,
                    dispatched_generation = outcome.generation,
                    generation = agent.generation,
                    "discarding stale decision"
                );
                report.discarded = report.discarded.saturating_add(1);
                continue;
            }

            let failure = match outcome.result {
                Ok(proposal) => match executor.start(world, agent_id, &proposal, ctx, events) {
                    Ok(kind) => {
                        let memory = match proposal.reasoning.as_deref() {
                            Some(why) if !why.trim().is_empty() => {
                                format!("decided to {kind}: {}", why.trim())
                            }
                            _ => format!("decided to {kind}"),
                        };
                        remember(world, agent_id, memory, executor.config().memory_cap);
                        let interval = self.jittered_interval_ms();
                        extend_cooldown(world, agent_id, ctx.sim_time.plus_millis(interval));
                        report.started = report.started.saturating_add(1);
                        None
                    }
                    Err(error) => Some(DecisionError::Rejected {
                        reason: error.to_string(),
                    }),
                },
                Err(error) => Some(error),
            };

            if let Some(error) = failure {
                self.fall_back(world, index, executor, agent_id, &error, ctx, events);
                report.fallbacks = report.fallbacks.saturating_add(1);
            }
        }
        report
    }

    /// Set the retry cooldown and start the fallback action.
    #[allow(clippy::too_many_arguments)]
    fn fall_back(
        &self,
        world: &mut WorldSnapshot,
        index: &SpatialIndex,
        executor: &ActionExecutor,
        agent_id: EntityId,
        error: &DecisionError,
        ctx: TickContext,
        events: &mut Vec<DeltaEvent>,
    ) {
        extend_cooldown(
            world,
            agent_id,
            ctx.sim_time.plus_millis(self.config.retry_interval_ms()),
        );

        let Some(agent) = world.agents.get(&agent_id) else {
            return;
        };
        let view = build_view(world, index, agent, self.config.perception_radius);
        let mut proposal = self.fallback.choose(agent, &view);
        warn!(
            tick = ctx.tick,
            agent_id = %agent_id,
            error = %error,
            fallback = %proposal.kind,
            "decision failed, using fallback"
        );

        if let Err(start_error) = executor.start(world, agent_id, &proposal, ctx, events) {
            debug!(agent_id = %agent_id, error = %start_error, "fallback rejected, resting");
            proposal = ActionProposal::new(ActionKind::Rest, ActionTarget::None)
                .with_reasoning("fallback default");
            if let Err(rest_error) = executor.start(world, agent_id, &proposal, ctx, events) {
                warn!(agent_id = %agent_id, error = %rest_error, "agent cannot rest");
            }
        }

        remember(
            world,
            agent_id,
            format!("fell back to {} ({error})", proposal.kind),
            executor.config().memory_cap,
        );
        events.push(make_event(
            ctx,
            EventKind::DecisionFallback,
            agent_id,
            json!({ "error": error.to_string(), "fallback": proposal.kind }),
            Importance::Low,
        ));
    }

    fn jittered_interval_ms(&mut self) -> u64 {
        let low = self.config.min_interval_ms();
        let high = self.config.max_interval_ms().max(low);
        self.rng.random_range(low..=high)
    }
}

/// Whether `agent` may be sent a new decision request at `now`.
pub fn is_eligible(agent: &Agent, now: SimTime) -> bool {
    agent.alive
        && !agent.in_flight_decision
        && agent.action_state == ActionState::Idle
        && agent.cooldown_until <= now
}

fn remember(world: &mut WorldSnapshot, agent_id: EntityId, memory: String, cap: usize) {
    if let Some(agent) = world.agents.get_mut(&agent_id) {
        agent.remember(memory, cap);
    }
}

/// Move an agent's cooldown forward to `until`; it never moves back.
fn extend_cooldown(world: &mut WorldSnapshot, agent_id: EntityId, until: SimTime) {
    if let Some(agent) = world.agents.get_mut(&agent_id) {
        agent.cooldown_until = agent.cooldown_until.max(until);
    }
}
