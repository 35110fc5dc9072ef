//! Decision provider trait, stub provider and fallback policy.
//!
//! A [`DecisionProvider`] maps a [`DecisionRequest`] to an
//! [`ActionProposal`]. It may be slow, fail or never answer; the scheduler
//! runs every call off the tick path under a hard timeout. When a call
//! fails, the [`FallbackPolicy`] picks a deterministic action so the agent
//! never stalls.

use futures::future::BoxFuture;
use primeval_types::{
    ActionKind, ActionProposal, ActionTarget, Agent, DecisionRequest, EntityId, Item, WorldView,
};

/// Hunger above which an agent looks for food.
const HUNGRY_THRESHOLD: f64 = 80.0;

/// Health below which an agent always rests.
const WOUNDED_THRESHOLD: f64 = 30.0;

/// Stamina below which an agent rests.
const EXHAUSTED_THRESHOLD: f64 = 20.0;

/// Errors a decision call can end with. All of them are recovered locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    /// The provider did not answer within the deadline.
    #[error("agent {agent_id} decision timed out (deadline: {deadline_ms}ms)")]
    Timeout {
        /// The agent whose decision timed out.
        agent_id: EntityId,
        /// The deadline in milliseconds.
        deadline_ms: u64,
    },

    /// The provider reported an error.
    #[error("decision provider error: {message}")]
    Provider {
        /// Description of the error.
        message: String,
    },

    /// The provider answered with something that is not a proposal.
    #[error("malformed proposal: {message}")]
    Malformed {
        /// Parse failure description.
        message: String,
    },

    /// The proposal parsed but could not be started.
    #[error("proposal rejected: {reason}")]
    Rejected {
        /// Why the executor refused it.
        reason: String,
    },
}

/// A source of agent decisions.
///
/// Implementations must be cheap to call: the returned future does the
/// work and is awaited on a spawned task, never on the tick path.
pub trait DecisionProvider: Send + Sync {
    /// Propose an action for the agent described by `request`.
    fn propose(
        &self,
        request: DecisionRequest,
    ) -> BoxFuture<'static, Result<ActionProposal, DecisionError>>;
}

/// A provider that answers immediately with the fallback policy's choice.
///
/// Used when no external provider is configured, so the world can be run
/// and observed without one.
#[derive(Debug, Clone, Default)]
pub struct StubDecisionProvider {
    policy: FallbackPolicy,
}

impl StubDecisionProvider {
    /// Create a new stub provider.
    pub const fn new() -> Self {
        Self {
            policy: FallbackPolicy,
        }
    }
}

impl DecisionProvider for StubDecisionProvider {
    fn propose(
        &self,
        request: DecisionRequest,
    ) -> BoxFuture<'static, Result<ActionProposal, DecisionError>> {
        let proposal = self
            .policy
            .choose(&request.agent, &request.world)
            .with_reasoning("stub provider");
        Box::pin(async move { Ok(proposal) })
    }
}

/// Deterministic rule-based action choice used when a decision fails.
///
/// Rules, first match wins:
/// 1. health below 30: rest
/// 2. hungry with berries or meat carried: eat
/// 3. hungry and a free berry node is visible: gather from the nearest
/// 4. stamina below 20: rest
/// 5. otherwise: rest
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackPolicy;

impl FallbackPolicy {
    /// Choose an action for `agent` given what it can see.
    pub fn choose(self, agent: &Agent, view: &WorldView) -> ActionProposal {
        let attrs = &agent.attributes;

        if attrs.health() < WOUNDED_THRESHOLD {
            return ActionProposal::new(ActionKind::Rest, ActionTarget::None)
                .with_reasoning("badly hurt");
        }

        if attrs.hunger() > HUNGRY_THRESHOLD {
            let food = [Item::Meat, Item::Berry]
                .into_iter()
                .find(|item| agent.inventory.count(*item) > 0);
            if let Some(item) = food {
                return ActionProposal::new(ActionKind::Eat, ActionTarget::Item { item })
                    .with_reasoning("hungry, eating carried food");
            }

            let bush = view.nearby_obstacles.iter().find(|o| {
                o.alive
                    && o.occupied_by.is_none()
                    && o.resource
                        .is_some_and(|stock| stock.item == Item::Berry && stock.quantity > 0)
            });
            if let Some(bush) = bush {
                return ActionProposal::new(
                    ActionKind::Gather,
                    ActionTarget::Entity { entity: bush.id },
                )
                .with_reasoning("hungry, gathering berries");
            }
        }

        if attrs.stamina() < EXHAUSTED_THRESHOLD {
            return ActionProposal::new(ActionKind::Rest, ActionTarget::None)
                .with_reasoning("exhausted");
        }

        ActionProposal::new(ActionKind::Rest, ActionTarget::None).with_reasoning("idle default")
    }
}
