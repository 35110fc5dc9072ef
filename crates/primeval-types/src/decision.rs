//! Decision request and proposal exchanged with an external decision
//! provider.
//!
//! The request is a read-only copy of what the agent can perceive. The
//! proposal is untrusted input: the engine validates it before acting.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::entity::{ActionKind, ActionState, ActionTarget, Agent, AgentKind, StaticObstacle};
use crate::geometry::{SimTime, Vec2};
use crate::ids::EntityId;

/// Another agent within perception range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NearbyAgent {
    /// Identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Species.
    pub kind: AgentKind,
    /// Position.
    pub position: Vec2,
    /// Distance from the deciding agent.
    pub distance: f64,
    /// What it is doing.
    pub action_state: ActionState,
}

/// The part of the world the deciding agent can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldView {
    /// World width.
    pub width: f64,
    /// World height.
    pub height: f64,
    /// Alive agents within perception radius, nearest first.
    pub nearby_agents: Vec<NearbyAgent>,
    /// Alive obstacles within perception radius, nearest first.
    pub nearby_obstacles: Vec<StaticObstacle>,
}

/// Everything a decision provider receives for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DecisionRequest {
    /// Tick at dispatch.
    #[ts(type = "number")]
    pub tick: u64,
    /// Simulated time at dispatch.
    pub sim_time: SimTime,
    /// Copy of the deciding agent.
    pub agent: Agent,
    /// Perceived surroundings.
    pub world: WorldView,
    /// Most recent memories, oldest first.
    pub recent_memory: Vec<String>,
}

/// The action a provider proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionProposal {
    /// What to do.
    pub kind: ActionKind,
    /// What to do it to.
    #[serde(default)]
    pub target: ActionTarget,
    /// Free-text rationale, kept for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub reasoning: Option<String>,
}

impl ActionProposal {
    /// A proposal with no rationale.
    pub const fn new(kind: ActionKind, target: ActionTarget) -> Self {
        Self {
            kind,
            target,
            reasoning: None,
        }
    }

    /// Attach a rationale.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::Item;

    #[test]
    fn proposal_parses_minimal_json() {
        let proposal: ActionProposal = serde_json::from_str(r#"{"kind":"rest"}"#).unwrap();
        assert_eq!(proposal.kind, ActionKind::Rest);
        assert_eq!(proposal.target, ActionTarget::None);
    }

    #[test]
    fn proposal_parses_targeted_json() {
        let proposal: ActionProposal = serde_json::from_str(
            r#"{"kind":"eat","target":{"type":"item","item":"berry"},"reasoning":"hungry"}"#,
        )
        .unwrap();
        assert_eq!(proposal.target, ActionTarget::Item { item: Item::Berry });
        assert_eq!(proposal.reasoning.as_deref(), Some("hungry"));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<ActionProposal>(r#"{"kind":"dance"}"#);
        assert!(parsed.is_err());
    }
}
