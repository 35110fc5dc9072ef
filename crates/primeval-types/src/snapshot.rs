//! Full world snapshots and the per-tick deltas derived from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::entity::{ActionState, Agent, Attributes, CurrentAction, Entity, Inventory, StaticObstacle};
use crate::event::DeltaEvent;
use crate::geometry::{SimTime, Vec2};
use crate::ids::EntityId;

/// The complete world state at one tick.
///
/// The engine owns exactly one live instance and mutates it in place;
/// everyone else receives clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldSnapshot {
    /// Monotonic tick counter.
    #[ts(type = "number")]
    pub tick: u64,
    /// Simulated time.
    pub sim_time: SimTime,
    /// World width in units.
    pub width: f64,
    /// World height in units.
    pub height: f64,
    /// All agents, keyed by id.
    pub agents: BTreeMap<EntityId, Agent>,
    /// All static obstacles, keyed by id.
    pub obstacles: BTreeMap<EntityId, StaticObstacle>,
}

impl WorldSnapshot {
    /// An empty world of the given size at tick zero.
    pub const fn empty(width: f64, height: f64) -> Self {
        Self {
            tick: 0,
            sim_time: SimTime::ZERO,
            width,
            height,
            agents: BTreeMap::new(),
            obstacles: BTreeMap::new(),
        }
    }

    /// Insert an agent, replacing any with the same id.
    pub fn insert_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.id, agent);
    }

    /// Insert an obstacle, replacing any with the same id.
    pub fn insert_obstacle(&mut self, obstacle: StaticObstacle) {
        self.obstacles.insert(obstacle.id, obstacle);
    }

    /// Look up any entity by id.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        if let Some(agent) = self.agents.get(&id) {
            return Some(Entity::Agent(Box::new(agent.clone())));
        }
        self.obstacles.get(&id).cloned().map(Entity::Obstacle)
    }

    /// Position of any entity by id.
    pub fn position_of(&self, id: EntityId) -> Option<Vec2> {
        self.agents
            .get(&id)
            .map(|a| a.position)
            .or_else(|| self.obstacles.get(&id).map(|o| o.position))
    }

    /// Number of agents still alive.
    pub fn alive_agents(&self) -> usize {
        self.agents.values().filter(|a| a.alive).count()
    }
}

/// A change to an agent's action lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionChange {
    /// New state.
    pub state: ActionState,
    /// New action descriptor (absent while `Idle` or `Cooling`).
    pub current: Option<CurrentAction>,
}

/// Changed fields of one agent. Absent fields are unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AgentDelta {
    /// Which agent.
    pub id: EntityId,
    /// New position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub position: Option<Vec2>,
    /// New vitals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub attributes: Option<Attributes>,
    /// New action state and descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub action: Option<ActionChange>,
    /// New liveness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub alive: Option<bool>,
    /// New inventory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub inventory: Option<Inventory>,
}

impl AgentDelta {
    /// A delta for `id` with no changed fields.
    pub const fn unchanged(id: EntityId) -> Self {
        Self {
            id,
            position: None,
            attributes: None,
            action: None,
            alive: None,
            inventory: None,
        }
    }

    /// Whether no field changed.
    pub const fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.attributes.is_none()
            && self.action.is_none()
            && self.alive.is_none()
            && self.inventory.is_none()
    }

    /// Overwrite the matching fields of `agent`.
    pub fn apply_to(&self, agent: &mut Agent) {
        if let Some(position) = self.position {
            agent.position = position;
        }
        if let Some(attributes) = self.attributes {
            agent.attributes = attributes;
        }
        if let Some(action) = self.action {
            agent.action_state = action.state;
            agent.current_action = action.current;
        }
        if let Some(alive) = self.alive {
            agent.alive = alive;
        }
        if let Some(inventory) = &self.inventory {
            agent.inventory.clone_from(inventory);
        }
    }
}

/// Mutable state of one obstacle, sent whenever any of it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ObstacleDelta {
    /// Which obstacle.
    pub id: EntityId,
    /// Agent holding the interaction slot.
    pub occupied_by: Option<EntityId>,
    /// Remaining stock, for resource nodes.
    pub quantity: Option<u32>,
    /// Liveness.
    pub alive: bool,
}

impl ObstacleDelta {
    /// Overwrite the matching fields of `obstacle`.
    pub fn apply_to(&self, obstacle: &mut StaticObstacle) {
        obstacle.occupied_by = self.occupied_by;
        obstacle.alive = self.alive;
        if let (Some(quantity), Some(stock)) = (self.quantity, obstacle.resource.as_mut()) {
            stock.quantity = quantity;
        }
    }
}

/// Everything that changed since a subscriber's previous update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldDelta {
    /// Tick the delta brings the receiver up to.
    #[ts(type = "number")]
    pub tick: u64,
    /// Simulated time at that tick.
    pub sim_time: SimTime,
    /// Changed agents.
    pub agents: Vec<AgentDelta>,
    /// Changed obstacles.
    pub obstacles: Vec<ObstacleDelta>,
    /// Entities that appeared.
    pub added: Vec<Entity>,
    /// Entities that were removed.
    pub removed: Vec<EntityId>,
    /// Events not yet sent to this receiver.
    pub events: Vec<DeltaEvent>,
}

impl WorldDelta {
    /// Whether the delta carries no changes and no events.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
            && self.obstacles.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.events.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::{AgentKind, Item};
    use crate::geometry::Footprint;

    #[test]
    fn agent_delta_applies_only_present_fields() {
        let mut agent = Agent::new("Wren", AgentKind::Npc, Vec2::new(1.0, 1.0));
        let before = agent.attributes;
        let delta = AgentDelta {
            position: Some(Vec2::new(4.0, 5.0)),
            ..AgentDelta::unchanged(agent.id)
        };
        delta.apply_to(&mut agent);
        assert_eq!(agent.position, Vec2::new(4.0, 5.0));
        assert_eq!(agent.attributes, before);
    }

    #[test]
    fn empty_agent_delta_skips_fields_on_the_wire() {
        let delta = AgentDelta::unchanged(EntityId::new());
        assert!(delta.is_empty());
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_looks_up_both_entity_kinds() {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let agent = Agent::new("Fox", AgentKind::Beast, Vec2::new(3.0, 3.0));
        let node = StaticObstacle::resource_node(
            "Bush",
            Vec2::new(7.0, 7.0),
            Footprint::square(1.0),
            Item::Berry,
            5,
        );
        let (agent_id, node_id) = (agent.id, node.id);
        world.insert_agent(agent);
        world.insert_obstacle(node);

        assert!(matches!(world.entity(agent_id), Some(Entity::Agent(_))));
        assert!(matches!(world.entity(node_id), Some(Entity::Obstacle(_))));
        assert_eq!(world.position_of(node_id), Some(Vec2::new(7.0, 7.0)));
        assert_eq!(world.alive_agents(), 1);
    }
}
