//! World entities: agents and static obstacles.
//!
//! Agents are movable, decision-making entities (NPCs and beasts). Static
//! obstacles are buildings and resource nodes; they never move. Per-agent
//! open-ended maps (inventory, skills) are sparse maps over closed enums
//! with default-zero reads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::geometry::{Footprint, SimTime, Vec2};
use crate::ids::EntityId;

/// Upper bound of every vital and every skill level.
pub const VITAL_MAX: f64 = 100.0;

/// Default collision radius of an agent, in world units.
pub const DEFAULT_AGENT_RADIUS: f64 = 1.0;

/// Default base movement speed, in world units per simulated minute.
pub const DEFAULT_AGENT_SPEED: f64 = 2.0;

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

/// One of the bounded numeric vitals every agent carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Vital {
    /// Zero health kills the agent.
    Health,
    /// Spent by work and travel, restored by resting.
    Stamina,
    /// Rises over time, lowered by eating.
    Hunger,
}

/// The vitals of an agent, each clamped to `[0, 100]`.
///
/// Fields are private so that every write goes through the clamping
/// accessors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Attributes {
    health: f64,
    stamina: f64,
    hunger: f64,
}

impl Attributes {
    /// Construct attributes, clamping each value into range.
    pub fn new(health: f64, stamina: f64, hunger: f64) -> Self {
        Self {
            health: clamp_vital(health),
            stamina: clamp_vital(stamina),
            hunger: clamp_vital(hunger),
        }
    }

    /// Read a vital.
    pub const fn get(&self, vital: Vital) -> f64 {
        match vital {
            Vital::Health => self.health,
            Vital::Stamina => self.stamina,
            Vital::Hunger => self.hunger,
        }
    }

    /// Overwrite a vital, clamping into range.
    pub fn set(&mut self, vital: Vital, value: f64) {
        let value = clamp_vital(value);
        match vital {
            Vital::Health => self.health = value,
            Vital::Stamina => self.stamina = value,
            Vital::Hunger => self.hunger = value,
        }
    }

    /// Add `delta` (possibly negative) to a vital, clamping into range.
    pub fn adjust(&mut self, vital: Vital, delta: f64) {
        self.set(vital, self.get(vital) + delta);
    }

    /// Current health.
    pub const fn health(&self) -> f64 {
        self.health
    }

    /// Current stamina.
    pub const fn stamina(&self) -> f64 {
        self.stamina
    }

    /// Current hunger.
    pub const fn hunger(&self) -> f64 {
        self.hunger
    }

    /// Copy with each vital rounded to the given step.
    pub fn quantized(&self, step: f64) -> Self {
        let q = |v: f64| (v / step).round() * step;
        Self {
            health: q(self.health),
            stamina: q(self.stamina),
            hunger: q(self.hunger),
        }
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            health: VITAL_MAX,
            stamina: VITAL_MAX,
            hunger: 0.0,
        }
    }
}

fn clamp_vital(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, VITAL_MAX)
    }
}

// ---------------------------------------------------------------------------
// Inventory and skills
// ---------------------------------------------------------------------------

/// Items an agent can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Item {
    /// Lumber from trees.
    Wood,
    /// Rock from outcrops.
    Stone,
    /// Wild berries.
    Berry,
    /// Fresh water.
    Water,
    /// Meat from hunting.
    Meat,
}

impl Item {
    /// Hunger removed by eating one unit, or `None` if inedible.
    pub const fn nutrition(self) -> Option<f64> {
        match self {
            Self::Berry => Some(20.0),
            Self::Meat => Some(40.0),
            Self::Water => Some(10.0),
            Self::Wood | Self::Stone => None,
        }
    }

    /// Multiplier applied to the duration of gathering this item.
    pub const fn gather_difficulty(self) -> f64 {
        match self {
            Self::Wood => 1.2,
            Self::Stone => 1.5,
            Self::Berry => 0.5,
            Self::Water => 0.6,
            Self::Meat => 1.0,
        }
    }

    /// Simulated minutes a depleted node of this item takes to refill.
    pub const fn regrow_minutes(self) -> u64 {
        match self {
            Self::Water => 24 * 60,
            Self::Berry => 36 * 60,
            Self::Wood | Self::Meat => 48 * 60,
            Self::Stone => 72 * 60,
        }
    }
}

/// Learnable skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Skill {
    /// Speeds up and enlarges gathering yields.
    Gathering,
    /// Improved by exploring.
    Survival,
}

/// Sparse item counts. Items not present have a count of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct Inventory(BTreeMap<Item, u32>);

impl Inventory {
    /// Count of `item` held (zero if absent).
    pub fn count(&self, item: Item) -> u32 {
        self.0.get(&item).copied().unwrap_or(0)
    }

    /// Add `amount` of `item`, saturating at `u32::MAX`.
    pub fn add(&mut self, item: Item, amount: u32) {
        if amount == 0 {
            return;
        }
        let entry = self.0.entry(item).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Remove `amount` of `item`. Returns `false` (and changes nothing) if
    /// fewer than `amount` are held.
    pub fn remove(&mut self, item: Item, amount: u32) -> bool {
        let held = self.count(item);
        let Some(left) = held.checked_sub(amount) else {
            return false;
        };
        if left == 0 {
            self.0.remove(&item);
        } else {
            self.0.insert(item, left);
        }
        true
    }

    /// Iterate over held items in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (Item, u32)> + '_ {
        self.0.iter().map(|(item, count)| (*item, *count))
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sparse skill levels in `[0, 100]`. Skills not present are level zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct Skills(BTreeMap<Skill, f64>);

impl Skills {
    /// Level of `skill` (zero if never trained).
    pub fn level(&self, skill: Skill) -> f64 {
        self.0.get(&skill).copied().unwrap_or(0.0)
    }

    /// Raise `skill` by `amount`, capped at 100.
    pub fn improve(&mut self, skill: Skill, amount: f64) {
        let next = clamp_vital(self.level(skill) + amount);
        self.0.insert(skill, next);
    }
}

// ---------------------------------------------------------------------------
// Action state machine
// ---------------------------------------------------------------------------

/// Where an agent is in its action lifecycle.
///
/// `Idle -> Moving -> Executing -> Cooling -> Idle`, with `Idle -> Executing`
/// for actions that need no travel and a forced return to `Idle` from any
/// state on interruption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionState {
    /// No current action; eligible for a decision.
    #[default]
    Idle,
    /// Travelling toward the action's destination.
    Moving,
    /// Performing the action at its destination.
    Executing,
    /// Recovery window after a completed action.
    Cooling,
}

impl ActionState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Moving | Self::Executing)
                | (Self::Moving, Self::Executing)
                | (Self::Executing, Self::Cooling)
                | (_, Self::Idle)
        )
    }

    /// Whether an action descriptor is expected in this state.
    pub const fn has_action(self) -> bool {
        matches!(self, Self::Moving | Self::Executing)
    }
}

/// The kinds of action an agent can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionKind {
    /// Recover stamina and health.
    Rest,
    /// Consume an edible item.
    Eat,
    /// Harvest from a resource node.
    Gather,
    /// Wander, gaining survival experience.
    Explore,
    /// Run away from an entity.
    Flee,
    /// Travel to a position.
    Move,
}

impl ActionKind {
    /// Base duration of the execution phase, in simulated minutes.
    pub const fn base_minutes(self) -> f64 {
        match self {
            Self::Rest => 25.0,
            Self::Eat => 6.0,
            Self::Gather => 12.0,
            Self::Explore => 18.0,
            Self::Flee => 3.0,
            Self::Move => 0.0,
        }
    }

    /// Whether the action drains stamina while travelling or executing.
    pub const fn is_strenuous(self) -> bool {
        !matches!(self, Self::Rest)
    }
}

impl core::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Rest => "rest",
            Self::Eat => "eat",
            Self::Gather => "gather",
            Self::Explore => "explore",
            Self::Flee => "flee",
            Self::Move => "move",
        };
        f.write_str(name)
    }
}

/// What an action is directed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionTarget {
    /// No target.
    #[default]
    None,
    /// A world position.
    Position {
        /// Where to go.
        position: Vec2,
    },
    /// Another entity (resource node, agent to flee from).
    Entity {
        /// Target entity.
        entity: EntityId,
    },
    /// An inventory item.
    Item {
        /// Target item.
        item: Item,
    },
}

/// Descriptor of the action an agent is currently moving toward or executing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CurrentAction {
    /// What is being done.
    pub kind: ActionKind,
    /// What it is directed at.
    pub target: ActionTarget,
    /// Travel destination, if the action requires travel.
    pub destination: Option<Vec2>,
    /// When the action was started.
    pub started_at: SimTime,
    /// Length of the execution phase in simulated milliseconds.
    #[ts(type = "number")]
    pub duration_ms: u64,
    /// When the execution phase began (set on entering `Executing`).
    pub execution_started_at: Option<SimTime>,
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Agent species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AgentKind {
    /// A villager.
    Npc,
    /// A wild animal.
    Beast,
}

/// A movable, decision-making entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Agent {
    /// Stable identifier.
    pub id: EntityId,
    /// Display name (also usable as an override target).
    pub name: String,
    /// Species.
    pub kind: AgentKind,
    /// Centre position in world units.
    pub position: Vec2,
    /// Collision radius.
    pub radius: f64,
    /// Dead agents are ignored by scheduling and collision.
    pub alive: bool,
    /// Bounded vitals.
    pub attributes: Attributes,
    /// Skill levels.
    pub skills: Skills,
    /// Carried items.
    pub inventory: Inventory,
    /// Base speed in world units per simulated minute.
    pub speed: f64,
    /// Lifecycle state.
    pub action_state: ActionState,
    /// No decision is requested before this time.
    pub cooldown_until: SimTime,
    /// Whether a decision request is outstanding.
    pub in_flight_decision: bool,
    /// Set only while `Moving` or `Executing`.
    pub current_action: Option<CurrentAction>,
    /// End of the `Cooling` window; set only while `Cooling`.
    pub cooling_until: Option<SimTime>,
    /// Resource node whose interaction slot this agent holds.
    pub claimed_slot: Option<EntityId>,
    /// Version stamp; bumped on reset and death so stale decisions are dropped.
    #[ts(type = "number")]
    pub generation: u64,
    /// Free-text memories, oldest first.
    pub memories: Vec<String>,
    /// Human-readable summary of the last completed or failed action.
    pub last_action_result: Option<String>,
}

impl Agent {
    /// Create a fresh, idle agent at `position` with default vitals.
    pub fn new(name: impl Into<String>, kind: AgentKind, position: Vec2) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            kind,
            position,
            radius: DEFAULT_AGENT_RADIUS,
            alive: true,
            attributes: Attributes::default(),
            skills: Skills::default(),
            inventory: Inventory::default(),
            speed: DEFAULT_AGENT_SPEED,
            action_state: ActionState::Idle,
            cooldown_until: SimTime::ZERO,
            in_flight_decision: false,
            current_action: None,
            cooling_until: None,
            claimed_slot: None,
            generation: 0,
            memories: Vec::new(),
            last_action_result: None,
        }
    }

    /// Append a memory, forgetting the oldest beyond `cap`.
    pub fn remember(&mut self, memory: impl Into<String>, cap: usize) {
        self.memories.push(memory.into());
        let excess = self.memories.len().saturating_sub(cap);
        self.memories.drain(..excess);
    }

    /// Effective speed after vital modifiers.
    pub fn effective_speed(&self) -> f64 {
        let mut speed = self.speed;
        let stamina = self.attributes.stamina();
        if stamina < 30.0 {
            speed *= 0.7;
        } else if stamina > 70.0 {
            speed *= 1.2;
        }
        if self.attributes.health() < 50.0 {
            speed *= 0.8;
        }
        speed
    }
}

// ---------------------------------------------------------------------------
// Static obstacles
// ---------------------------------------------------------------------------

/// Kind of static obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ObstacleKind {
    /// A constructed building.
    Building,
    /// A harvestable resource node.
    ResourceNode,
}

/// Harvestable stock on a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResourceStock {
    /// What the node yields.
    pub item: Item,
    /// Units remaining.
    pub quantity: u32,
    /// Units when full.
    pub max_quantity: u32,
    /// When the stock last ran out; cleared on refill.
    #[serde(default)]
    pub depleted_at: Option<SimTime>,
}

impl ResourceStock {
    /// Fraction of stock remaining in `[0, 1]`.
    pub fn fill_ratio(&self) -> f64 {
        if self.max_quantity == 0 {
            0.0
        } else {
            f64::from(self.quantity) / f64::from(self.max_quantity)
        }
    }
}

/// A building or resource node. Never moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StaticObstacle {
    /// Stable identifier.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Building or resource node.
    pub kind: ObstacleKind,
    /// Centre position in world units.
    pub position: Vec2,
    /// Axis-aligned extent.
    pub footprint: Footprint,
    /// Destroyed obstacles no longer collide.
    pub alive: bool,
    /// Stock, for resource nodes.
    pub resource: Option<ResourceStock>,
    /// Agent currently holding the interaction slot.
    pub occupied_by: Option<EntityId>,
}

impl StaticObstacle {
    /// A building with the given footprint.
    pub fn building(name: impl Into<String>, position: Vec2, footprint: Footprint) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            kind: ObstacleKind::Building,
            position,
            footprint,
            alive: true,
            resource: None,
            occupied_by: None,
        }
    }

    /// A full resource node yielding `item`.
    pub fn resource_node(
        name: impl Into<String>,
        position: Vec2,
        footprint: Footprint,
        item: Item,
        max_quantity: u32,
    ) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            kind: ObstacleKind::ResourceNode,
            position,
            footprint,
            alive: true,
            resource: Some(ResourceStock {
                item,
                quantity: max_quantity,
                max_quantity,
                depleted_at: None,
            }),
            occupied_by: None,
        }
    }

    /// Radius used for collision separation.
    pub const fn collision_radius(&self) -> f64 {
        self.footprint.collision_radius()
    }
}

/// Any world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "entity", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Entity {
    /// A movable agent.
    Agent(Box<Agent>),
    /// A static obstacle.
    Obstacle(StaticObstacle),
}

impl Entity {
    /// Identifier of the wrapped entity.
    pub const fn id(&self) -> EntityId {
        match self {
            Self::Agent(agent) => agent.id,
            Self::Obstacle(obstacle) => obstacle.id,
        }
    }

    /// Position of the wrapped entity.
    pub const fn position(&self) -> Vec2 {
        match self {
            Self::Agent(agent) => agent.position,
            Self::Obstacle(obstacle) => obstacle.position,
        }
    }

    /// Whether the wrapped entity is alive.
    pub const fn alive(&self) -> bool {
        match self {
            Self::Agent(agent) => agent.alive,
            Self::Obstacle(obstacle) => obstacle.alive,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn attributes_clamp_on_write() {
        let mut attrs = Attributes::new(150.0, -5.0, f64::NAN);
        assert!((attrs.health() - 100.0).abs() < f64::EPSILON);
        assert!(attrs.stamina().abs() < f64::EPSILON);
        assert!(attrs.hunger().abs() < f64::EPSILON);

        attrs.adjust(Vital::Hunger, 250.0);
        assert!((attrs.get(Vital::Hunger) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inventory_reads_default_to_zero() {
        let mut inv = Inventory::default();
        assert_eq!(inv.count(Item::Berry), 0);
        inv.add(Item::Berry, 3);
        assert!(inv.remove(Item::Berry, 2));
        assert_eq!(inv.count(Item::Berry), 1);
        assert!(!inv.remove(Item::Berry, 2));
        assert_eq!(inv.count(Item::Berry), 1);
        assert!(inv.remove(Item::Berry, 1));
        assert!(inv.is_empty());
    }

    #[test]
    fn skills_are_capped() {
        let mut skills = Skills::default();
        assert!(skills.level(Skill::Gathering).abs() < f64::EPSILON);
        skills.improve(Skill::Gathering, 180.0);
        assert!((skills.level(Skill::Gathering) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memories_forget_oldest_beyond_cap() {
        let mut agent = Agent::new("Ash", AgentKind::Npc, Vec2::new(0.0, 0.0));
        for i in 0..5 {
            agent.remember(format!("memory {i}"), 3);
        }
        assert_eq!(agent.memories, vec!["memory 2", "memory 3", "memory 4"]);
    }

    #[test]
    fn state_machine_edges() {
        use ActionState::{Cooling, Executing, Idle, Moving};
        assert!(Idle.can_transition_to(Moving));
        assert!(Idle.can_transition_to(Executing));
        assert!(Moving.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Cooling));
        assert!(Cooling.can_transition_to(Idle));
        assert!(Executing.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Cooling));
        assert!(!Cooling.can_transition_to(Moving));
        assert!(!Moving.can_transition_to(Cooling));
        assert!(!Executing.can_transition_to(Moving));
    }

    #[test]
    fn tired_wounded_agents_are_slower() {
        let mut agent = Agent::new("Ash", AgentKind::Npc, Vec2::ZERO);
        assert!((agent.effective_speed() - 2.4).abs() < 1e-9);

        agent.attributes = Attributes::new(40.0, 20.0, 0.0);
        assert!((agent.effective_speed() - 2.0 * 0.7 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn entity_serializes_with_tag() {
        let node = StaticObstacle::resource_node(
            "Oak",
            Vec2::new(10.0, 10.0),
            Footprint::square(2.0),
            Item::Wood,
            10,
        );
        let json = serde_json::to_value(Entity::Obstacle(node)).unwrap();
        assert_eq!(json["entity"], "obstacle");
        assert_eq!(json["kind"], "resource_node");
        assert_eq!(json["resource"]["item"], "wood");
    }
}
