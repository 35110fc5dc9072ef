//! Observable simulation events.
//!
//! Every state transition worth showing to an observer becomes exactly one
//! [`DeltaEvent`]. Event ids are UUID v7 and globally unique, so receivers
//! can deduplicate under at-least-once delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::geometry::SimTime;
use crate::ids::{EntityId, EventId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventKind {
    /// The world clock was activated for the first time.
    WorldStarted,
    /// An agent began an action.
    ActionStarted,
    /// An agent completed an action and committed its effects.
    ActionCompleted,
    /// An agent's action was cut short.
    ActionInterrupted,
    /// A decision failed and the fallback policy chose an action.
    DecisionFallback,
    /// An agent's health reached zero.
    AgentDied,
    /// An operator override was applied.
    OverrideApplied,
    /// An entity was removed from the world.
    EntityRemoved,
    /// A depleted resource node refilled.
    ResourceRegenerated,
}

/// Soft priority hint for display.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Importance {
    /// Routine activity.
    #[default]
    Low,
    /// Noteworthy.
    Medium,
    /// Significant.
    High,
    /// Deaths and similar.
    Critical,
}

/// A single observable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DeltaEvent {
    /// Globally unique id used for deduplication.
    pub id: EventId,
    /// Tick during which the event was emitted.
    #[ts(type = "number")]
    pub tick: u64,
    /// Simulated time at emission.
    pub sim_time: SimTime,
    /// What happened.
    pub kind: EventKind,
    /// Entity the event is about, if any.
    pub entity_id: Option<EntityId>,
    /// Kind-specific details.
    #[ts(type = "Record<string, unknown>")]
    pub payload: serde_json::Value,
    /// Display priority.
    pub importance: Importance,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl DeltaEvent {
    /// Create an event with a fresh id stamped with the current wall time.
    pub fn new(
        tick: u64,
        sim_time: SimTime,
        kind: EventKind,
        entity_id: Option<EntityId>,
        payload: serde_json::Value,
        importance: Importance,
    ) -> Self {
        Self {
            id: EventId::new(),
            tick,
            sim_time,
            kind,
            entity_id,
            payload,
            importance,
            created_at: Utc::now(),
        }
    }
}
