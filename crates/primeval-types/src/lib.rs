//! Shared type definitions for the Primeval simulation.
//!
//! This crate is the single source of truth for the data exchanged between
//! the simulation core, the observer server and external collaborators
//! (decision providers, rendering clients). Types flow downstream to
//! `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`geometry`] -- 2D vectors, footprints and simulated time
//! - [`entity`] -- Agents, static obstacles and the action state machine
//! - [`event`] -- Observable events with dedup ids
//! - [`snapshot`] -- Full world snapshots and per-subscriber deltas
//! - [`decision`] -- Decision request/proposal for external providers
//! - [`protocol`] -- Subscriber wire messages and operator overrides

pub mod decision;
pub mod entity;
pub mod event;
pub mod geometry;
pub mod ids;
pub mod protocol;
pub mod snapshot;

pub use decision::{ActionProposal, DecisionRequest, NearbyAgent, WorldView};
pub use entity::{
    ActionKind, ActionState, ActionTarget, Agent, AgentKind, Attributes, CurrentAction, Entity,
    Inventory, Item, ObstacleKind, ResourceStock, Skill, Skills, StaticObstacle, Vital,
};
pub use event::{DeltaEvent, EventKind, Importance};
pub use geometry::{Footprint, MILLIS_PER_MINUTE, SimTime, Vec2};
pub use ids::{EntityId, EventId, SubscriberId};
pub use protocol::{ClientMessage, OverrideCommand, OverrideOutcome, OverrideTarget, ServerMessage};
pub use snapshot::{ActionChange, AgentDelta, ObstacleDelta, WorldDelta, WorldSnapshot};
