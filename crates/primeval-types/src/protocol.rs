//! Subscriber wire protocol and operator override commands.
//!
//! All messages are JSON objects tagged by a `type` field.
//!
//! Server to client: `snapshot`, `delta`, `override_result`.
//! Client to server: `ready`, `request_snapshot`, `override`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::event::DeltaEvent;
use crate::ids::EntityId;
use crate::snapshot::{WorldDelta, WorldSnapshot};

/// Which agents an override applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "by", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum OverrideTarget {
    /// Every agent.
    All,
    /// One agent by id.
    Id {
        /// Agent id.
        id: EntityId,
    },
    /// Every agent with this exact name.
    Name {
        /// Agent name.
        name: String,
    },
}

/// An out-of-band mutation requested by an operator, applied between ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum OverrideCommand {
    /// Append a memory.
    AddMemory {
        /// Affected agents.
        target: OverrideTarget,
        /// Memory text.
        memory: String,
    },
    /// Replace the memory at `index` (oldest is 0).
    ModifyMemory {
        /// Affected agents.
        target: OverrideTarget,
        /// Position in the memory list.
        index: usize,
        /// Replacement text.
        memory: String,
    },
    /// Forget all memories.
    ClearMemories {
        /// Affected agents.
        target: OverrideTarget,
    },
    /// Interrupt any action, clear cooldowns and bump the generation.
    ResetAgent {
        /// Affected agents.
        target: OverrideTarget,
    },
    /// Delete an agent or obstacle from the world.
    RemoveEntity {
        /// Entity to remove.
        entity: EntityId,
    },
}

/// Result of applying an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OverrideOutcome {
    /// Whether the override was applied.
    pub ok: bool,
    /// Human-readable summary.
    pub message: String,
    /// Entities that were changed.
    pub affected: Vec<EntityId>,
}

impl OverrideOutcome {
    /// A successful outcome.
    pub fn applied(message: impl Into<String>, affected: Vec<EntityId>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            affected,
        }
    }

    /// A failed outcome.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            affected: Vec::new(),
        }
    }
}

/// Messages the engine sends to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Full state plus the retained event backlog.
    Snapshot {
        /// Current world.
        snapshot: WorldSnapshot,
        /// At most the retention-window worth of recent events, oldest first.
        events: Vec<DeltaEvent>,
    },
    /// Changes since this subscriber's previous update.
    Delta(WorldDelta),
    /// Reply to an override sent over this connection.
    OverrideResult(OverrideOutcome),
}

/// Messages a subscriber sends to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// The subscriber has applied its snapshot and wants deltas.
    Ready,
    /// Send a fresh full snapshot.
    RequestSnapshot,
    /// Apply an operator override.
    Override {
        /// The override.
        command: OverrideCommand,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::geometry::SimTime;

    #[test]
    fn client_messages_parse() {
        let ready: ClientMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ready, ClientMessage::Ready);

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"override","command":{"type":"add_memory","target":{"by":"name","name":"Ash"},"memory":"saw a wolf"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Override {
                command: OverrideCommand::AddMemory {
                    target: OverrideTarget::Name {
                        name: "Ash".to_owned()
                    },
                    memory: "saw a wolf".to_owned(),
                }
            }
        );
    }

    #[test]
    fn delta_message_is_flat() {
        let msg = ServerMessage::Delta(WorldDelta {
            tick: 3,
            sim_time: SimTime::from_millis(18_000),
            agents: Vec::new(),
            obstacles: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            events: Vec::new(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["tick"], 3);
        assert_eq!(json["sim_time"], 18_000);
    }
}
