//! Per-agent decision context assembly.
//!
//! Builds the read-only [`DecisionRequest`] handed to a decision provider:
//! a copy of the agent, the live entities within its perception radius
//! (nearest first) and its most recent memories.

use primeval_types::{Agent, DecisionRequest, EntityId, NearbyAgent, WorldSnapshot, WorldView};

use crate::config::DecisionConfig;
use crate::spatial::{SpatialIndex, SpatialKind};

/// What `agent` can see within `radius`.
pub fn build_view(
    world: &WorldSnapshot,
    index: &SpatialIndex,
    agent: &Agent,
    radius: f64,
) -> WorldView {
    let mut nearby_agents = Vec::new();
    let mut nearby_obstacles = Vec::new();

    for hit in index.within(agent.position, radius, None) {
        if hit.id == agent.id {
            continue;
        }
        match hit.entry.kind {
            SpatialKind::Movable => {
                if let Some(other) = world.agents.get(&hit.id).filter(|a| a.alive) {
                    nearby_agents.push(NearbyAgent {
                        id: other.id,
                        name: other.name.clone(),
                        kind: other.kind,
                        position: other.position,
                        distance: hit.distance,
                        action_state: other.action_state,
                    });
                }
            }
            SpatialKind::Static => {
                if let Some(obstacle) = world.obstacles.get(&hit.id).filter(|o| o.alive) {
                    nearby_obstacles.push(obstacle.clone());
                }
            }
        }
    }

    WorldView {
        width: world.width,
        height: world.height,
        nearby_agents,
        nearby_obstacles,
    }
}

/// The full decision request for `agent_id`, or `None` if no such agent.
pub fn build_request(
    world: &WorldSnapshot,
    index: &SpatialIndex,
    agent_id: EntityId,
    config: &DecisionConfig,
) -> Option<DecisionRequest> {
    let agent = world.agents.get(&agent_id)?;
    let skip = agent.memories.len().saturating_sub(config.memory_window);
    let recent_memory = agent.memories.iter().skip(skip).cloned().collect();

    Some(DecisionRequest {
        tick: world.tick,
        sim_time: world.sim_time,
        agent: agent.clone(),
        world: build_view(world, index, agent, config.perception_radius),
        recent_memory,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use primeval_types::{AgentKind, Footprint, Item, StaticObstacle, Vec2};

    use super::*;

    #[test]
    fn view_excludes_self_dead_and_distant() {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let me = Agent::new("Ash", AgentKind::Npc, Vec2::new(50.0, 50.0));
        let friend = Agent::new("Birch", AgentKind::Npc, Vec2::new(55.0, 50.0));
        let mut corpse = Agent::new("Cedar", AgentKind::Npc, Vec2::new(52.0, 50.0));
        corpse.alive = false;
        let far = Agent::new("Dune", AgentKind::Beast, Vec2::new(90.0, 90.0));
        let tree = StaticObstacle::resource_node(
            "Oak",
            Vec2::new(50.0, 60.0),
            Footprint::square(2.0),
            Item::Wood,
            10,
        );
        let me_id = me.id;
        let friend_id = friend.id;
        world.insert_agent(me);
        world.insert_agent(friend);
        world.insert_agent(corpse);
        world.insert_agent(far);
        world.insert_obstacle(tree);

        let index = SpatialIndex::from_world(&world, 10.0);
        let config = DecisionConfig::default();
        let request = build_request(&world, &index, me_id, &config).unwrap();

        let seen: Vec<_> = request.world.nearby_agents.iter().map(|a| a.id).collect();
        assert_eq!(seen, vec![friend_id]);
        assert_eq!(request.world.nearby_obstacles.len(), 1);
    }

    #[test]
    fn request_carries_only_recent_memories() {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let mut agent = Agent::new("Ash", AgentKind::Npc, Vec2::new(10.0, 10.0));
        agent.memories = (0..15).map(|i| format!("memory {i}")).collect();
        let id = agent.id;
        world.insert_agent(agent);

        let index = SpatialIndex::from_world(&world, 10.0);
        let config = DecisionConfig::default();
        let request = build_request(&world, &index, id, &config).unwrap();
        assert_eq!(request.recent_memory.len(), 10);
        assert_eq!(request.recent_memory.first().map(String::as_str), Some("memory 5"));
    }

    #[test]
    fn unknown_agent_has_no_request() {
        let world = WorldSnapshot::empty(100.0, 100.0);
        let index = SpatialIndex::default();
        let config = DecisionConfig::default();
        assert!(build_request(&world, &index, EntityId::new(), &config).is_none());
    }
}
