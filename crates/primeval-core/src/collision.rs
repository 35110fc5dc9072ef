//! Movable-vs-static collision resolution.
//!
//! After movement, every live agent overlapping a live static obstacle is
//! pushed out along the centre-to-centre separation vector by the overlap
//! depth. Obstacles never move. Agent-vs-agent overlap is tolerated; the
//! one-agent-per-resource-slot rule keeps agents from piling onto the same
//! spot.

use primeval_types::{EntityId, Vec2, WorldSnapshot};
use tracing::trace;

use crate::spatial::SpatialIndex;

/// Push direction when an agent sits exactly on an obstacle's centre.
const FALLBACK_DIRECTION: Vec2 = Vec2::new(1.0, 0.0);

/// Separate every live agent from the static obstacles it overlaps.
///
/// `index` must hold current obstacle positions; agent entries are updated
/// to the resolved positions. Returns the number of pushes applied.
pub fn resolve(world: &mut WorldSnapshot, index: &mut SpatialIndex) -> usize {
    let ids: Vec<EntityId> = world
        .agents
        .values()
        .filter(|a| a.alive)
        .map(|a| a.id)
        .collect();

    let mut pushes = 0_usize;
    for agent_id in ids {
        let Some(agent) = world.agents.get_mut(&agent_id) else {
            continue;
        };
        let start = agent.position;
        let candidates = index.overlapping_statics(start, agent.radius);

        for hit in candidates {
            let separation = agent.position - hit.entry.position;
            let distance = separation.length();
            let radius_sum = agent.radius + hit.entry.radius;
            if distance >= radius_sum {
                continue;
            }
            let direction = separation.normalized().unwrap_or(FALLBACK_DIRECTION);
            agent.position = agent.position + direction.scale(radius_sum - distance);
            pushes = pushes.saturating_add(1);
            trace!(agent_id = %agent_id, obstacle = %hit.id, depth = radius_sum - distance, "pushed out of obstacle");
        }
        agent.position = agent.position.clamp_to(world.width, world.height);

        if agent.position != start {
            index.update_position(agent_id, agent.position);
        }
    }
    pushes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use primeval_types::{Agent, AgentKind, Footprint, StaticObstacle};

    use super::*;

    const EPSILON: f64 = 1e-9;

    fn world_with(agent_at: Vec2, obstacle_at: Vec2, side: f64) -> (WorldSnapshot, EntityId) {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let agent = Agent::new("Ash", AgentKind::Npc, agent_at);
        let id = agent.id;
        world.insert_agent(agent);
        world.insert_obstacle(StaticObstacle::building(
            "Hut",
            obstacle_at,
            Footprint::square(side),
        ));
        (world, id)
    }

    #[test]
    fn overlapping_agent_is_pushed_to_contact() {
        let (mut world, id) = world_with(Vec2::new(51.0, 50.0), Vec2::new(50.0, 50.0), 4.0);
        let mut index = SpatialIndex::from_world(&world, 10.0);

        let pushes = resolve(&mut world, &mut index);
        assert_eq!(pushes, 1);
        let agent = world.agents.get(&id).unwrap();
        let distance = agent.position.distance(Vec2::new(50.0, 50.0));
        assert!(distance >= 3.0 - EPSILON);
        assert!((agent.position.y - 50.0).abs() < EPSILON);
        assert_eq!(index.get(id).unwrap().position, agent.position);
    }

    #[test]
    fn coincident_centres_push_along_x() {
        let (mut world, id) = world_with(Vec2::new(50.0, 50.0), Vec2::new(50.0, 50.0), 2.0);
        let mut index = SpatialIndex::from_world(&world, 10.0);
        resolve(&mut world, &mut index);
        let agent = world.agents.get(&id).unwrap();
        assert!((agent.position.x - 52.0).abs() < EPSILON);
    }

    #[test]
    fn push_near_the_edge_stays_in_bounds() {
        let (mut world, id) = world_with(Vec2::new(99.5, 50.0), Vec2::new(98.0, 50.0), 4.0);
        let mut index = SpatialIndex::from_world(&world, 10.0);

        assert_eq!(resolve(&mut world, &mut index), 1);
        let agent = world.agents.get(&id).unwrap();
        assert!(agent.position.x <= 100.0);
        assert!((agent.position.x - 100.0).abs() < EPSILON);
        assert_eq!(index.get(id).unwrap().position, agent.position);
    }

    #[test]
    fn separated_agent_is_untouched() {
        let (mut world, id) = world_with(Vec2::new(60.0, 50.0), Vec2::new(50.0, 50.0), 2.0);
        let mut index = SpatialIndex::from_world(&world, 10.0);
        assert_eq!(resolve(&mut world, &mut index), 0);
        assert_eq!(world.agents.get(&id).unwrap().position, Vec2::new(60.0, 50.0));
    }

    #[test]
    fn dead_agents_and_destroyed_obstacles_are_ignored() {
        let (mut world, id) = world_with(Vec2::new(50.5, 50.0), Vec2::new(50.0, 50.0), 2.0);
        world.agents.get_mut(&id).unwrap().alive = false;
        let mut index = SpatialIndex::from_world(&world, 10.0);
        assert_eq!(resolve(&mut world, &mut index), 0);

        world.agents.get_mut(&id).unwrap().alive = true;
        for obstacle in world.obstacles.values_mut() {
            obstacle.alive = false;
        }
        let mut index = SpatialIndex::from_world(&world, 10.0);
        assert_eq!(resolve(&mut world, &mut index), 0);
    }

    #[test]
    fn obstacles_never_move() {
        let (mut world, _) = world_with(Vec2::new(50.5, 50.0), Vec2::new(50.0, 50.0), 2.0);
        let before: Vec<Vec2> = world.obstacles.values().map(|o| o.position).collect();
        let mut index = SpatialIndex::from_world(&world, 10.0);
        resolve(&mut world, &mut index);
        let after: Vec<Vec2> = world.obstacles.values().map(|o| o.position).collect();
        assert_eq!(before, after);
    }
}
