//! World spawner for seeding the simulation.
//!
//! Builds the starting world from the `world` and `population` config
//! sections: a campfire at the centre, resource nodes scattered across the
//! plain, villagers gathered around the campfire, and beasts roaming the
//! outer ring. All placement comes from a `StdRng` seeded with
//! `world.seed`, so the same config always yields the same layout (entity
//! ids aside).

use primeval_core::config::{PopulationConfig, WorldConfig};
use primeval_types::{
    Agent, AgentKind, Footprint, Item, StaticObstacle, Vec2, Vital, WorldSnapshot,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::EngineError;

// -----------------------------------------------------------------------
// Name pool
// -----------------------------------------------------------------------

/// Built-in pool of villager names. The spawner picks without replacement.
const NAME_POOL: &[&str] = &[
    "Alder", "Birch", "Cedar", "Dusk", "Ember", "Fern", "Grove", "Haze",
    "Iris", "Juniper", "Kestrel", "Lark", "Moss", "Nettle", "Oak", "Pine",
    "Quill", "Reed", "Sage", "Thorn", "Umber", "Vale", "Wren", "Yarrow",
    "Ash", "Brook", "Clay", "Dawn", "Elm", "Flint", "Gale", "Heath",
];

// -----------------------------------------------------------------------
// Species and resource tables
// -----------------------------------------------------------------------

/// A beast species.
struct Species {
    name: &'static str,
    /// Base speed, world units per simulated minute.
    speed: f64,
    health: f64,
    /// Relative spawn weight.
    weight: u32,
}

const SPECIES: &[Species] = &[
    Species {
        name: "Wolf",
        speed: 3.0,
        health: 50.0,
        weight: 3,
    },
    Species {
        name: "Bear",
        speed: 2.0,
        health: 100.0,
        weight: 1,
    },
    Species {
        name: "Rabbit",
        speed: 5.0,
        health: 10.0,
        weight: 4,
    },
];

/// A resource node variety.
struct NodeKind {
    name: &'static str,
    item: Item,
    side: f64,
    /// Starting stock range, inclusive.
    stock: (u32, u32),
    max_quantity: u32,
    /// Relative spawn weight.
    weight: u32,
}

const NODE_KINDS: &[NodeKind] = &[
    NodeKind {
        name: "Tree",
        item: Item::Wood,
        side: 2.0,
        stock: (50, 150),
        max_quantity: 150,
        weight: 15,
    },
    NodeKind {
        name: "Rock",
        item: Item::Stone,
        side: 2.0,
        stock: (30, 100),
        max_quantity: 100,
        weight: 10,
    },
    NodeKind {
        name: "Berry bush",
        item: Item::Berry,
        side: 1.0,
        stock: (20, 50),
        max_quantity: 50,
        weight: 20,
    },
    NodeKind {
        name: "Spring",
        item: Item::Water,
        side: 3.0,
        stock: (500, 500),
        max_quantity: 500,
        weight: 5,
    },
];

/// Side length of the central campfire.
const CAMPFIRE_SIDE: f64 = 4.0;

/// Villagers start within this distance of the campfire.
const VILLAGE_RADIUS: f64 = 8.0;

/// Width of the outer ring where beasts start.
const WILDS_DEPTH: f64 = 20.0;

// -----------------------------------------------------------------------
// Spawning
// -----------------------------------------------------------------------

/// Build the starting world.
///
/// # Errors
///
/// Returns [`EngineError::Spawner`] if more villagers are requested than
/// the name pool holds.
pub fn spawn_world(
    world_config: &WorldConfig,
    population: &PopulationConfig,
) -> Result<WorldSnapshot, EngineError> {
    let mut rng = StdRng::seed_from_u64(world_config.seed);
    let width = world_config.width;
    let height = world_config.height;
    let centre = Vec2::new(width / 2.0, height / 2.0);
    let mut world = WorldSnapshot::empty(width, height);

    world.insert_obstacle(StaticObstacle::building(
        "Campfire",
        centre,
        Footprint::square(CAMPFIRE_SIDE),
    ));

    for _ in 0..population.resource_nodes {
        let kind = pick_weighted(&mut rng, NODE_KINDS, |k| k.weight);
        let Some(kind) = kind else { break };
        let clearance = CAMPFIRE_SIDE.mul_add(0.5, kind.side);
        let position = away_from(&mut rng, centre, clearance, width, height);
        let mut node = StaticObstacle::resource_node(
            kind.name,
            position,
            Footprint::square(kind.side),
            kind.item,
            kind.max_quantity,
        );
        if let Some(stock) = node.resource.as_mut() {
            stock.quantity = rng.random_range(kind.stock.0..=kind.stock.1);
        }
        world.insert_obstacle(node);
    }

    for name in pick_unique_names(&mut rng, population.npcs)? {
        let offset = Vec2::new(
            uniform(&mut rng, -VILLAGE_RADIUS, VILLAGE_RADIUS),
            uniform(&mut rng, -VILLAGE_RADIUS, VILLAGE_RADIUS),
        );
        let position = Vec2::new(centre.x + offset.x, centre.y + offset.y).clamp_to(width, height);
        let agent = Agent::new(name, AgentKind::Npc, position);
        info!(agent_id = %agent.id, name = %agent.name, %position, "Spawned villager");
        world.insert_agent(agent);
    }

    for n in 1..=population.beasts {
        let Some(species) = pick_weighted(&mut rng, SPECIES, |s| s.weight) else {
            break;
        };
        let position = outer_ring(&mut rng, width, height);
        let mut beast = Agent::new(format!("{} {n}", species.name), AgentKind::Beast, position);
        beast.speed = species.speed;
        beast.attributes.set(Vital::Health, species.health);
        info!(agent_id = %beast.id, name = %beast.name, %position, "Spawned beast");
        world.insert_agent(beast);
    }

    info!(
        agents = world.agents.len(),
        obstacles = world.obstacles.len(),
        seed = world_config.seed,
        "Starting world spawned"
    );
    Ok(world)
}

/// Pick `count` unique names from the name pool.
fn pick_unique_names(rng: &mut impl Rng, count: u32) -> Result<Vec<String>, EngineError> {
    let pool_len = NAME_POOL.len();
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    if count > pool_len {
        return Err(EngineError::Spawner {
            message: format!("requested {count} villagers but name pool only has {pool_len}"),
        });
    }

    // Partial Fisher-Yates over the pool indices.
    let mut indices: Vec<usize> = (0..pool_len).collect();
    for i in 0..count {
        let j = rng.random_range(i..pool_len);
        indices.swap(i, j);
    }

    Ok(indices
        .iter()
        .take(count)
        .filter_map(|&idx| NAME_POOL.get(idx))
        .map(|s| String::from(*s))
        .collect())
}

/// Weighted choice; `None` only for an empty or zero-weight table.
fn pick_weighted<'a, T>(
    rng: &mut impl Rng,
    table: &'a [T],
    weight: impl Fn(&T) -> u32,
) -> Option<&'a T> {
    let total: u32 = table.iter().map(&weight).fold(0, u32::saturating_add);
    if total == 0 {
        return None;
    }
    let mut roll = rng.random_range(0..total);
    for entry in table {
        let w = weight(entry);
        if roll < w {
            return Some(entry);
        }
        roll = roll.saturating_sub(w);
    }
    table.last()
}

/// Uniform sample in `[lo, hi)`, or `lo` for an empty range.
fn uniform(rng: &mut impl Rng, lo: f64, hi: f64) -> f64 {
    if hi > lo { rng.random_range(lo..hi) } else { lo }
}

/// A point anywhere on the plain at least `clearance` from `centre`.
fn away_from(rng: &mut impl Rng, centre: Vec2, clearance: f64, width: f64, height: f64) -> Vec2 {
    let margin = (width.min(height) * 0.05).min(5.0);
    let mut point = centre;
    for _ in 0..16 {
        point = Vec2::new(
            uniform(rng, margin, width - margin),
            uniform(rng, margin, height - margin),
        );
        if point.distance(centre) >= clearance {
            break;
        }
    }
    point
}

/// A point in the band along one of the four edges.
fn outer_ring(rng: &mut impl Rng, width: f64, height: f64) -> Vec2 {
    let depth_x = WILDS_DEPTH.min(width / 4.0);
    let depth_y = WILDS_DEPTH.min(height / 4.0);
    let point = match rng.random_range(0..4u8) {
        0 => Vec2::new(uniform(rng, 0.0, width), uniform(rng, 0.0, depth_y)),
        1 => Vec2::new(uniform(rng, 0.0, width), uniform(rng, height - depth_y, height)),
        2 => Vec2::new(uniform(rng, 0.0, depth_x), uniform(rng, 0.0, height)),
        _ => Vec2::new(uniform(rng, width - depth_x, width), uniform(rng, 0.0, height)),
    };
    point.clamp_to(width, height)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use primeval_types::ObstacleKind;

    use super::*;

    fn world_config(seed: u64) -> WorldConfig {
        WorldConfig {
            seed,
            ..WorldConfig::default()
        }
    }

    fn population(npcs: u32, beasts: u32, resource_nodes: u32) -> PopulationConfig {
        PopulationConfig {
            npcs,
            beasts,
            resource_nodes,
        }
    }

    #[test]
    fn spawns_configured_counts() {
        let world = spawn_world(&world_config(1), &population(6, 3, 12)).unwrap();
        let npcs = world.agents.values().filter(|a| a.kind == AgentKind::Npc).count();
        let beasts = world.agents.values().filter(|a| a.kind == AgentKind::Beast).count();
        assert_eq!(npcs, 6);
        assert_eq!(beasts, 3);
        // Resource nodes plus the campfire.
        assert_eq!(world.obstacles.len(), 13);
    }

    #[test]
    fn campfire_sits_at_the_centre() {
        let world = spawn_world(&world_config(1), &population(0, 0, 0)).unwrap();
        let campfire = world.obstacles.values().next().unwrap();
        assert_eq!(campfire.kind, ObstacleKind::Building);
        assert!(campfire.position.distance(Vec2::new(50.0, 50.0)) < 1e-9);
    }

    #[test]
    fn villager_names_are_unique() {
        let world = spawn_world(&world_config(3), &population(20, 0, 0)).unwrap();
        let names: BTreeSet<_> = world.agents.values().map(|a| a.name.clone()).collect();
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn everything_is_inside_the_bounds() {
        let world = spawn_world(&world_config(9), &population(10, 10, 30)).unwrap();
        for agent in world.agents.values() {
            assert!((0.0..=100.0).contains(&agent.position.x), "{}", agent.position);
            assert!((0.0..=100.0).contains(&agent.position.y), "{}", agent.position);
        }
        for obstacle in world.obstacles.values() {
            assert!((0.0..=100.0).contains(&obstacle.position.x));
            assert!((0.0..=100.0).contains(&obstacle.position.y));
        }
    }

    #[test]
    fn same_seed_same_layout() {
        let positions = |seed| {
            let world = spawn_world(&world_config(seed), &population(4, 4, 8)).unwrap();
            let mut agents: Vec<_> = world
                .agents
                .values()
                .map(|a| (a.name.clone(), a.position.x.to_bits(), a.position.y.to_bits()))
                .collect();
            agents.sort();
            agents
        };
        assert_eq!(positions(42), positions(42));
        assert_ne!(positions(42), positions(43));
    }

    #[test]
    fn resource_stock_is_within_range() {
        let world = spawn_world(&world_config(5), &population(0, 0, 40)).unwrap();
        for stock in world.obstacles.values().filter_map(|o| o.resource) {
            assert!(stock.quantity >= 1);
            assert!(stock.quantity <= stock.max_quantity);
        }
    }

    #[test]
    fn beasts_keep_species_traits() {
        let world = spawn_world(&world_config(11), &population(0, 12, 0)).unwrap();
        for beast in world.agents.values() {
            let species = SPECIES
                .iter()
                .find(|s| beast.name.starts_with(s.name))
                .unwrap();
            assert!((beast.speed - species.speed).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn too_many_villagers_is_an_error() {
        let result = spawn_world(&world_config(1), &population(1_000, 0, 0));
        assert!(matches!(result, Err(EngineError::Spawner { .. })));
    }
}
