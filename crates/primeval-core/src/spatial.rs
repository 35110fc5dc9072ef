//! Sparse uniform-grid spatial index.
//!
//! Holds the current position and collision radius of every agent and
//! static obstacle, bucketed into square cells. Proximity queries only
//! visit the cells overlapping the query circle. Results are ordered by
//! distance, then id, so callers see a stable order.

use std::collections::{BTreeMap, BTreeSet};

use primeval_types::{EntityId, Vec2, WorldSnapshot};

/// Default cell edge length in world units.
pub const DEFAULT_CELL_SIZE: f64 = 10.0;

/// Whether an indexed entity can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialKind {
    /// An agent.
    Movable,
    /// A building or resource node.
    Static,
}

/// One indexed entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialEntry {
    /// Centre position.
    pub position: Vec2,
    /// Collision radius.
    pub radius: f64,
    /// Movable or static.
    pub kind: SpatialKind,
    /// Dead or destroyed entities stay indexed but are skipped by queries
    /// that ask for live entities only.
    pub alive: bool,
}

/// A query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Entity found.
    pub id: EntityId,
    /// Centre-to-centre distance from the query point.
    pub distance: f64,
    /// The indexed entry.
    pub entry: SpatialEntry,
}

type Cell = (i64, i64);

/// Sparse hash grid keyed by integer cell coordinates.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: BTreeMap<Cell, BTreeSet<EntityId>>,
    entries: BTreeMap<EntityId, SpatialEntry>,
    max_static_radius: f64,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialIndex {
    /// Create an empty index. Non-positive cell sizes fall back to the
    /// default.
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            cells: BTreeMap::new(),
            entries: BTreeMap::new(),
            max_static_radius: 0.0,
        }
    }

    /// Build an index of every entity in `world`.
    pub fn from_world(world: &WorldSnapshot, cell_size: f64) -> Self {
        let mut index = Self::new(cell_size);
        index.rebuild(world);
        index
    }

    /// Replace the contents with the entities of `world`.
    pub fn rebuild(&mut self, world: &WorldSnapshot) {
        self.cells.clear();
        self.entries.clear();
        self.max_static_radius = 0.0;
        for agent in world.agents.values() {
            self.upsert(
                agent.id,
                SpatialEntry {
                    position: agent.position,
                    radius: agent.radius,
                    kind: SpatialKind::Movable,
                    alive: agent.alive,
                },
            );
        }
        for obstacle in world.obstacles.values() {
            self.upsert(
                obstacle.id,
                SpatialEntry {
                    position: obstacle.position,
                    radius: obstacle.collision_radius(),
                    kind: SpatialKind::Static,
                    alive: obstacle.alive,
                },
            );
        }
    }

    /// Insert or move an entity.
    pub fn upsert(&mut self, id: EntityId, entry: SpatialEntry) {
        if let Some(previous) = self.entries.insert(id, entry) {
            let old_cell = self.cell_of(previous.position);
            if let Some(cell) = self.cells.get_mut(&old_cell) {
                cell.remove(&id);
                if cell.is_empty() {
                    self.cells.remove(&old_cell);
                }
            }
        }
        let cell = self.cell_of(entry.position);
        self.cells.entry(cell).or_default().insert(id);
        if entry.kind == SpatialKind::Static {
            self.max_static_radius = self.max_static_radius.max(entry.radius);
        }
    }

    /// Update only the position of an indexed entity. Returns `false` if
    /// the entity is not indexed.
    pub fn update_position(&mut self, id: EntityId, position: Vec2) -> bool {
        let Some(entry) = self.entries.get(&id).copied() else {
            return false;
        };
        self.upsert(id, SpatialEntry { position, ..entry });
        true
    }

    /// Mark an entity dead without removing it.
    pub fn set_alive(&mut self, id: EntityId, alive: bool) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.alive = alive;
        }
    }

    /// Remove an entity. Returns `true` if it was indexed.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        let cell_key = self.cell_of(entry.position);
        if let Some(cell) = self.cells.get_mut(&cell_key) {
            cell.remove(&id);
            if cell.is_empty() {
                self.cells.remove(&cell_key);
            }
        }
        true
    }

    /// Look up an entity.
    pub fn get(&self, id: EntityId) -> Option<&SpatialEntry> {
        self.entries.get(&id)
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entities whose centre lies within `radius` of `center`,
    /// nearest first. `kind` restricts the result to one kind.
    pub fn within(&self, center: Vec2, radius: f64, kind: Option<SpatialKind>) -> Vec<Neighbor> {
        if !(center.is_finite() && radius >= 0.0) {
            return Vec::new();
        }
        let mut hits: Vec<Neighbor> = self
            .candidates(center, radius)
            .filter_map(|id| {
                let entry = self.entries.get(&id)?;
                if !entry.alive || kind.is_some_and(|k| k != entry.kind) {
                    return None;
                }
                let distance = center.distance(entry.position);
                (distance <= radius).then_some(Neighbor {
                    id,
                    distance,
                    entry: *entry,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits
    }

    /// Live static obstacles whose collision circle overlaps a circle of
    /// `radius` at `center`.
    pub fn overlapping_statics(&self, center: Vec2, radius: f64) -> Vec<Neighbor> {
        let reach = radius + self.max_static_radius;
        self.within(center, reach, Some(SpatialKind::Static))
            .into_iter()
            .filter(|n| n.distance < radius + n.entry.radius)
            .collect()
    }

    fn candidates(&self, center: Vec2, radius: f64) -> impl Iterator<Item = EntityId> + '_ {
        let (min_x, min_y) = self.cell_of(Vec2::new(center.x - radius, center.y - radius));
        let (max_x, max_y) = self.cell_of(Vec2::new(center.x + radius, center.y + radius));
        self.cells
            .range((min_x, i64::MIN)..=(max_x, i64::MAX))
            .filter(move |((_, y), _)| (min_y..=max_y).contains(y))
            .flat_map(|(_, ids)| ids.iter().copied())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cell_of(&self, position: Vec2) -> Cell {
        (
            (position.x / self.cell_size).floor() as i64,
            (position.y / self.cell_size).floor() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use primeval_types::{Agent, AgentKind, Footprint, Item, StaticObstacle};

    use super::*;

    fn movable(x: f64, y: f64) -> SpatialEntry {
        SpatialEntry {
            position: Vec2::new(x, y),
            radius: 1.0,
            kind: SpatialKind::Movable,
            alive: true,
        }
    }

    #[test]
    fn within_returns_nearest_first() {
        let mut index = SpatialIndex::default();
        let far = EntityId::new();
        let near = EntityId::new();
        let outside = EntityId::new();
        index.upsert(far, movable(12.0, 0.0));
        index.upsert(near, movable(3.0, 0.0));
        index.upsert(outside, movable(40.0, 0.0));

        let hits = index.within(Vec2::ZERO, 15.0, None);
        let ids: Vec<EntityId> = hits.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![near, far]);
    }

    #[test]
    fn queries_cross_negative_cells() {
        let mut index = SpatialIndex::new(10.0);
        let id = EntityId::new();
        index.upsert(id, movable(-0.5, -0.5));
        assert_eq!(index.within(Vec2::new(0.5, 0.5), 2.0, None).len(), 1);
    }

    #[test]
    fn moving_an_entity_rebuckets_it() {
        let mut index = SpatialIndex::default();
        let id = EntityId::new();
        index.upsert(id, movable(1.0, 1.0));
        assert!(index.update_position(id, Vec2::new(55.0, 55.0)));
        assert!(index.within(Vec2::new(1.0, 1.0), 5.0, None).is_empty());
        assert_eq!(index.within(Vec2::new(55.0, 55.0), 1.0, None).len(), 1);
        assert!(index.remove(id));
        assert!(index.is_empty());
    }

    #[test]
    fn dead_entities_are_skipped() {
        let mut index = SpatialIndex::default();
        let id = EntityId::new();
        index.upsert(id, movable(1.0, 1.0));
        index.set_alive(id, false);
        assert!(index.within(Vec2::ZERO, 5.0, None).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn overlap_accounts_for_obstacle_radius() {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let agent = Agent::new("Ash", AgentKind::Npc, Vec2::new(20.0, 20.0));
        let rock = StaticObstacle::resource_node(
            "Rock",
            Vec2::new(23.5, 20.0),
            Footprint::square(6.0),
            Item::Stone,
            10,
        );
        let rock_id = rock.id;
        world.insert_agent(agent);
        world.insert_obstacle(rock);

        let index = SpatialIndex::from_world(&world, 10.0);
        let hits = index.overlapping_statics(Vec2::new(20.0, 20.0), 1.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits.first().map(|n| n.id), Some(rock_id));

        let clear = index.overlapping_statics(Vec2::new(10.0, 20.0), 1.0);
        assert!(clear.is_empty());
    }
}
