//! Consumer-side merge of snapshots and deltas.
//!
//! A [`ClientReconciler`] holds a subscriber's local copy of the world. It
//! drives the connection lifecycle `Disconnected -> Connecting -> Ready`,
//! merges server messages idempotently (events are deduplicated by id) and
//! interpolates agent positions between updates so display is smooth
//! regardless of tick rate.
//!
//! Time is passed in by the caller as a monotonic [`Duration`] since any
//! fixed origin; the reconciler never samples a clock itself.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use primeval_types::{
    DeltaEvent, Entity, EntityId, OverrideOutcome, ServerMessage, Vec2, WorldDelta, WorldSnapshot,
};

use crate::delta::EventIdRing;

/// Connection lifecycle of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connected, waiting for the first snapshot.
    Connecting,
    /// Snapshot applied; readiness acknowledged.
    Ready,
}

/// What applying one server message did.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The message was not applicable in the current state.
    Ignored,
    /// A full snapshot replaced local state.
    SnapshotLoaded {
        /// The caller must now send the readiness acknowledgement.
        send_ready: bool,
        /// Events from the backlog not seen before.
        new_events: usize,
    },
    /// A delta was merged.
    DeltaApplied {
        /// Events in the delta not seen before.
        new_events: usize,
    },
    /// Reply to an override this client sent.
    Override(OverrideOutcome),
}

#[derive(Debug, Clone, Copy)]
struct Interpolation {
    from: Vec2,
    to: Vec2,
    started: Duration,
}

/// Local world view maintained from server messages.
#[derive(Debug)]
pub struct ClientReconciler {
    state: ConnectionState,
    world: Option<WorldSnapshot>,
    seen: EventIdRing,
    events: VecDeque<DeltaEvent>,
    retention: usize,
    motion: HashMap<EntityId, Interpolation>,
    window: Duration,
}

impl ClientReconciler {
    /// A disconnected reconciler keeping `retention` events and smoothing
    /// position changes over `window`.
    pub fn new(retention: usize, window: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            world: None,
            seen: EventIdRing::new(retention),
            events: VecDeque::with_capacity(retention),
            retention: retention.max(1),
            motion: HashMap::new(),
            window,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The local world, once a snapshot has arrived.
    pub const fn world(&self) -> Option<&WorldSnapshot> {
        self.world.as_ref()
    }

    /// Applied events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &DeltaEvent> {
        self.events.iter()
    }

    /// Begin connecting. Returns `true` only on the transition out of
    /// `Disconnected`; repeated calls are no-ops.
    pub fn connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Drop the connection. Local state is discarded; the event id ring is
    /// kept so a reconnect backlog is not applied twice.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.world = None;
        self.motion.clear();
    }

    /// Merge one server message. Applying the same message twice leaves
    /// the same state as applying it once.
    pub fn apply(&mut self, message: &ServerMessage, now: Duration) -> ApplyOutcome {
        if self.state == ConnectionState::Disconnected {
            return ApplyOutcome::Ignored;
        }
        match message {
            ServerMessage::Snapshot { snapshot, events } => {
                self.load_snapshot(snapshot, now);
                let new_events = self.merge_events(events);
                let send_ready = self.state == ConnectionState::Connecting;
                self.state = ConnectionState::Ready;
                ApplyOutcome::SnapshotLoaded {
                    send_ready,
                    new_events,
                }
            }
            ServerMessage::Delta(delta) => {
                if self.world.is_none() {
                    return ApplyOutcome::Ignored;
                }
                self.merge_delta(delta, now);
                let new_events = self.merge_events(&delta.events);
                ApplyOutcome::DeltaApplied { new_events }
            }
            ServerMessage::OverrideResult(outcome) => ApplyOutcome::Override(outcome.clone()),
        }
    }

    /// Where an agent should be drawn at `now`.
    pub fn displayed_position(&self, id: EntityId, now: Duration) -> Option<Vec2> {
        if let Some(motion) = self.motion.get(&id) {
            return Some(self.interpolate(motion, now));
        }
        self.world.as_ref()?.position_of(id)
    }

    fn interpolate(&self, motion: &Interpolation, now: Duration) -> Vec2 {
        if self.window.is_zero() {
            return motion.to;
        }
        let elapsed = now.saturating_sub(motion.started);
        let t = elapsed.as_secs_f64() / self.window.as_secs_f64();
        motion.from.lerp(motion.to, t)
    }

    fn load_snapshot(&mut self, snapshot: &WorldSnapshot, now: Duration) {
        self.motion = snapshot
            .agents
            .values()
            .map(|a| {
                (
                    a.id,
                    Interpolation {
                        from: a.position,
                        to: a.position,
                        started: now,
                    },
                )
            })
            .collect();
        self.world = Some(snapshot.clone());
    }

    fn merge_delta(&mut self, delta: &WorldDelta, now: Duration) {
        let mut retargets = Vec::new();
        let Some(world) = self.world.as_mut() else {
            return;
        };
        world.tick = world.tick.max(delta.tick);
        world.sim_time = world.sim_time.max(delta.sim_time);

        for change in &delta.agents {
            let Some(agent) = world.agents.get_mut(&change.id) else {
                continue;
            };
            if let Some(position) = change.position {
                retargets.push((change.id, agent.position, position));
            }
            change.apply_to(agent);
        }
        for change in &delta.obstacles {
            if let Some(obstacle) = world.obstacles.get_mut(&change.id) {
                change.apply_to(obstacle);
            }
        }
        for entity in &delta.added {
            match entity {
                Entity::Agent(agent) => {
                    if !world.agents.contains_key(&agent.id) {
                        retargets.push((agent.id, agent.position, agent.position));
                    }
                    world.insert_agent(agent.as_ref().clone());
                }
                Entity::Obstacle(obstacle) => world.insert_obstacle(obstacle.clone()),
            }
        }
        for id in &delta.removed {
            world.agents.remove(id);
            world.obstacles.remove(id);
            self.motion.remove(id);
        }

        for (id, previous, target) in retargets {
            self.retarget(id, previous, target, now);
        }
    }

    fn retarget(&mut self, id: EntityId, previous: Vec2, target: Vec2, now: Duration) {
        let from = match self.motion.get(&id) {
            Some(motion) if motion.to == target => return,
            Some(motion) => self.interpolate(motion, now),
            None => previous,
        };
        self.motion.insert(
            id,
            Interpolation {
                from,
                to: target,
                started: now,
            },
        );
    }

    fn merge_events(&mut self, events: &[DeltaEvent]) -> usize {
        let mut fresh = 0_usize;
        for event in events {
            if !self.seen.insert(event.id) {
                continue;
            }
            self.events.push_back(event.clone());
            fresh = fresh.saturating_add(1);
        }
        while self.events.len() > self.retention {
            self.events.pop_front();
        }
        fresh
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use primeval_types::{
        Agent, AgentDelta, AgentKind, EventKind, Importance, SimTime,
    };

    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    fn make_event() -> DeltaEvent {
        DeltaEvent::new(
            1,
            SimTime::ZERO,
            EventKind::ActionStarted,
            None,
            serde_json::Value::Null,
            Importance::Low,
        )
    }

    fn make_snapshot() -> (WorldSnapshot, EntityId) {
        let mut world = WorldSnapshot::empty(100.0, 100.0);
        let agent = Agent::new("Ash", AgentKind::Npc, Vec2::new(0.0, 0.0));
        let id = agent.id;
        world.insert_agent(agent);
        (world, id)
    }

    fn move_delta(id: EntityId, to: Vec2, events: Vec<DeltaEvent>) -> ServerMessage {
        let mut change = AgentDelta::unchanged(id);
        change.position = Some(to);
        ServerMessage::Delta(WorldDelta {
            tick: 2,
            sim_time: SimTime::from_millis(12_000),
            agents: vec![change],
            obstacles: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            events,
        })
    }

    fn ready_client() -> (ClientReconciler, EntityId) {
        let mut client = ClientReconciler::new(100, WINDOW);
        client.connect();
        let (world, id) = make_snapshot();
        client.apply(
            &ServerMessage::Snapshot {
                snapshot: world,
                events: Vec::new(),
            },
            Duration::ZERO,
        );
        (client, id)
    }

    #[test]
    fn connect_is_idempotent() {
        let mut client = ClientReconciler::new(100, WINDOW);
        assert!(client.connect());
        assert!(!client.connect());
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn first_snapshot_completes_handshake_once() {
        let mut client = ClientReconciler::new(100, WINDOW);
        client.connect();
        let (world, _) = make_snapshot();
        let snapshot = ServerMessage::Snapshot {
            snapshot: world,
            events: vec![make_event()],
        };

        let first = client.apply(&snapshot, Duration::ZERO);
        assert_eq!(
            first,
            ApplyOutcome::SnapshotLoaded {
                send_ready: true,
                new_events: 1
            }
        );
        assert_eq!(client.state(), ConnectionState::Ready);

        let second = client.apply(&snapshot, Duration::ZERO);
        assert_eq!(
            second,
            ApplyOutcome::SnapshotLoaded {
                send_ready: false,
                new_events: 0
            }
        );
    }

    #[test]
    fn messages_before_connect_or_snapshot_are_ignored() {
        let mut client = ClientReconciler::new(100, WINDOW);
        let (world, id) = make_snapshot();
        let snapshot = ServerMessage::Snapshot {
            snapshot: world,
            events: Vec::new(),
        };
        assert_eq!(client.apply(&snapshot, Duration::ZERO), ApplyOutcome::Ignored);

        client.connect();
        let delta = move_delta(id, Vec2::new(1.0, 0.0), Vec::new());
        assert_eq!(client.apply(&delta, Duration::ZERO), ApplyOutcome::Ignored);
        assert!(client.world().is_none());
    }

    #[test]
    fn applying_a_delta_twice_matches_applying_once() {
        let (mut client, id) = ready_client();
        let delta = move_delta(id, Vec2::new(4.0, 0.0), vec![make_event()]);
        let now = Duration::from_millis(10);

        client.apply(&delta, now);
        let once_world = client.world().cloned();
        let once_events: Vec<_> = client.events().map(|e| e.id).collect();
        let once_display = client.displayed_position(id, Duration::from_millis(60));

        let outcome = client.apply(&delta, Duration::from_millis(20));
        assert_eq!(outcome, ApplyOutcome::DeltaApplied { new_events: 0 });
        assert_eq!(client.world().cloned(), once_world);
        assert_eq!(client.events().map(|e| e.id).collect::<Vec<_>>(), once_events);
        assert_eq!(
            client.displayed_position(id, Duration::from_millis(60)),
            once_display
        );
    }

    #[test]
    fn positions_are_interpolated_over_the_window() {
        let (mut client, id) = ready_client();
        client.apply(&move_delta(id, Vec2::new(10.0, 0.0), Vec::new()), Duration::ZERO);

        let halfway = client.displayed_position(id, Duration::from_millis(50)).unwrap();
        assert!((halfway.x - 5.0).abs() < 1e-9);
        let done = client.displayed_position(id, Duration::from_millis(500)).unwrap();
        assert_eq!(done, Vec2::new(10.0, 0.0));
        assert_eq!(
            client.world().unwrap().agents.get(&id).unwrap().position,
            Vec2::new(10.0, 0.0)
        );
    }

    #[test]
    fn retarget_starts_from_displayed_position() {
        let (mut client, id) = ready_client();
        client.apply(&move_delta(id, Vec2::new(10.0, 0.0), Vec::new()), Duration::ZERO);
        client.apply(
            &move_delta(id, Vec2::new(10.0, 10.0), Vec::new()),
            Duration::from_millis(50),
        );
        let start = client.displayed_position(id, Duration::from_millis(50)).unwrap();
        assert!((start.x - 5.0).abs() < 1e-9);
        assert!(start.y.abs() < 1e-9);
    }

    #[test]
    fn event_log_is_capped() {
        let mut client = ClientReconciler::new(3, WINDOW);
        client.connect();
        let (world, _) = make_snapshot();
        let events: Vec<DeltaEvent> = (0..5).map(|_| make_event()).collect();
        let last = events.last().map(|e| e.id);
        client.apply(
            &ServerMessage::Snapshot {
                snapshot: world,
                events,
            },
            Duration::ZERO,
        );
        assert_eq!(client.events().count(), 3);
        assert_eq!(client.events().last().map(|e| e.id), last);
    }

    #[test]
    fn removed_entities_disappear() {
        let (mut client, id) = ready_client();
        client.apply(
            &ServerMessage::Delta(WorldDelta {
                tick: 3,
                sim_time: SimTime::ZERO,
                agents: Vec::new(),
                obstacles: Vec::new(),
                added: Vec::new(),
                removed: vec![id],
                events: Vec::new(),
            }),
            Duration::ZERO,
        );
        assert!(client.world().unwrap().agents.is_empty());
        assert!(client.displayed_position(id, Duration::ZERO).is_none());
        assert_eq!(client.world().unwrap().tick, 3);
    }
}
