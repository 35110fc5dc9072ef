//! World-state diffing and fan-out to subscribers.
//!
//! The broadcaster keeps a bounded log of recent events and, per
//! subscriber, the projection of the world it last received. Each
//! broadcast diffs the current projection against that baseline and sends
//! only changed fields plus the logged events the subscriber has not been
//! sent yet.
//!
//! # Handshake
//!
//! A new subscriber first receives one full snapshot (with the retained
//! event backlog) and is then held back from fan-out until it acknowledges
//! readiness. Its first delta is computed against the snapshot it received.
//!
//! # Back-pressure
//!
//! Sends never block the tick. A subscriber whose outbound queue is full
//! or closed is dropped; other subscribers are unaffected.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use primeval_types::{
    ActionChange, ActionState, AgentDelta, Attributes, CurrentAction, DeltaEvent, Entity, EntityId,
    EventId, Inventory, ObstacleDelta, ServerMessage, SubscriberId, Vec2, WorldDelta,
    WorldSnapshot,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::config::BroadcastConfig;

/// Outbound queue of one subscriber.
pub type SubscriberSender = mpsc::Sender<Arc<ServerMessage>>;

/// Errors raised when talking to a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// No subscriber with this id.
    #[error("unknown subscriber {subscriber}")]
    UnknownSubscriber {
        /// The id.
        subscriber: SubscriberId,
    },

    /// The subscriber's queue is full.
    #[error("subscriber {subscriber} is not keeping up")]
    QueueFull {
        /// The id.
        subscriber: SubscriberId,
    },

    /// The subscriber's receiving end is gone.
    #[error("subscriber {subscriber} disconnected")]
    Disconnected {
        /// The id.
        subscriber: SubscriberId,
    },
}

/// Where a subscriber is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberPhase {
    /// Snapshot sent; waiting for the readiness acknowledgement.
    AwaitingReady,
    /// Receives deltas.
    Ready,
}

/// Counts from one [`DeltaBroadcaster::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Delta messages queued.
    pub deltas_sent: usize,
    /// Subscribers dropped for a full or closed queue.
    pub dropped: usize,
}

// ---------------------------------------------------------------------------
// Event id ring
// ---------------------------------------------------------------------------

/// Bounded set of recently seen event ids. The oldest id is forgotten
/// when capacity is exceeded.
#[derive(Debug, Clone)]
pub struct EventIdRing {
    order: VecDeque<EventId>,
    members: HashSet<EventId>,
    capacity: usize,
}

impl EventIdRing {
    /// An empty ring holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Remember `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: EventId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    /// Whether `id` is remembered.
    pub fn contains(&self, id: EventId) -> bool {
        self.members.contains(&id)
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Projection and diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct AgentProjection {
    position: Vec2,
    attributes: Attributes,
    state: ActionState,
    current: Option<CurrentAction>,
    alive: bool,
    inventory: Inventory,
}

/// The authoritative broadcast fields of every entity, quantized to
/// display resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    agents: BTreeMap<EntityId, AgentProjection>,
    obstacles: BTreeMap<EntityId, ObstacleDelta>,
}

impl Projection {
    /// Project `world` using the configured quantization steps.
    pub fn capture(world: &WorldSnapshot, config: &BroadcastConfig) -> Self {
        let agents = world
            .agents
            .values()
            .map(|a| {
                (
                    a.id,
                    AgentProjection {
                        position: a.position.quantize(config.position_step),
                        attributes: a.attributes.quantized(config.vital_step),
                        state: a.action_state,
                        current: a.current_action,
                        alive: a.alive,
                        inventory: a.inventory.clone(),
                    },
                )
            })
            .collect();
        let obstacles = world
            .obstacles
            .values()
            .map(|o| {
                (
                    o.id,
                    ObstacleDelta {
                        id: o.id,
                        occupied_by: o.occupied_by,
                        quantity: o.resource.map(|r| r.quantity),
                        alive: o.alive,
                    },
                )
            })
            .collect();
        Self { agents, obstacles }
    }
}

/// State changes between two projections, without events.
#[derive(Debug, Clone, Default, PartialEq)]
struct StateDiff {
    agents: Vec<AgentDelta>,
    obstacles: Vec<ObstacleDelta>,
    added: Vec<Entity>,
    removed: Vec<EntityId>,
}

impl StateDiff {
    fn is_empty(&self) -> bool {
        self.agents.is_empty()
            && self.obstacles.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

fn diff(previous: &Projection, current: &Projection, world: &WorldSnapshot) -> StateDiff {
    let mut out = StateDiff::default();

    for (id, now) in &current.agents {
        match previous.agents.get(id) {
            None => {
                if let Some(agent) = world.agents.get(id) {
                    out.added.push(Entity::Agent(Box::new(agent.clone())));
                }
            }
            Some(before) if before == now => {}
            Some(before) => {
                let delta = AgentDelta {
                    id: *id,
                    position: (before.position != now.position).then_some(now.position),
                    attributes: (before.attributes != now.attributes).then_some(now.attributes),
                    action: (before.state != now.state || before.current != now.current)
                        .then_some(ActionChange {
                            state: now.state,
                            current: now.current,
                        }),
                    alive: (before.alive != now.alive).then_some(now.alive),
                    inventory: (before.inventory != now.inventory).then(|| now.inventory.clone()),
                };
                if !delta.is_empty() {
                    out.agents.push(delta);
                }
            }
        }
    }

    for (id, now) in &current.obstacles {
        match previous.obstacles.get(id) {
            None => {
                if let Some(obstacle) = world.obstacles.get(id) {
                    out.added.push(Entity::Obstacle(obstacle.clone()));
                }
            }
            Some(before) if before == now => {}
            Some(_) => out.obstacles.push(*now),
        }
    }

    out.removed = previous
        .agents
        .keys()
        .filter(|id| !current.agents.contains_key(id))
        .chain(
            previous
                .obstacles
                .keys()
                .filter(|id| !current.obstacles.contains_key(id)),
        )
        .copied()
        .collect();

    out
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Subscriber {
    tx: SubscriberSender,
    phase: SubscriberPhase,
    baseline: Arc<Projection>,
    sent: EventIdRing,
}

/// Diffs the world after each tick and fans deltas out to subscribers.
#[derive(Debug)]
pub struct DeltaBroadcaster {
    config: BroadcastConfig,
    log: VecDeque<DeltaEvent>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    last: Arc<Projection>,
}

impl DeltaBroadcaster {
    /// Create a broadcaster with no subscribers and an empty log.
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            log: VecDeque::with_capacity(config.event_retention),
            config,
            subscribers: BTreeMap::new(),
            last: Arc::new(Projection::default()),
        }
    }

    /// Append events to the retention log, evicting the oldest beyond
    /// capacity. Order within `events` is preserved.
    pub fn record(&mut self, events: impl IntoIterator<Item = DeltaEvent>) {
        for event in events {
            self.log.push_back(event);
        }
        while self.log.len() > self.config.event_retention {
            self.log.pop_front();
        }
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &DeltaEvent> {
        self.log.iter()
    }

    /// Number of attached subscribers (any phase).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of subscribers past the handshake.
    pub fn ready_count(&self) -> usize {
        self.subscribers
            .values()
            .filter(|s| s.phase == SubscriberPhase::Ready)
            .count()
    }

    /// Attach a subscriber and send it the full snapshot.
    ///
    /// The subscriber is not added if the snapshot cannot be queued.
    pub fn attach(
        &mut self,
        subscriber: SubscriberId,
        tx: SubscriberSender,
        world: &WorldSnapshot,
    ) -> Result<(), BroadcastError> {
        let (message, baseline, sent) = self.snapshot_for(world);
        send(&tx, subscriber, message)?;
        self.subscribers.insert(
            subscriber,
            Subscriber {
                tx,
                phase: SubscriberPhase::AwaitingReady,
                baseline,
                sent,
            },
        );
        debug!(subscriber = %subscriber, "subscriber attached");
        Ok(())
    }

    /// Complete the handshake. Returns `true` if the subscriber was
    /// waiting, `false` if it was already ready.
    pub fn mark_ready(&mut self, subscriber: SubscriberId) -> Result<bool, BroadcastError> {
        let entry = self
            .subscribers
            .get_mut(&subscriber)
            .ok_or(BroadcastError::UnknownSubscriber { subscriber })?;
        let was_waiting = entry.phase == SubscriberPhase::AwaitingReady;
        entry.phase = SubscriberPhase::Ready;
        Ok(was_waiting)
    }

    /// Remove a subscriber. Returns its phase if it was attached.
    pub fn detach(&mut self, subscriber: SubscriberId) -> Option<SubscriberPhase> {
        self.subscribers.remove(&subscriber).map(|s| s.phase)
    }

    /// Send a fresh full snapshot to an attached subscriber and make it the
    /// new baseline. A subscriber that cannot take it is dropped.
    ///
    /// The snapshot carries only retained events this subscriber has not
    /// been sent yet; its sent-id ring is kept.
    pub fn resync(
        &mut self,
        subscriber: SubscriberId,
        world: &WorldSnapshot,
    ) -> Result<(), BroadcastError> {
        let entry = self
            .subscribers
            .get_mut(&subscriber)
            .ok_or(BroadcastError::UnknownSubscriber { subscriber })?;
        let events: Vec<DeltaEvent> = self
            .log
            .iter()
            .filter(|e| !entry.sent.contains(e.id))
            .cloned()
            .collect();
        let event_ids: Vec<EventId> = events.iter().map(|e| e.id).collect();
        let baseline = Arc::new(Projection::capture(world, &self.config));
        let message = ServerMessage::Snapshot {
            snapshot: world.clone(),
            events,
        };
        if let Err(error) = send(&entry.tx, subscriber, message) {
            self.subscribers.remove(&subscriber);
            return Err(error);
        }
        for event_id in event_ids {
            entry.sent.insert(event_id);
        }
        entry.baseline = baseline;
        debug!(subscriber = %subscriber, "subscriber resynced");
        Ok(())
    }

    /// Diff the world and queue deltas to every ready subscriber.
    ///
    /// Runs only on ticks that are a multiple of the configured cadence.
    /// Nothing is sent to a subscriber for which nothing changed.
    pub fn broadcast(&mut self, world: &WorldSnapshot) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let on_cadence = world
            .tick
            .checked_rem(self.config.broadcast_every_ticks)
            .is_none_or(|r| r == 0);
        if !on_cadence {
            return report;
        }

        let next = Arc::new(Projection::capture(world, &self.config));
        let mut shared: Option<StateDiff> = None;
        let mut dropped = Vec::new();

        for (id, sub) in &mut self.subscribers {
            if sub.phase != SubscriberPhase::Ready {
                continue;
            }

            let state = if Arc::ptr_eq(&sub.baseline, &self.last) {
                shared
                    .get_or_insert_with(|| diff(&self.last, &next, world))
                    .clone()
            } else {
                diff(&sub.baseline, &next, world)
            };
            let events: Vec<DeltaEvent> = self
                .log
                .iter()
                .filter(|e| !sub.sent.contains(e.id))
                .cloned()
                .collect();

            sub.baseline = Arc::clone(&next);
            if state.is_empty() && events.is_empty() {
                continue;
            }

            let event_ids: Vec<EventId> = events.iter().map(|e| e.id).collect();
            let message = ServerMessage::Delta(WorldDelta {
                tick: world.tick,
                sim_time: world.sim_time,
                agents: state.agents,
                obstacles: state.obstacles,
                added: state.added,
                removed: state.removed,
                events,
            });
            match send(&sub.tx, *id, message) {
                Ok(()) => {
                    for event_id in event_ids {
                        sub.sent.insert(event_id);
                    }
                    report.deltas_sent = report.deltas_sent.saturating_add(1);
                }
                Err(error) => {
                    warn!(subscriber = %id, error = %error, "dropping subscriber");
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.subscribers.remove(&id);
            report.dropped = report.dropped.saturating_add(1);
        }
        self.last = next;
        report
    }

    fn snapshot_for(&self, world: &WorldSnapshot) -> (ServerMessage, Arc<Projection>, EventIdRing) {
        let events: Vec<DeltaEvent> = self.log.iter().cloned().collect();
        let mut sent = EventIdRing::new(self.config.event_retention);
        for event in &events {
            sent.insert(event.id);
        }
        let baseline = Arc::new(Projection::capture(world, &self.config));
        let message = ServerMessage::Snapshot {
            snapshot: world.clone(),
            events,
        };
        (message, baseline, sent)
    }
}

fn send(
    tx: &SubscriberSender,
    subscriber: SubscriberId,
    message: ServerMessage,
) -> Result<(), BroadcastError> {
    tx.try_send(Arc::new(message)).map_err(|error| match error {
        TrySendError::Full(_) => BroadcastError::QueueFull { subscriber },
        TrySendError::Closed(_) => BroadcastError::Disconnected { subscriber },
    })
}
