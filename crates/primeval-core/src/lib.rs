//! Tick-driven simulation core for the Primeval world.
//!
//! A single [`Engine`](engine::Engine) owns the world and runs a fixed
//! phase order each tick: clock, decision apply/dispatch, action execution,
//! collision, broadcast. The only concurrency is the set of in-flight
//! decision calls, which run on spawned tasks and are joined back through
//! an inbox drained at the start of a tick.
//!
//! # Modules
//!
//! - [`clock`] -- Fixed-rate simulated clock with an activation gate.
//! - [`config`] -- Configuration loading from `primeval-config.yaml` into
//!   strongly-typed structs.
//! - [`spatial`] -- Uniform-grid index for proximity and overlap queries.
//! - [`decision`] -- [`DecisionProvider`] trait, [`StubDecisionProvider`]
//!   and the rule-based [`FallbackPolicy`].
//! - [`perception`] -- Per-agent decision context assembly.
//! - [`scheduler`] -- Cooldown eligibility, bounded concurrency and
//!   fallback on failure.
//! - [`executor`] -- The `Idle -> Moving -> Executing -> Cooling` action
//!   state machine.
//! - [`collision`] -- Agent-vs-obstacle separation.
//! - [`delta`] -- World diffing and subscriber fan-out.
//! - [`reconcile`] -- Consumer-side merge and position interpolation.
//! - [`command`] -- Channel of subscriber and override commands.
//! - [`operator`] -- Shared pause/resume/speed/stop control state.
//! - [`engine`] -- The engine instance and its tick.
//! - [`runner`] -- The async loop that drives the engine.
//!
//! [`DecisionProvider`]: decision::DecisionProvider
//! [`StubDecisionProvider`]: decision::StubDecisionProvider
//! [`FallbackPolicy`]: decision::FallbackPolicy

pub mod clock;
pub mod collision;
pub mod command;
pub mod config;
pub mod decision;
pub mod delta;
pub mod engine;
pub mod executor;
pub mod operator;
pub mod perception;
pub mod reconcile;
pub mod runner;
pub mod scheduler;
pub mod spatial;
