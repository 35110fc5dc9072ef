//! Observer server for the Primeval simulation.
//!
//! Exposes the simulation to the outside world over HTTP:
//!
//! - A `WebSocket` endpoint (`GET /ws`) speaking the subscriber protocol:
//!   full snapshot on attach, deltas after the client reports ready, and
//!   overrides with their outcome.
//! - Read-only REST views served from a copy of the world refreshed after
//!   each tick.
//! - Operator endpoints for pause, resume, speed, stop, status and
//!   overrides.
//!
//! # Modules
//!
//! - [`state`] -- Shared [`AppState`] and the served [`ObserverSnapshot`]
//! - [`ws`] -- Subscriber protocol `WebSocket` handler
//! - [`handlers`] -- Read-only REST handlers
//! - [`operator`] -- Operator control and override handlers
//! - [`router`] -- Route table
//! - [`server`] -- Binding and serving
//! - [`error`] -- [`ObserverError`] and its HTTP mapping
//!
//! [`AppState`]: state::AppState
//! [`ObserverSnapshot`]: state::ObserverSnapshot
//! [`ObserverError`]: error::ObserverError

pub mod error;
pub mod handlers;
pub mod operator;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, spawn_observer, start_server};
pub use state::{AppState, ObserverSnapshot};
