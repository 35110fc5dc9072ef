//! Operator REST handlers for runtime simulation control and overrides.
//!
//! Control endpoints flip flags on the shared
//! [`OperatorState`](primeval_core::operator::OperatorState); the loop
//! picks them up between ticks. Overrides travel through the engine
//! command channel and the handler waits for the outcome.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/operator/pause` | Pause the tick loop |
//! | `POST` | `/api/operator/resume` | Resume the tick loop |
//! | `POST` | `/api/operator/speed` | Set tick interval (ms) |
//! | `POST` | `/api/operator/stop` | Trigger clean shutdown |
//! | `GET` | `/api/operator/status` | Current simulation status |
//! | `POST` | `/api/operator/override` | Apply an override command |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use primeval_core::config::MIN_TICK_INTERVAL_MS;
use primeval_core::operator::SimulationStatus;
use primeval_types::OverrideCommand;
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/operator/speed`.
#[derive(Debug, serde::Deserialize)]
pub struct SetSpeedRequest {
    /// New tick interval in milliseconds.
    pub tick_interval_ms: u64,
}

/// Generic success response.
#[derive(Debug, serde::Serialize)]
struct OperatorResponse {
    ok: bool,
    message: String,
}

impl OperatorResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Pause / resume / stop
// ---------------------------------------------------------------------------

/// Pause the simulation tick loop. Subscribers stay attached and
/// overrides are still applied.
pub async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.operator.pause();
    info!("Operator paused simulation");
    OperatorResponse::ok("Simulation paused")
}

/// Resume the simulation tick loop after a pause.
pub async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.operator.resume();
    info!("Operator resumed simulation");
    OperatorResponse::ok("Simulation resumed")
}

/// Trigger a clean simulation shutdown. The HTTP server keeps running so
/// the final state can still be queried.
pub async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.operator.request_stop();
    info!("Operator requested stop");
    OperatorResponse::ok("Stop requested -- simulation will end before the next tick")
}

// ---------------------------------------------------------------------------
// POST /api/operator/speed
// ---------------------------------------------------------------------------

/// Change the tick interval at runtime.
pub async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetSpeedRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let prev = state
        .operator
        .set_tick_interval_ms(body.tick_interval_ms)
        .ok_or_else(|| {
            ObserverError::InvalidRequest(format!(
                "tick_interval_ms must be at least {MIN_TICK_INTERVAL_MS}"
            ))
        })?;

    info!(from = prev, to = body.tick_interval_ms, "Operator changed tick interval");
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("Tick interval changed from {prev}ms to {}ms", body.tick_interval_ms),
        "previous_interval_ms": prev,
        "new_interval_ms": body.tick_interval_ms,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/operator/status
// ---------------------------------------------------------------------------

/// Return the simulation status.
///
/// World-derived fields come from the last refreshed copy; control fields
/// are read live so a pause is visible before the next tick.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let operator = &state.operator;
    let end_reason = operator.end_reason().await;
    let snapshot = state.snapshot.read().await;

    let mut status = snapshot.status.clone().unwrap_or_else(|| SimulationStatus {
        tick: snapshot.world.tick,
        sim_time_ms: snapshot.world.sim_time.as_millis(),
        calendar: String::new(),
        active: false,
        paused: false,
        stop_requested: false,
        tick_interval_ms: 0,
        time_scale: 0.0,
        elapsed_seconds: 0,
        max_ticks: operator.max_ticks(),
        agents_alive: snapshot.world.alive_agents(),
        agents_total: snapshot.world.agents.len(),
        decisions_in_flight: 0,
        subscribers_ready: 0,
        end_reason: None,
        started_at: String::new(),
    });
    status.paused = operator.is_paused();
    status.stop_requested = operator.is_stop_requested();
    status.tick_interval_ms = operator.tick_interval_ms();
    status.elapsed_seconds = operator.elapsed_seconds();
    status.started_at = operator.started_at().to_rfc3339();
    status.end_reason = end_reason;

    Json(status)
}

// ---------------------------------------------------------------------------
// POST /api/operator/override
// ---------------------------------------------------------------------------

/// Apply an override between ticks and report its outcome.
///
/// A rejected override answers `422 Unprocessable Entity` with the same
/// outcome body.
pub async fn apply_override(
    State(state): State<Arc<AppState>>,
    Json(command): Json<OverrideCommand>,
) -> Result<impl IntoResponse, ObserverError> {
    let outcome = state.engine.apply_override(command).await?;
    let code = if outcome.ok {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((code, Json(outcome)))
}
