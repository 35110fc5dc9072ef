//! Read-only REST endpoint handlers for the Observer server.
//!
//! All handlers read from the [`ObserverSnapshot`](crate::state::ObserverSnapshot)
//! copy held in [`AppState`]; none of them touch the live world.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/health` | Liveness probe |
//! | `GET` | `/api/world` | Current world snapshot |
//! | `GET` | `/api/agents` | List agents (by status or kind) |
//! | `GET` | `/api/agents/{id}` | Single agent |
//! | `GET` | `/api/events` | Retained events (by tick, entity or importance) |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};
use primeval_types::{AgentKind, EntityId, Importance};
use uuid::Uuid;

use crate::error::ObserverError;
use crate::state::AppState;

/// Default number of events returned by `GET /api/events`.
const DEFAULT_EVENT_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for the `GET /api/events` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct EventsQuery {
    /// Only events from this tick.
    pub tick: Option<u64>,
    /// Only events about this entity.
    pub entity_id: Option<String>,
    /// Only events at or above this importance.
    pub min_importance: Option<Importance>,
    /// Maximum number of events to return, newest kept (default 100).
    pub limit: Option<usize>,
}

/// Query parameters for the `GET /api/agents` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct AgentsQuery {
    /// Filter by alive/dead/all status. Accepted values: `alive`, `dead`, `all`.
    pub status: Option<String>,
    /// Filter by agent kind (`npc` or `beast`).
    pub kind: Option<AgentKind>,
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing the world clock and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.snapshot.read().await;
    let tick = snapshot.world.tick;
    let calendar = snapshot
        .status
        .as_ref()
        .map_or_else(|| String::from("not started"), |s| s.calendar.clone());
    let agents_alive = snapshot.world.alive_agents();
    let obstacle_count = snapshot.world.obstacles.len();
    let event_count = snapshot.events.len();
    let run_state = if state.operator.is_stop_requested() {
        "STOPPED"
    } else if state.operator.is_paused() {
        "PAUSED"
    } else if snapshot.status.as_ref().is_some_and(|s| s.active) {
        "RUNNING"
    } else {
        "WAITING FOR OBSERVER"
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Primeval Observer</title>
    <style>
        body {{
            background: #14120f;
            color: #d8cfc0;
            font-family: 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #e0a458; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8f8679; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #1d1a16;
            border: 1px solid #3a342c;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8f8679; font-size: 0.85rem; }}
        .metric .value {{ color: #e0a458; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #e0a458; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        .status {{ color: #8fbf6a; font-weight: bold; }}
    </style>
</head>
<body>
    <h1>Primeval Observer</h1>
    <p class="subtitle">{calendar}</p>

    <p>Status: <span class="status">{run_state}</span></p>

    <div>
        <div class="metric"><div class="label">Tick</div><div class="value">{tick}</div></div>
        <div class="metric"><div class="label">Alive</div><div class="value">{agents_alive}</div></div>
        <div class="metric"><div class="label">Obstacles</div><div class="value">{obstacle_count}</div></div>
        <div class="metric"><div class="label">Events</div><div class="value">{event_count}</div></div>
    </div>

    <h2>API</h2>
    <ul>
        <li><a href="/api/health">/api/health</a></li>
        <li><a href="/api/world">/api/world</a></li>
        <li><a href="/api/agents">/api/agents</a> (?status=alive|dead, ?kind=npc|beast)</li>
        <li><a href="/api/events">/api/events</a> (?tick=N, ?entity_id=X, ?min_importance=high)</li>
        <li><a href="/api/operator/status">/api/operator/status</a></li>
    </ul>

    <h2>WebSocket</h2>
    <ul>
        <li><code>ws://host:port/ws</code> -- subscriber protocol</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tick = state.snapshot.read().await.world.tick;
    Json(serde_json::json!({
        "status": "ok",
        "tick": tick,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/world
// ---------------------------------------------------------------------------

/// Return the full world snapshot as of the last tick.
pub async fn get_world(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let snapshot = state.snapshot.read().await;
    Ok(Json(serde_json::to_value(&snapshot.world)?))
}

// ---------------------------------------------------------------------------
// GET /api/agents
// ---------------------------------------------------------------------------

/// List agents, optionally filtered by alive/dead status and kind.
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AgentsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let filter = params.status.as_deref().unwrap_or("all");
    if !matches!(filter, "all" | "alive" | "dead") {
        return Err(ObserverError::InvalidRequest(format!(
            "status must be one of alive, dead, all (got {filter})"
        )));
    }

    let snapshot = state.snapshot.read().await;
    let agents: Vec<serde_json::Value> = snapshot
        .world
        .agents
        .values()
        .filter(|agent| match filter {
            "alive" => agent.alive,
            "dead" => !agent.alive,
            _ => true,
        })
        .filter(|agent| params.kind.is_none_or(|kind| agent.kind == kind))
        .map(|agent| {
            serde_json::json!({
                "id": agent.id,
                "name": agent.name,
                "kind": agent.kind,
                "alive": agent.alive,
                "position": agent.position,
                "attributes": agent.attributes,
                "action_state": agent.action_state,
                "action": agent.current_action.as_ref().map(|a| a.kind),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "count": agents.len(),
        "agents": agents,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/agents/{id}
// ---------------------------------------------------------------------------

/// Return the full record for a single agent plus its recent events.
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let id = EntityId::from(parse_uuid(&id_str)?);
    let snapshot = state.snapshot.read().await;

    let agent = snapshot
        .world
        .agents
        .get(&id)
        .ok_or_else(|| ObserverError::NotFound(format!("agent {id}")))?;

    let events: Vec<_> = snapshot
        .events
        .iter()
        .filter(|e| e.entity_id == Some(id))
        .collect();

    Ok(Json(serde_json::json!({
        "agent": agent,
        "events": events,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/events
// ---------------------------------------------------------------------------

/// Query the retained event log. Results are oldest first; when more than
/// `limit` match, the newest `limit` are returned.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let entity = params
        .entity_id
        .as_deref()
        .map(parse_uuid)
        .transpose()?
        .map(EntityId::from);
    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT);

    let snapshot = state.snapshot.read().await;
    let matching: Vec<_> = snapshot
        .events
        .iter()
        .filter(|e| params.tick.is_none_or(|tick| e.tick == tick))
        .filter(|e| entity.is_none_or(|id| e.entity_id == Some(id)))
        .filter(|e| params.min_importance.is_none_or(|min| e.importance >= min))
        .collect();
    let skip = matching.len().saturating_sub(limit);
    let events: Vec<_> = matching.into_iter().skip(skip).collect();

    Ok(Json(serde_json::json!({
        "count": events.len(),
        "events": events,
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, ObserverError> {
    Uuid::parse_str(s).map_err(|e| ObserverError::InvalidUuid(format!("{s}: {e}")))
}
