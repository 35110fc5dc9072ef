//! Integration tests for the Observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. A small task stands in for the simulation loop:
//! it owns a real [`Engine`], applies commands and republishes the copy
//! the REST views read.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use primeval_core::command::EngineHandle;
use primeval_core::config::{SimulationBoundsConfig, SimulationConfig};
use primeval_core::decision::StubDecisionProvider;
use primeval_core::engine::Engine;
use primeval_core::operator::OperatorState;
use primeval_observer::router::build_router;
use primeval_observer::state::{AppState, ObserverSnapshot};
use primeval_types::{
    Agent, AgentKind, DeltaEvent, EntityId, EventKind, Importance, SimTime, Vec2, WorldSnapshot,
};
use serde_json::Value;
use tower::ServiceExt;

struct Fixture {
    state: Arc<AppState>,
    ash: EntityId,
}

async fn make_test_state() -> Fixture {
    let mut world = WorldSnapshot::empty(100.0, 100.0);
    let ash = Agent::new("Ash", AgentKind::Npc, Vec2::new(10.0, 10.0));
    let ash_id = ash.id;
    world.insert_agent(ash);
    let mut wolf = Agent::new("Wolf", AgentKind::Beast, Vec2::new(40.0, 40.0));
    wolf.alive = false;
    world.insert_agent(wolf);

    let mut engine = Engine::new(
        SimulationConfig::default(),
        world,
        Arc::new(StubDecisionProvider::new()),
    )
    .unwrap();
    let operator = Arc::new(OperatorState::new(100, &SimulationBoundsConfig::default()));
    let (handle, mut commands) = EngineHandle::channel(16);
    let state = Arc::new(AppState::new(handle, Arc::clone(&operator)));

    let mut initial = ObserverSnapshot::capture(&engine, &operator);
    initial.events = vec![
        DeltaEvent::new(
            0,
            SimTime::from_millis(0),
            EventKind::WorldStarted,
            None,
            serde_json::json!({}),
            Importance::High,
        ),
        DeltaEvent::new(
            1,
            SimTime::from_millis(6_000),
            EventKind::ActionStarted,
            Some(ash_id),
            serde_json::json!({ "kind": "rest" }),
            Importance::Low,
        ),
        DeltaEvent::new(
            2,
            SimTime::from_millis(12_000),
            EventKind::ActionCompleted,
            Some(ash_id),
            serde_json::json!({ "kind": "rest" }),
            Importance::Low,
        ),
    ];
    state.publish(initial).await;

    let shared = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            engine.handle_command(command);
            shared
                .publish(ObserverSnapshot::capture(&engine, &operator))
                .await;
        }
    });

    Fixture { state, ash: ash_id }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(state: &Arc<AppState>, path: &str) -> (StatusCode, Value) {
    let response = build_router(Arc::clone(state))
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

async fn post_json(state: &Arc<AppState>, path: &str, body: &Value) -> (StatusCode, Value) {
    let response = build_router(Arc::clone(state))
        .oneshot(
            Request::post(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

// =========================================================================
// Read-only views
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let fixture = make_test_state().await;
    let response = build_router(fixture.state)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));
}

#[tokio::test]
async fn test_health() {
    let fixture = make_test_state().await;
    let (status, json) = get(&fixture.state, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_get_world() {
    let fixture = make_test_state().await;
    let (status, json) = get(&fixture.state, "/api/world").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tick"], 0);
    assert_eq!(json["agents"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_list_agents() {
    let fixture = make_test_state().await;
    let (status, json) = get(&fixture.state, "/api/agents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
}

#[tokio::test]
async fn test_list_agents_filters() {
    let fixture = make_test_state().await;

    let (_, alive) = get(&fixture.state, "/api/agents?status=alive").await;
    assert_eq!(alive["count"], 1);
    assert_eq!(alive["agents"][0]["name"], "Ash");

    let (_, dead_beasts) = get(&fixture.state, "/api/agents?status=dead&kind=beast").await;
    assert_eq!(dead_beasts["count"], 1);
    assert_eq!(dead_beasts["agents"][0]["name"], "Wolf");

    let (_, live_beasts) = get(&fixture.state, "/api/agents?status=alive&kind=beast").await;
    assert_eq!(live_beasts["count"], 0);
}

#[tokio::test]
async fn test_list_agents_rejects_unknown_status() {
    let fixture = make_test_state().await;
    let (status, json) = get(&fixture.state, "/api/agents?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_get_agent_by_id() {
    let fixture = make_test_state().await;
    let path = format!("/api/agents/{}", fixture.ash);
    let (status, json) = get(&fixture.state, &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["agent"]["name"], "Ash");
    assert_eq!(json["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_agent_not_found() {
    let fixture = make_test_state().await;
    let path = format!("/api/agents/{}", uuid::Uuid::now_v7());
    let (status, _) = get(&fixture.state, &path).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_agent_invalid_uuid() {
    let fixture = make_test_state().await;
    let (status, _) = get(&fixture.state, "/api/agents/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_events_filters_and_limit() {
    let fixture = make_test_state().await;

    let (_, all) = get(&fixture.state, "/api/events").await;
    assert_eq!(all["count"], 3);

    let (_, by_tick) = get(&fixture.state, "/api/events?tick=1").await;
    assert_eq!(by_tick["count"], 1);
    assert_eq!(by_tick["events"][0]["kind"], "action_started");

    let path = format!("/api/events?entity_id={}", fixture.ash);
    let (_, by_entity) = get(&fixture.state, &path).await;
    assert_eq!(by_entity["count"], 2);

    let (_, important) = get(&fixture.state, "/api/events?min_importance=high").await;
    assert_eq!(important["count"], 1);
    assert_eq!(important["events"][0]["kind"], "world_started");

    let (_, newest) = get(&fixture.state, "/api/events?limit=1").await;
    assert_eq!(newest["count"], 1);
    assert_eq!(newest["events"][0]["kind"], "action_completed");
}

// =========================================================================
// Operator control
// =========================================================================

#[tokio::test]
async fn test_pause_and_resume_show_in_status() {
    let fixture = make_test_state().await;

    let (status, _) = post_json(&fixture.state, "/api/operator/pause", &Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = get(&fixture.state, "/api/operator/status").await;
    assert_eq!(json["paused"], true);
    assert_eq!(json["agents_total"], 2);
    assert_eq!(json["agents_alive"], 1);

    post_json(&fixture.state, "/api/operator/resume", &Value::Null).await;
    let (_, json) = get(&fixture.state, "/api/operator/status").await;
    assert_eq!(json["paused"], false);
}

#[tokio::test]
async fn test_set_speed() {
    let fixture = make_test_state().await;
    let body = serde_json::json!({ "tick_interval_ms": 250 });
    let (status, json) = post_json(&fixture.state, "/api/operator/speed", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["previous_interval_ms"], 100);
    assert_eq!(fixture.state.operator.tick_interval_ms(), 250);
}

#[tokio::test]
async fn test_set_speed_below_minimum_is_rejected() {
    let fixture = make_test_state().await;
    let body = serde_json::json!({ "tick_interval_ms": 1 });
    let (status, _) = post_json(&fixture.state, "/api/operator/speed", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(fixture.state.operator.tick_interval_ms(), 100);
}

#[tokio::test]
async fn test_stop_sets_flag() {
    let fixture = make_test_state().await;
    let (status, _) = post_json(&fixture.state, "/api/operator/stop", &Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fixture.state.operator.is_stop_requested());
}

// =========================================================================
// Overrides
// =========================================================================

#[tokio::test]
async fn test_override_add_memory_reaches_the_world() {
    let fixture = make_test_state().await;
    let body = serde_json::json!({
        "type": "add_memory",
        "target": { "by": "name", "name": "Ash" },
        "memory": "the river floods in spring",
    });
    let (status, json) = post_json(&fixture.state, "/api/operator/override", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["affected"][0], fixture.ash.to_string());

    // The stand-in loop republishes after each command; wait for it.
    let path = format!("/api/agents/{}", fixture.ash);
    let mut memories = Value::Null;
    for _ in 0..50 {
        let (_, agent) = get(&fixture.state, &path).await;
        memories = agent["agent"]["memories"].clone();
        if memories.as_array().is_some_and(|m| !m.is_empty()) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(memories[0], "the river floods in spring");
}

#[tokio::test]
async fn test_override_unknown_target_is_unprocessable() {
    let fixture = make_test_state().await;
    let body = serde_json::json!({
        "type": "clear_memories",
        "target": { "by": "name", "name": "Nobody" },
    });
    let (status, json) = post_json(&fixture.state, "/api/operator/override", &body).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["ok"], false);
}

#[tokio::test]
async fn test_override_with_engine_stopped_is_unavailable() {
    let operator = Arc::new(OperatorState::new(100, &SimulationBoundsConfig::default()));
    let (handle, commands) = EngineHandle::channel(1);
    drop(commands);
    let state = Arc::new(AppState::new(handle, operator));

    let body = serde_json::json!({ "type": "reset_agent", "target": { "by": "all" } });
    let (status, json) = post_json(&state, "/api/operator/override", &body).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], 503);
}
