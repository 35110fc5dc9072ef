//! Engine binary for the Primeval simulation.
//!
//! Wires together the world spawner, the decision provider, the observer
//! server and the tick loop, then runs until a termination condition is
//! met.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `primeval-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Spawn the starting world
//! 4. Select the decision provider (`nats` or `stub`)
//! 5. Create the engine and operator state
//! 6. Start the Observer server
//! 7. Run the simulation loop (the clock starts once a subscriber is ready)
//! 8. Log the result and keep serving until Ctrl-C

mod error;
mod nats_decision;
mod observer_callback;
mod spawner;

use std::path::Path;
use std::sync::Arc;

use primeval_core::command::EngineHandle;
use primeval_core::config::SimulationConfig;
use primeval_core::decision::{DecisionProvider, StubDecisionProvider};
use primeval_core::engine::Engine;
use primeval_core::operator::OperatorState;
use primeval_core::runner;
use primeval_observer::{AppState, ObserverSnapshot, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats_decision::NatsDecisionProvider;
use crate::observer_callback::ObserverCallback;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "primeval-config.yaml";

/// Capacity of the engine command channel.
const COMMAND_QUEUE: usize = 256;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the simulation itself fails.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging. RUST_LOG wins over the config level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("primeval-engine starting");
    info!(
        from_file,
        world_name = config.world.name,
        seed = config.world.seed,
        tick_interval_ms = config.world.tick_interval_ms,
        time_scale = config.world.time_scale,
        provider = config.decision.provider,
        max_concurrent = config.decision.max_concurrent,
        "Configuration loaded"
    );

    // 3. Spawn the starting world.
    let world = spawner::spawn_world(&config.world, &config.population)?;

    // 4. Select the decision provider.
    let provider = make_provider(&config).await?;

    // 5. Create the engine and operator state.
    let mut engine = Engine::new(config.clone(), world, provider)?;
    let operator = Arc::new(OperatorState::new(
        config.world.tick_interval_ms,
        &config.simulation,
    ));
    info!(
        max_ticks = operator.max_ticks(),
        max_real_time_seconds = operator.max_real_time_seconds(),
        tick_interval_ms = operator.tick_interval_ms(),
        "Operator state initialized"
    );

    // 6. Start the Observer server.
    let (handle, mut commands) = EngineHandle::channel(COMMAND_QUEUE);
    let app_state = Arc::new(
        AppState::new(handle, Arc::clone(&operator))
            .with_subscriber_queue(config.broadcast.subscriber_queue),
    );
    app_state
        .publish(ObserverSnapshot::capture(&engine, &operator))
        .await;
    let server_config = ServerConfig::on_port(config.infrastructure.observer_port);
    let _observer = primeval_observer::spawn_observer(&server_config, Arc::clone(&app_state)).await?;

    // Ctrl-C during the run asks for a clean stop.
    let stopper = Arc::clone(&operator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping simulation");
            stopper.request_stop();
        }
    });

    // 7. Run the simulation.
    info!("Waiting for a subscriber before starting the clock");
    let mut callback = ObserverCallback::new(Arc::clone(&app_state));
    let result = runner::run_simulation(&mut engine, &mut commands, &operator, &mut callback).await?;

    // 8. Log results, then keep the final state queryable.
    runner::log_simulation_end(&result);
    app_state
        .publish(ObserverSnapshot::capture(&engine, &operator))
        .await;

    if operator.is_stop_requested() {
        info!("primeval-engine shutdown complete");
        return Ok(());
    }
    info!("Observer still serving the final state; press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    info!("primeval-engine shutdown complete");
    Ok(())
}

/// Load the simulation configuration from `primeval-config.yaml`.
///
/// Returns the config and whether it came from the file.
fn load_config() -> Result<(SimulationConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((SimulationConfig::from_file(config_path)?, true))
    } else {
        Ok((SimulationConfig::parse("")?, false))
    }
}

/// Build the configured decision provider.
async fn make_provider(config: &SimulationConfig) -> Result<Arc<dyn DecisionProvider>, EngineError> {
    if config.decision.provider == "nats" {
        let nats_url = &config.infrastructure.nats_url;
        info!(nats_url, subject = config.infrastructure.decision_subject, "Connecting to NATS");
        let provider =
            NatsDecisionProvider::connect(nats_url, config.infrastructure.decision_subject.clone())
                .await?;
        info!("NATS decision provider connected");
        Ok(Arc::new(provider))
    } else {
        warn!("Using the stub decision provider; agents follow the fallback rules");
        Ok(Arc::new(StubDecisionProvider::new()))
    }
}
