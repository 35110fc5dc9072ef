//! Configuration loading and typed config structures for the Primeval
//! simulation.
//!
//! The canonical configuration lives in `primeval-config.yaml` at the
//! project root. Every field has a default, so an empty file is a valid
//! configuration. All tunables the engine depends on (tick interval, time
//! scale, decision interval bounds, concurrency cap, perception radius) are
//! runtime parameters read from here.

use std::path::Path;
use std::time::Duration;

use primeval_types::MILLIS_PER_MINUTE;
use serde::Deserialize;

/// Smallest tick interval the engine accepts, in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its permitted range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// World size, timing and seed.
    #[serde(default)]
    pub world: WorldConfig,

    /// Decision scheduling parameters.
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Action execution parameters.
    #[serde(default)]
    pub actions: ActionConfig,

    /// Delta broadcast parameters.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Initial population.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Infrastructure endpoints.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Run boundaries.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,
}

impl SimulationConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// Environment variables override YAML values:
    /// - `NATS_URL` overrides `infrastructure.nats_url`
    /// - `OBSERVER_PORT` overrides `infrastructure.observer_port`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.infrastructure.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };

        if self.world.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            return invalid("world.tick_interval_ms must be at least 10");
        }
        if !(self.world.time_scale.is_finite() && self.world.time_scale > 0.0) {
            return invalid("world.time_scale must be a positive number");
        }
        if !(self.world.width > 0.0 && self.world.height > 0.0) {
            return invalid("world.width and world.height must be positive");
        }
        if self.decision.min_interval_minutes > self.decision.max_interval_minutes {
            return invalid("decision.min_interval_minutes exceeds max_interval_minutes");
        }
        if self.decision.retry_interval_minutes > self.decision.min_interval_minutes {
            return invalid("decision.retry_interval_minutes must not exceed min_interval_minutes");
        }
        if !matches!(self.decision.provider.as_str(), "nats" | "stub") {
            return invalid("decision.provider must be nats or stub");
        }
        if self.decision.max_concurrent == 0 {
            return invalid("decision.max_concurrent must be at least 1");
        }
        if self.decision.timeout_ms == 0 {
            return invalid("decision.timeout_ms must be positive");
        }
        if self.actions.min_duration_minutes > self.actions.max_duration_minutes {
            return invalid("actions.min_duration_minutes exceeds max_duration_minutes");
        }
        if self.broadcast.event_retention == 0 {
            return invalid("broadcast.event_retention must be at least 1");
        }
        if self.broadcast.broadcast_every_ticks == 0 {
            return invalid("broadcast.broadcast_every_ticks must be at least 1");
        }
        if !(self.broadcast.position_step > 0.0 && self.broadcast.vital_step > 0.0) {
            return invalid("broadcast quantization steps must be positive");
        }
        Ok(())
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable simulation name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for spawning and decision jitter.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// World width in units.
    #[serde(default = "default_world_size")]
    pub width: f64,

    /// World height in units.
    #[serde(default = "default_world_size")]
    pub height: f64,

    /// Real milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated time per unit of wall time.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Stop the clock when the last ready subscriber leaves.
    #[serde(default = "default_true")]
    pub pause_when_unobserved: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
            width: default_world_size(),
            height: default_world_size(),
            tick_interval_ms: default_tick_interval_ms(),
            time_scale: default_time_scale(),
            pause_when_unobserved: true,
        }
    }
}

/// Decision scheduling configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionConfig {
    /// Which provider to use: `nats` or `stub`.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Lower bound of the post-success cooldown, simulated minutes.
    #[serde(default = "default_min_interval_minutes")]
    pub min_interval_minutes: u64,

    /// Upper bound of the post-success cooldown, simulated minutes.
    #[serde(default = "default_max_interval_minutes")]
    pub max_interval_minutes: u64,

    /// Cooldown after a failed decision, simulated minutes.
    #[serde(default = "default_retry_interval_minutes")]
    pub retry_interval_minutes: u64,

    /// Hard wall-clock timeout per decision call.
    #[serde(default = "default_decision_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum decision calls in flight across all agents.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Radius within which entities are included in the world view.
    #[serde(default = "default_perception_radius")]
    pub perception_radius: f64,

    /// Number of most recent memories sent with each request.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
}

impl DecisionConfig {
    /// Decision timeout as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Lower cooldown bound in simulated milliseconds.
    pub const fn min_interval_ms(&self) -> u64 {
        self.min_interval_minutes.saturating_mul(MILLIS_PER_MINUTE)
    }

    /// Upper cooldown bound in simulated milliseconds.
    pub const fn max_interval_ms(&self) -> u64 {
        self.max_interval_minutes.saturating_mul(MILLIS_PER_MINUTE)
    }

    /// Retry cooldown in simulated milliseconds.
    pub const fn retry_interval_ms(&self) -> u64 {
        self.retry_interval_minutes.saturating_mul(MILLIS_PER_MINUTE)
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            min_interval_minutes: default_min_interval_minutes(),
            max_interval_minutes: default_max_interval_minutes(),
            retry_interval_minutes: default_retry_interval_minutes(),
            timeout_ms: default_decision_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            perception_radius: default_perception_radius(),
            memory_window: default_memory_window(),
        }
    }
}

/// Action execution configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionConfig {
    /// Fixed recovery window after each completed action, simulated minutes.
    #[serde(default = "default_cooling_minutes")]
    pub cooling_minutes: u64,

    /// Shortest execution phase, simulated minutes.
    #[serde(default = "default_min_duration_minutes")]
    pub min_duration_minutes: f64,

    /// Longest execution phase, simulated minutes.
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: f64,

    /// Distance below which a moving agent has arrived.
    #[serde(default = "default_arrival_epsilon")]
    pub arrival_epsilon: f64,

    /// How far a fleeing agent runs.
    #[serde(default = "default_flee_distance")]
    pub flee_distance: f64,

    /// Maximum memories kept per agent.
    #[serde(default = "default_memory_cap")]
    pub memory_cap: usize,
}

impl ActionConfig {
    /// Cooling window in simulated milliseconds.
    pub const fn cooling_ms(&self) -> u64 {
        self.cooling_minutes.saturating_mul(MILLIS_PER_MINUTE)
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            cooling_minutes: default_cooling_minutes(),
            min_duration_minutes: default_min_duration_minutes(),
            max_duration_minutes: default_max_duration_minutes(),
            arrival_epsilon: default_arrival_epsilon(),
            flee_distance: default_flee_distance(),
            memory_cap: default_memory_cap(),
        }
    }
}

/// Delta broadcast configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BroadcastConfig {
    /// Events retained for late joiners and per-subscriber dedup.
    #[serde(default = "default_event_retention")]
    pub event_retention: usize,

    /// Broadcast every N ticks.
    #[serde(default = "default_broadcast_every_ticks")]
    pub broadcast_every_ticks: u64,

    /// Outbound messages buffered per subscriber before it is dropped.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    /// Position resolution used when diffing.
    #[serde(default = "default_position_step")]
    pub position_step: f64,

    /// Vital resolution used when diffing.
    #[serde(default = "default_vital_step")]
    pub vital_step: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            event_retention: default_event_retention(),
            broadcast_every_ticks: default_broadcast_every_ticks(),
            subscriber_queue: default_subscriber_queue(),
            position_step: default_position_step(),
            vital_step: default_vital_step(),
        }
    }
}

/// Initial population configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PopulationConfig {
    /// Villagers spawned at start.
    #[serde(default = "default_npcs")]
    pub npcs: u32,

    /// Wild animals spawned at start.
    #[serde(default = "default_beasts")]
    pub beasts: u32,

    /// Resource nodes scattered at start.
    #[serde(default = "default_resource_nodes")]
    pub resource_nodes: u32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            npcs: default_npcs(),
            beasts: default_beasts(),
            resource_nodes: default_resource_nodes(),
        }
    }
}

/// Infrastructure configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS messaging URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject prefix for decision requests; the agent id is appended.
    #[serde(default = "default_decision_subject")]
    pub decision_subject: String,

    /// Observer server port.
    #[serde(default = "default_observer_port")]
    pub observer_port: u16,
}

impl InfrastructureConfig {
    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
        if let Ok(port) = std::env::var("OBSERVER_PORT").map(|v| v.parse::<u16>()) {
            match port {
                Ok(port) => self.observer_port = port,
                Err(e) => tracing::warn!(error = %e, "ignoring invalid OBSERVER_PORT"),
            }
        }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            decision_subject: default_decision_subject(),
            observer_port: default_observer_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Run boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Stop after this many wall-clock seconds of running (0 = unlimited).
    #[serde(default)]
    pub max_real_time_seconds: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "Primeval".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_world_size() -> f64 {
    100.0
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_time_scale() -> f64 {
    60.0
}

const fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "stub".to_owned()
}

const fn default_min_interval_minutes() -> u64 {
    30
}

const fn default_max_interval_minutes() -> u64 {
    60
}

const fn default_retry_interval_minutes() -> u64 {
    5
}

const fn default_decision_timeout_ms() -> u64 {
    10_000
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_perception_radius() -> f64 {
    15.0
}

const fn default_memory_window() -> usize {
    10
}

const fn default_cooling_minutes() -> u64 {
    3
}

const fn default_min_duration_minutes() -> f64 {
    5.0
}

const fn default_max_duration_minutes() -> f64 {
    120.0
}

const fn default_arrival_epsilon() -> f64 {
    0.1
}

const fn default_flee_distance() -> f64 {
    10.0
}

const fn default_memory_cap() -> usize {
    50
}

const fn default_event_retention() -> usize {
    100
}

const fn default_broadcast_every_ticks() -> u64 {
    1
}

const fn default_subscriber_queue() -> usize {
    64
}

const fn default_position_step() -> f64 {
    0.01
}

const fn default_vital_step() -> f64 {
    0.1
}

const fn default_npcs() -> u32 {
    6
}

const fn default_beasts() -> u32 {
    2
}

const fn default_resource_nodes() -> u32 {
    12
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_decision_subject() -> String {
    "primeval.decide".to_owned()
}

const fn default_observer_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.world.tick_interval_ms, 100);
        assert_eq!(config.decision.max_concurrent, 4);
        assert_eq!(config.broadcast.event_retention, 100);
        assert_eq!(config.decision.retry_interval_ms(), 300_000);
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r"
world:
  seed: 7
  time_scale: 30
decision:
  max_concurrent: 1
  perception_radius: 20
";
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.world.seed, 7);
        assert!((config.world.time_scale - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.decision.max_concurrent, 1);
        assert_eq!(config.decision.min_interval_minutes, 30);
        assert!(config.world.pause_when_unobserved);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = SimulationConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn rejects_inverted_interval_bounds() {
        let yaml = "decision:\n  min_interval_minutes: 90\n  max_interval_minutes: 60\n";
        let result = SimulationConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_unknown_provider() {
        let yaml = "decision:\n  provider: oracle\n";
        assert!(matches!(
            SimulationConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let yaml = "decision:\n  max_concurrent: 0\n";
        assert!(matches!(
            SimulationConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_tiny_tick_interval() {
        let yaml = "world:\n  tick_interval_ms: 5\n";
        assert!(SimulationConfig::parse(yaml).is_err());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("primeval-config.yaml");
        if path.exists() {
            let config = SimulationConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
