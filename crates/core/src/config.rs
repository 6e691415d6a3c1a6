use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlantwatchError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub detector: DetectorConfig,
    pub stream: StreamConfig,
    pub storage: StorageConfig,
    pub service: ServiceConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PLANTWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PLANTWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            detector: DetectorConfig::from_env_profiled(p),
            stream: StreamConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            service: ServiceConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  detector:  model={}, model_config={}, topology={}, parallel={}",
            self.detector.model_path.display(),
            self.detector.model_config_path.display(),
            self.detector.topology_path.display(),
            self.detector.parallel_detectors
        );
        tracing::info!(
            "  stream:    endpoint={}, topic={}, retry={}s",
            self.stream.endpoint,
            self.stream.topic,
            self.stream.retry_delay_secs
        );
        tracing::info!(
            "  storage:   data_dir={}, alerts={}, audit={}, policy={:?}",
            self.storage.data_dir.display(),
            self.storage.alert_collection,
            self.storage.audit_collection,
            self.storage.write_policy
        );
        tracing::info!(
            "  service:   health_port={}, events={}",
            self.service.health_port,
            self.service.events_endpoint.as_deref().unwrap_or("(none)")
        );
    }
}

// ── Detector ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Exported isolation forest artifact.
    pub model_path: PathBuf,
    /// SPC baselines and score threshold.
    pub model_config_path: PathBuf,
    pub topology_path: PathBuf,
    /// Version label stamped on every audit record.
    pub model_version: String,
    /// Run the three detectors on the rayon pool instead of sequentially.
    pub parallel_detectors: bool,
}

impl DetectorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            model_path: PathBuf::from(profiled_env_or(p, "MODEL_PATH", "models/isolation_forest.json")),
            model_config_path: PathBuf::from(profiled_env_or(p, "MODEL_CONFIG_PATH", "config/model_config.json")),
            topology_path: PathBuf::from(profiled_env_or(p, "TOPO_PATH", "config/plant_topology.json")),
            model_version: profiled_env_or(p, "MODEL_VERSION", "v2.1 (IF+LOF+SPC)"),
            parallel_detectors: profiled_env_bool(p, "PARALLEL_DETECTORS", false),
        }
    }
}

// ── Stream ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// ZeroMQ endpoint of the sensor publisher, e.g. `tcp://127.0.0.1:5560`.
    pub endpoint: String,
    /// Topic prefix to subscribe to.
    pub topic: String,
    /// Fixed delay between reconnect attempts.
    pub retry_delay_secs: u64,
    /// Upper bound on one connect attempt.
    pub connect_timeout_secs: u64,
    /// Treat a silent stream as lost after this long (0 = never).
    pub idle_timeout_secs: u64,
}

impl StreamConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "STREAM_ENDPOINT", "tcp://127.0.0.1:5560"),
            topic: profiled_env_or(p, "STREAM_TOPIC", "plantwatch.sensor.reading"),
            retry_delay_secs: profiled_env_u64(p, "STREAM_RETRY_DELAY_SECS", 5),
            connect_timeout_secs: profiled_env_u64(p, "STREAM_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: profiled_env_u64(p, "STREAM_IDLE_TIMEOUT_SECS", 0),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

// ── Storage ───────────────────────────────────────────────────

/// What a failed store write does to the message that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Log and carry on; the message still counts as processed.
    #[default]
    Swallow,
    /// Fail the message; the loop logs it and moves on.
    Propagate,
}

impl WritePolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "swallow" => Some(Self::Swallow),
            "propagate" => Some(Self::Propagate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub alert_collection: String,
    pub audit_collection: String,
    pub write_timeout_ms: u64,
    pub write_policy: WritePolicy,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let policy = profiled_env_or(p, "STORE_WRITE_POLICY", "swallow");
        let write_policy = WritePolicy::parse(&policy).unwrap_or_else(|| {
            tracing::warn!(value = %policy, "unknown STORE_WRITE_POLICY, using swallow");
            WritePolicy::Swallow
        });
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            alert_collection: profiled_env_or(p, "ALERT_COLLECTION", "anomaly_events"),
            audit_collection: profiled_env_or(p, "AUDIT_COLLECTION", "model_audit_log"),
            write_timeout_ms: profiled_env_u64(p, "STORE_WRITE_TIMEOUT_MS", 2000),
            write_policy,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

// ── Service ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port for `GET /health` and `GET /metrics`.
    pub health_port: u16,
    /// Where to publish health pings and anomaly events, if anywhere.
    pub events_endpoint: Option<String>,
}

impl ServiceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            health_port: profiled_env_u16(p, "HEALTH_PORT", 9108),
            events_endpoint: profiled_env_opt(p, "EVENTS_ENDPOINT"),
        }
    }
}

// ── Model config file ─────────────────────────────────────────

/// Offline-learned mean and standard deviation of one monitored signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std: f64,
}

/// SPC section of the model config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpcBaselines {
    #[serde(default = "default_torque_mean")]
    pub torque_mean: f64,
    #[serde(default = "default_torque_std")]
    pub torque_std: f64,
    #[serde(default = "default_temp_mean")]
    pub temp_mean: f64,
    #[serde(default = "default_temp_std")]
    pub temp_std: f64,
}

fn default_torque_mean() -> f64 {
    100.0
}
fn default_torque_std() -> f64 {
    0.5
}
fn default_temp_mean() -> f64 {
    1580.0
}
fn default_temp_std() -> f64 {
    10.0
}

impl Default for SpcBaselines {
    fn default() -> Self {
        Self {
            torque_mean: default_torque_mean(),
            torque_std: default_torque_std(),
            temp_mean: default_temp_mean(),
            temp_std: default_temp_std(),
        }
    }
}

impl SpcBaselines {
    pub fn torque(&self) -> Baseline {
        Baseline { mean: self.torque_mean, std: self.torque_std }
    }

    pub fn temperature(&self) -> Baseline {
        Baseline { mean: self.temp_mean, std: self.temp_std }
    }
}

/// Static configuration produced by offline training (`model_config.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub spc: SpcBaselines,
    /// Classification threshold of the offline failure model. Carried for
    /// completeness; the streaming detectors do not use it.
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl ModelConfig {
    pub fn from_json(raw: &str) -> Result<Self, PlantwatchError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, PlantwatchError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Load the file or fall back to built-in baselines, logging why.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "loaded model config");
                cfg
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "model config unavailable, using default SPC baselines");
                Self::default()
            }
        }
    }
}
