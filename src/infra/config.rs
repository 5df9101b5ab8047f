//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The engine knobs can additionally be overridden per deployment with
//! `ROUTE_GUARD_*` environment variables (see `ENV_*` constants).

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const ENV_CONFIRMATION_DELAY_MS: &str = "ROUTE_GUARD_CONFIRMATION_DELAY_MS";
pub const ENV_ALARM_INTERVAL_MS: &str = "ROUTE_GUARD_ALARM_INTERVAL_MS";
pub const ENV_DIRECTION_INTERVAL_MS: &str = "ROUTE_GUARD_DIRECTION_INTERVAL_MS";
pub const ENV_STRIDE_LENGTH_M: &str = "ROUTE_GUARD_STRIDE_LENGTH_M";
pub const ENV_BUFFER_RADIUS_M: &str = "ROUTE_GUARD_BUFFER_RADIUS_M";
pub const ENV_TURN_TOLERANCE_DEG: &str = "ROUTE_GUARD_TURN_TOLERANCE_DEG";

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Prefix of the ingress topics: `{prefix}/{person}/{kind}`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic_prefix: default_topic_prefix(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "walkers".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviationConfig {
    /// How long a person must stay outside every buffer before it is confirmed
    #[serde(default = "default_confirmation_delay_ms")]
    pub confirmation_delay_ms: u64,
    /// Per-session queue depth for location samples
    #[serde(default = "default_session_queue")]
    pub session_queue: usize,
    /// On-route sessions without a sample for this long are stopped (0 keeps them)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for DeviationConfig {
    fn default() -> Self {
        Self {
            confirmation_delay_ms: default_confirmation_delay_ms(),
            session_queue: default_session_queue(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_confirmation_delay_ms() -> u64 {
    5000
}

fn default_session_queue() -> usize {
    64
}

fn default_session_idle_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_cue_interval_ms")]
    pub alarm_interval_ms: u64,
    #[serde(default = "default_cue_interval_ms")]
    pub direction_interval_ms: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            alarm_interval_ms: default_cue_interval_ms(),
            direction_interval_ms: default_cue_interval_ms(),
        }
    }
}

fn default_cue_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuidanceConfig {
    /// Average stride used to turn meters into steps
    #[serde(default = "default_stride_length_m")]
    pub stride_length_m: f64,
    /// Bearing difference (degrees) still reported as straight ahead
    #[serde(default = "default_turn_tolerance_deg")]
    pub turn_tolerance_deg: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            stride_length_m: default_stride_length_m(),
            turn_tolerance_deg: default_turn_tolerance_deg(),
        }
    }
}

fn default_stride_length_m() -> f64 {
    0.6
}

fn default_turn_tolerance_deg() -> f64 {
    15.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Radius applied when a registration carries none
    #[serde(default = "default_radius_m")]
    pub default_radius_m: f64,
    /// Directory for persisted buffer artifacts (empty keeps them in memory)
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            default_radius_m: default_radius_m(),
            store_dir: default_store_dir(),
        }
    }
}

fn default_radius_m() -> f64 {
    9.0
}

fn default_store_dir() -> String {
    "buffers".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for the JSONL event log (empty to disable)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "route-guard.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for caregiver status changes (QoS 1)
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Topic for guidance updates (QoS 0)
    #[serde(default = "default_guidance_topic")]
    pub guidance_topic: String,
    /// Topic for alarm and directional cues (QoS 0)
    #[serde(default = "default_cues_topic")]
    pub cues_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            status_topic: default_status_topic(),
            guidance_topic: default_guidance_topic(),
            cues_topic: default_cues_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_status_topic() -> String {
    "route-guard/status".to_string()
}

fn default_guidance_topic() -> String {
    "route-guard/guidance".to_string()
}

fn default_cues_topic() -> String {
    "route-guard/cues".to_string()
}

fn default_metrics_topic() -> String {
    "route-guard/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier stamped on egress messages
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "route-guard".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub deviation: DeviationConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub guidance: GuidanceConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Knobs read by the deviation engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub confirmation_delay: Duration,
    pub alarm_interval: Duration,
    pub direction_interval: Duration,
    pub stride_length_m: f64,
    pub turn_tolerance_deg: f64,
    pub default_radius_m: f64,
    pub session_queue: usize,
    /// None keeps idle sessions forever
    pub session_idle: Option<Duration>,
    /// Arm a wall-clock confirmation timer; without it only sample timestamps confirm
    pub wall_clock_confirmation: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine_settings()
    }
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic_prefix: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    confirmation_delay_ms: u64,
    session_queue: usize,
    session_idle_secs: u64,
    alarm_interval_ms: u64,
    direction_interval_ms: u64,
    stride_length_m: f64,
    turn_tolerance_deg: f64,
    default_radius_m: f64,
    buffer_store_dir: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
    egress_file: String,
    // MQTT Egress config
    mqtt_egress_enabled: bool,
    mqtt_egress_status_topic: String,
    mqtt_egress_guidance_topic: String,
    mqtt_egress_cues_topic: String,
    mqtt_egress_metrics_topic: String,
    mqtt_egress_metrics_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic_prefix: toml_config.mqtt.topic_prefix,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            confirmation_delay_ms: toml_config.deviation.confirmation_delay_ms,
            session_queue: toml_config.deviation.session_queue.max(1),
            session_idle_secs: toml_config.deviation.session_idle_secs,
            alarm_interval_ms: toml_config.feedback.alarm_interval_ms,
            direction_interval_ms: toml_config.feedback.direction_interval_ms,
            stride_length_m: toml_config.guidance.stride_length_m,
            turn_tolerance_deg: toml_config.guidance.turn_tolerance_deg,
            default_radius_m: toml_config.buffer.default_radius_m,
            buffer_store_dir: toml_config.buffer.store_dir,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
            egress_file: toml_config.egress.file,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_status_topic: toml_config.mqtt_egress.status_topic,
            mqtt_egress_guidance_topic: toml_config.mqtt_egress.guidance_topic,
            mqtt_egress_cues_topic: toml_config.mqtt_egress.cues_topic,
            mqtt_egress_metrics_topic: toml_config.mqtt_egress.metrics_topic,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    /// Load a specific file, falling back to defaults, then apply env overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let mut config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        };
        config.apply_overrides(env::vars());
        config
    }

    /// Apply `ROUTE_GUARD_*` overrides; unparseable values are ignored with a warning
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let applied = match key.as_str() {
                ENV_CONFIRMATION_DELAY_MS => parse_into(&value, &mut self.confirmation_delay_ms),
                ENV_ALARM_INTERVAL_MS => parse_into(&value, &mut self.alarm_interval_ms),
                ENV_DIRECTION_INTERVAL_MS => parse_into(&value, &mut self.direction_interval_ms),
                ENV_STRIDE_LENGTH_M => parse_positive(&value, &mut self.stride_length_m),
                ENV_BUFFER_RADIUS_M => parse_positive(&value, &mut self.default_radius_m),
                ENV_TURN_TOLERANCE_DEG => parse_into(&value, &mut self.turn_tolerance_deg),
                _ => continue,
            };
            if !applied {
                warn!(key = %key, value = %value, "config_override_ignored");
            }
        }
    }

    /// Engine knobs as durations and plain values
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            confirmation_delay: Duration::from_millis(self.confirmation_delay_ms),
            alarm_interval: Duration::from_millis(self.alarm_interval_ms.max(1)),
            direction_interval: Duration::from_millis(self.direction_interval_ms.max(1)),
            stride_length_m: self.stride_length_m,
            turn_tolerance_deg: self.turn_tolerance_deg,
            default_radius_m: self.default_radius_m,
            session_queue: self.session_queue,
            session_idle: (self.session_idle_secs > 0)
                .then(|| Duration::from_secs(self.session_idle_secs)),
            wall_clock_confirmation: true,
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic_prefix(&self) -> &str {
        &self.mqtt_topic_prefix
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn confirmation_delay_ms(&self) -> u64 {
        self.confirmation_delay_ms
    }

    pub fn alarm_interval_ms(&self) -> u64 {
        self.alarm_interval_ms
    }

    pub fn direction_interval_ms(&self) -> u64 {
        self.direction_interval_ms
    }

    pub fn stride_length_m(&self) -> f64 {
        self.stride_length_m
    }

    pub fn turn_tolerance_deg(&self) -> f64 {
        self.turn_tolerance_deg
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    pub fn session_idle_secs(&self) -> u64 {
        self.session_idle_secs
    }

    pub fn buffer_store_dir(&self) -> &str {
        &self.buffer_store_dir
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_status_topic(&self) -> &str {
        &self.mqtt_egress_status_topic
    }

    pub fn mqtt_egress_guidance_topic(&self) -> &str {
        &self.mqtt_egress_guidance_topic
    }

    pub fn mqtt_egress_cues_topic(&self) -> &str {
        &self.mqtt_egress_cues_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    /// Builder method for tests to shorten the confirmation delay
    #[cfg(test)]
    pub fn with_confirmation_delay_ms(mut self, ms: u64) -> Self {
        self.confirmation_delay_ms = ms;
        self
    }

    /// Builder method for tests to shorten both cue intervals
    #[cfg(test)]
    pub fn with_cue_intervals_ms(mut self, alarm_ms: u64, direction_ms: u64) -> Self {
        self.alarm_interval_ms = alarm_ms;
        self.direction_interval_ms = direction_ms;
        self
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.trim().parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

fn parse_positive(value: &str, slot: &mut f64) -> bool {
    match value.trim().parse::<f64>() {
        Ok(v) if v > 0.0 && v.is_finite() => {
            *slot = v;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_topic_prefix(), "walkers");
        assert_eq!(config.confirmation_delay_ms(), 5000);
        assert_eq!(config.alarm_interval_ms(), 2000);
        assert_eq!(config.direction_interval_ms(), 2000);
        assert_eq!(config.stride_length_m(), 0.6);
        assert_eq!(config.turn_tolerance_deg(), 15.0);
        assert_eq!(config.default_radius_m(), 9.0);
        assert_eq!(config.metrics_interval_secs(), 10);
    }

    #[test]
    fn test_engine_settings_from_config() {
        let settings = Config::default().with_confirmation_delay_ms(250).engine_settings();
        assert_eq!(settings.confirmation_delay, Duration::from_millis(250));
        assert_eq!(settings.alarm_interval, Duration::from_millis(2000));
        assert_eq!(settings.session_idle, Some(Duration::from_secs(1800)));
        assert!(settings.wall_clock_confirmation);
        assert_eq!(EngineSettings::default().confirmation_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_idle_keeps_sessions() {
        let toml_config: TomlConfig =
            toml::from_str("[deviation]\nsession_idle_secs = 0\n").unwrap();
        let settings = Config::from_toml(toml_config, "inline".to_string()).engine_settings();
        assert_eq!(settings.session_idle, None);
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            (ENV_CONFIRMATION_DELAY_MS, "3000"),
            (ENV_STRIDE_LENGTH_M, "0.75"),
            (ENV_TURN_TOLERANCE_DEG, " 20 "),
            ("PATH", "/usr/bin"),
        ]));
        assert_eq!(config.confirmation_delay_ms(), 3000);
        assert_eq!(config.stride_length_m(), 0.75);
        assert_eq!(config.turn_tolerance_deg(), 20.0);
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            (ENV_ALARM_INTERVAL_MS, "soon"),
            (ENV_BUFFER_RADIUS_M, "-4"),
            (ENV_STRIDE_LENGTH_M, "0"),
        ]));
        assert_eq!(config.alarm_interval_ms(), 2000);
        assert_eq!(config.default_radius_m(), 9.0);
        assert_eq!(config.stride_length_m(), 0.6);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "route-guard".to_string(),
            "--config".to_string(),
            "config/prod.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["route-guard".to_string(), "--config=config/field.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/field.toml");
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[deviation]
confirmation_delay_ms = 8000

[buffer]
default_radius_m = 12.5
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.confirmation_delay_ms(), 8000);
        assert_eq!(config.default_radius_m(), 12.5);
        assert_eq!(config.session_idle_secs(), 1800);
        assert_eq!(config.alarm_interval_ms(), 2000);
        assert_eq!(config.egress_file(), "route-guard.jsonl");
    }
}
