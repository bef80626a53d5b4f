//! Warden configuration types and loading

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Autonomy level controlling the executor gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Watch and record; every action goes to the approval queue
    Observe,
    /// Propose actions; every action goes to the approval queue
    #[default]
    Suggest,
    /// Execute low-risk actions immediately, queue the rest
    AutoSafe,
    /// Execute low- and medium-risk actions immediately, queue high-risk
    AutoFull,
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observe" => Ok(Self::Observe),
            "suggest" => Ok(Self::Suggest),
            "auto_safe" | "auto-safe" => Ok(Self::AutoSafe),
            "auto_full" | "auto-full" => Ok(Self::AutoFull),
            _ => Err(format!(
                "Unknown autonomy level: {}. Use: observe, suggest, auto_safe, or auto_full",
                s
            )),
        }
    }
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observe => write!(f, "observe"),
            Self::Suggest => write!(f, "suggest"),
            Self::AutoSafe => write!(f, "auto_safe"),
            Self::AutoFull => write!(f, "auto_full"),
        }
    }
}

/// Main warden configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Executor gate mode
    #[serde(rename = "autonomy-level")]
    pub autonomy_level: AutonomyLevel,

    /// Host name used in samples and issues (defaults to the OS hostname)
    #[serde(rename = "host-name")]
    pub host_name: Option<String>,

    /// Base directory for databases, queues, and snapshots
    #[serde(rename = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Webhook for operator notifications (disabled when unset)
    #[serde(rename = "notify-url")]
    pub notify_url: Option<String>,

    /// Trigger loop settings
    pub trigger: TriggerConfig,

    /// Review reasoner settings
    pub review: ReviewConfig,

    /// Context window settings
    pub context: ContextConfig,

    /// Per-tier LLM backends
    pub llm: LlmTiersConfig,

    /// Executor and approval queue settings
    pub executor: ExecutorConfig,

    /// Metric store settings
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, failure to load it is fatal
        if let Some(path) = config_path {
            let config = Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))?;
            config.validate()?;
            return Ok(config);
        }

        // Try project-local config: .warden.yml
        let local_config = PathBuf::from(".warden.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => {
                    config.validate()?;
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/warden/warden.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("warden").join("warden.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        config.validate()?;
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.trigger.interval_s == 0 {
            bail!("trigger.interval-s must be non-zero");
        }
        if self.review.interval_s == 0 {
            bail!("review.interval-s must be non-zero");
        }
        if self.context.budget_tokens < 1024 {
            bail!("context.budget-tokens must be at least 1024");
        }
        if self.metrics.retention_days == 0 {
            bail!("metrics.retention-days must be non-zero");
        }
        Ok(())
    }

    /// Host name from config or the OS
    pub fn host(&self) -> String {
        self.host_name.clone().unwrap_or_else(|| {
            sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
        })
    }

    /// Base data directory, created on demand by callers
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("warden")
        })
    }

    pub fn metrics_db_path(&self) -> PathBuf {
        self.data_dir().join("metrics.db")
    }

    pub fn know_db_path(&self) -> PathBuf {
        self.data_dir().join("know.db")
    }

    pub fn queue_journal_path(&self) -> PathBuf {
        self.data_dir().join("queue.jsonl")
    }

    pub fn queue_snapshot_path(&self) -> PathBuf {
        self.data_dir().join("queue-snapshot.json")
    }

    pub fn context_snapshot_path(&self) -> PathBuf {
        self.data_dir().join("context-snapshot.json")
    }

    pub fn decisions_log_path(&self) -> PathBuf {
        self.data_dir().join("decisions.jsonl")
    }

    pub fn actions_log_path(&self) -> PathBuf {
        self.data_dir().join("actions.jsonl")
    }
}

/// Trigger loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Probe cadence in seconds
    #[serde(rename = "interval-s")]
    pub interval_s: u64,

    /// Events with an already-admitted fingerprint within this window are dropped
    #[serde(rename = "debounce-window-s")]
    pub debounce_window_s: u64,

    /// Enable the small-model log line classifier
    #[serde(rename = "use-trigger-model")]
    pub use_trigger_model: bool,

    /// Max unmatched log lines submitted to the classifier per tick
    #[serde(rename = "classifier-max-lines")]
    pub classifier_max_lines: usize,

    /// Services probed for active state every tick
    #[serde(rename = "critical-services")]
    pub critical_services: Vec<String>,

    /// Metric thresholds
    pub thresholds: ThresholdConfig,

    /// Additional journal pattern rules appended after the built-in set
    #[serde(rename = "log-rules")]
    pub log_rules: Vec<LogRuleConfig>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval_s: 30,
            debounce_window_s: 300,
            use_trigger_model: false,
            classifier_max_lines: 5,
            critical_services: vec![
                "sshd.service".to_string(),
                "systemd-journald.service".to_string(),
            ],
            thresholds: ThresholdConfig::default(),
            log_rules: Vec::new(),
        }
    }
}

/// Metric breach thresholds; a sample fires only when strictly above
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    #[serde(rename = "cpu-pct")]
    pub cpu_pct: f64,
    #[serde(rename = "mem-pct")]
    pub mem_pct: f64,
    #[serde(rename = "disk-pct")]
    pub disk_pct: f64,
    /// Load-1m threshold expressed per core
    #[serde(rename = "load-per-core")]
    pub load_per_core: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_pct: 90.0,
            mem_pct: 90.0,
            disk_pct: 85.0,
            load_per_core: 2.0,
        }
    }
}

/// An operator-supplied journal pattern rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRuleConfig {
    /// Regex matched against each journal line
    pub pattern: String,
    /// Severity assigned on match
    pub severity: String,
    /// Subject template; `$1`..`$9` expand to capture groups
    pub subject: String,
}

/// Review reasoner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review cadence in seconds
    #[serde(rename = "interval-s")]
    pub interval_s: u64,

    /// Escalations for one fingerprint are suppressed within this window
    #[serde(rename = "escalation-cooldown-s")]
    pub escalation_cooldown_s: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            interval_s: 60,
            escalation_cooldown_s: 600,
        }
    }
}

/// Context window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard cap on total window tokens
    #[serde(rename = "budget-tokens")]
    pub budget_tokens: u64,

    /// Entries older than this are summarization candidates
    #[serde(rename = "soft-age-s")]
    pub soft_age_s: u64,

    /// Token target for LLM summaries of old entries
    #[serde(rename = "summary-target-tokens")]
    pub summary_target_tokens: u64,

    /// Window snapshot cadence in minutes
    #[serde(rename = "snapshot-interval-min")]
    pub snapshot_interval_min: u64,

    /// Width of the recent-metrics table in assembled prompts
    #[serde(rename = "metrics-window-min")]
    pub metrics_window_min: i64,

    /// Activity reports older than this are left out of prompts
    #[serde(rename = "activity-fresh-s")]
    pub activity_fresh_s: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: 131_072,
            soft_age_s: 3600,
            summary_target_tokens: 256,
            snapshot_interval_min: 10,
            metrics_window_min: 15,
            activity_fresh_s: 300,
        }
    }
}

/// One LLM tier backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmTierConfig {
    /// Model identifier sent to the backend
    pub model: String,

    /// Chat-completions endpoint base URL
    #[serde(rename = "backend-url")]
    pub backend_url: String,

    /// Request timeout in seconds
    #[serde(rename = "timeout-s")]
    pub timeout_s: u64,

    /// Prompt budget for this tier
    #[serde(rename = "max-context-tokens")]
    pub max_context_tokens: u64,

    /// Completion cap for this tier
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for LlmTierConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5-7b-instruct".to_string(),
            backend_url: "http://127.0.0.1:8080".to_string(),
            timeout_s: 30,
            max_context_tokens: 32_768,
            max_tokens: 2048,
        }
    }
}

/// The three reasoning tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmTiersConfig {
    /// Small model for line classification and summaries
    pub trigger: LlmTierConfig,
    /// Medium model for periodic review
    pub review: LlmTierConfig,
    /// Large model for escalations and chat
    pub meta: LlmTierConfig,
}

impl Default for LlmTiersConfig {
    fn default() -> Self {
        Self {
            trigger: LlmTierConfig {
                model: "qwen2.5-1.5b-instruct".to_string(),
                backend_url: "http://127.0.0.1:8081".to_string(),
                timeout_s: 5,
                max_context_tokens: 8192,
                max_tokens: 256,
            },
            review: LlmTierConfig {
                model: "qwen2.5-7b-instruct".to_string(),
                backend_url: "http://127.0.0.1:8082".to_string(),
                timeout_s: 30,
                max_context_tokens: 32_768,
                max_tokens: 2048,
            },
            meta: LlmTierConfig {
                model: "qwen2.5-72b-instruct".to_string(),
                backend_url: "http://127.0.0.1:8083".to_string(),
                timeout_s: 120,
                max_context_tokens: 131_072,
                max_tokens: 4096,
            },
        }
    }
}

/// Executor and approval queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Services that must never be touched destructively
    #[serde(rename = "protected-services")]
    pub protected_services: Vec<String>,

    /// Per-command execution timeout in seconds
    #[serde(rename = "command-timeout-s")]
    pub command_timeout_s: u64,

    /// Pending-queue depth beyond which auto-execution pauses
    #[serde(rename = "queue-depth-limit")]
    pub queue_depth_limit: usize,

    /// Allow-listed command for cleanup actions
    #[serde(rename = "cleanup-command")]
    pub cleanup_command: String,

    /// Command applied for rebuild actions after a successful dry-run
    #[serde(rename = "rebuild-command")]
    pub rebuild_command: String,

    /// Non-destructive rehearsal run before any rebuild
    #[serde(rename = "rebuild-dry-run-command")]
    pub rebuild_dry_run_command: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            protected_services: vec![
                "sshd".to_string(),
                "systemd-networkd".to_string(),
                "NetworkManager".to_string(),
                "systemd".to_string(),
                "dbus".to_string(),
                "systemd-logind".to_string(),
            ],
            command_timeout_s: 120,
            queue_depth_limit: 25,
            cleanup_command: "journalctl --vacuum-time=14d".to_string(),
            rebuild_command: "nixos-rebuild switch".to_string(),
            rebuild_dry_run_command: "nixos-rebuild dry-build".to_string(),
        }
    }
}

/// Metric store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples older than this are evicted
    #[serde(rename = "retention-days")]
    pub retention_days: i64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.autonomy_level, AutonomyLevel::Suggest);
        assert_eq!(config.trigger.interval_s, 30);
        assert_eq!(config.review.interval_s, 60);
        assert_eq!(config.context.budget_tokens, 131_072);
        assert_eq!(config.executor.command_timeout_s, 120);
        assert!(config.executor.protected_services.contains(&"sshd".to_string()));
        assert!(config.notify_url.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_autonomy_level_parsing() {
        assert_eq!("observe".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::Observe);
        assert_eq!("auto_safe".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::AutoSafe);
        assert_eq!("auto-full".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::AutoFull);
        assert!("yolo".parse::<AutonomyLevel>().is_err());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
autonomy-level: auto_safe
host-name: web1

trigger:
  interval-s: 15
  debounce-window-s: 120
  critical-services:
    - nginx.service
    - postgresql.service

review:
  interval-s: 90

llm:
  review:
    model: llama-3.1-70b
    backend-url: http://gpu-box:8000
    timeout-s: 45

executor:
  queue-depth-limit: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.autonomy_level, AutonomyLevel::AutoSafe);
        assert_eq!(config.host_name.as_deref(), Some("web1"));
        assert_eq!(config.trigger.interval_s, 15);
        assert_eq!(config.trigger.critical_services.len(), 2);
        assert_eq!(config.review.interval_s, 90);
        assert_eq!(config.llm.review.model, "llama-3.1-70b");
        assert_eq!(config.llm.review.timeout_s, 45);
        assert_eq!(config.executor.queue_depth_limit, 10);
        // Defaults for unspecified
        assert_eq!(config.llm.meta.timeout_s, 120);
        assert_eq!(config.trigger.thresholds.disk_pct, 85.0);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
trigger:
  interval-s: 10
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.trigger.interval_s, 10);
        assert_eq!(config.trigger.debounce_window_s, 300);
        assert_eq!(config.autonomy_level, AutonomyLevel::Suggest);
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.trigger.interval_s = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.context.budget_tokens = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_data_paths_derive_from_data_dir() {
        let mut config = Config::default();
        config.data_dir = Some(PathBuf::from("/tmp/warden-test"));

        assert_eq!(config.metrics_db_path(), PathBuf::from("/tmp/warden-test/metrics.db"));
        assert_eq!(config.queue_journal_path(), PathBuf::from("/tmp/warden-test/queue.jsonl"));
        assert_eq!(
            config.context_snapshot_path(),
            PathBuf::from("/tmp/warden-test/context-snapshot.json")
        );
    }
}
