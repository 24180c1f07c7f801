//! Application settings and configuration management

use crate::domain::{Direction, LedgerRule, UserId};
use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub style_presets: Vec<StylePresetConfig>,
}

/// External generation provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Total submission attempts, first try included
    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u32,
    /// Backoff sleeps are `unit * (2^attempt + jitter)`
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_text_to_image_model")]
    pub text_to_image_model: String,
    #[serde(default = "default_background_removal_model")]
    pub background_removal_model: String,
}

fn default_base_url() -> String {
    "https://api.wavespeed.ai/api/v3".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    20000
}

fn default_submit_attempts() -> u32 {
    3
}

fn default_backoff_unit() -> u64 {
    1000
}

fn default_text_to_image_model() -> String {
    "wavespeed-ai/flux-schnell".to_string()
}

fn default_background_removal_model() -> String {
    "wavespeed-ai/image-background-remover".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            submit_attempts: default_submit_attempts(),
            backoff_unit_ms: default_backoff_unit(),
            text_to_image_model: default_text_to_image_model(),
            background_removal_model: default_background_removal_model(),
        }
    }
}

/// Pipeline behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Shared deadline for generation plus background removal
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_jitter")]
    pub poll_jitter_ms: u64,
    #[serde(default = "default_true")]
    pub remove_background_default: bool,
    #[serde(default = "default_output_size")]
    pub output_size: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default = "default_task_retention")]
    pub task_retention_hours: i64,
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    #[serde(default = "default_debit_rule")]
    pub debit_rule: String,
}

fn default_true() -> bool {
    true
}

fn default_max_poll_secs() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    1500
}

fn default_poll_jitter() -> u64 {
    300
}

fn default_output_size() -> String {
    "512*512".to_string()
}

fn default_output_format() -> String {
    "png".to_string()
}

fn default_strength() -> f64 {
    0.8
}

fn default_task_retention() -> i64 {
    24
}

fn default_max_prompt_length() -> usize {
    1000
}

fn default_debit_rule() -> String {
    "GENERATE_STICKER".to_string()
}

impl GenerationConfig {
    pub fn max_poll(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_poll_secs: default_max_poll_secs(),
            poll_interval_ms: default_poll_interval(),
            poll_jitter_ms: default_poll_jitter(),
            remove_background_default: true,
            output_size: default_output_size(),
            output_format: default_output_format(),
            strength: default_strength(),
            task_retention_hours: default_task_retention(),
            max_prompt_length: default_max_prompt_length(),
            debit_rule: default_debit_rule(),
        }
    }
}

/// Stage worker pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerPoolConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_queue_size() -> usize {
    100
}

fn default_shutdown_grace() -> u64 {
    60
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Ledger rule book
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<LedgerRule>,
}

fn default_rules() -> Vec<LedgerRule> {
    let rule = |code: &str, direction, amount| LedgerRule {
        code: code.to_string(),
        direction,
        amount,
        enabled: true,
        description: None,
    };
    vec![
        rule("GENERATE_STICKER", Direction::Debit, 10),
        rule("UPLOAD_STICKERSET", Direction::Credit, 10),
        rule("PUBLISH_STICKERSET", Direction::Credit, 50),
        rule("ADMIN_ADJUSTMENT", Direction::Credit, 0),
    ]
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Audit trail retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_retention")]
    pub retention_days: i64,
}

fn default_audit_retention() -> i64 {
    90
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_audit_retention(),
        }
    }
}

/// Periodic retention sweep
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Local artifact storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: usize,
}

fn default_storage_path() -> String {
    "./data/images".to_string()
}

fn default_url_prefix() -> String {
    "http://localhost:8080/api/images".to_string()
}

fn default_max_artifact_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
            url_prefix: default_url_prefix(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Style preset appended to prompts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StylePresetConfig {
    pub id: i64,
    pub code: String,
    #[serde(default)]
    pub prompt_suffix: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `None` makes the preset global
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("generation.max_poll_secs", 300)?
            .set_default("worker_pool.max_concurrent", 10)?
            .set_default("worker_pool.max_queue_size", 100)?
            // Load from configuration file
            .add_source(
                File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false),
            )
            // Override with environment variables (prefixed with GEN_ORCHESTRATOR_)
            .add_source(
                Environment::with_prefix("GEN_ORCHESTRATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.trim().is_empty() {
            return Err(invalid("provider.api_key is required"));
        }
        if self.provider.submit_attempts == 0 {
            return Err(invalid("provider.submit_attempts must be at least 1"));
        }
        if self.worker_pool.max_concurrent == 0 {
            return Err(invalid("worker_pool.max_concurrent cannot be 0"));
        }
        if self.generation.poll_interval_ms == 0 {
            return Err(invalid("generation.poll_interval_ms cannot be 0"));
        }

        let mut seen = HashSet::new();
        for rule in &self.ledger.rules {
            if !seen.insert(rule.code.as_str()) {
                return Err(invalid(&format!("duplicate ledger rule '{}'", rule.code)));
            }
        }
        if !seen.contains(self.generation.debit_rule.as_str()) {
            return Err(invalid(&format!(
                "generation.debit_rule '{}' is not in the rule book",
                self.generation.debit_rule
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}
