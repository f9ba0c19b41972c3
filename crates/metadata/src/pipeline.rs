use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::MetadataError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Nats,
    Memory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Memory,
    Parquet,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    Memory,
    Local,
}

/// Payload compression applied by the producer before handoff to the bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Zstd,
}

/// How the producer picks a partition key when the caller does not supply one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Key by job identifier
    #[default]
    Job,
    /// Key by the first instrument (or account) referenced in the message, so all
    /// messages about one entity stay ordered
    Instrument,
    /// Spread messages over a fixed number of keys for throughput
    RoundRobin,
}

/// Authentication handle for the bus. Secrets are referenced, never inlined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Token {
        /// Environment variable holding the token
        token_env: String,
    },
    UserPassword {
        user: String,
        /// Environment variable holding the password
        password_env: String,
    },
    CredentialsFile {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub url: Option<String>,
    /// Topic that analysis messages are published to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// NATS JetStream stream name (defaults to the upper-cased topic)
    pub stream: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl BusConfig {
    /// JetStream stream backing the topic
    pub fn stream_name(&self) -> String {
        self.stream
            .clone()
            .unwrap_or_else(|| self.topic.replace(['-', '.'], "_").to_uppercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_true")]
    pub batching_enabled: bool,
    #[serde(default = "default_batch_max_messages")]
    pub batch_max_messages: usize,
    #[serde(default = "default_batch_max_delay_ms")]
    pub batch_max_delay_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    #[serde(default = "default_round_robin_partitions")]
    pub round_robin_partitions: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            batching_enabled: true,
            batch_max_messages: default_batch_max_messages(),
            batch_max_delay_ms: default_batch_max_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            max_pending_messages: default_max_pending_messages(),
            key_strategy: KeyStrategy::default(),
            round_robin_partitions: default_round_robin_partitions(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Durable subscription name; also the checkpoint key
    pub id: String,
    /// Only consume messages published under this partition key
    #[serde(default)]
    pub partition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<SubscriptionSpec>,
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,
    #[serde(default = "default_max_linger_ms")]
    pub max_linger_ms: u64,
    #[serde(default)]
    pub commit_retry: RetryConfig,
    #[serde(default)]
    pub transport_retry: RetryConfig,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            subscriptions: default_subscriptions(),
            max_batch_items: default_max_batch_items(),
            max_linger_ms: default_max_linger_ms(),
            commit_retry: RetryConfig::default(),
            transport_retry: RetryConfig::default(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(rename = "type")]
    pub table_type: TableType,
    pub path: Option<PathBuf>,
    #[serde(default = "default_table_id")]
    pub table_id: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_type: TableType::Memory,
            path: None,
            table_id: default_table_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    pub path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_type: CheckpointType::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuarantineConfig {
    /// Directory for quarantine JSONL files; in-memory when unset
    pub path: Option<PathBuf>,
}

/// Defaults used when generating sample instrument references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefaults {
    pub currency: String,
    pub company: String,
    pub account_side: String,
    pub discount_curve: String,
    pub portfolio_prefix: String,
    pub instrument_type: String,
    pub day_count: String,
}

impl Default for InstrumentDefaults {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            company: "Financial Corp".to_string(),
            account_side: "Asset".to_string(),
            discount_curve: "TreasuryYield".to_string(),
            portfolio_prefix: "CORPORATE_BONDS".to_string(),
            instrument_type: "Bond".to_string(),
            day_count: "30/360".to_string(),
        }
    }
}

/// Defaults used when generating sample risk metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDefaults {
    pub scenario_identifier: String,
    pub model_name: String,
    pub model_output: String,
    /// Loss given default
    pub default_lgd: f64,
    /// Probability of default
    pub default_pd: f64,
    pub risk_weight: f64,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            scenario_identifier: "Base".to_string(),
            model_name: "Standard Risk Model".to_string(),
            model_output: "Risk Assessment".to_string(),
            default_lgd: 0.45,
            default_pd: 0.012,
            risk_weight: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SampleConfig {
    #[serde(default)]
    pub instrument: InstrumentDefaults,
    #[serde(default)]
    pub risk: RiskDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub bus: BusConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    #[serde(default)]
    pub samples: SampleConfig,
}

/// Default topic name
pub const DEFAULT_TOPIC: &str = "financial-messages";
/// Default producer/consumer batch size
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Minimum allowed batch size
pub const MIN_BATCH_SIZE: usize = 1;
/// Maximum allowed batch size
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Default retry attempts for transient failures
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
/// Default initial retry delay in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;
/// Default ceiling for exponential backoff in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_batch_max_messages() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_max_delay_ms() -> u64 {
    100
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

fn default_max_pending_messages() -> usize {
    1000
}

fn default_round_robin_partitions() -> usize {
    8
}

fn default_subscriptions() -> Vec<SubscriptionSpec> {
    vec![SubscriptionSpec {
        id: "financial-analysis-ingest".to_string(),
        partition: None,
    }]
}

fn default_max_batch_items() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_linger_ms() -> u64 {
    5_000
}

fn default_stats_interval_secs() -> u64 {
    30
}

fn default_table_id() -> String {
    "financial_analysis".to_string()
}

fn clamp_batch(value: &mut usize, clamped: &mut bool) {
    if *value < MIN_BATCH_SIZE {
        *value = MIN_BATCH_SIZE;
        *clamped = true;
    } else if *value > MAX_BATCH_SIZE {
        *value = MAX_BATCH_SIZE;
        *clamped = true;
    }
}

fn clamp_retry(retry: &mut RetryConfig, clamped: &mut bool) {
    if retry.attempts == 0 {
        retry.attempts = 1;
        *clamped = true;
    }
    if retry.max_delay_ms < retry.delay_ms {
        retry.max_delay_ms = retry.delay_ms;
        *clamped = true;
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// In-memory development preset: memory bus, memory table, memory checkpoints.
    pub fn dev() -> Self {
        Self {
            name: "dev".to_string(),
            log_level: default_log_level(),
            bus: BusConfig {
                transport_type: TransportType::Memory,
                url: None,
                topic: default_topic(),
                stream: None,
                auth: AuthConfig::None,
            },
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            table: TableConfig::default(),
            checkpoint: CheckpointConfig::default(),
            quarantine: QuarantineConfig::default(),
            samples: SampleConfig::default(),
        }
    }

    /// Override the bus endpoint and topic from `FINSTREAM_BUS_URL` / `FINSTREAM_TOPIC`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FINSTREAM_BUS_URL") {
            self.bus.url = Some(url);
        }
        if let Ok(topic) = std::env::var("FINSTREAM_TOPIC") {
            self.bus.topic = topic;
        }
    }

    /// Validate the configuration, clamping batch sizes and retry knobs to valid
    /// ranges. Returns the validated config and whether anything was clamped.
    pub fn validated(mut self) -> Result<(Self, bool), MetadataError> {
        if self.bus.topic.trim().is_empty() {
            return Err(MetadataError::Validation("bus.topic must not be empty".into()));
        }
        if self.bus.transport_type == TransportType::Nats && self.bus.url.is_none() {
            return Err(MetadataError::Validation("bus.url is required for nats".into()));
        }
        if self.table.table_type == TableType::Parquet && self.table.path.is_none() {
            return Err(MetadataError::Validation("table.path is required for parquet".into()));
        }
        if self.checkpoint.checkpoint_type == CheckpointType::Local && self.checkpoint.path.is_none() {
            return Err(MetadataError::Validation(
                "checkpoint.path is required for local checkpoints".into(),
            ));
        }

        let mut seen = HashSet::new();
        for sub in &self.consumer.subscriptions {
            if sub.id.trim().is_empty() {
                return Err(MetadataError::Validation("subscription id must not be empty".into()));
            }
            if !seen.insert(sub.id.as_str()) {
                return Err(MetadataError::Validation(format!(
                    "duplicate subscription id: {}",
                    sub.id
                )));
            }
        }

        let mut clamped = false;
        clamp_batch(&mut self.producer.batch_max_messages, &mut clamped);
        clamp_batch(&mut self.consumer.max_batch_items, &mut clamped);
        if self.producer.max_pending_messages < self.producer.batch_max_messages {
            self.producer.max_pending_messages = self.producer.batch_max_messages;
            clamped = true;
        }
        if self.producer.round_robin_partitions == 0 {
            self.producer.round_robin_partitions = 1;
            clamped = true;
        }
        clamp_retry(&mut self.producer.retry, &mut clamped);
        clamp_retry(&mut self.consumer.commit_retry, &mut clamped);
        clamp_retry(&mut self.consumer.transport_retry, &mut clamped);

        Ok((self, clamped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_pipeline_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name: analytics-prod
log_level: warn
bus:
  type: nats
  url: nats://localhost:4222
  topic: financial-messages
  auth:
    type: token
    token_env: FINSTREAM_TOKEN
producer:
  compression: zstd
  batch_max_messages: 50
  key_strategy: instrument
  retry:
    attempts: 3
consumer:
  subscriptions:
    - id: lakehouse-a
      partition: Bond_1
    - id: lakehouse-b
  max_batch_items: 250
  max_linger_ms: 1000
table:
  type: parquet
  path: /data/finstream/tables
checkpoint:
  type: local
  path: /data/finstream/checkpoints
"#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "analytics-prod");
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.bus.transport_type, TransportType::Nats);
        assert_eq!(
            config.bus.auth,
            AuthConfig::Token {
                token_env: "FINSTREAM_TOKEN".to_string()
            }
        );
        assert_eq!(config.producer.compression, Compression::Zstd);
        assert_eq!(config.producer.key_strategy, KeyStrategy::Instrument);
        assert_eq!(config.producer.retry.attempts, 3);
        assert_eq!(config.producer.retry.delay_ms, DEFAULT_RETRY_DELAY_MS);
        assert_eq!(config.consumer.subscriptions.len(), 2);
        assert_eq!(config.consumer.subscriptions[0].partition.as_deref(), Some("Bond_1"));
        assert_eq!(config.consumer.max_batch_items, 250);
        assert_eq!(config.table.table_type, TableType::Parquet);
        assert_eq!(config.table.table_id, "financial_analysis");
        assert_eq!(config.checkpoint.checkpoint_type, CheckpointType::Local);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let yaml = r#"
name: dev
bus:
  type: memory
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bus.topic, DEFAULT_TOPIC);
        assert_eq!(config.bus.auth, AuthConfig::None);
        assert!(config.producer.batching_enabled);
        assert_eq!(config.producer.compression, Compression::Gzip);
        assert_eq!(config.consumer.subscriptions.len(), 1);
        assert_eq!(config.consumer.max_linger_ms, 5_000);
        assert_eq!(config.table.table_type, TableType::Memory);
        assert_eq!(config.samples.risk.default_lgd, 0.45);
    }

    #[test]
    fn test_stream_name_defaults_from_topic() {
        let config = PipelineConfig::dev();
        assert_eq!(config.bus.stream_name(), "FINANCIAL_MESSAGES");
    }

    #[test]
    fn test_validation_clamps_batch_sizes() {
        let mut config = PipelineConfig::dev();
        config.producer.batch_max_messages = 0;
        config.consumer.max_batch_items = 1_000_000;
        config.consumer.commit_retry.attempts = 0;

        let (validated, clamped) = config.validated().unwrap();
        assert!(clamped);
        assert_eq!(validated.producer.batch_max_messages, MIN_BATCH_SIZE);
        assert_eq!(validated.consumer.max_batch_items, MAX_BATCH_SIZE);
        assert_eq!(validated.consumer.commit_retry.attempts, 1);
    }

    #[test]
    fn test_validation_keeps_valid_config() {
        let (_, clamped) = PipelineConfig::dev().validated().unwrap();
        assert!(!clamped);
    }

    #[test]
    fn test_validation_rejects_nats_without_url() {
        let mut config = PipelineConfig::dev();
        config.bus.transport_type = TransportType::Nats;
        assert!(matches!(config.validated(), Err(MetadataError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_duplicate_subscriptions() {
        let mut config = PipelineConfig::dev();
        config.consumer.subscriptions.push(config.consumer.subscriptions[0].clone());
        assert!(matches!(config.validated(), Err(MetadataError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_parquet_without_path() {
        let mut config = PipelineConfig::dev();
        config.table.table_type = TableType::Parquet;
        assert!(config.validated().is_err());
    }
}
