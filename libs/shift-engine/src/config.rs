use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use shift_api::{FieldDef, FieldKind, JournalPosition, Schema, Value};

use crate::error::EngineError;
use crate::job::{DeliveryGuarantee, RestartPolicy};
use crate::mapper::FieldRule;
use crate::pipeline::{PipelineKind, PipelineOptions, RecordErrorPolicy};

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShiftConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Record layouts, any number of versions per type identity.
    #[serde(default)]
    pub schemas: Vec<SchemaConfig>,

    /// Keyed stores, created through the store factory.
    #[serde(default)]
    pub stores: Vec<StoreConfig>,

    /// Transforms between two type identities.
    #[serde(default)]
    pub migrations: Vec<MigrationConfig>,

    /// Bulk and tail jobs started at bootstrap.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,

    /// Directory relative seed paths resolve against. Set by `load`.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeConfig {
    /// Partition workers per job.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Capacity of each partition channel.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Restarts per at-least-once job after transient failures.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
}

fn default_parallelism() -> usize {
    4
}

fn default_channel_buffer() -> usize {
    256
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_backoff_ms() -> u64 {
    200
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            channel_buffer: default_channel_buffer(),
            max_restarts: default_max_restarts(),
            restart_backoff_ms: default_restart_backoff_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.max_restarts,
            backoff: Duration::from_millis(self.restart_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaConfig {
    pub type_name: String,
    pub version: u32,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Substituted when the field is absent in a binary.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_required() -> bool {
    true
}

impl SchemaConfig {
    pub fn to_schema(&self) -> Result<Schema, EngineError> {
        let mut schema = Schema::new(&self.type_name, self.version);
        for field in &self.fields {
            let mut def = if field.required {
                FieldDef::required(&field.name, field.kind)
            } else {
                FieldDef::optional(&field.name, field.kind)
            };
            if let Some(json) = &field.default {
                let value = Value::from_json(field.kind, json).map_err(|e| {
                    EngineError::Config(format!(
                        "schema '{}' v{} field '{}': {}",
                        self.type_name, self.version, field.name, e.message
                    ))
                })?;
                if !value.is_null() {
                    def = def.with_default(value);
                }
            }
            schema = schema.field(def);
        }
        Ok(schema)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    /// Store plugin configuration, handed to the factory as JSON.
    #[serde(default)]
    pub config: Option<toml::Value>,
    /// JSON file of `{ "key": ..., "value": { ... } }` records loaded at startup.
    #[serde(default)]
    pub seed: Option<String>,
    /// Type identity the seed records are encoded with.
    #[serde(default)]
    pub seed_type: Option<String>,
}

impl StoreConfig {
    pub fn config_json(&self) -> Result<String, EngineError> {
        config_json_or_empty(self.config.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MigrationConfig {
    pub name: String,
    pub source_type: String,
    pub target_type: String,
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub kind: PipelineKind,
    pub migration: String,
    /// Store read by the job (snapshot for bulk, journal for tail).
    pub source: String,
    /// Store written by the job.
    pub sink: String,
    #[serde(default)]
    pub guarantee: DeliveryGuarantee,
    /// Journal start position (tail jobs only).
    #[serde(default = "default_from")]
    pub from: JournalPosition,
    /// Per-job override of `runtime.parallelism`.
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub on_record_error: RecordErrorPolicy,
}

fn default_from() -> JournalPosition {
    JournalPosition::Earliest
}

impl JobConfig {
    pub fn options(&self, runtime: &RuntimeConfig) -> PipelineOptions {
        PipelineOptions {
            parallelism: self.parallelism.unwrap_or(runtime.parallelism),
            buffer: runtime.channel_buffer,
            on_record_error: self.on_record_error,
        }
    }
}

/// Serialize an optional plugin config table to JSON, `"{}"` when absent.
pub fn config_json_or_empty(config: Option<&toml::Value>) -> Result<String, EngineError> {
    match config {
        Some(value) => serde_json::to_string(value).map_err(|e| EngineError::Config(e.to_string())),
        None => Ok("{}".to_string()),
    }
}

impl ShiftConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        let mut config = Self::parse(&content)?;
        config.base_dir = Path::new(path).parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Resolve a path from the config file against its directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) if Path::new(path).is_relative() => base.join(path),
            _ => PathBuf::from(path),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Name uniqueness and runtime bounds. References between sections are
    /// resolved at bootstrap.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.runtime.parallelism == 0 {
            return Err(EngineError::Config("runtime.parallelism must be > 0".into()));
        }
        if self.runtime.channel_buffer == 0 {
            return Err(EngineError::Config("runtime.channel_buffer must be > 0".into()));
        }
        unique("store", self.stores.iter().map(|s| s.name.as_str()))?;
        unique("migration", self.migrations.iter().map(|m| m.name.as_str()))?;
        unique("job", self.jobs.iter().map(|j| j.name.as_str()))?;
        for job in &self.jobs {
            if job.parallelism == Some(0) {
                return Err(EngineError::Config(format!("job '{}': parallelism must be > 0", job.name)));
            }
        }
        Ok(())
    }
}

fn unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<(), EngineError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(EngineError::Config(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(())
}
