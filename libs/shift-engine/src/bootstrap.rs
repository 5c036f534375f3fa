use std::collections::HashMap;
use std::sync::Arc;

use shift_api::{Record, RecordKey, StoreFactory, StoreHandle};

use crate::codec::{CompactCodec, TypeRegistry};
use crate::config::{ShiftConfig, StoreConfig};
use crate::error::{CodecError, EngineError};
use crate::job::{JobCoordinator, JobHandle, JobOutcome};
use crate::mapper::RuleMapper;
use crate::pipeline::{Migration, Pipeline, PipelineKind};

/// One line of a seed file.
#[derive(Debug, serde::Deserialize)]
struct SeedRecord {
    key: RecordKey,
    value: serde_json::Value,
}

/// The running engine: type registry, stores and job handles.
pub struct Engine {
    registry: Arc<TypeRegistry>,
    stores: HashMap<String, StoreHandle>,
    coordinator: JobCoordinator,
    jobs: Vec<JobHandle>,
    config: ShiftConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("jobs", &self.jobs)
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Bootstrap the engine from a parsed configuration.
    ///
    /// Registers schemas, creates and seeds stores, compiles migrations and
    /// submits every configured job.
    pub async fn bootstrap(config: ShiftConfig, factory: &dyn StoreFactory) -> Result<Self, EngineError> {
        // --- 1. Schemas ---
        let mut registry = TypeRegistry::new();
        for schema_cfg in &config.schemas {
            let ctx = format!("schema '{}' v{}", schema_cfg.type_name, schema_cfg.version);
            let schema = schema_cfg.to_schema().map_err(|e| e.with_context(&ctx))?;
            registry.register(schema).map_err(CodecError::from)?;
        }
        let mut types: Vec<&str> = registry.type_names().collect();
        types.sort_unstable();
        tracing::info!(?types, "registered schemas");
        let registry = Arc::new(registry);

        // --- 2. Stores ---
        let mut stores = HashMap::new();
        for store_cfg in &config.stores {
            let ctx = format!("store '{}'", store_cfg.name);
            let handle = factory
                .create(&store_cfg.name, &store_cfg.config_json()?)
                .map_err(|e| EngineError::Store(e.with_context(&ctx)))?;
            if store_cfg.seed.is_some() {
                let seeded = seed_store(&config, store_cfg, &handle, &registry)
                    .await
                    .map_err(|e| e.with_context(&ctx))?;
                tracing::info!(store = %store_cfg.name, records = seeded, "seeded store");
            }
            tracing::info!(store = %store_cfg.name, journal = handle.journal.is_some(), "created store");
            stores.insert(store_cfg.name.clone(), handle);
        }

        // --- 3. Migrations ---
        let mut migrations = HashMap::new();
        for mig_cfg in &config.migrations {
            let ctx = format!("migration '{}'", mig_cfg.name);
            let source = registry.schema(&mig_cfg.source_type).map_err(EngineError::from)?;
            let target = registry.schema(&mig_cfg.target_type).map_err(EngineError::from)?;
            let mapper = RuleMapper::new(&mig_cfg.rules, source, target).map_err(|e| e.with_context(&ctx))?;
            let migration = Migration::from_registry(
                &mig_cfg.name,
                &registry,
                &mig_cfg.source_type,
                &mig_cfg.target_type,
                Arc::new(mapper),
            )?;
            tracing::info!(
                migration = %mig_cfg.name,
                source = %mig_cfg.source_type,
                target = %mig_cfg.target_type,
                rules = mig_cfg.rules.len(),
                "compiled migration"
            );
            migrations.insert(mig_cfg.name.clone(), Arc::new(migration));
        }

        // --- 4. Jobs ---
        let coordinator = JobCoordinator::new(config.runtime.restart_policy());
        let mut jobs = Vec::with_capacity(config.jobs.len());
        for job_cfg in &config.jobs {
            let ctx = format!("job '{}'", job_cfg.name);
            let migration = migrations
                .get(&job_cfg.migration)
                .cloned()
                .ok_or_else(|| EngineError::Config(format!("{ctx}: unknown migration '{}'", job_cfg.migration)))?;
            let source = lookup(&stores, &job_cfg.source).map_err(|e| e.with_context(&ctx))?;
            let sink = lookup(&stores, &job_cfg.sink).map_err(|e| e.with_context(&ctx))?;

            let pipeline = match job_cfg.kind {
                PipelineKind::Bulk => Pipeline::bulk(source.store.clone(), migration, sink.store.clone()),
                PipelineKind::Tail => {
                    let journal = source.journal.clone().ok_or_else(|| {
                        EngineError::Config(format!("{ctx}: store '{}' keeps no journal", job_cfg.source))
                    })?;
                    Pipeline::tail(journal, job_cfg.from, migration, sink.store.clone())
                }
            }
            .with_options(job_cfg.options(&config.runtime));

            jobs.push(coordinator.submit(pipeline, &job_cfg.name, job_cfg.guarantee));
        }

        Ok(Engine {
            registry,
            stores,
            coordinator,
            jobs,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    pub fn store(&self, name: &str) -> Option<&StoreHandle> {
        self.stores.get(name)
    }

    pub fn jobs(&self) -> &[JobHandle] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&JobHandle> {
        self.jobs.iter().find(|j| j.name() == name)
    }

    pub fn config(&self) -> &ShiftConfig {
        &self.config
    }

    /// Join every bulk job. Fails with the first job error.
    pub async fn wait_bulk(&self) -> Result<(), EngineError> {
        let mut first_err = None;
        for job in self.jobs.iter().filter(|j| j.kind() == PipelineKind::Bulk) {
            match job.join().await {
                Ok(outcome) => {
                    tracing::info!(job = %job.name(), ?outcome, metrics = ?job.metrics(), "bulk job finished")
                }
                Err(e) => {
                    tracing::error!(job = %job.name(), error = %e, "bulk job failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Cancel every job and wait for all of them.
    pub async fn shutdown(&self) {
        for job in &self.jobs {
            job.cancel();
        }
        for job in &self.jobs {
            match job.join().await {
                Ok(JobOutcome::Completed) | Ok(JobOutcome::Cancelled) => {}
                Err(e) => tracing::warn!(job = %job.name(), error = %e, "job ended with error"),
            }
        }
        tracing::info!("engine shut down");
    }

    /// Decode every record of `store` as JSON, ordered by key.
    ///
    /// Each binary is decoded with the latest registered version of the type
    /// identity it carries.
    pub async fn dump(&self, store: &str) -> Result<Vec<serde_json::Value>, EngineError> {
        let handle = lookup(&self.stores, store)?;
        let mut entries = handle
            .store
            .scan()
            .await
            .map_err(|e| EngineError::Store(e.with_context(format!("dump '{store}'"))))?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let table = CompactCodec::inspect(&entry.value).map_err(|source| CodecError::Decode {
                type_name: "<unknown>".into(),
                source,
            })?;
            let record = self
                .registry
                .codec(&table.type_name)?
                .resolve(&table)
                .map_err(|source| CodecError::Decode {
                    type_name: table.type_name.clone(),
                    source,
                })?;
            out.push(serde_json::json!({
                "key": entry.key,
                "type": table.type_name,
                "value": record.to_json(),
            }));
        }
        Ok(out)
    }
}

fn lookup<'a>(stores: &'a HashMap<String, StoreHandle>, name: &str) -> Result<&'a StoreHandle, EngineError> {
    stores
        .get(name)
        .ok_or_else(|| EngineError::StoreNotFound(name.to_string()))
}

/// Load a store's seed file. Returns the number of records written.
async fn seed_store(
    config: &ShiftConfig,
    store_cfg: &StoreConfig,
    handle: &StoreHandle,
    registry: &TypeRegistry,
) -> Result<usize, EngineError> {
    let Some(seed) = &store_cfg.seed else {
        return Ok(0);
    };
    let type_name = store_cfg
        .seed_type
        .as_deref()
        .ok_or_else(|| EngineError::Config("seed requires seed_type".into()))?;
    let schema = registry.schema(type_name)?;

    let path = config.resolve_path(seed);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| EngineError::from(e).with_context(path.display()))?;
    let records: Vec<SeedRecord> = serde_json::from_str(&content)
        .map_err(|e| EngineError::Config(format!("seed {}: {e}", path.display())))?;

    let count = records.len();
    for seed in records {
        let record = Record::from_json(schema, &seed.value)
            .map_err(|e| EngineError::Config(format!("seed key {}: {}", seed.key, e.message)))?;
        let bytes = registry.encode(type_name, &record)?;
        handle
            .store
            .put(seed.key, bytes)
            .await
            .map_err(EngineError::Store)?;
    }
    Ok(count)
}
