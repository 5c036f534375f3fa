//! Online schema migration engine.
//!
//! Bulk jobs backfill a snapshot of an old-layout store into a new-layout
//! store; tail jobs mirror every later write and delete from the old store's
//! change journal. Both run as supervised jobs on partitioned workers.

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod mapper;
pub mod pipeline;

pub use bootstrap::Engine;
pub use codec::{CompactCodec, FieldTable, TypeRegistry};
pub use config::ShiftConfig;
pub use error::{CodecError, DecodeError, EncodeError, EngineError, MappingError, SchemaError};
pub use job::{DeliveryGuarantee, JobCoordinator, JobHandle, JobOutcome, JobStatus, RestartPolicy};
pub use mapper::{FieldRule, RecordMapper, RuleMapper};
pub use pipeline::{
    Change, JobMetrics, MetricsSnapshot, Migration, Pipeline, PipelineKind, PipelineOptions, RecordErrorPolicy,
    Watermark,
};
