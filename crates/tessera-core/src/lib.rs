//! tessera-core - Core library for tessera.
//!
//! This crate provides the zone model, the reconciliation engine that merges
//! overlapping detector output into one zone set per page, stage contracts,
//! and the orchestrator that runs contract-checked stage pipelines.
//!
//! # Example
//!
//! ```ignore
//! use tessera_core::{NoText, ReconciliationEngine, ReconcileConfig};
//!
//! let engine = ReconciliationEngine::new(ReconcileConfig::default());
//! let reconciled = engine.reconcile(raw_zones, &NoText)?;
//!
//! let orchestrator = Orchestrator::new(Arc::new(config));
//! let run = orchestrator.run(&document, &stages).await;
//! ```

pub mod config;
pub mod contract;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{
    AdapterSpec, BundlingConfig, DetectionConfig, OrchestratorConfig, RetryPolicy, SinkKind,
    StorageConfig, TesseraConfig,
};
pub use contract::{
    validate, validate_all, validate_payload, FieldRule, FieldSpec, StageContract,
    ValidationResult, Violation,
};
pub use error::{
    AdapterError, AdapterErrorKind, CoreResult, DetectError, DetectResult, ErrorCode,
    GeometryError, TesseraError, ZoneDefect,
};
pub use orchestrator::{Orchestrator, PipelineRun, RunFailure, RunStatus, StageSummary};
pub use reconcile::{
    DistanceCalibration, GeometryPolicy, MergedPair, ReconcileConfig, Reconciled,
    ReconciliationEngine,
};
pub use traits::{
    DetectorAdapter, LabelTextSource, NoText, Stage, StageContext, StageError, StageInput,
    StageOutput, StageReport,
};
pub use types::{
    keys, record, BBox, DocumentInput, PageImage, PageInput, Payload, Record, RoleVocabulary,
    TextLayer, Word, Zone, ZoneId, ZoneKind, ZoneMetadata, ZoneRole, RELATIONSHIP_GRAPH,
};
