// src/lib.rs
pub mod budget;
pub mod config;
pub mod duration;
pub mod enrich;
pub mod error;
pub mod export;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod server;
pub mod store;
pub mod temporal;

mod pipeline_tests;

pub use budget::{BudgetComparison, BudgetStatus};
pub use config::{AmbiguousMatchPolicy, AppConfig, JoinKind, PipelineConfig};
pub use error::PipelineError;
pub use loader::{SourceFile, SourceFormat};
pub use model::{BudgetRecord, FactRow, RosterRecord, TimeEntry};
pub use pipeline::{run, CleaningOptions, PipelineInputs, PipelineResult};
pub use report::{RowWarning, RunReport, WarningKind};
pub use store::ArtifactStore;
pub use temporal::WeekIndex;
