//! # Sleuth Core
//!
//! Core library for the Sleuth research assistant.
//! Provides the resumable research orchestrator, the session store, the
//! tolerant response parser, the bounded-concurrency search executor, and
//! configuration.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod executor;
pub mod observer;
pub mod orchestrator;
pub mod parser;
pub mod persistence;
pub mod report;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use collaborators::{
    GeneratedText, MockPlanner, MockReportGenerator, MockSearchProvider, Planner,
    ReportGenerator, SearchProvider, TextStream,
};
pub use config::{LlmConfig, PlannerConfig, ReportConfig, SearchConfig, SleuthConfig, load_config};
pub use error::{CollaboratorError, ConfigError, Stage, StageError, StoreError};
pub use executor::{ExecutionReport, SearchExecutor};
pub use observer::{NoOpObserver, ObserverEvent, RecordingObserver, ResearchObserver};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use parser::{FALLBACK_INDICATOR, FailureKind, Parsed, Strategy, parse_plan, parse_report};
pub use store::SessionStore;
pub use types::{ReportRecord, SearchItem, SearchPlan, Session, SessionStatus, SessionSummary};
