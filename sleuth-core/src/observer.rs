//! Progress events emitted by the pipeline.
//!
//! The orchestrator and executor never print; presentation lives behind
//! [`ResearchObserver`].

use crate::error::Stage;
use std::sync::Mutex;

/// Callback trait for progressive research UI updates.
pub trait ResearchObserver: Send + Sync {
    /// A stage is about to run.
    fn on_stage_start(&self, stage: Stage);
    /// A stage finished and its output was persisted.
    fn on_stage_complete(&self, stage: Stage);
    /// One search finished. Called in completion order; `index` is the item's
    /// position in the plan.
    fn on_search_complete(&self, index: usize, query: &str, completed: usize, total: usize);
    /// Something degraded but the run continues.
    fn on_warning(&self, message: &str);
    /// A stage failed. `message` is already sanitized.
    fn on_error(&self, stage: Stage, message: &str);
}

/// No-op observer for callers that don't need progress.
pub struct NoOpObserver;

impl ResearchObserver for NoOpObserver {
    fn on_stage_start(&self, _stage: Stage) {}
    fn on_stage_complete(&self, _stage: Stage) {}
    fn on_search_complete(&self, _index: usize, _query: &str, _completed: usize, _total: usize) {}
    fn on_warning(&self, _message: &str) {}
    fn on_error(&self, _stage: Stage, _message: &str) {}
}

/// A recorded observer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    StageStart(Stage),
    StageComplete(Stage),
    SearchComplete {
        index: usize,
        query: String,
        completed: usize,
        total: usize,
    },
    Warning(String),
    Error { stage: Stage, message: String },
}

/// An observer that records all events for test assertions.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.lock().clone()
    }

    pub fn errors(&self) -> Vec<(Stage, String)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Error { stage, message } => Some((*stage, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Warning(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Plan indexes of completed searches, in completion order.
    pub fn search_completions(&self) -> Vec<usize> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::SearchComplete { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ObserverEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ObserverEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResearchObserver for RecordingObserver {
    fn on_stage_start(&self, stage: Stage) {
        self.record(ObserverEvent::StageStart(stage));
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.record(ObserverEvent::StageComplete(stage));
    }

    fn on_search_complete(&self, index: usize, query: &str, completed: usize, total: usize) {
        self.record(ObserverEvent::SearchComplete {
            index,
            query: query.to_string(),
            completed,
            total,
        });
    }

    fn on_warning(&self, message: &str) {
        self.record(ObserverEvent::Warning(message.to_string()));
    }

    fn on_error(&self, stage: Stage, message: &str) {
        self.record(ObserverEvent::Error {
            stage,
            message: message.to_string(),
        });
    }
}
