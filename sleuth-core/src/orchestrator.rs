//! Research orchestrator: drives a session through plan, search, and report.
//!
//! Status only moves forward (`planned -> searched -> completed`) and every
//! stage boundary is checkpointed to the [`SessionStore`]. Resuming re-enters
//! at the persisted status, so finished stages are never repeated. A failing
//! stage is reported to the observer with a sanitized message and the run
//! stops, leaving the session resumable.

use crate::collaborators::{Planner, ReportGenerator, SearchProvider};
use crate::config::SleuthConfig;
use crate::error::{Stage, StageError};
use crate::executor::SearchExecutor;
use crate::observer::{NoOpObserver, ResearchObserver};
use crate::parser;
use crate::report;
use crate::store::{self, SessionStore};
use crate::types::{ReportRecord, Session, SessionStatus};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The session reached `completed`.
    Completed(Session),
    /// A stage failed. The session, if one was created, stays at its last
    /// persisted status.
    Stopped {
        session_id: Option<String>,
        stage: Stage,
        message: String,
    },
}

impl RunOutcome {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed(session) => Some(&session.id),
            RunOutcome::Stopped { session_id, .. } => session_id.as_deref(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// Drives the three-stage research pipeline.
pub struct Orchestrator {
    config: SleuthConfig,
    store: SessionStore,
    planner: Arc<dyn Planner>,
    executor: SearchExecutor,
    reporter: Option<Arc<dyn ReportGenerator>>,
    observer: Arc<dyn ResearchObserver>,
}

impl Orchestrator {
    /// Create an orchestrator storing sessions under `config.data_dir`.
    ///
    /// Without a report generator, reports are derived deterministically.
    pub fn new(
        config: SleuthConfig,
        planner: Arc<dyn Planner>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            store: SessionStore::new(config.data_dir.clone()),
            executor: SearchExecutor::new(search, config.search.clone()),
            planner,
            reporter: None,
            observer: Arc::new(NoOpObserver),
            config,
        }
    }

    pub fn with_report_generator(mut self, generator: Arc<dyn ReportGenerator>) -> Self {
        self.reporter = Some(generator);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &SleuthConfig {
        &self.config
    }

    /// Run or resume a research session.
    ///
    /// With no `session_id`, or one that cannot be loaded, a new session is
    /// planned for `query`. A loaded session keeps its persisted query.
    pub async fn run(&self, query: &str, session_id: Option<&str>) -> RunOutcome {
        let mut session = match self.open_session(query, session_id) {
            Ok(session) => session,
            Err(e) => return self.stop(Stage::Planning, session_id.map(str::to_string), e),
        };

        if session.status == SessionStatus::Planned && !session.has_plan() {
            if let Err(e) = guarded(Stage::Planning, self.plan_stage(&mut session)).await {
                return self.stop(Stage::Planning, Some(session.id), e);
            }
        }

        if session.status == SessionStatus::Planned {
            if let Err(e) = guarded(Stage::Searching, self.search_stage(&mut session)).await {
                return self.stop(Stage::Searching, Some(session.id), e);
            }
        } else {
            debug!(session_id = %session.id, "Reusing persisted search results");
        }

        if session.status == SessionStatus::Completed && session.report.is_some() {
            debug!(session_id = %session.id, "Reusing persisted report");
        } else if let Err(e) = guarded(Stage::Reporting, self.report_stage(&mut session)).await {
            return self.stop(Stage::Reporting, Some(session.id), e);
        }

        info!(session_id = %session.id, "Research completed");
        RunOutcome::Completed(session)
    }

    fn open_session(&self, query: &str, session_id: Option<&str>) -> Result<Session, StageError> {
        if let Some(id) = session_id {
            if let Some(session) = self.store.get(id) {
                info!(session_id = id, status = %session.status, "Resuming research session");
                if session.query != query && !query.is_empty() {
                    debug!(session_id = id, "Ignoring new query for an existing session");
                }
                return Ok(session);
            }
            if store::is_valid_id(id) {
                warn!(session_id = id, "Session missing or unreadable, starting it over");
                let session = Session::new(id, query);
                self.store.put(id, &session)?;
                return Ok(session);
            }
            warn!(session_id = id, "Invalid session id, starting a new session");
        }

        let id = self.store.create(query)?;
        info!(session_id = %id, "Started research session");
        Ok(self
            .store
            .get(&id)
            .unwrap_or_else(|| Session::new(id, query)))
    }

    async fn plan_stage(&self, session: &mut Session) -> Result<(), StageError> {
        self.observer.on_stage_start(Stage::Planning);

        let raw = self.planner.plan(&session.query).await?;
        debug!(session_id = %session.id, chars = raw.len(), "Planner responded");

        let parsed = parser::parse_plan(&raw, &session.query, self.config.planner.max_items);
        if parsed.is_fallback() {
            self.observer.on_warning(
                "The search plan could not be parsed; using a generic set of questions.",
            );
        }
        session.search_plan = parsed.record;
        session.touch();
        self.store.put(&session.id, session)?;

        info!(
            session_id = %session.id,
            items = session.search_plan.len(),
            "Search plan saved"
        );
        self.observer.on_stage_complete(Stage::Planning);
        Ok(())
    }

    async fn search_stage(&self, session: &mut Session) -> Result<(), StageError> {
        self.observer.on_stage_start(Stage::Searching);

        let items = session.search_plan.items.clone();
        let outcome = self.executor.execute(items, self.observer.as_ref()).await;
        if outcome.deadline_exceeded {
            warn!(
                session_id = %session.id,
                cancelled = outcome.cancelled,
                "Some searches were cancelled by the overall deadline"
            );
        }

        session.search_plan.items = outcome.items;
        session.advance(SessionStatus::Searched);
        self.store.put(&session.id, session)?;

        info!(
            session_id = %session.id,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            timed_out = outcome.timed_out,
            "Search results saved"
        );
        self.observer.on_stage_complete(Stage::Searching);
        Ok(())
    }

    async fn report_stage(&self, session: &mut Session) -> Result<(), StageError> {
        self.observer.on_stage_start(Stage::Reporting);

        let generator = self
            .reporter
            .as_ref()
            .filter(|_| self.config.report.use_generator);
        let record = match generator {
            Some(generator) => {
                match report::build_prompt(
                    &session.query,
                    &session.search_plan,
                    self.config.report.max_input_chars,
                ) {
                    Some(prompt) => {
                        debug!(
                            session_id = %session.id,
                            results = prompt.result_count,
                            "Sending results to the report writer"
                        );
                        if prompt.truncated {
                            warn!(session_id = %session.id, "Report input truncated");
                        }
                        self.generate_report(generator.as_ref(), &prompt.text).await?
                    }
                    None => {
                        self.observer
                            .on_warning("No search results were found. The report may be limited.");
                        report::deterministic_report(&session.query, &session.search_plan)
                    }
                }
            }
            None => report::deterministic_report(&session.query, &session.search_plan),
        };

        session.report = Some(record);
        session.advance(SessionStatus::Completed);
        session.touch();
        self.store.put(&session.id, session)?;

        info!(session_id = %session.id, "Report saved");
        self.observer.on_stage_complete(Stage::Reporting);
        Ok(())
    }

    async fn generate_report(
        &self,
        generator: &dyn ReportGenerator,
        prompt: &str,
    ) -> Result<ReportRecord, StageError> {
        let timeout_secs = self.config.report.timeout_secs;
        let raw = tokio::time::timeout(self.config.report.timeout(), async {
            generator.generate(prompt).await?.into_text().await
        })
        .await
        .map_err(|_| StageError::Timeout { timeout_secs })??;

        let model = generator
            .model()
            .map(str::to_string)
            .unwrap_or_else(|| self.config.llm.effective_model().to_string());
        let parsed = parser::parse_report(&raw, Some(&model));
        if parsed.is_fallback() {
            self.observer
                .on_warning("The report could not be parsed; saving a fallback report.");
        }
        Ok(parsed.record)
    }

    fn stop(&self, stage: Stage, session_id: Option<String>, error: StageError) -> RunOutcome {
        // Full detail only at debug level; users see the category.
        debug!(%stage, error = ?error, "Stage failed");
        error!(
            %stage,
            category = error.category(),
            session_id = session_id.as_deref().unwrap_or("-"),
            "Research stopped"
        );
        let message = error.sanitized(stage);
        self.observer.on_error(stage, &message);
        RunOutcome::Stopped {
            session_id,
            stage,
            message,
        }
    }
}

/// Run one stage, turning a panic into a stage failure.
async fn guarded<F>(stage: Stage, stage_future: F) -> Result<(), StageError>
where
    F: Future<Output = Result<(), StageError>>,
{
    match AssertUnwindSafe(stage_future).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(StageError::Task {
            message: format!("{stage} panicked"),
        }),
    }
}
