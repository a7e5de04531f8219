//! Interfaces to the external services the pipeline drives.
//!
//! Concrete HTTP adapters live in the CLI crate. The mocks here are used by
//! unit and integration tests.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Turns a research topic into raw planner text.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, topic: &str) -> Result<String, CollaboratorError>;
}

/// Runs one search query.
///
/// Ordinary failures (no results, rate limits, network trouble) should come
/// back as a bracketed `"[...]"` message; only catastrophic failures return
/// `Err`, which the executor records inline for that item.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short identifier recorded as the item's `tool`.
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<String, CollaboratorError>;
}

/// Stream of text chunks from a generator.
pub type TextStream = BoxStream<'static, Result<String, CollaboratorError>>;

/// Generator output: complete text, or chunks to be aggregated.
pub enum GeneratedText {
    Text(String),
    Stream(TextStream),
}

impl GeneratedText {
    /// Aggregate into the final text. A failed chunk fails the whole response.
    pub async fn into_text(self) -> Result<String, CollaboratorError> {
        match self {
            GeneratedText::Text(text) => Ok(text),
            GeneratedText::Stream(chunks) => {
                chunks
                    .try_fold(String::new(), |mut acc, chunk| async move {
                        acc.push_str(&chunk);
                        Ok(acc)
                    })
                    .await
            }
        }
    }
}

impl std::fmt::Debug for GeneratedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratedText::Text(text) => f.debug_tuple("Text").field(text).finish(),
            GeneratedText::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Writes the report from an assembled prompt.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Model name recorded on the report, if known.
    fn model(&self) -> Option<&str> {
        None
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedText, CollaboratorError>;
}

fn mock_failure(service: &str) -> CollaboratorError {
    CollaboratorError::Connection {
        service: service.to_string(),
        message: "connection refused by https://sk-test-secret@internal.example/v1".to_string(),
    }
}

/// A planner that returns a fixed reply, or always fails.
pub struct MockPlanner {
    reply: Option<String>,
    panics: bool,
    calls: AtomicUsize,
}

impl MockPlanner {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            panics: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails with a connection error whose message contains a fake secret.
    pub fn failing() -> Self {
        Self {
            reply: None,
            panics: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Panics instead of answering.
    pub fn panicking() -> Self {
        Self {
            reply: None,
            panics: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(&self, _topic: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("mock planner crashed");
        }
        self.reply.clone().ok_or_else(|| mock_failure("mock planner"))
    }
}

/// A search provider with per-query latency and failures that records
/// every call and its execution interval.
pub struct MockSearchProvider {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    panics: HashSet<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    intervals: Mutex<Vec<(String, Instant, Instant)>>,
}

impl Default for MockSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self {
            default_delay: Duration::ZERO,
            delays: HashMap::new(),
            failures: HashSet::new(),
            panics: HashSet::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            intervals: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_delay(mut self, query: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(query.into(), delay);
        self
    }

    pub fn failing_on(mut self, query: impl Into<String>) -> Self {
        self.failures.insert(query.into());
        self
    }

    pub fn panicking_on(mut self, query: impl Into<String>) -> Self {
        self.panics.insert(query.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `(query, start, end)` for every search that ran to completion.
    pub fn intervals(&self) -> Vec<(String, Instant, Instant)> {
        self.intervals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn result_for(query: &str) -> String {
        format!("Results for {query}")
    }
}

/// Decrements the in-flight count even when the search future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &str {
        "mock_search"
    }

    async fn search(&self, query: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let start = Instant::now();
        let delay = self
            .delays
            .get(query)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let end = Instant::now();
        self.intervals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((query.to_string(), start, end));

        if self.panics.contains(query) {
            panic!("mock search crashed on {query}");
        }
        if self.failures.contains(query) {
            return Err(mock_failure("mock search"));
        }
        Ok(Self::result_for(query))
    }
}

enum GeneratorScript {
    Text(String),
    Chunks(Vec<String>),
    Fail,
}

/// A report generator with scripted output that records every prompt.
pub struct MockReportGenerator {
    script: GeneratorScript,
    delay: Duration,
    model: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockReportGenerator {
    fn with_script(script: GeneratorScript) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            model: Some("mock-model".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_script(GeneratorScript::Text(text.into()))
    }

    pub fn streaming<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(GeneratorScript::Chunks(
            chunks.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn failing() -> Self {
        Self::with_script(GeneratorScript::Fail)
    }

    /// Wait `delay` before responding.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReportGenerator for MockReportGenerator {
    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedText, CollaboratorError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            GeneratorScript::Text(text) => Ok(GeneratedText::Text(text.clone())),
            GeneratorScript::Chunks(chunks) => {
                let chunks: Vec<Result<String, CollaboratorError>> =
                    chunks.iter().cloned().map(Ok).collect();
                Ok(GeneratedText::Stream(stream::iter(chunks).boxed()))
            }
            GeneratorScript::Fail => Err(mock_failure("mock generator")),
        }
    }
}
