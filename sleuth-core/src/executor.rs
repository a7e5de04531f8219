//! Bounded-concurrency search execution.
//!
//! Every unexecuted item runs as its own task. A task sleeps for the stagger
//! delay, then waits for one of `max_concurrency` semaphore permits, then
//! calls the provider under the per-task timeout. The whole batch is bounded
//! by the overall deadline, after which outstanding tasks are aborted.
//!
//! Results are written back by plan position; progress is reported in
//! completion order.

use crate::collaborators::SearchProvider;
use crate::config::SearchConfig;
use crate::observer::ResearchObserver;
use crate::types::SearchItem;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

/// Result string for a search that exceeded the per-task timeout.
pub fn timeout_marker(query: &str, timeout: Duration) -> String {
    format!(
        "[Search for '{query}' timed out after {:?} seconds]",
        timeout.as_secs_f64()
    )
}

/// Result string for a search cancelled by the overall deadline.
pub fn deadline_marker(query: &str, deadline: Duration) -> String {
    format!(
        "[Search for '{query}' cancelled: overall deadline of {:?} seconds exceeded]",
        deadline.as_secs_f64()
    )
}

/// Result string for a search whose provider call failed.
pub fn error_marker(message: &str) -> String {
    format!("[Search error: {message}]")
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Same length and order as the input.
    pub items: Vec<SearchItem>,
    pub deadline_exceeded: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Items that already had a result and were not searched again.
    pub skipped: usize,
}

enum Outcome {
    Found(String),
    Failed(String),
    TimedOut,
}

/// Runs a search plan against a [`SearchProvider`].
pub struct SearchExecutor {
    provider: Arc<dyn SearchProvider>,
    config: SearchConfig,
}

impl SearchExecutor {
    pub fn new(provider: Arc<dyn SearchProvider>, config: SearchConfig) -> Self {
        Self { provider, config }
    }

    /// Execute every item that has no result yet.
    ///
    /// Never fails: provider errors, timeouts, panics, and the deadline are all
    /// recorded as inline markers on the affected items.
    pub async fn execute(
        &self,
        mut items: Vec<SearchItem>,
        observer: &dyn ResearchObserver,
    ) -> ExecutionReport {
        let total = items.len();
        let pending: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_executed())
            .map(|(index, _)| index)
            .collect();

        let mut report = ExecutionReport {
            items: Vec::new(),
            deadline_exceeded: false,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            cancelled: 0,
            skipped: total - pending.len(),
        };
        if pending.is_empty() {
            report.items = items;
            return report;
        }

        let deadline = tokio::time::Instant::now() + self.config.overall_deadline();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, usize> = HashMap::with_capacity(pending.len());

        debug!(
            pending = pending.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting search batch"
        );

        for &index in &pending {
            let query = self.prepare_query(&mut items[index], observer);
            let handle = tasks.spawn(run_search(
                Arc::clone(&self.provider),
                Arc::clone(&permits),
                query,
                self.config.stagger_delay(),
                self.config.per_task_timeout(),
            ));
            slots.insert(handle.id(), index);
        }

        let mut completed = report.skipped;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(None) => break,
                Ok(Some(joined)) => {
                    if let Some(index) = self.record(joined, &mut slots, &mut items, &mut report) {
                        completed += 1;
                        observer.on_search_complete(index, &items[index].query, completed, total);
                    }
                }
                Err(_) => {
                    report.deadline_exceeded = true;
                    let secs = self.config.overall_deadline().as_secs_f64();
                    warn!(outstanding = slots.len(), deadline_secs = secs, "Search deadline exceeded");
                    observer.on_warning(&format!(
                        "Overall search process timed out after {secs:?} seconds. Some searches may not have completed."
                    ));
                    break;
                }
            }
        }

        // Abort what is left and wait for it, keeping anything that finished in the meantime.
        tasks.abort_all();
        while let Some(joined) = tasks.join_next_with_id().await {
            if let Some(index) = self.record(joined, &mut slots, &mut items, &mut report) {
                completed += 1;
                observer.on_search_complete(index, &items[index].query, completed, total);
            }
        }

        for (_, index) in slots.drain() {
            let item = &mut items[index];
            item.result = Some(deadline_marker(&item.query, self.config.overall_deadline()));
            item.tool = Some(self.provider.name().to_string());
            report.cancelled += 1;
        }

        debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            cancelled = report.cancelled,
            "Search batch finished"
        );
        report.items = items;
        report
    }

    /// Write a finished task's outcome into its item. Returns the item index,
    /// or `None` for tasks that were aborted before producing anything.
    fn record(
        &self,
        joined: Result<(tokio::task::Id, Outcome), JoinError>,
        slots: &mut HashMap<tokio::task::Id, usize>,
        items: &mut [SearchItem],
        report: &mut ExecutionReport,
    ) -> Option<usize> {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(e) if e.is_cancelled() => return None,
            Err(e) => (e.id(), Outcome::Failed(format!("search task panicked: {e}"))),
        };
        let index = slots.remove(&id)?;
        let item = &mut items[index];

        let result = match outcome {
            Outcome::Found(text) => {
                report.succeeded += 1;
                self.truncate_result(&item.query, text)
            }
            Outcome::Failed(message) => {
                report.failed += 1;
                warn!(query = %item.query, error = %message, "Search failed");
                error_marker(&message)
            }
            Outcome::TimedOut => {
                report.timed_out += 1;
                warn!(
                    query = %item.query,
                    timeout_secs = self.config.per_task_timeout().as_secs_f64(),
                    "Search timed out"
                );
                timeout_marker(&item.query, self.config.per_task_timeout())
            }
        };
        item.result = Some(result);
        item.tool = Some(self.provider.name().to_string());
        Some(index)
    }

    /// Truncate an over-long query in place and return the text to search for.
    fn prepare_query(&self, item: &mut SearchItem, observer: &dyn ResearchObserver) -> String {
        let max = self.config.max_query_chars;
        if let Some((cut, _)) = item.query.char_indices().nth(max) {
            let original_len = item.query.chars().count();
            item.query.truncate(cut);
            warn!(original_len, max, "Search query truncated");
            observer.on_warning(&format!(
                "Query truncated due to excessive length: '{}...'",
                item.query
            ));
        }
        item.query.clone()
    }

    fn truncate_result(&self, query: &str, result: String) -> String {
        let max = self.config.max_result_chars;
        match result.char_indices().nth(max) {
            None => result,
            Some((cut, _)) => {
                let original_len = result.chars().count();
                warn!(query, original_len, max, "Search result truncated");
                format!(
                    "{}\n\n[NOTICE: Result truncated due to excessive length. Original length: {original_len} characters]",
                    &result[..cut]
                )
            }
        }
    }
}

async fn run_search(
    provider: Arc<dyn SearchProvider>,
    permits: Arc<Semaphore>,
    query: String,
    stagger: Duration,
    timeout: Duration,
) -> Outcome {
    // Stagger first so a task never holds a permit while it waits.
    if !stagger.is_zero() {
        tokio::time::sleep(stagger).await;
    }
    let Ok(_permit) = permits.acquire().await else {
        return Outcome::Failed("concurrency limiter closed".to_string());
    };
    match tokio::time::timeout(timeout, provider.search(&query)).await {
        Ok(Ok(text)) => Outcome::Found(text),
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(_) => Outcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockSearchProvider;
    use crate::observer::{NoOpObserver, RecordingObserver};
    use std::time::Instant;

    fn config(max_concurrency: usize, per_task_ms: u64, deadline_ms: u64) -> SearchConfig {
        SearchConfig {
            max_concurrency,
            stagger_delay_ms: 0,
            per_task_timeout_ms: per_task_ms,
            overall_deadline_ms: deadline_ms,
            ..SearchConfig::default()
        }
    }

    fn items(queries: &[&str]) -> Vec<SearchItem> {
        queries.iter().map(|q| SearchItem::new(*q)).collect()
    }

    #[tokio::test]
    async fn test_at_most_three_overlap() {
        let provider = Arc::new(MockSearchProvider::new().with_default_delay(Duration::from_millis(50)));
        let executor = SearchExecutor::new(provider.clone(), config(3, 5_000, 10_000));

        let report = executor
            .execute(items(&["a", "b", "c", "d", "e"]), &NoOpObserver)
            .await;

        assert_eq!(report.succeeded, 5);
        assert_eq!(provider.max_in_flight(), 3);

        let intervals = provider.intervals();
        assert_eq!(intervals.len(), 5);
        for (_, start, _) in &intervals {
            let overlapping = intervals
                .iter()
                .filter(|(_, s, e)| s <= start && start < e)
                .count();
            assert!(overlapping <= 3, "{overlapping} searches overlapped");
        }
    }

    #[tokio::test]
    async fn test_single_timeout_among_fast_items() {
        let provider = Arc::new(
            MockSearchProvider::new()
                .with_default_delay(Duration::from_millis(10))
                .with_delay("slow", Duration::from_millis(200)),
        );
        let executor = SearchExecutor::new(provider, config(3, 50, 10_000));

        let report = executor
            .execute(items(&["a", "b", "slow", "c", "d"]), &NoOpObserver)
            .await;

        let timed_out: Vec<&SearchItem> = report
            .items
            .iter()
            .filter(|i| i.result.as_deref().unwrap_or("").contains("timed out"))
            .collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].query, "slow");
        assert_eq!(
            timed_out[0].result.as_deref(),
            Some("[Search for 'slow' timed out after 0.05 seconds]")
        );
        for item in report.items.iter().filter(|i| i.query != "slow") {
            assert_eq!(item.result, Some(MockSearchProvider::result_for(&item.query)));
        }
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.succeeded, 4);
        assert!(!report.deadline_exceeded);
    }

    #[tokio::test]
    async fn test_provider_error_is_isolated() {
        let provider = Arc::new(MockSearchProvider::new().failing_on("b"));
        let executor = SearchExecutor::new(provider, config(3, 5_000, 10_000));

        let report = executor.execute(items(&["a", "b", "c"]), &NoOpObserver).await;

        let b = report.items[1].result.as_deref().unwrap();
        assert!(b.starts_with("[Search error:"), "{b}");
        assert_eq!(report.items[0].result.as_deref(), Some("Results for a"));
        assert_eq!(report.items[2].result.as_deref(), Some("Results for c"));
        assert_eq!(report.failed, 1);
        assert!(report.items.iter().all(|i| i.tool.as_deref() == Some("mock_search")));
    }

    #[test]
    fn test_markers_keep_fractional_seconds() {
        assert_eq!(
            timeout_marker("q", Duration::from_secs(60)),
            "[Search for 'q' timed out after 60.0 seconds]"
        );
        assert_eq!(
            deadline_marker("q", Duration::from_secs(300)),
            "[Search for 'q' cancelled: overall deadline of 300.0 seconds exceeded]"
        );
        assert_eq!(error_marker("boom"), "[Search error: boom]");
    }

    #[tokio::test]
    async fn test_panicking_search_is_isolated() {
        let provider = Arc::new(MockSearchProvider::new().panicking_on("b"));
        let executor = SearchExecutor::new(provider, config(3, 5_000, 10_000));

        let report = executor.execute(items(&["a", "b", "c"]), &NoOpObserver).await;

        let b = report.items[1].result.as_deref().unwrap();
        assert!(b.starts_with("[Search error: search task panicked"), "{b}");
        assert_eq!(report.items[0].result.as_deref(), Some("Results for a"));
        assert_eq!(report.items[2].result.as_deref(), Some("Results for c"));
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.items[1].tool.as_deref(), Some("mock_search"));
    }

    #[tokio::test]
    async fn test_results_map_to_origin_despite_completion_order() {
        let provider = Arc::new(
            MockSearchProvider::new()
                .with_delay("q0", Duration::from_millis(80))
                .with_delay("q1", Duration::from_millis(60))
                .with_delay("q2", Duration::from_millis(40))
                .with_delay("q3", Duration::from_millis(20)),
        );
        let executor = SearchExecutor::new(provider, config(5, 5_000, 10_000));
        let observer = RecordingObserver::new();

        let report = executor
            .execute(items(&["q0", "q1", "q2", "q3", "q4"]), &observer)
            .await;

        for (i, item) in report.items.iter().enumerate() {
            assert_eq!(item.query, format!("q{i}"));
            assert_eq!(item.result, Some(format!("Results for q{i}")));
        }
        assert_eq!(observer.search_completions(), vec![4, 3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn test_deadline_cancels_outstanding() {
        let provider = Arc::new(
            MockSearchProvider::new()
                .with_delay("slow1", Duration::from_secs(2))
                .with_delay("slow2", Duration::from_secs(2)),
        );
        let executor = SearchExecutor::new(provider.clone(), config(3, 10_000, 100));
        let observer = RecordingObserver::new();

        let started = Instant::now();
        let report = executor
            .execute(items(&["fast", "slow1", "slow2"]), &observer)
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(report.deadline_exceeded);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.items[0].result.as_deref(), Some("Results for fast"));
        for item in &report.items[1..] {
            let result = item.result.as_deref().unwrap();
            assert_eq!(
                result,
                format!("[Search for '{}' cancelled: overall deadline of 0.1 seconds exceeded]", item.query)
            );
        }
        assert!(report.items.iter().all(|i| i.tool.as_deref() == Some("mock_search")));
        assert_eq!(observer.warnings().len(), 1);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_query_and_result_truncation() {
        let provider = Arc::new(MockSearchProvider::new());
        let search = SearchConfig {
            max_query_chars: 10,
            max_result_chars: 5,
            ..config(3, 5_000, 10_000)
        };
        let executor = SearchExecutor::new(provider, search);
        let observer = RecordingObserver::new();

        let report = executor
            .execute(items(&["0123456789abcdef"]), &observer)
            .await;

        let item = &report.items[0];
        assert_eq!(item.query, "0123456789");
        // "Results for 0123456789" is 22 characters.
        assert_eq!(
            item.result.as_deref(),
            Some("Resul\n\n[NOTICE: Result truncated due to excessive length. Original length: 22 characters]")
        );
        assert_eq!(observer.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_executed_items_are_skipped() {
        let provider = Arc::new(MockSearchProvider::new());
        let executor = SearchExecutor::new(provider.clone(), config(3, 5_000, 10_000));

        let mut done = SearchItem::new("done");
        done.result = Some("kept".into());
        let report = executor
            .execute(vec![done, SearchItem::new("new")], &NoOpObserver)
            .await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.items[0].result.as_deref(), Some("kept"));
        assert_eq!(report.items[1].result.as_deref(), Some("Results for new"));
    }

    #[tokio::test]
    async fn test_stagger_happens_before_slot() {
        // With one slot and a 30ms stagger, four 10ms searches finish in roughly
        // 30 + 4 * 10ms, not 4 * 40ms.
        let provider = Arc::new(MockSearchProvider::new().with_default_delay(Duration::from_millis(10)));
        let search = SearchConfig {
            stagger_delay_ms: 30,
            ..config(1, 5_000, 10_000)
        };
        let executor = SearchExecutor::new(provider, search);

        let started = Instant::now();
        let report = executor
            .execute(items(&["a", "b", "c", "d"]), &NoOpObserver)
            .await;

        assert_eq!(report.succeeded, 4);
        assert!(started.elapsed() < Duration::from_millis(150));
    }
}
