//! Terminal presentation: progress on stderr, results on stdout.

use sleuth_core::error::Stage;
use sleuth_core::observer::ResearchObserver;
use sleuth_core::types::{Session, SessionStatus, SessionSummary};

/// Prints pipeline progress to stderr.
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ResearchObserver for ConsoleObserver {
    fn on_stage_start(&self, stage: Stage) {
        if !self.quiet {
            eprintln!("  > Starting {stage}...");
        }
    }

    fn on_stage_complete(&self, stage: Stage) {
        if !self.quiet {
            eprintln!("  \u{2713} Finished {stage}");
        }
    }

    fn on_search_complete(&self, _index: usize, query: &str, completed: usize, total: usize) {
        if !self.quiet {
            eprintln!("    [{completed}/{total}] {query}");
        }
    }

    fn on_warning(&self, message: &str) {
        eprintln!("  ! {message}");
    }

    fn on_error(&self, _stage: Stage, message: &str) {
        eprintln!("\n  Error: {message}\n");
    }
}

/// Markdown rendering of a session's report, or of its progress so far.
pub fn render_session(session: &Session) -> String {
    let mut out = format!(
        "Session: {}\nQuery:   {}\nStatus:  {}\n",
        session.id, session.query, session.status
    );

    let Some(report) = &session.report else {
        out.push_str(&format!(
            "\nNo report yet ({} of {} searches recorded). Resume with `sleuth resume {}`.\n",
            session
                .search_plan
                .items
                .iter()
                .filter(|i| i.is_executed())
                .count(),
            session.search_plan.len(),
            session.id
        ));
        return out;
    };

    out.push_str(&format!("\n## Summary\n\n{}\n\n", report.summary));
    out.push_str(&report.body);
    out.push('\n');
    if !report.follow_ups.is_empty() {
        out.push_str("\n## Follow-up questions\n\n");
        for question in &report.follow_ups {
            out.push_str(&format!("- {question}\n"));
        }
    }
    if let Some(model) = &report.model {
        out.push_str(&format!("\n_Written by {model}_\n"));
    }
    out
}

/// One line per session, newest first.
pub fn render_list(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No research sessions found.\n".to_string();
    }
    let mut out = String::new();
    for summary in sessions {
        let marker = match summary.status {
            SessionStatus::Completed => "\u{2713}",
            SessionStatus::Searched => "~",
            SessionStatus::Planned => " ",
        };
        out.push_str(&format!(
            "{marker} {}  {:<9}  {} searches  {}  {}\n",
            summary.id,
            summary.status.as_str(),
            summary.item_count,
            summary.created_at.format("%Y-%m-%d %H:%M"),
            summary.query
        ));
    }
    out
}
