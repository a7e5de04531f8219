//! Research session data model.
//!
//! A session moves forward through `Planned -> Searched -> Completed` and is
//! persisted as one camelCase JSON document per session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline status of a session. Ordering follows pipeline progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Planned,
    Searched,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Planned => "planned",
            SessionStatus::Searched => "searched",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sub-query of a search plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Name of the search provider that produced `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// `None` means the query has not been executed yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl SearchItem {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            reason: None,
            tool: None,
            result: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_executed(&self) -> bool {
        self.result.is_some()
    }
}

/// Ordered list of sub-queries. Position matters for result mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlan {
    #[serde(alias = "searches")]
    pub items: Vec<SearchItem>,
}

impl SearchPlan {
    pub fn new(items: Vec<SearchItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Results that carry content, in plan order.
    pub fn results(&self) -> impl Iterator<Item = (&SearchItem, &str)> {
        self.items.iter().filter_map(|item| {
            item.result
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .map(|r| (item, r))
        })
    }
}

/// The terminal report of a research run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub summary: String,
    pub body: String,
    #[serde(default)]
    pub follow_ups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A persisted research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Filled from the file name on load; older documents omit it.
    #[serde(default)]
    pub id: String,
    pub query: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub search_plan: SearchPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportRecord>,
}

impl Session {
    /// A fresh session with an empty plan.
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            status: SessionStatus::Planned,
            created_at: Utc::now(),
            updated_at: None,
            search_plan: SearchPlan::default(),
            report: None,
        }
    }

    /// Move to `next` if it is later in the pipeline. Never moves backward.
    ///
    /// Returns whether the status changed.
    pub fn advance(&mut self, next: SessionStatus) -> bool {
        if next > self.status {
            self.status = next;
            self.touch();
            true
        } else {
            false
        }
    }

    /// Whether a plan has been produced. A `Planned` session with no items is
    /// still waiting on the planner.
    pub fn has_plan(&self) -> bool {
        !self.search_plan.is_empty()
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Summary of a session for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub query: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub item_count: usize,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            query: session.query.clone(),
            status: session.status,
            created_at: session.created_at,
            item_count: session.search_plan.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_moves_backward() {
        let mut session = Session::new("id", "What is X?");
        assert_eq!(session.status, SessionStatus::Planned);

        assert!(session.advance(SessionStatus::Completed));
        assert!(!session.advance(SessionStatus::Searched));
        assert!(!session.advance(SessionStatus::Planned));
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Searched).unwrap();
        assert_eq!(json, "\"searched\"");
        let parsed: SessionStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, SessionStatus::Completed);
        assert!(serde_json::from_str::<SessionStatus>("\"paused\"").is_err());
    }

    #[test]
    fn test_session_document_shape() {
        let mut session = Session::new("20250101120000_x", "x");
        session.search_plan = SearchPlan::new(vec![SearchItem::new("q1")]);
        let value = serde_json::to_value(&session).unwrap();

        assert_eq!(value["query"], "x");
        assert_eq!(value["status"], "planned");
        assert!(value["createdAt"].is_string());
        assert_eq!(value["searchPlan"]["items"][0]["query"], "q1");
        assert!(value.get("report").is_none());
        assert!(value["searchPlan"]["items"][0].get("result").is_none());
    }

    #[test]
    fn test_plan_accepts_searches_alias() {
        let plan: SearchPlan =
            serde_json::from_str(r#"{"searches": [{"query": "a", "result": "r"}]}"#).unwrap();
        assert_eq!(plan.items[0].query, "a");
        assert!(plan.items[0].is_executed());
    }

    #[test]
    fn test_results_skip_blank() {
        let mut a = SearchItem::new("a");
        a.result = Some("found".into());
        let mut b = SearchItem::new("b");
        b.result = Some("   ".into());
        let plan = SearchPlan::new(vec![a, b, SearchItem::new("c")]);

        let results: Vec<_> = plan.results().map(|(i, r)| (i.query.as_str(), r)).collect();
        assert_eq!(results, vec![("a", "found")]);
    }
}
