//! Report inputs and the deterministic report.

use crate::parser::GENERIC_FOLLOW_UPS;
use crate::types::{ReportRecord, SearchPlan};

/// Text sent to the report generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPrompt {
    pub text: String,
    /// Number of search results included.
    pub result_count: usize,
    /// Whether the results section was cut to fit the input limit.
    pub truncated: bool,
}

/// Assemble the generator prompt from the plan's non-blank results.
///
/// The results section is cut to `max_input_chars` characters. Returns
/// `None` when there is nothing to report on.
pub fn build_prompt(query: &str, plan: &SearchPlan, max_input_chars: usize) -> Option<ReportPrompt> {
    let results: Vec<&str> = plan.results().map(|(_, result)| result).collect();
    if results.is_empty() {
        return None;
    }

    let mut formatted = results
        .iter()
        .enumerate()
        .map(|(i, result)| format!("Search Result {}:\n{}", i + 1, result))
        .collect::<Vec<_>>()
        .join("\n\n");

    let truncated = match formatted.char_indices().nth(max_input_chars) {
        Some((cut, _)) => {
            formatted.truncate(cut);
            formatted.push_str(&format!(
                "\n\n[Search results truncated to {max_input_chars} characters]"
            ));
            true
        }
        None => false,
    };

    Some(ReportPrompt {
        text: format!(
            "Original query: {query}\n\nNumber of search results: {}\n\nSummarized search results:\n{formatted}",
            results.len()
        ),
        result_count: results.len(),
        truncated,
    })
}

/// A report derived from the query and plan alone, without a generator.
pub fn deterministic_report(query: &str, plan: &SearchPlan) -> ReportRecord {
    let title = format!("Research Results for '{query}'");
    let mut body = format!("# {title}\n\n");

    if plan.results().next().is_none() {
        body.push_str("No search results were available for this query.\n\n");
    }

    for (i, item) in plan.items.iter().enumerate() {
        body.push_str(&format!("## {}. {}\n\n", i + 1, item.query));
        if let Some(reason) = &item.reason {
            body.push_str(&format!("_Reason: {reason}_\n\n"));
        }
        match item.result.as_deref().map(str::trim) {
            Some(result) if !result.is_empty() => {
                body.push_str(result);
                body.push_str("\n\n");
            }
            _ => body.push_str("_No result was recorded for this search._\n\n"),
        }
    }

    ReportRecord {
        summary: title,
        body: body.trim_end().to_string(),
        follow_ups: GENERIC_FOLLOW_UPS.iter().map(|s| s.to_string()).collect(),
        model: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchItem;
    use pretty_assertions::assert_eq;

    fn plan(entries: &[(&str, Option<&str>)]) -> SearchPlan {
        SearchPlan::new(
            entries
                .iter()
                .map(|(query, result)| {
                    let mut item = SearchItem::new(*query);
                    item.result = result.map(str::to_string);
                    item
                })
                .collect(),
        )
    }

    #[test]
    fn test_prompt_skips_blank_results() {
        let plan = plan(&[("a", Some("alpha")), ("b", Some("  ")), ("c", None), ("d", Some("delta"))]);
        let prompt = build_prompt("letters", &plan, 8_000).unwrap();

        assert_eq!(
            prompt.text,
            "Original query: letters\n\nNumber of search results: 2\n\nSummarized search results:\nSearch Result 1:\nalpha\n\nSearch Result 2:\ndelta"
        );
        assert_eq!(prompt.result_count, 2);
        assert!(!prompt.truncated);
    }

    #[test]
    fn test_prompt_truncates_results_section() {
        let long = "x".repeat(100);
        let plan = plan(&[("a", Some(long.as_str()))]);
        let prompt = build_prompt("q", &plan, 20).unwrap();

        assert!(prompt.truncated);
        assert!(prompt.text.ends_with("[Search results truncated to 20 characters]"));
        assert!(!prompt.text.contains(&"x".repeat(21)));
    }

    #[test]
    fn test_prompt_absent_without_results() {
        assert!(build_prompt("q", &plan(&[("a", None), ("b", Some(""))]), 8_000).is_none());
        assert!(build_prompt("q", &SearchPlan::default(), 8_000).is_none());
    }

    #[test]
    fn test_deterministic_report_lists_items() {
        let mut plan = plan(&[("What is Rust?", Some("A language.")), ("Who uses it?", None)]);
        plan.items[0].reason = Some("basics".into());
        let report = deterministic_report("Rust", &plan);

        assert_eq!(report.summary, "Research Results for 'Rust'");
        assert!(report.body.starts_with("# Research Results for 'Rust'"));
        assert!(report.body.contains("## 1. What is Rust?\n\n_Reason: basics_\n\nA language."));
        assert!(report.body.contains("## 2. Who uses it?\n\n_No result was recorded for this search._"));
        assert!(!report.body.contains("No search results were available"));
        assert_eq!(report.follow_ups.len(), 3);
        assert!(report.model.is_none());
    }

    #[test]
    fn test_deterministic_report_without_results() {
        let report = deterministic_report("Rust", &SearchPlan::default());
        assert!(report.body.contains("No search results were available for this query."));
        assert!(!report.summary.is_empty());
    }
}
