//! Property-based tests for the response parser using proptest.

use proptest::prelude::*;
use serde_json::json;

use sleuth_core::parser::{FALLBACK_INDICATOR, Strategy as ParseStrategy, parse_plan, parse_report};

fn phrase() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ,.?!]{0,40}"
}

fn word_phrase() -> impl Strategy<Value = String> {
    "[a-z]{1,12}( [a-z]{1,12}){0,3}"
}

// --- Totality ---

proptest! {
    #[test]
    fn parse_report_never_panics(raw in any::<String>()) {
        let parsed = parse_report(&raw, Some("model"));
        prop_assert!(!parsed.record.summary.trim().is_empty());
        prop_assert!(!parsed.record.body.trim().is_empty());
        prop_assert_eq!(parsed.record.model.as_deref(), Some("model"));
    }

    #[test]
    fn parse_plan_never_panics(raw in any::<String>(), max_items in 1usize..20) {
        let parsed = parse_plan(&raw, "topic", max_items);
        prop_assert!(!parsed.record.is_empty());
        prop_assert!(parsed.record.len() <= max_items);
    }

    #[test]
    fn parse_report_survives_json_like_noise(raw in r#"[{}\[\]":,' a-z0-9\n`]{0,80}"#) {
        let parsed = parse_report(&raw, None);
        prop_assert!(!parsed.record.summary.trim().is_empty());
    }
}

// --- Well-formed input ---

proptest! {
    #[test]
    fn valid_report_parses_directly(
        summary in phrase(),
        body in phrase(),
        follow_ups in prop::collection::vec(phrase(), 0..4),
    ) {
        let raw = json!({
            "short_summary": summary,
            "markdown_report": body,
            "follow_up_questions": follow_ups,
        })
        .to_string();

        let parsed = parse_report(&raw, None);
        prop_assert_eq!(parsed.strategy, ParseStrategy::Direct);
        prop_assert_eq!(parsed.record.summary, summary);
        prop_assert_eq!(parsed.record.body, body);
        prop_assert_eq!(parsed.record.follow_ups, follow_ups);
    }

    #[test]
    fn fenced_report_is_extracted(
        summary in phrase(),
        body in phrase(),
        lead in "[A-Za-z ]{0,30}",
    ) {
        let object = json!({
            "short_summary": summary,
            "markdown_report": body,
            "follow_up_questions": ["Next?"],
        });
        let raw = format!("{lead}\n```json\n{object:#}\n```\nHope this helps.");

        let parsed = parse_report(&raw, None);
        prop_assert_eq!(parsed.strategy, ParseStrategy::Extracted);
        prop_assert_eq!(parsed.record.summary, summary);
        prop_assert_eq!(parsed.record.body, body);
    }

    #[test]
    fn loose_report_is_repaired(
        summary in word_phrase(),
        body in word_phrase(),
        question in word_phrase(),
    ) {
        let raw = format!(
            "{{\n  short_summary: '{summary}',\n  markdown_report: '{body}',\n  follow_up_questions: ['{question}',],\n}}"
        );

        let parsed = parse_report(&raw, None);
        prop_assert!(!parsed.is_fallback());
        prop_assert_eq!(parsed.record.summary, summary);
        prop_assert_eq!(parsed.record.body, body);
        prop_assert_eq!(parsed.record.follow_ups, vec![question]);
    }

    #[test]
    fn prose_report_falls_back(words in prop::collection::vec("[A-Za-z]{1,10}", 1..20)) {
        let raw = format!("{}.", words.join(" "));

        let parsed = parse_report(&raw, None);
        prop_assert!(parsed.is_fallback());
        prop_assert!(parsed.record.summary.contains(FALLBACK_INDICATOR));
        prop_assert!(!parsed.record.follow_ups.is_empty());
    }
}

// --- Plans ---

proptest! {
    #[test]
    fn plan_keeps_distinct_queries_in_order(topics in prop::collection::vec(word_phrase(), 1..10)) {
        let queries: Vec<String> = topics
            .iter()
            .enumerate()
            .map(|(i, topic)| format!("question {i} about {topic}"))
            .collect();
        let raw = json!({ "searches": queries }).to_string();

        let parsed = parse_plan(&raw, "topic", 50);
        prop_assert_eq!(parsed.strategy, ParseStrategy::Direct);
        let parsed_queries: Vec<String> =
            parsed.record.items.into_iter().map(|item| item.query).collect();
        prop_assert_eq!(parsed_queries, queries);
    }

    #[test]
    fn plan_is_capped(count in 1usize..15, max_items in 1usize..6) {
        let queries: Vec<String> = (0..count).map(|i| format!("query {i}")).collect();
        let raw = json!({ "searches": queries }).to_string();

        let parsed = parse_plan(&raw, "topic", max_items);
        prop_assert_eq!(parsed.record.len(), count.min(max_items));
    }
}
