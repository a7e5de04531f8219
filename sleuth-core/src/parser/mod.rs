//! Defensive parsing of generator output into typed records.
//!
//! Strategies run from strictest to loosest:
//!
//! 1. strict parse of the trimmed text
//! 2. strict parse of a fenced code block, or of the first balanced `{...}` region
//! 3. strict parse after the [`repair`] passes
//! 4. field-by-field extraction with defaults for fields that cannot be found
//! 5. a synthetic fallback record
//!
//! Every candidate is type-checked before it is accepted. Parsing never fails
//! and never panics; the worst case is the fallback.

pub mod repair;
pub mod scan;

use crate::types::{ReportRecord, SearchItem, SearchPlan};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Present in the summary of every fallback report.
pub const FALLBACK_INDICATOR: &str = "Unable to parse";

/// Follow-up prompts used when a report has none of its own.
pub const GENERIC_FOLLOW_UPS: [&str; 3] = [
    "Can you provide more specific information about this topic?",
    "What are the most recent developments in this area?",
    "What are the main debates or open questions related to this topic?",
];

const DEFAULT_SUMMARY: &str = "Summary not available; the generated report was only partially readable.";
const DEFAULT_BODY: &str = "The detailed report could not be recovered from the generated response.";

const EXCERPT_CHARS: usize = 200;
const BODY_EXCERPT_CHARS: usize = 2_000;

/// Which record shape the text must be coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Plan,
    Report,
}

impl ParseMode {
    /// Required fields for this mode, with the aliases accepted for each.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            ParseMode::Plan => &PLAN_FIELDS,
            ParseMode::Report => &REPORT_FIELDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextList,
    /// List of strings or `{query, reason?}` objects.
    SearchList,
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
}

impl FieldSpec {
    fn keys(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }

    /// Value substituted during field-by-field extraction when the field is missing.
    fn default_value(&self) -> Option<Value> {
        match self.name {
            "short_summary" => Some(Value::String(DEFAULT_SUMMARY.into())),
            "markdown_report" => Some(Value::String(DEFAULT_BODY.into())),
            "follow_up_questions" => Some(Value::from(GENERIC_FOLLOW_UPS.to_vec())),
            _ => None,
        }
    }
}

const SEARCHES: FieldSpec = FieldSpec {
    name: "searches",
    aliases: &["queries", "questions", "items"],
    kind: FieldKind::SearchList,
};
const SUMMARY: FieldSpec = FieldSpec {
    name: "short_summary",
    aliases: &["summary", "shortSummary"],
    kind: FieldKind::Text,
};
const BODY: FieldSpec = FieldSpec {
    name: "markdown_report",
    aliases: &["body", "report", "markdownReport"],
    kind: FieldKind::Text,
};
const FOLLOW_UPS: FieldSpec = FieldSpec {
    name: "follow_up_questions",
    aliases: &["follow_ups", "followUps", "followUpQuestions"],
    kind: FieldKind::TextList,
};

static PLAN_FIELDS: [FieldSpec; 1] = [SEARCHES];
static REPORT_FIELDS: [FieldSpec; 3] = [SUMMARY, BODY, FOLLOW_UPS];

/// Why no strategy produced a valid record. Later variants are more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureKind {
    Empty,
    NoStructure,
    Malformed,
    MissingFields,
    WrongTypes,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Empty => "EmptyResponse",
            FailureKind::NoStructure => "NoStructuredData",
            FailureKind::Malformed => "MalformedData",
            FailureKind::MissingFields => "MissingFields",
            FailureKind::WrongTypes => "WrongFieldTypes",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Empty => "the response was empty",
            FailureKind::NoStructure => "no structured data was found",
            FailureKind::Malformed => "the structured data was malformed",
            FailureKind::MissingFields => "required fields were missing",
            FailureKind::WrongTypes => "fields had unexpected types",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The strategy that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Extracted,
    Repaired,
    FieldByField,
    Fallback(FailureKind),
}

/// A parsed record and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub record: T,
    pub strategy: Strategy,
}

impl<T> Parsed<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self.strategy, Strategy::Fallback(_))
    }
}

/// Coerce planner output into a search plan of at most `max_items` items.
///
/// Falls back to five generic questions about `topic`.
pub fn parse_plan(raw: &str, topic: &str, max_items: usize) -> Parsed<SearchPlan> {
    let build = |obj: &Map<String, Value>| plan_from_object(obj, max_items);
    match run_strategies(raw, ParseMode::Plan, build) {
        Ok((record, strategy)) => {
            debug!(?strategy, items = record.len(), "Parsed search plan");
            Parsed { record, strategy }
        }
        Err(kind) => {
            warn!(
                failure = %kind,
                excerpt = %excerpt(raw, EXCERPT_CHARS),
                "Planner response unusable, using generic search plan"
            );
            Parsed {
                record: fallback_plan(topic, kind, max_items),
                strategy: Strategy::Fallback(kind),
            }
        }
    }
}

/// Coerce generator output into a report, tagging it with `model`.
pub fn parse_report(raw: &str, model: Option<&str>) -> Parsed<ReportRecord> {
    let (record, strategy) = match run_strategies(raw, ParseMode::Report, report_from_object) {
        Ok((record, strategy)) => {
            debug!(?strategy, "Parsed report");
            (record, strategy)
        }
        Err(kind) => {
            warn!(failure = %kind, "Report response unusable, using fallback report");
            (fallback_report(raw, kind), Strategy::Fallback(kind))
        }
    };
    Parsed {
        record: ReportRecord {
            model: model.map(str::to_string),
            ..record
        },
        strategy,
    }
}

/// Five generic questions about `topic`, each noting why they were used.
pub fn fallback_plan(topic: &str, kind: FailureKind, max_items: usize) -> SearchPlan {
    let topic = topic.trim();
    let reason = format!(
        "Generic question used because the planner response could not be parsed ({})",
        kind.as_str()
    );
    let questions = [
        format!("What is {topic}?"),
        format!("How has {topic} evolved over time?"),
        format!("What are the current applications of {topic}?"),
        format!("What are the future prospects for {topic}?"),
        format!("What are the challenges related to {topic}?"),
    ];
    SearchPlan::new(
        questions
            .into_iter()
            .take(max_items.max(1))
            .map(|q| SearchItem::new(q).with_reason(reason.clone()))
            .collect(),
    )
}

/// A minimally valid report describing the parse failure.
pub fn fallback_report(raw: &str, kind: FailureKind) -> ReportRecord {
    let short = excerpt(raw, EXCERPT_CHARS);
    let summary = if short.is_empty() {
        format!(
            "{FALLBACK_INDICATOR} the generated report ({}): {}.",
            kind.as_str(),
            kind.description()
        )
    } else {
        format!(
            "{FALLBACK_INDICATOR} the generated report ({}). Response excerpt: {short}",
            kind.as_str()
        )
    };

    let long = excerpt(raw, BODY_EXCERPT_CHARS);
    let mut body = format!(
        "# Research Report\n\nThe report generator returned a response that could not be read as a structured report because {}.\n",
        kind.description()
    );
    if !long.is_empty() {
        body.push_str("\n## Raw response\n\n");
        body.push_str(&long);
        body.push('\n');
    }

    ReportRecord {
        summary,
        body,
        follow_ups: GENERIC_FOLLOW_UPS.iter().map(|s| s.to_string()).collect(),
        model: None,
    }
}

fn run_strategies<T, F>(raw: &str, mode: ParseMode, build: F) -> Result<(T, Strategy), FailureKind>
where
    F: Fn(&Map<String, Value>) -> Result<T, FailureKind>,
{
    let text = raw.trim();
    if text.is_empty() {
        return Err(FailureKind::Empty);
    }
    let mut failure = FailureKind::NoStructure;

    if let Some(record) = attempt(text, mode, &build, &mut failure) {
        return Ok((record, Strategy::Direct));
    }

    let fenced = scan::fenced_block(text);
    let region = scan::balanced_object(fenced.unwrap_or(text))
        .or_else(|| fenced.and_then(|_| scan::balanced_object(text)));
    let mut candidates: Vec<&str> = Vec::new();
    for candidate in fenced.into_iter().chain(region) {
        if candidate != text && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    for candidate in &candidates {
        if let Some(record) = attempt(candidate, mode, &build, &mut failure) {
            return Ok((record, Strategy::Extracted));
        }
    }

    let mut repaired: Vec<String> = Vec::new();
    for target in candidates.iter().copied().chain([text]) {
        let fixed = repair::repair(target);
        if let Some(record) = attempt(&fixed, mode, &build, &mut failure) {
            return Ok((record, Strategy::Repaired));
        }
        if let Some(region) = scan::balanced_object(&fixed).filter(|r| *r != fixed) {
            if let Some(record) = attempt(region, mode, &build, &mut failure) {
                return Ok((record, Strategy::Repaired));
            }
        }
        repaired.push(fixed);
    }

    for source in repaired.iter().map(String::as_str).chain([text]) {
        if let Some(record) = extract_fields(source, mode, &build, &mut failure) {
            return Ok((record, Strategy::FieldByField));
        }
    }

    Err(failure)
}

/// Strict parse of `candidate` followed by validation.
fn attempt<T, F>(candidate: &str, mode: ParseMode, build: &F, failure: &mut FailureKind) -> Option<T>
where
    F: Fn(&Map<String, Value>) -> Result<T, FailureKind>,
{
    match decode(candidate, mode).and_then(|obj| build(&obj)) {
        Ok(record) => Some(record),
        Err(kind) => {
            *failure = (*failure).max(kind);
            None
        }
    }
}

fn decode(candidate: &str, mode: ParseMode) -> Result<Map<String, Value>, FailureKind> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(obj)) => Ok(obj),
        // A bare list is taken as the plan itself.
        Ok(Value::Array(items)) if mode == ParseMode::Plan => {
            let mut obj = Map::new();
            obj.insert(SEARCHES.name.to_string(), Value::Array(items));
            Ok(obj)
        }
        Ok(Value::Array(_)) => Err(FailureKind::MissingFields),
        Ok(_) => Err(FailureKind::NoStructure),
        Err(_) if candidate.contains(['{', '[']) => Err(FailureKind::Malformed),
        Err(_) => Err(FailureKind::NoStructure),
    }
}

/// Locate each field independently; succeed if at least one is usable.
fn extract_fields<T, F>(source: &str, mode: ParseMode, build: &F, failure: &mut FailureKind) -> Option<T>
where
    F: Fn(&Map<String, Value>) -> Result<T, FailureKind>,
{
    let mut obj = Map::new();
    for spec in mode.fields() {
        let Some(raw) = spec.keys().find_map(|key| scan::field_value(source, key)) else {
            continue;
        };
        match decode_value(raw, spec.kind) {
            Ok(value) => {
                obj.insert(spec.name.to_string(), value);
            }
            Err(kind) => *failure = (*failure).max(kind),
        }
    }
    if obj.is_empty() {
        return None;
    }
    for spec in mode.fields() {
        if !obj.contains_key(spec.name) {
            if let Some(value) = spec.default_value() {
                obj.insert(spec.name.to_string(), value);
            }
        }
    }
    match build(&obj) {
        Ok(record) => Some(record),
        Err(kind) => {
            *failure = (*failure).max(kind);
            None
        }
    }
}

fn decode_value(raw: &str, kind: FieldKind) -> Result<Value, FailureKind> {
    match kind {
        FieldKind::Text => {
            let text = if raw.starts_with('"') {
                decode_string(raw).ok_or(FailureKind::Malformed)?
            } else if raw.starts_with(['{', '[']) || repair::is_json_literal(raw.trim()) {
                return Err(FailureKind::WrongTypes);
            } else {
                raw.trim().to_string()
            };
            if text.trim().is_empty() {
                Err(FailureKind::MissingFields)
            } else {
                Ok(Value::String(text))
            }
        }
        FieldKind::TextList | FieldKind::SearchList => {
            if !raw.starts_with('[') {
                return Err(FailureKind::WrongTypes);
            }
            let value = serde_json::from_str::<Value>(raw)
                .or_else(|_| serde_json::from_str::<Value>(&repair::repair(raw)))
                .map_err(|_| FailureKind::Malformed)?;
            if kind == FieldKind::TextList {
                text_list(&value)?;
            }
            Ok(value)
        }
    }
}

/// Decode a string literal, tolerating raw control characters and a missing close quote.
fn decode_string(raw: &str) -> Option<String> {
    if let Ok(s) = serde_json::from_str::<String>(raw) {
        return Some(s);
    }
    let cleaned = repair::strip_control_chars(raw);
    serde_json::from_str::<String>(&cleaned)
        .or_else(|_| serde_json::from_str::<String>(&format!("{cleaned}\"")))
        .ok()
}

fn lookup<'a>(obj: &'a Map<String, Value>, spec: &FieldSpec) -> Option<&'a Value> {
    spec.keys().find_map(|key| obj.get(key))
}

fn text_field(obj: &Map<String, Value>, spec: &FieldSpec) -> Result<String, FailureKind> {
    match lookup(obj, spec) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None => Err(FailureKind::MissingFields),
        Some(_) => Err(FailureKind::WrongTypes),
    }
}

fn text_list(value: &Value) -> Result<Vec<String>, FailureKind> {
    let Value::Array(items) = value else {
        return Err(FailureKind::WrongTypes);
    };
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or(FailureKind::WrongTypes))
        .collect()
}

fn report_from_object(obj: &Map<String, Value>) -> Result<ReportRecord, FailureKind> {
    let summary = text_field(obj, &SUMMARY)?;
    let body = text_field(obj, &BODY)?;
    let follow_ups = match lookup(obj, &FOLLOW_UPS) {
        Some(value) => text_list(value)?,
        None => return Err(FailureKind::MissingFields),
    };
    Ok(ReportRecord {
        summary,
        body,
        follow_ups,
        model: None,
    })
}

/// Normalise plan entries: trim, drop blanks, dedupe case-insensitively, cap.
fn plan_from_object(obj: &Map<String, Value>, max_items: usize) -> Result<SearchPlan, FailureKind> {
    let Some(value) = lookup(obj, &SEARCHES) else {
        return Err(FailureKind::MissingFields);
    };
    let Value::Array(entries) = value else {
        return Err(FailureKind::WrongTypes);
    };

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for entry in entries {
        let item = search_item(entry)?;
        if item.query.is_empty() || !seen.insert(item.query.to_lowercase()) {
            continue;
        }
        items.push(item);
        if items.len() >= max_items {
            break;
        }
    }

    if items.is_empty() {
        Err(FailureKind::MissingFields)
    } else {
        Ok(SearchPlan::new(items))
    }
}

fn search_item(entry: &Value) -> Result<SearchItem, FailureKind> {
    match entry {
        Value::String(query) => Ok(SearchItem::new(query.trim())),
        Value::Object(fields) => {
            let query = ["query", "question", "search"]
                .iter()
                .find_map(|key| fields.get(*key))
                .ok_or(FailureKind::MissingFields)?
                .as_str()
                .ok_or(FailureKind::WrongTypes)?;
            let mut item = SearchItem::new(query.trim());
            match fields.get("reason") {
                None | Some(Value::Null) => {}
                Some(Value::String(reason)) if reason.trim().is_empty() => {}
                Some(Value::String(reason)) => item.reason = Some(reason.trim().to_string()),
                Some(_) => return Err(FailureKind::WrongTypes),
            }
            Ok(item)
        }
        _ => Err(FailureKind::WrongTypes),
    }
}

/// At most `max_chars` characters of the trimmed text, marked when cut.
fn excerpt(raw: &str, max_chars: usize) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
