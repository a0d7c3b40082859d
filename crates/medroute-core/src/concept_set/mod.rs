//! Concept sets: named batches of extracted results kept for follow-ups.
//!
//! A follow-up such as "remove I10 from that table" must be applied to one
//! specific batch. [`resolve_target`] picks it, or reports the candidates when
//! the query does not say which one is meant.

mod registry;

pub use registry::{ConceptSetRegistry, DEFAULT_MAX_ENTRIES};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, timestamped batch of extracted results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSetEntry {
    pub id: String,
    /// Lower-cased subject label, e.g. `hypertension`
    pub name: String,
    /// Unprocessed extracted payload; follow-ups rebuild tables from this
    pub raw_data: String,
    /// Last rendered output; may be stale
    pub formatted: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

impl ConceptSetEntry {
    pub fn new(
        name: impl AsRef<str>,
        raw_data: impl Into<String>,
        formatted: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.as_ref().trim().to_lowercase(),
            raw_data: raw_data.into(),
            formatted: formatted.into(),
            query: query.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Outcome of picking the concept set a follow-up refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetResolution {
    Resolved(ConceptSetEntry),
    /// Several candidates and nothing in the query to choose between them;
    /// names are most recent first
    Ambiguous(Vec<String>),
    Empty,
}

/// Phrases that mark a concept-set follow-up.
const FOLLOWUP_PATTERNS: [&str; 27] = [
    "remove",
    "exclude",
    "filter out",
    "hide",
    "delete",
    "add column",
    "show column",
    "include column",
    "add field",
    "only show",
    "just show",
    "only include",
    "show only",
    "without",
    "except",
    "excluding",
    "modify",
    "change",
    "update",
    "edit",
    "from that table",
    "from the table",
    "from table",
    "from that",
    "from the concept set",
    "from concept set",
    "add a column",
];

const RECENCY_PHRASES: [&str; 4] = ["most recent", "latest", "last one", "recent one"];

/// Lexical check for follow-up wording aimed at a concept set.
pub fn is_followup(query: &str) -> bool {
    let lower = query.to_lowercase();
    FOLLOWUP_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Picks the entry a follow-up refers to.
///
/// Order: a single entry wins outright; then a recency phrase selects the most
/// recent; then an entry whose name appears in the query (the longest matching
/// name, most recent on ties). Anything else is ambiguous.
pub fn resolve_target(query: &str, entries: &[ConceptSetEntry]) -> TargetResolution {
    let mut sorted: Vec<&ConceptSetEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    match sorted.as_slice() {
        [] => return TargetResolution::Empty,
        [only] => return TargetResolution::Resolved((*only).clone()),
        _ => {}
    }

    let lower = query.to_lowercase();
    if RECENCY_PHRASES.iter().any(|p| lower.contains(p)) {
        return TargetResolution::Resolved(sorted[0].clone());
    }

    let mut best: Option<&ConceptSetEntry> = None;
    for entry in &sorted {
        if entry.name.is_empty() || !lower.contains(&entry.name) {
            continue;
        }
        if best.is_none_or(|b| entry.name.len() > b.name.len()) {
            best = Some(entry);
        }
    }

    match best {
        Some(entry) => TargetResolution::Resolved(entry.clone()),
        None => TargetResolution::Ambiguous(sorted.iter().map(|e| e.name.clone()).collect()),
    }
}

/// Clarification shown when a follow-up matches several concept sets.
pub fn clarification_message(names: &[String]) -> String {
    let mut message = String::from("I found multiple concept sets in this conversation:\n\n");
    for (i, name) in names.iter().enumerate() {
        message.push_str(&format!("{}. **{}**\n", i + 1, title_case(name)));
    }
    message.push_str(
        "\nWhich one would you like to modify? Please mention the condition name \
         (for example \"remove I10 from the hypertension concept set\") or say \"the most recent one\".",
    );
    message
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
