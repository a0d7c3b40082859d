//! Deterministic lexical classifiers.
//!
//! Both classifiers are ordered rule tables: the first matching rule wins, so
//! overlapping vocabulary always resolves the same way. No network call is
//! made on this path.

mod modification;
mod routing;

pub use modification::{ModificationClassifier, ModificationType};
pub use routing::{AgentCategory, RelationshipQuery, RoutingRules};

use regex::Regex;

/// Builds a case-insensitive, word-bounded alternation of `terms`.
///
/// Terms are regex fragments, so plurals can be written as `codes?`.
pub(crate) fn keyword_pattern(terms: &[&str]) -> Regex {
    let pattern = format!(r"(?i)\b(?:{})\b", terms.join("|"));
    Regex::new(&pattern).expect("keyword tables are valid regex fragments")
}
