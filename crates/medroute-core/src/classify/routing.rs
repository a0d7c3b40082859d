use super::keyword_pattern;
use once_cell::sync::Lazy;
use regex::Regex;

/// Which processing path answers a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AgentCategory {
    Chat,
    Icd,
    Snomed,
}

static SNOMED: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "snomed", "snomed ct", "snomedct", "sct", "clinical terms?", "clinical terminology",
    ])
});

static ICD: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "icd", "icd-10", "icd10", "diagnosis codes?", "medical codes?", "billing codes?",
    ])
});

/// `letter + 2 digits`, e.g. `i10` or `e11.9`, applied to the lower-cased query.
static ICD_SHAPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z]\d{2}(?:\.\d+)?\b").expect("valid ICD routing pattern"));

static SEARCH_VERB: Lazy<Regex> =
    Lazy::new(|| keyword_pattern(&["search for", "find", "look up", "get me", "retrieve"]));

static NEW_SUBJECT: Lazy<Regex> =
    Lazy::new(|| keyword_pattern(&["new", "different", "other", "more"]));

static RELATIONSHIP: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "parents?", "child(?:ren)?", "hierarch(?:y|ies)", "relationships?", "related to",
        "snomed mappings?", "maps? to", "mapped to", "subcategor(?:y|ies)",
    ])
});

static HIERARCHY_WORD: Lazy<Regex> =
    Lazy::new(|| keyword_pattern(&["parents?", "child(?:ren)?", "hierarch(?:y|ies)"]));

static MAPPING_WORD: Lazy<Regex> =
    Lazy::new(|| keyword_pattern(&["snomed", "mappings?", "maps? to", "mapped to"]));

/// Upper-cased ICD code, e.g. `I10` or `E11.9`.
static ICD_CODE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]\d{1,3}(?:\.\d+)?\b").expect("valid ICD code pattern"));

/// What a relationship query asks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipQuery {
    /// Parents and children of a code
    Hierarchy(String),
    /// SNOMED CT mappings of an ICD code
    SnomedMapping(String),
    /// Relationships of whatever the query searches for
    General,
}

static DIRECT_LOOKUP: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&["what is the code for", "find code for", "search for code"])
});

/// Lexical routing rules.
///
/// Categories are checked most specific first: SNOMED vocabulary wins over
/// ICD vocabulary, which wins over plain chat.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingRules;

impl RoutingRules {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> AgentCategory {
        if SNOMED.is_match(query) {
            return AgentCategory::Snomed;
        }
        if ICD.is_match(query) || ICD_SHAPED.is_match(&query.to_lowercase()) {
            return AgentCategory::Icd;
        }
        AgentCategory::Chat
    }

    /// True when the query asks for a fresh retrieval even though the session
    /// already holds data: a search verb together with a new-subject word, or
    /// a direct "what is the code for" request.
    pub fn is_explicit_new_search(&self, query: &str) -> bool {
        (SEARCH_VERB.is_match(query) && NEW_SUBJECT.is_match(query))
            || DIRECT_LOOKUP.is_match(query)
    }

    /// Hierarchy or mapping wording (parent, child, maps to, ...).
    pub fn is_relationship_query(&self, query: &str) -> bool {
        RELATIONSHIP.is_match(query)
    }

    /// Splits a relationship query by the code it names.
    ///
    /// A named code with hierarchy wording asks for its hierarchy; with
    /// mapping wording, for its SNOMED CT mappings. Anything else is a
    /// general relationship search.
    pub fn relationship_query(&self, query: &str) -> RelationshipQuery {
        let upper = query.to_uppercase();
        let Some(code) = ICD_CODE_TOKEN.find(&upper).map(|m| m.as_str().to_string()) else {
            return RelationshipQuery::General;
        };
        if HIERARCHY_WORD.is_match(query) {
            RelationshipQuery::Hierarchy(code)
        } else if MAPPING_WORD.is_match(query) {
            RelationshipQuery::SnomedMapping(code)
        } else {
            RelationshipQuery::General
        }
    }

    /// Relationship queries naming a code always need a fresh search.
    pub fn needs_relationship_lookup(&self, query: &str) -> bool {
        self.is_relationship_query(query)
            && !matches!(self.relationship_query(query), RelationshipQuery::General)
    }
}
