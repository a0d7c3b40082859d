use super::keyword_pattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// What kind of change a follow-up asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ModificationType {
    Add,
    Remove,
    Format,
    Filter,
    Modify,
}

static ADD: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "add", "include", "also show", "also include", "plus", "with", "and also", "append",
        "insert",
    ])
});

static REMOVE: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "remove", "exclude", "delete", "without", "drop", "hide", "omit", "take out",
        "get rid of",
    ])
});

static FORMAT_REQUEST: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "format as", "show as", "display as", "convert to", "in format", "as json", "as table",
        "as list",
    ])
});

static FORMAT_TYPE: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "format", "show as", "display as", "convert", "as json", "as table", "as list",
    ])
});

static FILTER: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&["filter", "only show", "show only", "just", "limit to"])
});

/// Filter wording strong enough to start a modification on its own.
static FILTER_REQUEST: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&["filter", "only show", "show only", "just show", "limit to"])
});

/// Edits with no dedicated handler; answered with the data and usage help.
static MODIFY_REQUEST: Lazy<Regex> =
    Lazy::new(|| keyword_pattern(&["change", "update", "edit", "modify", "rename"]));

static DATA: Lazy<Regex> = Lazy::new(|| {
    keyword_pattern(&[
        "snomed", "icd", "descriptions?", "codes?", "mappings?", "concepts?", "relationships?",
        "hierarch(?:y|ies)",
    ])
});

static CONTEXT: Lazy<Regex> =
    Lazy::new(|| keyword_pattern(&["this", "these", "current", "existing", "shown"]));

/// Applied to the upper-cased query.
static ICD_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]\d{1,3}(?:\.\d+)?\b").expect("valid ICD pattern"));

static SNOMED_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{6,10}\b").expect("valid SNOMED pattern"));

/// Ordered type table; first match wins, `Modify` is the fallback.
static TYPE_RULES: Lazy<Vec<(&'static Lazy<Regex>, ModificationType)>> = Lazy::new(|| {
    vec![
        (&ADD, ModificationType::Add),
        (&REMOVE, ModificationType::Remove),
        (&FORMAT_TYPE, ModificationType::Format),
        (&FILTER, ModificationType::Filter),
    ]
});

/// Data-type vocabulary mapped to item type tags.
static DATA_TYPE_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (keyword_pattern(&["snomed"]), "snomed_code"),
        (keyword_pattern(&["icd"]), "icd_code"),
        (keyword_pattern(&["descriptions?"]), "description"),
        (keyword_pattern(&["names?"]), "name"),
        (keyword_pattern(&["codes?"]), "code"),
        (keyword_pattern(&["mappings?"]), "mapping"),
        (keyword_pattern(&["relationships?"]), "relationship"),
        (keyword_pattern(&["hierarch(?:y|ies)"]), "hierarchy"),
        (keyword_pattern(&["parents?"]), "parent_code"),
        (keyword_pattern(&["child(?:ren)?"]), "child_code"),
    ]
});

/// Detects whether a query mutates the data currently in view.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModificationClassifier;

impl ModificationClassifier {
    pub fn new() -> Self {
        Self
    }

    /// True when the query carries a modifier (add, remove, format, filter or
    /// edit wording) together with a target: a data keyword, a pronoun
    /// referring to what is shown, or a code-shaped token.
    pub fn is_modification_request(&self, query: &str) -> bool {
        let has_modifier = ADD.is_match(query)
            || REMOVE.is_match(query)
            || FORMAT_REQUEST.is_match(query)
            || FILTER_REQUEST.is_match(query)
            || MODIFY_REQUEST.is_match(query);
        if !has_modifier {
            return false;
        }

        DATA.is_match(query) || CONTEXT.is_match(query) || !self.extract_codes(query).is_empty()
    }

    pub fn detect_type(&self, query: &str) -> ModificationType {
        TYPE_RULES
            .iter()
            .find(|(pattern, _)| pattern.is_match(query))
            .map(|(_, kind)| *kind)
            .unwrap_or(ModificationType::Modify)
    }

    pub fn extract_data_types(&self, query: &str) -> BTreeSet<String> {
        DATA_TYPE_RULES
            .iter()
            .filter(|(pattern, _)| pattern.is_match(query))
            .map(|(_, tag)| tag.to_string())
            .collect()
    }

    /// ICD-shaped then SNOMED-shaped tokens, upper-cased and de-duplicated.
    pub fn extract_codes(&self, query: &str) -> Vec<String> {
        let upper = query.to_uppercase();
        let mut codes: Vec<String> = Vec::new();
        let found = ICD_TOKEN
            .find_iter(&upper)
            .chain(SNOMED_TOKEN.find_iter(&upper))
            .map(|m| m.as_str().to_string());
        for code in found {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }
}
