//! Code relationships carried by index documents.
//!
//! ICD documents hold a `REL` field (a list of JSON-encoded relationship
//! records) and an optional `OHDSI` field with vocabulary mappings. This
//! module parses both into typed records.

use crate::capability::SearchHit;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relationship kinds kept when parsing `REL` data.
pub const KNOWN_KINDS: &[&str] = &["PAR", "CHD", "RO", "SY", "RQ"];

/// Source tag of SNOMED CT relationships in `REL` data.
pub const SNOMED_SOURCE: &str = "SNOMEDCT_US";

/// One relationship from a document's `REL` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "REL", default)]
    pub kind: String,
    #[serde(rename = "RELA", default)]
    pub attribute: String,
    #[serde(rename = "SAB", default)]
    pub source: String,
    #[serde(rename = "TTY", default)]
    pub term_type: String,
    #[serde(rename = "STR", default)]
    pub label: String,
    #[serde(rename = "CODE", default)]
    pub code: String,
}

impl Relationship {
    pub fn is_parent(&self) -> bool {
        self.kind == "PAR"
    }

    pub fn is_child(&self) -> bool {
        self.kind == "CHD"
    }
}

/// Heading used when listing relationships of `kind`.
pub fn kind_heading(kind: &str) -> String {
    match kind {
        "PAR" => "Parent Codes".to_string(),
        "CHD" => "Child Codes".to_string(),
        "SY" => "Synonyms".to_string(),
        "RO" => "Related Codes".to_string(),
        "RQ" => "Required/Associated Codes".to_string(),
        other => format!("{} Relationships", other),
    }
}

/// Parses a `REL` field.
///
/// Accepts a JSON array whose entries are either objects or JSON-encoded
/// object strings. Entries that do not parse, or whose kind is not in
/// [`KNOWN_KINDS`], are skipped.
pub fn parse_relationships(raw: &str) -> Vec<Relationship> {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(entries)) => entries,
        Ok(single @ Value::Object(_)) => vec![single],
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(encoded) => serde_json::from_str::<Relationship>(&encoded).ok(),
            object @ Value::Object(_) => serde_json::from_value::<Relationship>(object).ok(),
            _ => None,
        })
        .filter(|rel| KNOWN_KINDS.contains(&rel.kind.as_str()))
        .collect()
}

/// Parent and child codes of one code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hierarchy {
    pub query_code: String,
    /// `(document code, document label)` of every matching document
    pub matched: Vec<(String, String)>,
    pub parents: Vec<Relationship>,
    pub children: Vec<Relationship>,
}

impl Hierarchy {
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty() && self.children.is_empty()
    }

    /// Plain-text block handed to the generator.
    pub fn describe(&self) -> String {
        let mut text = format!("Query Code: {}\n", self.query_code);
        for (code, label) in &self.matched {
            text.push_str(&format!("Matched: {} - {}\n", code, label));
        }
        if !self.parents.is_empty() {
            text.push_str("\nParent Codes:\n");
            for parent in &self.parents {
                text.push_str(&format!("- {}: {} [{}]\n", parent.code, parent.label, parent.source));
            }
        }
        if !self.children.is_empty() {
            text.push_str("\nChild Codes:\n");
            for child in &self.children {
                text.push_str(&format!("- {}: {} [{}]\n", child.code, child.label, child.source));
            }
        }
        text
    }
}

/// Case-insensitive containment, the match rule for code lookups.
fn code_matches(document_code: &str, code: &str) -> bool {
    document_code.to_uppercase().contains(&code.to_uppercase())
}

/// Collects the hierarchy of `code` from hits whose `CODE` contains it.
pub fn hierarchy_from_hits(code: &str, hits: &[SearchHit]) -> Hierarchy {
    let mut hierarchy = Hierarchy {
        query_code: code.to_string(),
        ..Hierarchy::default()
    };

    for hit in hits {
        let Some(document_code) = hit.code() else { continue };
        if !code_matches(document_code, code) {
            continue;
        }
        hierarchy
            .matched
            .push((document_code.to_string(), hit.label().unwrap_or_default().to_string()));

        for rel in hit.field("REL").map(parse_relationships).unwrap_or_default() {
            if rel.is_parent() {
                hierarchy.parents.push(rel);
            } else if rel.is_child() {
                hierarchy.children.push(rel);
            }
        }
    }
    hierarchy
}

/// One ICD to SNOMED CT mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnomedMapping {
    pub icd_code: String,
    pub icd_label: String,
    pub snomed_code: String,
    pub snomed_label: String,
    /// `Maps to` style id from OHDSI, or the `REL` kind
    pub relationship: String,
    /// `OHDSI` or `REL`
    pub origin: String,
}

#[derive(Debug, Deserialize)]
struct OhdsiRecord {
    #[serde(default)]
    maps: Vec<OhdsiMap>,
}

#[derive(Debug, Deserialize)]
struct OhdsiMap {
    #[serde(default)]
    vocabulary_id: String,
    #[serde(default)]
    concept_code: Value,
    #[serde(default)]
    concept_name: String,
    #[serde(default)]
    relationship_id: String,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// SNOMED CT mappings of `icd_code` from hits whose `CODE` contains it.
///
/// Reads the `OHDSI` maps with vocabulary `SNOMED`, then the `REL` entries
/// sourced from SNOMED CT. Unparseable `OHDSI` data is skipped.
pub fn snomed_mappings_from_hits(icd_code: &str, hits: &[SearchHit]) -> Vec<SnomedMapping> {
    let mut mappings = Vec::new();

    for hit in hits {
        let Some(document_code) = hit.code() else { continue };
        if !code_matches(document_code, icd_code) {
            continue;
        }
        let icd_label = hit.label().unwrap_or_default();

        if let Some(raw) = hit.field("OHDSI") {
            match serde_json::from_str::<OhdsiRecord>(raw) {
                Ok(record) => {
                    for map in record.maps.into_iter().filter(|m| m.vocabulary_id == "SNOMED") {
                        mappings.push(SnomedMapping {
                            icd_code: document_code.to_string(),
                            icd_label: icd_label.to_string(),
                            snomed_code: value_text(&map.concept_code),
                            snomed_label: map.concept_name,
                            relationship: map.relationship_id,
                            origin: "OHDSI".to_string(),
                        });
                    }
                }
                Err(e) => tracing::debug!(code = document_code, "Unreadable OHDSI data: {}", e),
            }
        }

        let rels = hit.field("REL").map(parse_relationships).unwrap_or_default();
        for rel in rels.into_iter().filter(|rel| rel.source == SNOMED_SOURCE) {
            mappings.push(SnomedMapping {
                icd_code: document_code.to_string(),
                icd_label: icd_label.to_string(),
                snomed_code: rel.code,
                snomed_label: rel.label,
                relationship: rel.kind,
                origin: "REL".to_string(),
            });
        }
    }
    mappings
}

/// Relationships grouped under [`kind_heading`]s, in first-seen kind order.
pub fn format_relationships(relationships: &[Relationship]) -> String {
    if relationships.is_empty() {
        return "No relationships found.".to_string();
    }

    let mut kinds: Vec<&str> = Vec::new();
    for rel in relationships {
        if !kinds.contains(&rel.kind.as_str()) {
            kinds.push(&rel.kind);
        }
    }

    let mut lines = Vec::new();
    for kind in kinds {
        lines.push(format!("**{}:**", kind_heading(kind)));
        for rel in relationships.iter().filter(|rel| rel.kind == kind) {
            let mut line = format!("- {}: {}", rel.code, rel.label);
            if !rel.attribute.is_empty() {
                line.push_str(&format!(" ({})", rel.attribute));
            }
            line.push_str(&format!(" [{}]", rel.source));
            lines.push(line);
        }
    }
    lines.join("\n")
}
