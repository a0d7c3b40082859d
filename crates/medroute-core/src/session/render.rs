//! Human- and machine-readable renderings of a session's current data.

use super::model::{DataItem, SessionContext};
use crate::text::{clean_html, collapse_whitespace, truncate_chars};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Longest value rendered in a single table cell.
pub const MAX_CELL_CHARS: usize = 150;

const TABLE_HEADER: &str = "| Type | Key | Value | Added At |";
const TABLE_SEPARATOR: &str = "|------|-----|-------|----------|";

/// Document fields already shown elsewhere in a context line.
const CONTEXT_SKIPPED_FIELDS: [&str; 3] = ["CODE", "STR", "id"];

/// Counts reported by [`stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_items: usize,
    pub item_types: BTreeMap<String, usize>,
    pub queries_processed: usize,
    pub modifications_made: usize,
}

/// Markdown table with one line per item.
///
/// Every cell is flattened to a single line: HTML line breaks become `", "`,
/// whitespace runs collapse, `|` is escaped and long values are cut.
pub fn to_table(ctx: &SessionContext) -> String {
    table_of(ctx.items())
}

/// Same as [`to_table`] for an arbitrary selection of items.
pub fn table_of<'a>(items: impl IntoIterator<Item = &'a DataItem>) -> String {
    let mut lines = vec![TABLE_HEADER.to_string(), TABLE_SEPARATOR.to_string()];
    for item in items {
        lines.push(format!(
            "| {} | {} | {} | {} |",
            cell(&item.item_type),
            cell(&item.key),
            truncate_chars(&cell(&item.value), MAX_CELL_CHARS),
            item.added_at.format("%H:%M:%S")
        ));
    }
    if lines.len() == 2 {
        lines.push("| Info | No data in session |".to_string());
    }
    lines.join("\n")
}

fn cell(text: &str) -> String {
    clean_html(text).replace('|', "\\|")
}

/// Summary grouped by item type, in first-seen order.
pub fn summarize(ctx: &SessionContext) -> String {
    if ctx.is_empty() {
        return "No data in current session.".to_string();
    }

    let mut groups: Vec<(&str, Vec<&DataItem>)> = Vec::new();
    for item in ctx.items() {
        match groups.iter_mut().find(|(t, _)| *t == item.item_type) {
            Some((_, items)) => items.push(item),
            None => groups.push((&item.item_type, vec![item])),
        }
    }

    let mut out = format!("Current session data ({} items):\n", ctx.len());
    for (item_type, items) in groups {
        out.push_str(&format!("\n**{}** ({} items):\n", item_type, items.len()));
        for item in items {
            out.push_str(&format!(
                "  - {}: {}\n",
                item.key,
                truncate_chars(&clean_html(&item.value), 100)
            ));
        }
    }
    out.trim_end().to_string()
}

/// `{key: {type, value, metadata, added_at}}` for every item.
pub fn to_json(ctx: &SessionContext) -> Value {
    let mut map = Map::new();
    for item in ctx.items() {
        map.insert(
            item.key.clone(),
            json!({
                "type": item.item_type,
                "value": item.value,
                "metadata": item.metadata,
                "added_at": item.added_at.to_rfc3339(),
            }),
        );
    }
    Value::Object(map)
}

pub fn stats(ctx: &SessionContext) -> SessionStats {
    let mut item_types = BTreeMap::new();
    for item in ctx.items() {
        *item_types.entry(item.item_type.clone()).or_insert(0) += 1;
    }
    SessionStats {
        total_items: ctx.len(),
        item_types,
        queries_processed: ctx.query_history.len(),
        modifications_made: ctx.modifications.len(),
    }
}

/// Text used to embed an item for relevance scoring: key, value and the
/// document label when present.
pub fn relevance_text(item: &DataItem) -> String {
    let mut text = format!("{} {}", item.key, item.value);
    if let Some(label) = item.document_field("STR") {
        text.push(' ');
        text.push_str(label);
    }
    text
}

/// Context block handed to the language model for follow-up answers.
///
/// One `[key] value` line per item, followed by indented document fields:
/// cross-mappings first, then the source vocabulary, then the rest.
pub fn context_block<'a>(items: impl IntoIterator<Item = &'a DataItem>) -> String {
    let mut lines = Vec::new();
    for item in items {
        lines.push(format!("[{}] {}", item.key, collapse_whitespace(&item.value)));
        let Some(doc) = item.full_document() else {
            continue;
        };
        if let Some(ohdsi) = doc.get("OHDSI").and_then(Value::as_str) {
            lines.push(format!("  OHDSI: {}", clean_html(ohdsi)));
        }
        if let Some(sab) = doc.get("SAB").and_then(Value::as_str) {
            lines.push(format!("  SAB: {}", sab));
        }
        for (field, value) in doc {
            if CONTEXT_SKIPPED_FIELDS.contains(&field.as_str()) || field == "OHDSI" || field == "SAB" {
                continue;
            }
            let value = match value {
                Value::String(s) => clean_html(s),
                Value::Null => continue,
                other => other.to_string(),
            };
            if !value.is_empty() {
                lines.push(format!("  {}: {}", field, value));
            }
        }
    }
    lines.join("\n")
}
