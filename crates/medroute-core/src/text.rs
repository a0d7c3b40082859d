//! Small text helpers shared by renderings and agents.

use once_cell::sync::Lazy;
use regex::Regex;

static BR_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid line-break pattern"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid citation pattern"));

/// Turns HTML line breaks into `", "`, drops remaining tags and collapses
/// all whitespace (including newlines) into single spaces.
pub fn clean_html(text: &str) -> String {
    let text = BR_TAG.replace_all(text, ", ");
    let text = ANY_TAG.replace_all(&text, "");
    collapse_whitespace(&text)
}

/// Drops HTML tags from generated text, turning `<br>` variants into newlines.
///
/// Unlike [`clean_html`] the line structure is kept.
pub fn strip_tags(text: &str) -> String {
    let text = BR_TAG.replace_all(text, "\n");
    ANY_TAG.replace_all(&text, "").trim().to_string()
}

/// Collapses any run of whitespace into one space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Cuts `text` to at most `max_chars` characters, ending with `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Rewrites numeric citations (`[1]`, `[2]`) into the code they point at.
///
/// `codes[0]` answers `[1]`. Citations without a matching code are left alone.
pub fn normalize_citations(text: &str, codes: &[String]) -> String {
    CITATION
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let index = caps[1].parse::<usize>().unwrap_or(0);
            match index.checked_sub(1).and_then(|i| codes.get(i)) {
                Some(code) => format!("[{}]", code),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
