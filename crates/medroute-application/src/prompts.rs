//! Prompt templates rendered with minijinja.

use medroute_core::error::{MedrouteError, Result};
use minijinja::Environment;
use once_cell::sync::Lazy;
use serde::Serialize;

pub const LOOKUP_SYSTEM: &str = "lookup_system";
pub const LOOKUP_USER: &str = "lookup_user";
pub const CHAT_SYSTEM: &str = "chat_system";
pub const FOLLOWUP_USER: &str = "followup_user";
pub const CONCEPT_SET_CLASSIFY: &str = "concept_set_classify";
pub const CONCEPT_SET_SUBJECT: &str = "concept_set_subject";
pub const CONCEPT_SET_EXPAND: &str = "concept_set_expand";
pub const CONCEPT_SET_FORMAT: &str = "concept_set_format";
pub const CONCEPT_SET_MODIFY: &str = "concept_set_modify";
pub const RELATIONSHIP_SYSTEM: &str = "relationship_system";
pub const RELATIONSHIP_USER: &str = "relationship_user";
pub const FACT_EXTRACTION: &str = "fact_extraction";

const SOURCES: &[(&str, &str)] = &[
    (
        LOOKUP_SYSTEM,
        "You are a medical coding assistant for {{ vocabulary }}. \
Answer only from the numbered search results. Cite a result by its number in brackets, \
for example [1]. If none of the results fit the question, say so.",
    ),
    (
        LOOKUP_USER,
        "{% if context %}Conversation context:\n{{ context }}\n\n{% endif %}\
Search results:\n\
{% for r in results %}[{{ loop.index }}] {{ r.code }}: {{ r.label }}{% if r.sab %} ({{ r.sab }}){% endif %}\n{% endfor %}\n\
Question: {{ query }}",
    ),
    (
        CHAT_SYSTEM,
        "You are a medical coding assistant helping an analyst work with ICD and SNOMED CT codes. \
When session data is provided, answer from it and refer to codes by their code. \
Otherwise answer from general knowledge and say when a lookup would be needed.",
    ),
    (
        FOLLOWUP_USER,
        "{% if context %}{{ context }}\n\n{% endif %}Question: {{ query }}",
    ),
    (
        CONCEPT_SET_CLASSIFY,
        "Decide whether the request asks to build a concept set, meaning a complete list of codes \
for a condition (for example \"create a concept set for diabetes\" or \"give me all codes for asthma\").\n\
Answer with exactly one word: true or false.\n\nRequest: {{ query }}",
    ),
    (
        CONCEPT_SET_SUBJECT,
        "Name the main medical condition in this request. Reply with the condition only.\n\nRequest: {{ query }}",
    ),
    (
        CONCEPT_SET_EXPAND,
        "List up to five search terms for the medical condition \"{{ subject }}\": the preferred name first, \
then synonyms and closely related clinical terms. One term per line, no numbering.",
    ),
    (
        CONCEPT_SET_FORMAT,
        "Format the extracted codes for \"{{ name }}\" as a markdown table with the columns \
Code | Label | Vocabulary | Score. Include every record.\n\n{{ raw_data }}",
    ),
    (
        CONCEPT_SET_MODIFY,
        "Below are the complete extracted records of the \"{{ name }}\" concept set.\n\n{{ raw_data }}\n\n\
Apply this instruction: {{ instruction }}\n\n\
Reply with the complete resulting markdown table (Code | Label | Vocabulary | Score) containing every \
remaining record, followed by one line describing the change. Never truncate the table.",
    ),
    (
        RELATIONSHIP_SYSTEM,
        "You are a medical coding assistant specialising in {{ topic }}. \
Answer only from the relationship data provided. Cite codes in square brackets, for example [I10].",
    ),
    (
        RELATIONSHIP_USER,
        "User Query: {{ query }}\n\n{{ heading }}:\n{{ data }}\n\n\
Describe the relationships relevant to the query. Cite every code you mention in square brackets.",
    ),
    (
        FACT_EXTRACTION,
        "Extract key facts, preferences and domain knowledge from this medical coding conversation.\n\n\
Conversation:\n{{ conversation }}\n\n\
Return ONLY a JSON array. Each element has the fields:\n\
- fact_type: \"user_preference\" | \"domain_knowledge\" | \"context\" | \"reference\"\n\
- content: the fact in one concise sentence\n\
- confidence: \"high\" | \"medium\" | \"low\"\n\
- entities: codes, conditions and other entities the fact mentions\n\
Return [] when there is nothing worth keeping.",
    ),
];

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    for &(name, source) in SOURCES {
        env.add_template(name, source)
            .expect("built-in prompt template must parse");
    }
    env
});

/// Renders the built-in template `name` with `ctx`.
pub fn render(name: &str, ctx: impl Serialize) -> Result<String> {
    TEMPLATES
        .get_template(name)
        .and_then(|template| template.render(ctx))
        .map_err(|e| MedrouteError::internal(format!("Failed to render prompt '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn test_every_template_parses() {
        for &(name, _) in SOURCES {
            assert!(TEMPLATES.get_template(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_lookup_user_numbers_results() {
        let prompt = render(
            LOOKUP_USER,
            context! {
                query => "code for hypertension",
                context => "",
                results => vec![
                    context! { code => "I10", label => "Essential hypertension", sab => "ICD10CM" },
                    context! { code => "I15.0", label => "Renovascular hypertension", sab => "" },
                ],
            },
        )
        .unwrap();

        assert!(prompt.starts_with("Search results:"));
        assert!(prompt.contains("[1] I10: Essential hypertension (ICD10CM)"));
        assert!(prompt.contains("[2] I15.0: Renovascular hypertension\n"));
        assert!(prompt.ends_with("Question: code for hypertension"));
    }

    #[test]
    fn test_unknown_template_is_an_error() {
        let err = render("missing", context! {}).unwrap_err();
        assert!(matches!(err, MedrouteError::Internal(_)));
    }
}
