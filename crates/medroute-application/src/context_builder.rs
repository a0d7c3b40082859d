//! Bounded context assembly for follow-up answers.

use medroute_core::memory::ConversationMemory;
use medroute_core::relevance::RelevanceFilter;
use medroute_core::session::{DataItem, render};
use medroute_core::text::truncate_chars;
use std::sync::Arc;

const TRUNCATED_MARKER: &str = "...[truncated]";
const MAX_FACTS: usize = 5;
const MAX_EPISODES: usize = 3;
const MIN_TOKENS_FOR_EPISODES: usize = 200;
const EPISODE_SIMILARITY: f64 = 0.7;
const EPISODE_CHARS: usize = 300;

/// Tokens approximated as characters / 4.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Builds the context handed to the generator, within a token budget.
///
/// Sections, in order: key facts, relevance-filtered session data (only
/// when it fits in half of what is left), recent conversation (truncated to
/// fit), and related past conversations (only with more than 200 tokens left).
pub struct ContextBuilder {
    relevance: RelevanceFilter,
    memory: Arc<dyn ConversationMemory>,
    max_tokens: usize,
}

impl ContextBuilder {
    pub fn new(relevance: RelevanceFilter, memory: Arc<dyn ConversationMemory>, max_tokens: usize) -> Self {
        Self {
            relevance,
            memory,
            max_tokens,
        }
    }

    pub async fn build(&self, query: &str, items: Vec<DataItem>, recent_conversation: &str) -> String {
        let mut sections = Vec::new();
        let mut remaining = self.max_tokens;

        match self.memory.facts(query, MAX_FACTS).await {
            Ok(facts) if !facts.is_empty() => {
                let mut section = String::from("### Key Facts\n");
                for fact in facts.iter().take(MAX_FACTS) {
                    section.push_str(&format!("- {}\n", fact));
                }
                push_within(&mut sections, &mut remaining, section);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Fact lookup failed: {}", e),
        }

        if !items.is_empty() {
            let relevant = self.relevance.filter_default(items, Some(query)).await;
            if !relevant.is_empty() {
                let section = format!("### Current Session Data\n{}\n", render::context_block(&relevant));
                if estimate_tokens(&section) <= remaining / 2 {
                    push_within(&mut sections, &mut remaining, section);
                } else {
                    tracing::debug!(
                        item_count = relevant.len(),
                        remaining,
                        "Session data does not fit the context budget"
                    );
                }
            }
        }

        if !recent_conversation.trim().is_empty() && remaining > 0 {
            let header = "### Recent Conversation\n";
            let budget_chars = (remaining * 4).saturating_sub(header.len() + 1);
            let body = if recent_conversation.chars().count() > budget_chars {
                let keep = budget_chars.saturating_sub(TRUNCATED_MARKER.len());
                let mut cut: String = recent_conversation.chars().take(keep).collect();
                cut.push_str(TRUNCATED_MARKER);
                cut
            } else {
                recent_conversation.to_string()
            };
            push_within(&mut sections, &mut remaining, format!("{}{}\n", header, body));
        }

        if remaining > MIN_TOKENS_FOR_EPISODES {
            match self.memory.recall(query, MAX_EPISODES).await {
                Ok(episodes) => {
                    let lines: Vec<String> = episodes
                        .iter()
                        .filter(|episode| episode.similarity > EPISODE_SIMILARITY)
                        .take(MAX_EPISODES)
                        .map(|episode| format!("- {}", truncate_chars(&episode.turn.as_text(), EPISODE_CHARS)))
                        .collect();
                    if !lines.is_empty() {
                        let section = format!("### Related Past Conversations\n{}\n", lines.join("\n"));
                        if estimate_tokens(&section) <= remaining {
                            push_within(&mut sections, &mut remaining, section);
                        }
                    }
                }
                Err(e) => tracing::warn!("Memory recall failed: {}", e),
            }
        }

        sections.join("\n").trim_end().to_string()
    }
}

fn push_within(sections: &mut Vec<String>, remaining: &mut usize, section: String) {
    *remaining = remaining.saturating_sub(estimate_tokens(&section));
    sections.push(section);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::KeywordEmbedder;
    use async_trait::async_trait;
    use medroute_core::memory::{ConversationTurn, NoOpMemory, RecalledEpisode};
    use medroute_core::session::ICD_CODE;

    struct FixedMemory {
        facts: Vec<String>,
        episodes: Vec<RecalledEpisode>,
    }

    #[async_trait]
    impl ConversationMemory for FixedMemory {
        async fn store_turn(&self, _turn: ConversationTurn) -> Result<(), String> {
            Ok(())
        }

        async fn recall(&self, _query: &str, _limit: usize) -> Result<Vec<RecalledEpisode>, String> {
            Ok(self.episodes.clone())
        }

        async fn facts(&self, _query: &str, _limit: usize) -> Result<Vec<String>, String> {
            Ok(self.facts.clone())
        }
    }

    fn relevance() -> RelevanceFilter {
        RelevanceFilter::new(Arc::new(KeywordEmbedder::new(&["hypertension", "diabetes"])))
    }

    fn episode(query: &str, similarity: f64) -> RecalledEpisode {
        RecalledEpisode {
            turn: ConversationTurn::new("old", query, "answer", "chat"),
            similarity,
        }
    }

    #[tokio::test]
    async fn test_sections_in_order_with_relevant_items_only() {
        let memory = Arc::new(FixedMemory {
            facts: vec!["Analyst works on cardiology studies".to_string()],
            episodes: vec![episode("hypertension in pregnancy", 0.9), episode("asthma", 0.2)],
        });
        let builder = ContextBuilder::new(relevance(), memory, 2000);
        let items = vec![
            DataItem::new(ICD_CODE, "I10", "Essential hypertension"),
            DataItem::new(ICD_CODE, "E11", "Type 2 diabetes mellitus"),
        ];

        let context = builder
            .build("what about hypertension?", items, "user: find hypertension codes")
            .await;

        let facts = context.find("### Key Facts").unwrap();
        let data = context.find("### Current Session Data").unwrap();
        let recent = context.find("### Recent Conversation").unwrap();
        let past = context.find("### Related Past Conversations").unwrap();
        assert!(facts < data && data < recent && recent < past);
        assert!(context.contains("[I10] Essential hypertension"));
        assert!(!context.contains("[E11]"));
        assert!(context.contains("hypertension in pregnancy"));
        assert!(!context.contains("User: asthma"));
    }

    #[tokio::test]
    async fn test_long_conversation_is_truncated_to_budget() {
        let builder = ContextBuilder::new(relevance(), Arc::new(NoOpMemory), 50);
        let conversation = "user: tell me more\n".repeat(100);

        let context = builder.build("more", Vec::new(), &conversation).await;

        assert!(context.starts_with("### Recent Conversation"));
        assert!(context.ends_with(TRUNCATED_MARKER));
        assert!(estimate_tokens(&context) <= 50);
    }

    #[tokio::test]
    async fn test_session_data_skipped_when_over_half_budget() {
        let builder = ContextBuilder::new(relevance(), Arc::new(NoOpMemory), 20);
        let items = vec![DataItem::new(
            ICD_CODE,
            "I10",
            "Essential hypertension with a very long description that does not fit",
        )];

        let context = builder.build("hypertension", items, "").await;

        assert!(context.is_empty());
    }
}
