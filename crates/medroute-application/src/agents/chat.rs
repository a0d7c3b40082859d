use crate::prompts;
use medroute_core::capability::{ChatMessage, GenerationConfig, Generator};
use medroute_core::error::Result;
use medroute_core::text::strip_tags;
use minijinja::context;
use std::sync::Arc;

const CHAT_CONFIG: GenerationConfig = GenerationConfig::new(1000, 0.3);

/// General-knowledge answers, optionally grounded in assembled context.
pub struct ChatAgent {
    generator: Arc<dyn Generator>,
}

impl ChatAgent {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Answers `query`. `history` is replayed between the system prompt and the question.
    pub async fn answer(&self, query: &str, context: &str, history: Vec<ChatMessage>) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(prompts::render(prompts::CHAT_SYSTEM, context! {})?));
        messages.extend(history);
        messages.push(ChatMessage::user(prompts::render(
            prompts::FOLLOWUP_USER,
            context! { context, query },
        )?));

        let answer = self.generator.generate(&messages, CHAT_CONFIG).await?;
        Ok(strip_tags(&answer))
    }
}
