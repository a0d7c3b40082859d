use crate::capability::{ChatMessage, ChatRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of messages kept per conversation.
pub const DEFAULT_MAX_MESSAGES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable form of one session's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
    pub saved_at: DateTime<Utc>,
}

/// Bounded log of recent conversation turns.
///
/// Oldest messages drop off once `max_messages` is reached.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<HistoryMessage>,
    max_messages: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        if self.messages.len() == self.max_messages {
            self.messages.pop_front();
        }
        self.messages.push_back(HistoryMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatRole::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatRole::Assistant, content);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &HistoryMessage> {
        self.messages.iter().skip(self.messages.len().saturating_sub(n))
    }

    /// The last `n` messages as `role: content` lines.
    pub fn recent_context(&self, n: usize) -> String {
        self.recent(n)
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The last `n` messages as chat messages for a generation request.
    pub fn to_chat_messages(&self, n: usize) -> Vec<ChatMessage> {
        self.recent(n)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn to_record(&self, session_id: impl Into<String>) -> ConversationRecord {
        ConversationRecord {
            session_id: session_id.into(),
            messages: self.messages.iter().cloned().collect(),
            saved_at: Utc::now(),
        }
    }

    /// Rebuilds a history from a stored record, keeping the newest
    /// `max_messages` when the record holds more.
    pub fn from_record(record: ConversationRecord, max_messages: usize) -> Self {
        let mut history = Self::new(max_messages);
        let skip = record.messages.len().saturating_sub(history.max_messages);
        history.messages = record.messages.into_iter().skip(skip).collect();
        history
    }
}
