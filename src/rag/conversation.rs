use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::llm::{LlmMessage, Role};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Rough token estimate for conversation budgeting: one token per four
/// characters, which is close for both Chinese and English chat text.
fn message_tokens(message: &LlmMessage) -> usize {
    message.content.chars().count() / 4
}

/// A single conversation session: an ordered message log with a turn
/// counter that tracks assistant replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: Vec<LlmMessage>,
    /// Unix seconds at creation.
    pub created_at: u64,
    /// Unix seconds of the last append.
    pub updated_at: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub turn_count: usize,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = unix_now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            turn_count: 0,
        }
    }

    /// Append a message; an assistant message completes a turn.
    pub fn add_message(&mut self, message: LlmMessage) {
        if message.role == Role::Assistant {
            self.turn_count += 1;
        }
        self.messages.push(message);
        self.updated_at = unix_now();
    }

    /// Messages for the LLM, bounded by an approximate token budget.
    ///
    /// Unbounded returns a copy in order. Bounded always includes system
    /// messages, then packs the most recent non-system messages
    /// (newest first) while the budget holds, inserting each after the
    /// system block so chronology is preserved.
    pub fn get_messages(&self, max_tokens: Option<usize>) -> Vec<LlmMessage> {
        let Some(max_tokens) = max_tokens else {
            return self.messages.clone();
        };

        let system: Vec<LlmMessage> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let system_len = system.len();
        let mut tokens_used: usize = system.iter().map(message_tokens).sum();

        let mut result = system;
        for message in self.messages.iter().rev().filter(|m| m.role != Role::System) {
            let tokens = message_tokens(message);
            if tokens_used + tokens > max_tokens {
                break;
            }
            result.insert(system_len, message.clone());
            tokens_used += tokens;
        }

        result
    }

    /// Drop non-system messages (and optionally system ones) and zero
    /// the turn counter.
    pub fn clear_history(&mut self, keep_system: bool) {
        if keep_system {
            self.messages.retain(|m| m.role == Role::System);
        } else {
            self.messages.clear();
        }
        self.turn_count = 0;
        self.updated_at = unix_now();
    }
}

/// Manages conversation sessions, optionally persisting each as a JSON
/// file under a storage directory.
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    storage_dir: Option<PathBuf>,
}

impl ConversationStore {
    pub fn new(storage_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = &storage_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                debug!(dir = %dir.display(), error = %e, "cannot create conversation dir");
            }
        }
        Self {
            conversations: HashMap::new(),
            storage_dir,
        }
    }

    /// Create a conversation, optionally seeding a system message.
    pub fn create(
        &mut self,
        session_id: &str,
        system_message: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) -> &mut Conversation {
        let mut conversation = Conversation::new(session_id);
        if let Some(metadata) = metadata {
            conversation.metadata = metadata;
        }
        if let Some(system) = system_message {
            conversation.add_message(LlmMessage::new(Role::System, system));
        }
        self.conversations
            .entry(session_id.to_string())
            .or_insert(conversation)
    }

    /// Fetch a conversation, loading from disk on an in-memory miss.
    pub fn get(&mut self, session_id: &str) -> Option<&mut Conversation> {
        if !self.conversations.contains_key(session_id) {
            if let Some(loaded) = self.load(session_id) {
                self.conversations.insert(session_id.to_string(), loaded);
            }
        }
        self.conversations.get_mut(session_id)
    }

    /// Persist a conversation. Returns false without a storage dir or on
    /// any write failure.
    pub fn save(&self, session_id: &str) -> bool {
        let Some(dir) = &self.storage_dir else {
            return false;
        };
        let Some(conversation) = self.conversations.get(session_id) else {
            return false;
        };
        let path = dir.join(format!("{session_id}.json"));
        match serde_json::to_string_pretty(conversation) {
            Ok(json) => std::fs::write(&path, json).is_ok(),
            Err(_) => false,
        }
    }

    /// Load a conversation from disk, or `None` on any failure.
    pub fn load(&self, session_id: &str) -> Option<Conversation> {
        let dir = self.storage_dir.as_ref()?;
        let path = dir.join(format!("{session_id}.json"));
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Remove a conversation from memory and disk.
    pub fn delete(&mut self, session_id: &str) -> bool {
        self.conversations.remove(session_id);
        if let Some(dir) = &self.storage_dir {
            let path = dir.join(format!("{session_id}.json"));
            if path.exists() {
                return std::fs::remove_file(path).is_ok();
            }
        }
        true
    }

    /// All known session ids, in-memory and on-disk, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: std::collections::HashSet<String> =
            self.conversations.keys().cloned().collect();
        if let Some(dir) = &self.storage_dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            ids.insert(stem.to_string());
                        }
                    }
                }
            }
        }
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        ids
    }

    /// Drop every conversation from memory and disk.
    pub fn clear_all(&mut self) {
        self.conversations.clear();
        if let Some(dir) = &self.storage_dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
        }
    }
}
