//! Message timeline — one ordered view over backfill, transcription and chat.
//!
//! Ordering rule: ascending by timestamp, except that a locally authored
//! entry sorts ahead of a remote one when the two are closer than the
//! threshold. Shifting local entries back by the threshold and breaking
//! exact key ties remote-first gives a total order with exactly that
//! pairwise behaviour, so a stable sort over it is deterministic.

use assessment_protocol::agent::{ChatPayload, HistoryItem, HistoryRole, TranscriptionSegment};

pub const DEFAULT_MERGE_THRESHOLD_MS: i64 = 1000;
const DEFAULT_AGENT_IDENTITY: &str = "agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote(String),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

/// One normalized timeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub origin: Origin,
    pub text: String,
    pub is_historical: bool,
}

/// The three live inputs of the merge, owned by the session.
#[derive(Debug, Clone, Default)]
pub struct TimelineSources {
    history: Vec<ChatMessage>,
    transcriptions: Vec<ChatMessage>,
    chat: Vec<ChatMessage>,
}

impl TimelineSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace backfill with normalized rows; `system` turns are dropped.
    ///
    /// Rows without a `created_at` are placed before `received_at`, spaced
    /// one threshold apart so the tie-break never reorders them.
    pub fn load_history(
        &mut self,
        items: &[HistoryItem],
        agent_identity: Option<&str>,
        received_at: i64,
        threshold_ms: i64,
    ) {
        let rows: Vec<&HistoryItem> = items
            .iter()
            .filter(|item| item.role != HistoryRole::System)
            .collect();
        let count = rows.len() as i64;
        let spacing = threshold_ms.max(1);
        let agent = agent_identity.unwrap_or(DEFAULT_AGENT_IDENTITY);

        self.history = rows
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let index = index as i64;
                let timestamp = item
                    .created_at
                    .map(epoch_millis)
                    .unwrap_or_else(|| received_at - (count - index) * spacing);
                ChatMessage {
                    id: item
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("history-{index}")),
                    timestamp,
                    origin: match item.role {
                        HistoryRole::User => Origin::Local,
                        _ => Origin::Remote(agent.to_string()),
                    },
                    text: item.content.joined(),
                    is_historical: true,
                }
            })
            .collect();
    }

    /// Insert a transcription segment, or update the text of one already seen.
    pub fn upsert_transcription(&mut self, segment: &TranscriptionSegment, is_local: bool) {
        if let Some(existing) = self
            .transcriptions
            .iter_mut()
            .find(|m| m.id == segment.id)
        {
            existing.text = segment.text.clone();
            return;
        }
        self.transcriptions.push(ChatMessage {
            id: segment.id.clone(),
            timestamp: segment.timestamp,
            origin: origin_for(is_local, &segment.participant_identity),
            text: segment.text.clone(),
            is_historical: false,
        });
    }

    pub fn push_chat(&mut self, payload: &ChatPayload, is_local: bool) {
        if self.chat.iter().any(|m| m.id == payload.id) {
            return;
        }
        let identity = payload
            .from_identity
            .as_deref()
            .unwrap_or(DEFAULT_AGENT_IDENTITY);
        self.chat.push(ChatMessage {
            id: payload.id.clone(),
            timestamp: payload.timestamp,
            origin: origin_for(is_local, identity),
            text: payload.message.clone(),
            is_historical: false,
        });
    }

    /// Forget everything tied to the current connection.
    pub fn clear(&mut self) {
        self.history.clear();
        self.transcriptions.clear();
        self.chat.clear();
    }

    pub fn merged(&self, threshold_ms: i64) -> Vec<ChatMessage> {
        merge(&self.history, &self.transcriptions, &self.chat, threshold_ms)
    }
}

fn origin_for(is_local: bool, identity: &str) -> Origin {
    if is_local {
        Origin::Local
    } else {
        Origin::Remote(identity.to_string())
    }
}

/// Agents send `created_at` in seconds or milliseconds.
fn epoch_millis(value: f64) -> i64 {
    if value.abs() >= 1e12 {
        value as i64
    } else {
        (value * 1000.0) as i64
    }
}

fn sort_key(message: &ChatMessage, threshold_ms: i64) -> (i64, u8) {
    match message.origin {
        Origin::Local => (message.timestamp.saturating_sub(threshold_ms), 1),
        Origin::Remote(_) => (message.timestamp, 0),
    }
}

/// Concatenate the three sources and order them.
pub fn merge(
    history: &[ChatMessage],
    transcriptions: &[ChatMessage],
    chat: &[ChatMessage],
    threshold_ms: i64,
) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = history
        .iter()
        .chain(transcriptions)
        .chain(chat)
        .cloned()
        .collect();
    merged.sort_by_key(|m| sort_key(m, threshold_ms));
    merged
}

/// Keeps the longest merged list seen so messages survive a disconnect.
#[derive(Debug, Clone, Default)]
pub struct RetainedTimeline {
    messages: Vec<ChatMessage>,
}

impl RetainedTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt `merged` only if it is at least as long as what we hold.
    pub fn observe(&mut self, merged: &[ChatMessage]) -> &[ChatMessage] {
        if merged.len() >= self.messages.len() {
            self.messages = merged.to_vec();
        }
        &self.messages
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
