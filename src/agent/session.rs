// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation session and store seam
//!
//! Transcript persistence is owned by a collaborator service; the engine
//! only appends messages and reads the tail for context. The in-memory
//! store backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::llm::message::Message;

/// One conversation, keyed by the preview build it debugs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Preview build this conversation is about
    pub build_uuid: Uuid,

    /// Ordered transcript
    pub messages: Vec<Message>,

    /// Last append time
    pub last_activity: DateTime<Utc>,
}

impl ConversationSession {
    /// Create an empty session
    pub fn new(build_uuid: Uuid) -> Self {
        Self {
            build_uuid,
            messages: vec![],
            last_activity: Utc::now(),
        }
    }
}

/// Transcript persistence seam
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to a conversation, creating it if needed
    async fn append_message(&self, build_uuid: Uuid, message: Message) -> Result<()>;

    /// Read up to `limit` most recent messages, oldest first
    async fn read_tail(&self, build_uuid: Uuid, limit: usize) -> Result<Vec<Message>>;
}

/// In-memory conversation store
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, ConversationSession>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages in one conversation
    pub fn message_count(&self, build_uuid: Uuid) -> usize {
        let sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions
            .get(&build_uuid)
            .map(|s| s.messages.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_message(&self, build_uuid: Uuid, message: Message) -> Result<()> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("session store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let session = sessions
            .entry(build_uuid)
            .or_insert_with(|| ConversationSession::new(build_uuid));
        session.messages.push(message);
        session.last_activity = Utc::now();
        Ok(())
    }

    async fn read_tail(&self, build_uuid: Uuid, limit: usize) -> Result<Vec<Message>> {
        let sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let messages = sessions
            .get(&build_uuid)
            .map(|s| {
                let skip = s.messages.len().saturating_sub(limit);
                s.messages[skip..].to_vec()
            })
            .unwrap_or_default();
        Ok(messages)
    }
}
