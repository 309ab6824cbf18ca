//! Conversations and the in-memory session store.
//!
//! A `Conversation` always starts with the system prompt and only grows;
//! `clear()` drops everything after it. Sessions idle past the configured
//! timeout expire, and a full store evicts its least recently used session.
//! A session with a turn in progress is never dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::AgentError;
use super::turn::TurnContext;
use crate::inference::types::{ChatMessage, Role};

// ─── Conversation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Reset to just the system prompt.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    /// Messages after the system prompt.
    pub fn history(&self) -> &[ChatMessage] {
        match self.messages.first() {
            Some(first) if first.role == Role::System => &self.messages[1..],
            _ => &self.messages,
        }
    }
}

// ─── Session ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub conversation: Conversation,
    pub turn: TurnContext,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String, system_prompt: &str) -> Self {
        Self {
            id,
            conversation: Conversation::new(system_prompt),
            turn: TurnContext::new(),
            created_at: Utc::now(),
        }
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Bounds on the session store.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

struct Slot {
    session: SharedSession,
    last_used: Instant,
}

impl Slot {
    /// Another handle exists, so a turn holds or waits for this session.
    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }
}

/// Sessions keyed by id. Each session is locked independently so turns in
/// different sessions run concurrently.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Slot>>,
    system_prompt: String,
    limits: SessionLimits,
}

impl SessionStore {
    pub fn new(system_prompt: &str) -> Self {
        Self::with_limits(system_prompt, SessionLimits::default())
    }

    pub fn with_limits(system_prompt: &str, limits: SessionLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            system_prompt: system_prompt.to_string(),
            limits,
        }
    }

    pub fn set_limits(&mut self, limits: SessionLimits) {
        self.limits = limits;
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot>>, AgentError> {
        self.sessions.lock().map_err(|e| AgentError::StateUnavailable {
            reason: format!("lock error: {e}"),
        })
    }

    /// Existing session for `id`, or a new one. A client-supplied id that is
    /// not known yet is adopted as-is.
    pub fn get_or_create(&self, id: Option<&str>) -> Result<(String, SharedSession), AgentError> {
        let now = Instant::now();
        let mut sessions = self.lock()?;
        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        if let Some(slot) = sessions.get_mut(&id) {
            slot.last_used = now;
            return Ok((id, slot.session.clone()));
        }

        self.evict(&mut sessions, now);
        let session = Arc::new(tokio::sync::Mutex::new(Session::new(id.clone(), &self.system_prompt)));
        sessions.insert(
            id.clone(),
            Slot {
                session: session.clone(),
                last_used: now,
            },
        );
        tracing::info!(session_id = %id, sessions = sessions.len(), "session created");
        Ok((id, session))
    }

    /// Drop idle sessions, then least recently used ones until a new
    /// session fits.
    fn evict(&self, sessions: &mut HashMap<String, Slot>, now: Instant) {
        sessions.retain(|id, slot| {
            let expired = !slot.is_busy() && now.duration_since(slot.last_used) >= self.limits.idle_timeout;
            if expired {
                tracing::info!(session_id = %id, "idle session expired");
            }
            !expired
        });

        while sessions.len() >= self.limits.max_sessions.max(1) {
            let oldest = sessions
                .iter()
                .filter(|(_, slot)| !slot.is_busy())
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    tracing::info!(session_id = %id, "session evicted, store full");
                }
                None => {
                    tracing::warn!(sessions = sessions.len(), "session store full and every session busy");
                    break;
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<SharedSession, AgentError> {
        let mut sessions = self.lock()?;
        let slot = sessions.get_mut(id).ok_or_else(|| AgentError::SessionNotFound {
            session_id: id.to_string(),
        })?;
        slot.last_used = Instant::now();
        Ok(slot.session.clone())
    }

    pub fn remove(&self, id: &str) -> Result<(), AgentError> {
        match self.lock()?.remove(id) {
            Some(_) => {
                tracing::info!(session_id = %id, "session removed");
                Ok(())
            }
            None => Err(AgentError::SessionNotFound {
                session_id: id.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_clear_keeps_system_prompt() {
        let mut conv = Conversation::new("be brief");
        conv.push(ChatMessage::user("hi"));
        conv.push(ChatMessage::assistant("hello"));
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.history().len(), 2);

        conv.clear();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[0].content.as_deref(), Some("be brief"));
    }

    #[tokio::test]
    async fn test_session_store_lifecycle() {
        let store = SessionStore::new("sys");
        let (id, session) = store.get_or_create(None).unwrap();
        assert_eq!(session.lock().await.id, id);

        let (_, again) = store.get_or_create(Some(&id)).unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(store.len(), 1);

        let (_, adopted) = store.get_or_create(Some("client-chosen")).unwrap();
        assert_eq!(adopted.lock().await.id, "client-chosen");
        assert_eq!(store.len(), 2);

        store.remove(&id).unwrap();
        assert!(matches!(store.get(&id), Err(AgentError::SessionNotFound { .. })));
        assert!(store.remove(&id).is_err());
    }

    #[test]
    fn test_full_store_evicts_idle_session_not_busy_one() {
        let store = SessionStore::with_limits(
            "sys",
            SessionLimits {
                max_sessions: 2,
                idle_timeout: Duration::from_secs(3600),
            },
        );
        let (_, busy) = store.get_or_create(Some("a")).unwrap();
        store.get_or_create(Some("b")).unwrap();
        store.get_or_create(Some("c")).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_ok());
        assert!(matches!(store.get("b"), Err(AgentError::SessionNotFound { .. })));
        drop(busy);

        for n in 0..50 {
            store.get_or_create(Some(format!("client-{n}").as_str())).unwrap();
        }
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_idle_sessions_expire() {
        let store = SessionStore::with_limits(
            "sys",
            SessionLimits {
                max_sessions: 100,
                idle_timeout: Duration::ZERO,
            },
        );
        store.get_or_create(Some("old")).unwrap();
        let (_, held) = store.get_or_create(Some("held")).unwrap();
        store.get_or_create(Some("new")).unwrap();

        assert!(store.get("old").is_err());
        assert!(store.get("held").is_ok());
        assert!(store.get("new").is_ok());
        drop(held);
    }
}
