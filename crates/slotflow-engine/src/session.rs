//! Session state store.
//!
//! Each session sits behind its own async mutex, so turns for one session
//! are serialized while turns for different sessions run independently. The
//! outer map lock is held only to find or insert a session, never across a
//! turn.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info};

use slotflow_core::types::{DomainId, SessionId, Timestamp, UserId};

use crate::error::EngineError;
use crate::flow::{DomainFlow, FlowStage};
use crate::schema::RecordSchema;
use crate::slots::SlotStatus;

/// One exchange kept in the session history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRecord {
    pub utterance: String,
    pub reply: String,
    pub at: Timestamp,
}

/// One ongoing conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    /// Flow of the active domain, if any.
    pub flow: Option<DomainFlow>,
    pub turn_count: u64,
    pub created_at: Timestamp,
    pub last_active_at: Timestamp,
    pub history: VecDeque<TurnRecord>,
}

impl Session {
    pub fn new(id: SessionId, user_id: UserId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            user_id,
            flow: None,
            turn_count: 0,
            created_at: now,
            last_active_at: now,
            history: VecDeque::new(),
        }
    }

    pub fn active_domain(&self) -> Option<&DomainId> {
        self.flow.as_ref().map(|f| &f.domain)
    }

    pub fn is_idle(&self, now: Timestamp, idle_timeout_secs: i64) -> bool {
        self.last_active_at.seconds_until(now) >= idle_timeout_secs
    }

    /// Count a completed turn and remember it, keeping at most `limit` turns.
    pub fn record_turn(&mut self, utterance: &str, reply: &str, limit: usize) {
        let now = Timestamp::now();
        self.turn_count += 1;
        self.last_active_at = now;
        if limit == 0 {
            return;
        }
        self.history.push_back(TurnRecord {
            utterance: utterance.to_string(),
            reply: reply.to_string(),
            at: now,
        });
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Point-in-time view for display and debugging. Slots are listed in
    /// schema order when the schema is known.
    pub fn snapshot(&self, schema: Option<&RecordSchema>) -> SessionSnapshot {
        let slots = match (&self.flow, schema) {
            (Some(flow), Some(schema)) => flow
                .slots
                .iter_in_order(schema)
                .map(|(spec, entry)| SlotSnapshot {
                    name: spec.name.clone(),
                    value: entry.value.as_ref().map(|v| v.to_string()),
                    status: entry.status,
                })
                .collect(),
            _ => Vec::new(),
        };

        SessionSnapshot {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            active_domain: self.active_domain().cloned(),
            stage: self.flow.as_ref().map(|f| f.stage),
            awaiting: self.flow.as_ref().and_then(|f| f.awaiting.clone()),
            pending_commit: self.flow.as_ref().is_some_and(|f| f.pending.is_some()),
            slots,
            turn_count: self.turn_count,
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub active_domain: Option<DomainId>,
    pub stage: Option<FlowStage>,
    pub awaiting: Option<String>,
    pub pending_commit: bool,
    pub slots: Vec<SlotSnapshot>,
    pub turn_count: u64,
    pub created_at: Timestamp,
    pub last_active_at: Timestamp,
    pub history: Vec<TurnRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub name: String,
    pub value: Option<String>,
    pub status: SlotStatus,
}

/// Handle to one session. Lock it for the duration of a turn.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

struct Entry {
    owner: UserId,
    session: SessionHandle,
}

/// In-memory store of live sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    idle_timeout_secs: i64,
}

impl SessionStore {
    pub fn new(idle_timeout_secs: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout_secs,
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the session for a turn, creating it on first use.
    ///
    /// An idle-expired session is replaced by a fresh one. A live session
    /// owned by another user is refused.
    pub fn open(&self, id: &SessionId, user_id: &UserId) -> Result<SessionHandle, EngineError> {
        let mut map = self.map();

        if let Some(entry) = map.get(id) {
            // A session locked by an in-flight turn is active by definition.
            let expired = entry
                .session
                .try_lock()
                .map(|s| s.is_idle(Timestamp::now(), self.idle_timeout_secs))
                .unwrap_or(false);

            if !expired {
                if entry.owner != *user_id {
                    return Err(EngineError::OwnerMismatch(id.clone()));
                }
                return Ok(Arc::clone(&entry.session));
            }
            info!(session_id = %id, "Session expired, starting fresh");
        }

        debug!(session_id = %id, user_id = %user_id, "Session created");
        let session = Arc::new(tokio::sync::Mutex::new(Session::new(
            id.clone(),
            user_id.clone(),
        )));
        map.insert(
            id.clone(),
            Entry {
                owner: user_id.clone(),
                session: Arc::clone(&session),
            },
        );
        Ok(session)
    }

    /// Get an existing session owned by `user_id`.
    pub fn get(&self, id: &SessionId, user_id: &UserId) -> Result<SessionHandle, EngineError> {
        let map = self.map();
        let entry = map
            .get(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.clone()))?;
        if entry.owner != *user_id {
            return Err(EngineError::OwnerMismatch(id.clone()));
        }
        Ok(Arc::clone(&entry.session))
    }

    /// Drop a session. Returns whether it existed.
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = self.map().remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session closed");
        }
        removed
    }

    /// Remove every idle session not currently in a turn. Returns how many
    /// were removed.
    pub fn purge_idle(&self) -> usize {
        let now = Timestamp::now();
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, entry| match entry.session.try_lock() {
            Ok(session) => !session.is_idle(now, self.idle_timeout_secs),
            Err(_) => true,
        });
        let purged = before - map.len();
        if purged > 0 {
            info!(purged, remaining = map.len(), "Purged idle sessions");
        }
        purged
    }

    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.map().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
