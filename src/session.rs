//! Session-scoped key store.
//!
//! A generic store mapping an opaque, randomly generated key to a context
//! object, with every key owned by a session. The defining property is the
//! session lifecycle hook: when the transport layer reports a session as
//! ended, every key that session owns is removed in one bulk operation, so
//! no key outlives its session.
//!
//! The per-session key set sits behind its own mutex; `issue` and
//! `on_session_end` for the same session contend only on that one lock, and
//! ending a session is O(keys-for-that-session), never O(all keys).

use crate::types::PrincipalId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identity of a transport-layer session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One issued key and its owning session.
#[derive(Debug, Clone)]
pub struct SessionKeyRecord<C> {
    pub context: C,
    pub session: SessionId,
    pub issued_at: DateTime<Utc>,
}

/// Optional re-validation applied on every resolve.
type Validator<C> = Box<dyn Fn(&SessionKeyRecord<C>) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct SessionKeys {
    /// Set once `on_session_end` has drained this association; a concurrent
    /// `issue` holding the old handle must start over instead of recording a
    /// key nothing will ever clean up.
    closed: bool,
    keys: HashSet<String>,
}

/// Generic session-scoped key store.
pub struct SessionKeyStore<C> {
    prefix: String,
    keys: DashMap<String, SessionKeyRecord<C>>,
    sessions: DashMap<SessionId, Arc<Mutex<SessionKeys>>>,
    single_use: bool,
    validator: Option<Validator<C>>,
    issued: AtomicU64,
    resolved: AtomicU64,
    revoked: AtomicU64,
}

impl<C: Clone + Send + Sync + 'static> SessionKeyStore<C> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            keys: DashMap::new(),
            sessions: DashMap::new(),
            single_use: false,
            validator: None,
            issued: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            revoked: AtomicU64::new(0),
        }
    }

    /// Keys from this store are consumed by their first successful resolve.
    pub fn single_use(mut self) -> Self {
        self.single_use = true;
        self
    }

    /// Install a re-validation hook run on every resolve. A failing hook
    /// revokes the key and resolves to absent.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&SessionKeyRecord<C>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Generate and record a new key owned by `session`.
    pub fn issue(&self, session: &SessionId, context: C) -> String {
        let key = format!("{}|{}", self.prefix, Uuid::new_v4().simple());
        let record = SessionKeyRecord {
            context,
            session: session.clone(),
            issued_at: Utc::now(),
        };

        loop {
            let slot = self
                .sessions
                .entry(session.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SessionKeys::default())))
                .clone();
            let mut guard = slot.lock();
            if guard.closed {
                // Lost the race against on_session_end; drop the stale
                // association and retry with a fresh one.
                drop(guard);
                self.sessions
                    .remove_if(session, |_, existing| Arc::ptr_eq(existing, &slot));
                continue;
            }
            guard.keys.insert(key.clone());
            // Recorded under the session lock so a concurrent session end
            // cannot miss this key.
            self.keys.insert(key.clone(), record);
            break;
        }

        self.issued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = %session, prefix = %self.prefix, "session key issued");
        key
    }

    /// Look up a key's context. Single-use stores consume the key.
    pub fn resolve(&self, key: &str) -> Option<C> {
        if self.single_use {
            let (_, record) = self.keys.remove(key)?;
            self.detach_from_session(key, &record.session);
            if let Some(validator) = &self.validator {
                if !validator(&record) {
                    return None;
                }
            }
            self.resolved.fetch_add(1, Ordering::Relaxed);
            return Some(record.context);
        }

        let record = self.keys.get(key)?;
        if let Some(validator) = &self.validator {
            if !validator(record.value()) {
                drop(record);
                self.revoke(key);
                return None;
            }
        }
        self.resolved.fetch_add(1, Ordering::Relaxed);
        Some(record.context.clone())
    }

    /// Resolve, additionally requiring that `presenting` is the session the
    /// key was issued to.
    pub fn resolve_for_session(&self, key: &str, presenting: &SessionId) -> Option<C> {
        {
            let record = self.keys.get(key)?;
            if &record.session != presenting {
                return None;
            }
        }
        self.resolve(key)
    }

    /// Remove a single key. Returns whether it existed.
    pub fn revoke(&self, key: &str) -> bool {
        match self.keys.remove(key) {
            Some((_, record)) => {
                self.detach_from_session(key, &record.session);
                self.revoked.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(session = %record.session, prefix = %self.prefix, "session key revoked");
                true
            }
            None => false,
        }
    }

    fn detach_from_session(&self, key: &str, session: &SessionId) {
        if let Some(slot) = self.sessions.get(session) {
            slot.lock().keys.remove(key);
        }
    }

    /// Remove every key owned by `session` in one bulk operation.
    pub fn on_session_end(&self, session: &SessionId) {
        if let Some((_, slot)) = self.sessions.remove(session) {
            let mut guard = slot.lock();
            guard.closed = true;
            let count = guard.keys.len();
            for key in guard.keys.drain() {
                self.keys.remove(&key);
            }
            if count > 0 {
                tracing::debug!(session = %session, keys = count, prefix = %self.prefix, "session ended, keys removed");
            }
        }
    }

    /// Number of live keys across all sessions.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of live keys owned by one session.
    pub fn keys_for(&self, session: &SessionId) -> usize {
        self.sessions
            .get(session)
            .map(|slot| slot.lock().keys.len())
            .unwrap_or(0)
    }

    /// (issued, resolved, revoked) counters.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.issued.load(Ordering::Relaxed),
            self.resolved.load(Ordering::Relaxed),
            self.revoked.load(Ordering::Relaxed),
        )
    }
}

/// API keys: resolve back to the owning session.
pub type ApiKeyStore = SessionKeyStore<SessionId>;

/// Single-use transform/auth tokens: resolve back to a user.
pub type TransformKeyStore = SessionKeyStore<PrincipalId>;

/// API key store with the standard self-consistency hook: the key's context
/// must still be the session that owns it.
pub fn api_key_store(prefix: impl Into<String>) -> ApiKeyStore {
    SessionKeyStore::new(prefix).with_validator(|record| record.context == record.session)
}

/// Single-use token store mapping a key to a user.
pub fn transform_key_store(prefix: impl Into<String>) -> TransformKeyStore {
    SessionKeyStore::new(prefix).single_use()
}
