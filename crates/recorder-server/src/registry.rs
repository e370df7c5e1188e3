//! Connection-keyed registry of open stream sessions.
//!
//! This map is the only shared mutable state in the server: every open,
//! write, and close passes through it, so "at most one session per
//! connection" holds by construction. Entries are `Arc<Mutex<_>>` so sink
//! I/O happens outside the map lock and one session's blocking write cannot
//! stall unrelated connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{SessionError, StreamSession};

/// Stable identity of one client connection; scopes exactly one open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(u64);

impl SessionKey {
    pub fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<Mutex<StreamSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the session opened for `key`. Fails with `AlreadyOpen` when
    /// the key is occupied, leaving the existing entry untouched.
    pub fn register(&self, key: SessionKey, session: StreamSession) -> Result<(), SessionError> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(&key) {
            return Err(SessionError::AlreadyOpen);
        }
        sessions.insert(key, Arc::new(Mutex::new(session)));
        Ok(())
    }

    pub fn is_open(&self, key: SessionKey) -> bool {
        lock(&self.sessions).contains_key(&key)
    }

    pub fn lookup(&self, key: SessionKey) -> Option<Arc<Mutex<StreamSession>>> {
        lock(&self.sessions).get(&key).cloned()
    }

    pub fn deregister(&self, key: SessionKey) -> Option<Arc<Mutex<StreamSession>>> {
        lock(&self.sessions).remove(&key)
    }

    pub fn open_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Force-close every registered session (process shutdown). Returns the
    /// number of sessions that were still open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.sessions).drain().collect();
        let count = drained.len();
        for (key, entry) in drained {
            match into_session(entry) {
                Some(session) => {
                    let target = session.serve_path().to_string();
                    if let Err(e) = session.close() {
                        tracing::warn!(key = %key, target = %target, "forced close failed: {e}");
                    } else {
                        tracing::info!(key = %key, target = %target, "forced close");
                    }
                }
                None => tracing::warn!(key = %key, "session still referenced during shutdown"),
            }
        }
        count
    }
}

/// Unwrap a deregistered entry back into the owned session.
///
/// Returns `None` when another reference is still alive, which cannot happen
/// while each key is driven by a single connection thread.
pub fn into_session(entry: Arc<Mutex<StreamSession>>) -> Option<StreamSession> {
    Arc::try_unwrap(entry)
        .ok()
        .map(|m| m.into_inner().unwrap_or_else(|err| err.into_inner()))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|err| err.into_inner())
}
