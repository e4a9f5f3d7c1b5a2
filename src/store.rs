// 🗄️ Session Store - the durable list of finalized sessions
//
// Newest session first, always. Consumers take "most recent N" with a plain
// slice and never re-sort. The whole list is rewritten on every mutation.

use crate::models::ReconcileSession;
use crate::storage::{Storage, SESSIONS_KEY};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SessionStore {
    sessions: Vec<ReconcileSession>,
    storage: Arc<dyn Storage>,
}

impl SessionStore {
    /// Load the stored sessions. Missing or corrupt state degrades to an
    /// empty list.
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let sessions = match read_sessions(storage.as_ref()) {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %format!("{:#}", err), "stored sessions unreadable, starting empty");
                Vec::new()
            }
        };

        debug!(count = sessions.len(), "sessions loaded");
        SessionStore { sessions, storage }
    }

    /// Insert at the head. Memory is only updated once the write succeeded.
    pub fn append(&mut self, session: ReconcileSession) -> Result<()> {
        let mut candidate = Vec::with_capacity(self.sessions.len() + 1);
        candidate.push(session);
        candidate.extend(self.sessions.iter().cloned());

        self.commit(candidate)
    }

    /// Cascade a category rename into every stored transaction.
    /// Totals and ordering are unchanged. Returns the number of rewritten
    /// transactions; nothing is persisted when none changed. On a write
    /// failure the stored list is left as it was.
    pub fn apply_category_rename(&mut self, old_name: &str, new_name: &str) -> Result<usize> {
        let mut candidate = self.sessions.clone();
        let changed: usize = candidate
            .iter_mut()
            .map(|session| session.rename_category(old_name, new_name))
            .sum();

        if changed > 0 {
            self.commit(candidate)?;
        }
        Ok(changed)
    }

    /// Put back a previously taken snapshot (rollback of a failed cascade).
    /// Memory is restored even if the write fails.
    pub fn restore(&mut self, snapshot: Vec<ReconcileSession>) -> Result<()> {
        self.sessions = snapshot;
        self.persist()
    }

    /// Read-only ordered snapshot
    pub fn all(&self) -> &[ReconcileSession] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&ReconcileSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn persist(&self) -> Result<()> {
        write_sessions(self.storage.as_ref(), &self.sessions)
    }

    fn commit(&mut self, candidate: Vec<ReconcileSession>) -> Result<()> {
        write_sessions(self.storage.as_ref(), &candidate)?;
        self.sessions = candidate;
        Ok(())
    }
}

fn write_sessions(storage: &dyn Storage, sessions: &[ReconcileSession]) -> Result<()> {
    let json = serde_json::to_string(sessions).context("Failed to serialize sessions")?;
    storage.write(SESSIONS_KEY, &json)
}

fn read_sessions(storage: &dyn Storage) -> Result<Vec<ReconcileSession>> {
    match storage.read(SESSIONS_KEY)? {
        Some(json) => serde_json::from_str(&json).context("Failed to parse stored sessions"),
        None => Ok(Vec::new()),
    }
}
