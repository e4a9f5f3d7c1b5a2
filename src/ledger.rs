// 📒 Ledger - the application's single state root
//
// Built once at start-up around a persistence port and handed to every
// consumer (HTTP handlers, terminal viewer). It owns:
//   - the category registry   (durable, key `marie_categories`)
//   - the session store       (durable, key `marie_sessions`)
//   - the reconciliation workspace (transient)
//
// `rename_category` is the only operation that crosses entities.

use crate::entities::CategoryRegistry;
use crate::models::{Annotation, AnnotationField, ReconcileSession, Transaction};
use crate::reconciliation::{ReconciliationWorkspace, TransactionFilter};
use crate::storage::{Storage, CATEGORIES_KEY};
use crate::store::SessionStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to an extraction result handed to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Batch loaded into the workspace
    Loaded { count: usize },
    /// Nothing to reconcile; workspace left as it was
    NoCredits,
}

/// Workspace snapshot for display
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceView {
    pub transactions: Vec<WorkspaceRow>,
    pub total_count: usize,
    pub filtered_total: f64,
    pub pending_count: usize,
    pub completion_percent: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceRow {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub annotation: Annotation,
}

pub struct Ledger {
    storage: Arc<dyn Storage>,
    categories: CategoryRegistry,
    sessions: SessionStore,
    workspace: ReconciliationWorkspace,
}

impl Ledger {
    /// Load durable state. Unreadable records fall back to defaults.
    pub fn open(storage: Arc<dyn Storage>) -> Self {
        let categories = load_categories(storage.as_ref());
        let sessions = SessionStore::load(storage.clone());

        info!(
            categories = categories.count(),
            sessions = sessions.len(),
            "ledger opened"
        );

        Ledger {
            storage,
            categories,
            sessions,
            workspace: ReconciliationWorkspace::new(),
        }
    }

    // ========================================================================
    // CATEGORIES
    // ========================================================================

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    /// Add a trimmed, non-blank category
    pub fn add_category(&mut self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }

        let mut candidate = self.categories.clone();
        if !candidate.add(name) {
            return Ok(false);
        }
        self.commit_categories(candidate)?;
        Ok(true)
    }

    /// Rename a category everywhere: registry, stored sessions and pending
    /// workspace selections. A blank new name is ignored.
    ///
    /// All or nothing: sessions are written first, then the registry. If the
    /// registry write fails the sessions are put back.
    pub fn rename_category(&mut self, old_name: &str, new_name: &str) -> Result<bool> {
        let new_name = new_name.trim();
        let mut candidate = self.categories.clone();
        if new_name.is_empty() || !candidate.rename(old_name, new_name) {
            return Ok(false);
        }

        let snapshot = self.sessions.all().to_vec();
        let stored = self.sessions.apply_category_rename(old_name, new_name)?;

        if let Err(err) = self.commit_categories(candidate) {
            if stored > 0 {
                if let Err(rollback) = self.sessions.restore(snapshot) {
                    warn!(error = %format!("{:#}", rollback), "could not roll back session rename");
                }
            }
            return Err(err);
        }

        let pending = self.workspace.rename_category(old_name, new_name);

        info!(old = old_name, new = new_name, stored, pending, "category renamed");
        Ok(true)
    }

    /// Remove from the registry only; stored transactions keep the name
    pub fn remove_category(&mut self, name: &str) -> Result<bool> {
        let mut candidate = self.categories.clone();
        if !candidate.remove(name) {
            return Ok(false);
        }
        self.commit_categories(candidate)?;
        Ok(true)
    }

    /// Persist the new registry, then adopt it
    fn commit_categories(&mut self, candidate: CategoryRegistry) -> Result<()> {
        let json = serde_json::to_string(&candidate).context("Failed to serialize categories")?;
        self.storage.write(CATEGORIES_KEY, &json)?;
        self.categories = candidate;
        Ok(())
    }

    // ========================================================================
    // WORKSPACE
    // ========================================================================

    pub fn workspace(&self) -> &ReconciliationWorkspace {
        &self.workspace
    }

    /// Hand a fresh extraction result to the workspace
    pub fn accept_extraction(&mut self, batch: Vec<Transaction>) -> ExtractionOutcome {
        if batch.is_empty() {
            return ExtractionOutcome::NoCredits;
        }

        let count = batch.len();
        self.workspace.load(batch);
        ExtractionOutcome::Loaded { count }
    }

    /// Set one annotation. Returns false for ids outside the current batch.
    pub fn set_field(&mut self, transaction_id: &str, field: AnnotationField, value: &str) -> bool {
        if !self.workspace.contains(transaction_id) {
            return false;
        }
        self.workspace.set_field(transaction_id, field, value);
        true
    }

    /// Create a category from a table row and select it for that row
    pub fn add_category_for(&mut self, transaction_id: &str, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() || !self.workspace.contains(transaction_id) {
            return Ok(false);
        }

        self.add_category(name)?;
        self.workspace.set_field(transaction_id, AnnotationField::Category, name);
        Ok(true)
    }

    pub fn workspace_view(&self, filter: &TransactionFilter) -> WorkspaceView {
        let transactions: Vec<WorkspaceRow> = self
            .workspace
            .filter(filter)
            .into_iter()
            .map(|tx| WorkspaceRow {
                transaction: tx.clone(),
                annotation: self.workspace.annotation(&tx.id),
            })
            .collect();

        WorkspaceView {
            filtered_total: transactions.iter().map(|row| row.transaction.amount).sum(),
            transactions,
            total_count: self.workspace.batch().len(),
            pending_count: self.workspace.pending_count(),
            completion_percent: self.workspace.completion_percent(),
        }
    }

    /// Save the whole batch as a new session (newest first in the store).
    /// The workspace is only cleared once the session is durably stored, so
    /// a failed save can be retried.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Result<Option<ReconcileSession>> {
        let Some(session) = self.workspace.to_session(now) else {
            return Ok(None);
        };

        self.sessions.append(session.clone())?;
        self.workspace.clear();

        info!(
            session = %session.id,
            transactions = session.transaction_count(),
            total = session.total_amount,
            "session finalized"
        );

        Ok(Some(session))
    }

    pub fn discard_workspace(&mut self) {
        self.workspace.clear();
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    pub fn sessions(&self) -> &[ReconcileSession] {
        self.sessions.all()
    }

    pub fn session(&self, id: &str) -> Option<&ReconcileSession> {
        self.sessions.get(id)
    }
}

fn load_categories(storage: &dyn Storage) -> CategoryRegistry {
    let stored = storage
        .read(CATEGORIES_KEY)
        .and_then(|json| match json {
            Some(json) => serde_json::from_str::<Vec<String>>(&json)
                .map(Some)
                .context("Failed to parse stored categories"),
            None => Ok(None),
        });

    match stored {
        Ok(Some(names)) => CategoryRegistry::from_names(names),
        Ok(None) => CategoryRegistry::with_defaults(),
        Err(err) => {
            warn!(error = %format!("{:#}", err), "stored categories unreadable, using defaults");
            CategoryRegistry::with_defaults()
        }
    }
}
