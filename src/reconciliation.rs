// ⚖️ Reconciliation Workspace - annotate a freshly extracted batch
//
// Holds the credits returned by the extraction adapter until the bookkeeper
// saves them. Annotations are kept per transaction id and are NOT validated:
// an incomplete batch is a valid, savable state.
//
// On finalize the batch becomes an immutable ReconcileSession and the
// workspace is emptied.

use crate::models::{Annotation, AnnotationField, ReconcileSession, ReconciledTransaction, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// FILTER
// ============================================================================

/// View filter over the current batch. Empty strings match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub date_contains: String,

    #[serde(default)]
    pub payer_contains: String,

    /// Raw user input; absent or unparseable means no lower bound
    #[serde(default)]
    pub min_amount: Option<String>,
}

impl TransactionFilter {
    pub fn is_empty(&self) -> bool {
        self.date_contains.is_empty() && self.payer_contains.is_empty() && self.min_amount_value().is_none()
    }

    /// Parse the minimum amount. With a decimal comma, dots are thousands
    /// separators ("1.000,50"); without one, a dot is the decimal point.
    pub fn min_amount_value(&self) -> Option<f64> {
        let raw = self.min_amount.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        let normalized = if raw.contains(',') {
            raw.replace('.', "").replace(',', ".")
        } else {
            raw.to_string()
        };
        normalized.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

// ============================================================================
// WORKSPACE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationWorkspace {
    batch: Vec<Transaction>,
    annotations: HashMap<String, Annotation>,
}

impl ReconciliationWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current batch with a new extraction result.
    /// Annotations from a previous batch are discarded.
    pub fn load(&mut self, batch: Vec<Transaction>) {
        self.batch = batch;
        self.annotations.clear();
    }

    /// Discard the batch without saving
    pub fn clear(&mut self) {
        self.batch.clear();
        self.annotations.clear();
    }

    pub fn batch(&self) -> &[Transaction] {
        &self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.batch.iter().any(|tx| tx.id == transaction_id)
    }

    /// Annotations for a transaction (all empty if never touched)
    pub fn annotation(&self, transaction_id: &str) -> Annotation {
        self.annotations.get(transaction_id).cloned().unwrap_or_default()
    }

    pub fn annotations(&self) -> &HashMap<String, Annotation> {
        &self.annotations
    }

    /// Overwrite a single annotation field. Not validated.
    pub fn set_field(&mut self, transaction_id: &str, field: AnnotationField, value: &str) {
        self.annotations
            .entry(transaction_id.to_string())
            .or_default()
            .set(field, value.to_string());
    }

    /// Rewrite pending category selections after a registry rename
    pub fn rename_category(&mut self, old_name: &str, new_name: &str) -> usize {
        let mut changed = 0;
        for annotation in self.annotations.values_mut().filter(|a| a.category == old_name) {
            annotation.category = new_name.to_string();
            changed += 1;
        }
        changed
    }

    /// Transactions matching the filter, in batch order. Never mutates the batch.
    pub fn filter(&self, filter: &TransactionFilter) -> Vec<&Transaction> {
        let date_query = filter.date_contains.to_lowercase();
        let payer_query = filter.payer_contains.to_lowercase();
        let min_amount = filter.min_amount_value();

        self.batch
            .iter()
            .filter(|tx| tx.date.to_lowercase().contains(&date_query))
            .filter(|tx| {
                let payer = self
                    .annotations
                    .get(&tx.id)
                    .map(|a| a.payer_name.to_lowercase())
                    .unwrap_or_default();
                payer.contains(&payer_query)
            })
            .filter(|tx| min_amount.map_or(true, |min| tx.amount >= min))
            .collect()
    }

    /// Sum of the amounts visible under a filter
    pub fn filtered_total(&self, filter: &TransactionFilter) -> f64 {
        self.filter(filter).iter().map(|tx| tx.amount).sum()
    }

    /// Number of transactions with a non-empty category selection
    pub fn categorized_count(&self) -> usize {
        self.batch
            .iter()
            .filter(|tx| {
                self.annotations
                    .get(&tx.id)
                    .map_or(false, |a| !a.category.is_empty())
            })
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.batch.len() - self.categorized_count()
    }

    /// Fraction of the batch that has a category, in [0, 1].
    /// An empty batch reports 0.
    pub fn completion(&self) -> f64 {
        if self.batch.is_empty() {
            return 0.0;
        }
        self.categorized_count() as f64 / self.batch.len() as f64
    }

    /// Completion as a rounded percentage for progress bars
    pub fn completion_percent(&self) -> u8 {
        (self.completion() * 100.0).round() as u8
    }

    /// Turn the whole batch (not just a filtered view) into a session
    /// without touching the workspace.
    ///
    /// Every transaction gets the same `reconciled_at`. Returns None for an
    /// empty batch.
    pub fn to_session(&self, now: DateTime<Utc>) -> Option<ReconcileSession> {
        if self.batch.is_empty() {
            return None;
        }

        let reconciled: Vec<ReconciledTransaction> = self
            .batch
            .iter()
            .map(|tx| ReconciledTransaction::from_annotation(tx.clone(), &self.annotation(&tx.id), now))
            .collect();

        Some(ReconcileSession::new(reconciled, now))
    }

    /// `to_session`, then empty the workspace
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Option<ReconcileSession> {
        let session = self.to_session(now)?;
        self.clear();
        Some(session)
    }
}
