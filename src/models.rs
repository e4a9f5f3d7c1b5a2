// 🧾 Reconciliation data model
//
// Transaction            - a credit line extracted from a bank statement
// ReconciledTransaction  - the same line after the bookkeeper annotated it
// ReconcileSession       - one saved batch of reconciled transactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payer recorded when the bookkeeper leaves the field blank
pub const UNIDENTIFIED_PAYER: &str = "Não Identificado";

/// Category recorded when the bookkeeper leaves the field blank
pub const DEFAULT_CATEGORY: &str = "Outros";

// ============================================================================
// TRANSACTION TYPE
// ============================================================================

/// Statement line direction. Only credits ever leave the extraction adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[default]
    #[serde(rename = "C")]
    Credit,
    #[serde(rename = "D")]
    Debit,
}

// ============================================================================
// TRANSACTION (pre-reconciliation)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique within one extraction batch
    pub id: String,

    /// Date exactly as printed on the statement (not normalized)
    pub date: String,

    /// Original statement text
    pub description: String,

    /// Non-negative amount in reais
    pub amount: f64,

    #[serde(rename = "type", default)]
    pub transaction_type: TransactionType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl Transaction {
    /// Create a credit transaction with a fresh UUID
    pub fn credit(date: &str, description: &str, amount: f64) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            date: date.to_string(),
            description: description.to_string(),
            amount,
            transaction_type: TransactionType::Credit,
            document: None,
        }
    }

    /// Builder pattern: add optional document number
    pub fn with_document(mut self, document: &str) -> Self {
        self.document = Some(document.to_string());
        self
    }

    /// Builder pattern: force a specific id
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }
}

// ============================================================================
// ANNOTATIONS
// ============================================================================

/// The fields the bookkeeper fills in per transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationField {
    PayerName,
    PatientName,
    Phone,
    Email,
    Category,
}

/// Raw, unvalidated annotation values for one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub payer_name: String,
    pub patient_name: String,
    pub phone: String,
    pub email: String,
    pub category: String,
}

impl Annotation {
    pub fn get(&self, field: AnnotationField) -> &str {
        match field {
            AnnotationField::PayerName => &self.payer_name,
            AnnotationField::PatientName => &self.patient_name,
            AnnotationField::Phone => &self.phone,
            AnnotationField::Email => &self.email,
            AnnotationField::Category => &self.category,
        }
    }

    pub fn set(&mut self, field: AnnotationField, value: String) {
        match field {
            AnnotationField::PayerName => self.payer_name = value,
            AnnotationField::PatientName => self.patient_name = value,
            AnnotationField::Phone => self.phone = value,
            AnnotationField::Email => self.email = value,
            AnnotationField::Category => self.category = value,
        }
    }
}

// ============================================================================
// RECONCILED TRANSACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,

    pub payer_name: String,
    pub category: String,

    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,

    /// Set once when the batch is finalized
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciledTransaction {
    /// Apply annotations to a transaction, substituting the sentinels for
    /// blank payer and category.
    pub fn from_annotation(
        transaction: Transaction,
        annotation: &Annotation,
        reconciled_at: DateTime<Utc>,
    ) -> Self {
        ReconciledTransaction {
            transaction,
            payer_name: or_sentinel(&annotation.payer_name, UNIDENTIFIED_PAYER),
            category: or_sentinel(&annotation.category, DEFAULT_CATEGORY),
            patient_name: annotation.patient_name.clone(),
            phone: annotation.phone.clone(),
            email: annotation.email.clone(),
            reconciled_at,
        }
    }

    pub fn amount(&self) -> f64 {
        self.transaction.amount
    }

    pub fn date(&self) -> &str {
        &self.transaction.date
    }

    pub fn description(&self) -> &str {
        &self.transaction.description
    }

    pub fn document(&self) -> &str {
        self.transaction.document.as_deref().unwrap_or("")
    }
}

fn or_sentinel(value: &str, sentinel: &str) -> String {
    if value.trim().is_empty() {
        sentinel.to_string()
    } else {
        value.to_string()
    }
}

// ============================================================================
// RECONCILE SESSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSession {
    pub id: String,

    /// Finalization timestamp (same instant as every `reconciled_at` inside)
    pub date: DateTime<Utc>,

    pub transactions: Vec<ReconciledTransaction>,

    /// Sum of the transaction amounts, computed once at creation
    pub total_amount: f64,
}

impl ReconcileSession {
    pub fn new(transactions: Vec<ReconciledTransaction>, date: DateTime<Utc>) -> Self {
        let total_amount = transactions.iter().map(|tx| tx.amount()).sum();

        ReconcileSession {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            date,
            transactions,
            total_amount,
        }
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Rewrite every transaction whose category equals `old_name`.
    /// Returns how many were changed. Amounts are untouched.
    pub fn rename_category(&mut self, old_name: &str, new_name: &str) -> usize {
        let mut changed = 0;
        for tx in self.transactions.iter_mut().filter(|tx| tx.category == old_name) {
            tx.category = new_name.to_string();
            changed += 1;
        }
        changed
    }
}
