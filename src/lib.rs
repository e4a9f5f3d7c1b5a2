// Marie Reconciliation - Core Library
// Exposes all modules for use in the terminal viewer, API server, and tests

pub mod config;
pub mod entities;
pub mod export;
pub mod extraction;
pub mod ledger;
pub mod models;
pub mod reconciliation;
pub mod reports;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use entities::{CategoryRegistry, DEFAULT_CATEGORIES};
pub use export::{export_file_name, export_session, session_to_csv};
pub use extraction::{
    parse_extraction_response, CancelToken, ExtractionError, ExtractionGate, ExtractionPermit,
    GeminiExtractor, StatementDocument, StatementExtractor, NO_CREDITS_MESSAGE,
};
pub use ledger::{ExtractionOutcome, Ledger, WorkspaceRow, WorkspaceView};
pub use models::{
    Annotation, AnnotationField, ReconcileSession, ReconciledTransaction, Transaction,
    TransactionType, DEFAULT_CATEGORY, UNIDENTIFIED_PAYER,
};
pub use reconciliation::{ReconciliationWorkspace, TransactionFilter};
pub use reports::{
    CategoryTotal, DashboardTotals, PeriodTotal, ReportSummary, SessionMatch,
};
pub use storage::{MemoryStorage, SqliteStorage, Storage};
pub use store::SessionStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the `tracing` subscriber used by both binaries.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("marie_reconcile=info,marie_server=info,tower_http=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
