// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use marie_reconcile::{export_session, init_tracing, reports, Config, Ledger, SqliteStorage};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = Config::from_env();

    match args.get(1).map(String::as_str) {
        Some("summary") => {
            init_tracing();
            run_summary(&config)
        }
        Some("categories") => {
            init_tracing();
            run_categories(&config)
        }
        Some("export") => {
            init_tracing();
            let Some(session_id) = args.get(2) else {
                bail!("usage: marie-reconcile export <session-id> [dir]");
            };
            let dir = args.get(3).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            run_export(&config, session_id, dir)
        }
        Some(other) => bail!("unknown command '{}' (expected summary, categories or export)", other),
        // Log output on stderr would draw over the alternate screen
        None => run_ui_mode(&config),
    }
}

fn open_ledger(config: &Config) -> Result<Ledger> {
    let storage = SqliteStorage::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    Ok(Ledger::open(Arc::new(storage)))
}

fn run_summary(config: &Config) -> Result<()> {
    let ledger = open_ledger(config)?;
    let sessions = ledger.sessions();
    let totals = reports::dashboard_totals(sessions);
    let summary = reports::report_summary(sessions);

    println!("📊 Marie - Resumo de Conciliações");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total conciliado:  {:.2}", totals.total_amount);
    println!("Transações:        {}", totals.transaction_count);
    println!("Lotes:             {}", sessions.len());
    println!("Ticket médio:      {:.2}", summary.average_ticket);
    if let Some(top) = &summary.top_category {
        println!("Top categoria:     {} ({:.2})", top.category, top.value);
    }

    if !summary.monthly.is_empty() {
        println!("\nPor mês:");
        for point in &summary.monthly {
            println!("  {:<10} {:>12.2}", point.name, point.value);
        }
    }

    if !summary.categories.is_empty() {
        println!("\nPor categoria:");
        for total in &summary.categories {
            println!("  {:<20} {:>12.2}", total.category, total.value);
        }
    }

    Ok(())
}

fn run_categories(config: &Config) -> Result<()> {
    let ledger = open_ledger(config)?;

    for name in ledger.categories().names() {
        println!("{}", name);
    }

    Ok(())
}

fn run_export(config: &Config, session_id: &str, dir: PathBuf) -> Result<()> {
    let ledger = open_ledger(config)?;

    let session = ledger
        .session(session_id)
        .with_context(|| format!("Session {} not found", session_id))?;

    let path = export_session(session, &dir)?;
    println!("✓ Exported {} transactions to {}", session.transaction_count(), path.display());

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    let ledger = open_ledger(config)?;
    let sessions = ledger.sessions().to_vec();

    println!("✓ Loaded {} sessions", sessions.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(sessions, PathBuf::from("."));
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin marie-server --features server");
    std::process::exit(1);
}
