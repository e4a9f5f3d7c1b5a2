// 📥 CSV export of one reconciliation session
//
// The format does not quote: commas inside text are replaced with ';' and
// line breaks with spaces so columns stay aligned. A UTF-8 BOM is prepended
// so spreadsheet tools pick the right encoding for accents and "R$".

use crate::models::ReconcileSession;
use anyhow::{Context, Result};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::fs;
use std::path::{Path, PathBuf};

const BOM: &str = "\u{feff}";

pub const EXPORT_HEADER: [&str; 9] = [
    "Data Banco",
    "Documento",
    "Descricao Original",
    "Pagador Identificado",
    "Paciente",
    "Telefone",
    "Email",
    "Categoria",
    "Valor (BRL)",
];

/// File name encoding the session's finalization date
pub fn export_file_name(session: &ReconcileSession) -> String {
    format!("conciliacao_marie_{}.csv", session.date.format("%Y-%m-%d"))
}

/// Render a session as BOM-prefixed CSV bytes
pub fn session_to_csv(session: &ReconcileSession) -> Result<Vec<u8>> {
    let mut buffer: Vec<u8> = BOM.as_bytes().to_vec();

    {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(&mut buffer);

        writer.write_record(EXPORT_HEADER)?;

        for tx in &session.transactions {
            let amount = tx.amount().to_string();
            writer
                .write_record([
                    sanitize(tx.date()).as_str(),
                    sanitize(tx.document()).as_str(),
                    sanitize(tx.description()).as_str(),
                    sanitize(&tx.payer_name).as_str(),
                    sanitize(&tx.patient_name).as_str(),
                    sanitize(&tx.phone).as_str(),
                    sanitize(&tx.email).as_str(),
                    sanitize(&tx.category).as_str(),
                    amount.as_str(),
                ])
                .with_context(|| format!("Failed to write row for transaction {}", tx.transaction.id))?;
        }

        writer.flush()?;
    }

    Ok(buffer)
}

/// Write the export into `dir` and return the full path
pub fn export_session(session: &ReconcileSession, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(export_file_name(session));
    let bytes = session_to_csv(session)?;
    fs::write(&path, bytes).with_context(|| format!("Failed to write export: {}", path.display()))?;
    Ok(path)
}

fn sanitize(value: &str) -> String {
    value
        .replace(',', ";")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}
