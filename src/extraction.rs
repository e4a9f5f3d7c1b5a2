// 🤖 Extraction Adapter - bank statement image → credit transactions
//
// A single opaque call to a hosted model. No retries, no caching, no rate
// limiting: a failure surfaces once to the caller. The model's answer is
// never trusted at the type level; `parse_extraction_response` is the only
// way a remote payload becomes a `Transaction`.

use crate::models::{Transaction, TransactionType};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const DEFAULT_MIME_TYPE: &str = "image/png";

/// Shown when the statement was read but held no credits. Not an error.
pub const NO_CREDITS_MESSAGE: &str =
    "Nenhum crédito foi identificado no extrato. Verifique se o arquivo está legível.";

const PROMPT: &str = r#"
Analise este extrato bancário da Clínica Marie.
Extraia APENAS os lançamentos de CRÉDITO (marcados com 'C' ou que representem entrada de dinheiro, como Pix Recebido, Transferências Recebidas).
Ignore débitos ('D') e transferências enviadas.
Para cada crédito, extraia: data, descrição (histórico), valor e número do documento se disponível.
Converta o valor para um número (ex: 1.000,00 -> 1000).
"#;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed extraction response: {0}")]
    MalformedResponse(String),

    #[error("invalid document payload: {0}")]
    InvalidPayload(String),

    #[error("extraction service is not configured (missing API key)")]
    MissingApiKey,

    #[error("an extraction is already in progress")]
    Busy,

    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    /// Message for the bookkeeper; internal details stay in the logs
    pub fn user_message(&self) -> &'static str {
        match self {
            ExtractionError::InvalidPayload(_) => "Falha ao ler o arquivo.",
            ExtractionError::Busy => "Um extrato já está sendo processado. Aguarde a conclusão.",
            ExtractionError::Cancelled => "O processamento do extrato foi cancelado.",
            _ => "Ocorreu um erro ao processar o arquivo com a IA. Tente novamente.",
        }
    }
}

// ============================================================================
// DOCUMENT PAYLOAD
// ============================================================================

/// Uploaded statement: image/PDF bytes plus optional pre-extracted text
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDocument {
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub text: Option<String>,
}

impl StatementDocument {
    pub fn from_bytes(bytes: Vec<u8>, mime_type: &str) -> Self {
        StatementDocument {
            mime_type: mime_type.to_string(),
            bytes,
            text: None,
        }
    }

    /// Accepts a `data:<mime>;base64,<data>` URI or bare base64
    pub fn from_data_uri(input: &str) -> Result<Self, ExtractionError> {
        let input = input.trim();

        let (mime_type, data) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest
                    .split_once(',')
                    .ok_or_else(|| ExtractionError::InvalidPayload("data URI without ','".to_string()))?;
                let mime = header.strip_suffix(";base64").unwrap_or(header);
                let mime = if mime.is_empty() { DEFAULT_MIME_TYPE } else { mime };
                (mime.to_string(), data)
            }
            None => (DEFAULT_MIME_TYPE.to_string(), input),
        };

        let bytes = BASE64
            .decode(data.trim())
            .map_err(|e| ExtractionError::InvalidPayload(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ExtractionError::InvalidPayload("empty document".to_string()));
        }

        Ok(StatementDocument {
            mime_type,
            bytes,
            text: None,
        })
    }

    /// Builder pattern: attach OCR text
    pub fn with_text(mut self, text: &str) -> Self {
        if !text.trim().is_empty() {
            self.text = Some(text.to_string());
        }
        self
    }

    pub fn base64_data(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

// ============================================================================
// STRICT RESPONSE PARSING
// ============================================================================

/// Shape the model is asked to produce. Unknown fields are ignored; missing
/// or mistyped required fields reject the whole response.
#[derive(Debug, Deserialize)]
struct ExtractedRecord {
    date: String,
    description: String,
    amount: f64,
    #[serde(default)]
    document: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Turn the model's JSON text into credit transactions.
///
/// - tolerates a ```json fence around the array
/// - negative amounts are debits and are dropped
/// - missing, blank or repeated ids are replaced with a UUID
pub fn parse_extraction_response(text: &str) -> Result<Vec<Transaction>, ExtractionError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<ExtractedRecord> =
        serde_json::from_str(body).map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut transactions = Vec::with_capacity(records.len());

    for record in records {
        if !record.amount.is_finite() || record.amount < 0.0 {
            debug!(amount = record.amount, description = %record.description, "skipping non-credit entry");
            continue;
        }

        let id = match record.id.filter(|id| !id.trim().is_empty()) {
            Some(id) if !seen_ids.contains(&id) => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        seen_ids.insert(id.clone());

        transactions.push(Transaction {
            id,
            date: record.date,
            description: record.description,
            amount: record.amount,
            transaction_type: TransactionType::Credit,
            document: record.document.filter(|d| !d.trim().is_empty()),
        });
    }

    Ok(transactions)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

// ============================================================================
// CANCELLATION & SINGLE-FLIGHT
// ============================================================================

/// Cooperative cancellation for an in-flight extraction
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Busy flag allowing at most one extraction in flight
#[derive(Debug, Clone, Default)]
pub struct ExtractionGate {
    busy: Arc<AtomicBool>,
}

impl ExtractionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<ExtractionPermit, ExtractionError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExtractionError::Busy)?;
        Ok(ExtractionPermit {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held while an extraction runs; releases the gate on drop
#[derive(Debug)]
pub struct ExtractionPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for ExtractionPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// ============================================================================
// EXTRACTOR TRAIT
// ============================================================================

#[async_trait]
pub trait StatementExtractor: Send + Sync {
    /// Credit transactions found in the document (possibly none)
    async fn extract(
        &self,
        document: &StatementDocument,
        cancel: &CancelToken,
    ) -> Result<Vec<Transaction>, ExtractionError>;
}

// ============================================================================
// GEMINI EXTRACTOR
// ============================================================================

#[derive(Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl GeminiExtractor {
    pub fn new(api_key: Option<String>, model: &str) -> Self {
        GeminiExtractor {
            client: reqwest::Client::new(),
            api_key,
            model: model.to_string(),
            endpoint: GEMINI_ENDPOINT.to_string(),
        }
    }

    /// Point at a different base URL (proxies, local mocks)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }

    async fn call(&self, document: &StatementDocument) -> Result<Vec<Transaction>, ExtractionError> {
        let api_key = self.api_key.as_deref().ok_or(ExtractionError::MissingApiKey)?;

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&build_request(document))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api { status, body });
        }

        let envelope: GenerateContentResponse = response.json().await?;
        let text = envelope.text();

        match parse_extraction_response(&text) {
            Ok(transactions) => Ok(transactions),
            Err(err) => {
                warn!(error = %err, "could not parse extraction result, reporting zero credits");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl StatementExtractor for GeminiExtractor {
    async fn extract(
        &self,
        document: &StatementDocument,
        cancel: &CancelToken,
    ) -> Result<Vec<Transaction>, ExtractionError> {
        info!(
            model = %self.model,
            mime_type = %document.mime_type,
            size = document.bytes.len(),
            has_text = document.text.is_some(),
            "requesting statement extraction"
        );

        let result = tokio::select! {
            result = self.call(document) => result,
            _ = cancel.cancelled() => Err(ExtractionError::Cancelled),
        };

        if let Ok(transactions) = &result {
            info!(count = transactions.len(), "extraction finished");
        }
        result
    }
}

// ----------------------------------------------------------------------------
// Wire format of the generateContent API
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate ("" when absent)
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn build_request(document: &StatementDocument) -> GenerateContentRequest {
    let mut parts = vec![Part {
        text: None,
        inline_data: Some(InlineData {
            mime_type: document.mime_type.clone(),
            data: document.base64_data(),
        }),
    }];

    if let Some(text) = &document.text {
        parts.push(Part {
            text: Some(format!("Texto do Extrato: {}", text)),
            inline_data: None,
        });
    }

    parts.push(Part {
        text: Some(PROMPT.to_string()),
        inline_data: None,
    });

    GenerateContentRequest {
        contents: vec![Content { parts }],
        generation_config: serde_json::json!({
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "date": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "amount": { "type": "NUMBER" },
                        "document": { "type": "STRING" },
                        "id": { "type": "STRING", "description": "Um ID único gerado para esta transação" }
                    },
                    "required": ["date", "description", "amount"]
                }
            }
        }),
    }
}
