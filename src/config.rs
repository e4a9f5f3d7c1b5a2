use crate::extraction::DEFAULT_MODEL;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Missing key still lets the app start; extraction then fails cleanly
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub db_path: PathBuf,
    pub bind_address: String,
}

impl Config {
    pub fn from_env() -> Self {
        // Load .env file if present (silently ignored if missing)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Config {
            gemini_api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("API_KEY")),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            db_path: non_empty("MARIE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("marie.db")),
            bind_address: non_empty("MARIE_BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:3000".to_string()),
        }
    }
}
