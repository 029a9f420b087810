//! Carga y gestión de configuración de la aplicación (servicio LLM + corpus).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub corpus_index_path: PathBuf,
    pub top_k: usize,

    pub api_key: String,
    pub completion_url: String,
    pub llm_chat_model: String,
    pub llm_embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    pub embedding_batch_size: usize,
    pub embedding_timeout: Duration,
    pub completion_timeout: Duration,
    pub image_fetch_timeout: Duration,

    pub tesseract_bin: String,
    pub ocr_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("Falta OPENAI_API_KEY en el entorno"))?;

        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let completion_url = env::var("LLM_COMPLETION_URL").unwrap_or_else(|_| {
            format!("{}/chat/completions", base_url.trim_end_matches('/'))
        });

        let server_addr = match env::var("SERVER_ADDR") {
            Ok(addr) => addr,
            Err(_) => {
                let port = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
                format!("0.0.0.0:{port}")
            }
        };

        let corpus_index_path = env::var("CORPUS_INDEX_PATH")
            .unwrap_or_else(|_| "corpus_index.json".to_string())
            .into();

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        let top_k = parse_or("RAG_TOP_K", 5usize)?;
        if top_k == 0 {
            return Err(anyhow!("RAG_TOP_K debe ser mayor que 0"));
        }

        Ok(Self {
            server_addr,
            corpus_index_path,
            top_k,
            api_key,
            completion_url,
            llm_chat_model,
            llm_embedding_model,
            temperature: parse_or("LLM_TEMPERATURE", 0.2f32)?,
            max_tokens: parse_or("LLM_MAX_TOKENS", 500u32)?,
            embedding_batch_size: parse_or("EMBEDDING_BATCH_SIZE", 64usize)?,
            embedding_timeout: secs_or("EMBEDDING_TIMEOUT_SECS", 30)?,
            completion_timeout: secs_or("COMPLETION_TIMEOUT_SECS", 60)?,
            image_fetch_timeout: secs_or("IMAGE_FETCH_TIMEOUT_SECS", 15)?,
            tesseract_bin: env::var("TESSERACT_BIN").unwrap_or_else(|_| "tesseract".to_string()),
            ocr_timeout: secs_or("OCR_TIMEOUT_SECS", 30)?,
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn secs_or(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parse_or(key, default)?.max(1)))
}
