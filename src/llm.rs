//! Síntesis de respuestas contra un servicio de completado compatible con
//! OpenAI (`/chat/completions`).

use anyhow::Context as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{RagError, Result};
use crate::models::RetrievedChunk;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant answering student questions using the provided course materials. \
Use only the given context to answer. If the answer is not found, say 'I couldn't find an exact answer.' \
Be concise and accurate in your responses.";

/// Frase que el modelo debe usar cuando el contexto no contiene la respuesta.
pub const FALLBACK_PHRASE: &str = "I couldn't find an exact answer.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Cliente del servicio de completado. Una petición por pregunta, sin
/// reintentos ni streaming.
#[derive(Debug, Clone)]
pub struct AnswerSynthesizer {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnswerSynthesizer {
    pub fn new(
        http: Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(cfg.completion_timeout)
            .build()
            .context("no se pudo construir el cliente HTTP del LLM")?;
        Ok(Self::new(
            http,
            cfg.completion_url.clone(),
            cfg.api_key.clone(),
            cfg.llm_chat_model.clone(),
            cfg.temperature,
            cfg.max_tokens,
        ))
    }

    /// Genera la respuesta a partir de la pregunta y los chunks recuperados.
    pub async fn synthesize(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        let context = build_context(chunks);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Context:\n{context}\n\nQuestion: {question}"),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::CompletionTransport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::CompletionServiceFailure {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RagError::CompletionTransport(format!("respuesta ilegible: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                RagError::CompletionTransport("la respuesta no contiene choices".to_string())
            })?;

        debug!("Respuesta del LLM: {} caracteres", content.len());
        Ok(parse_answer(&content))
    }
}

/// Concatena los textos en orden de ranking, separados por una línea en blanco.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Normaliza la respuesta del modelo en dos etapas:
///   1. Si el texto (o el bloque ```json que lo envuelve) es un objeto JSON
///      con un campo `answer` de tipo cadena, gana ese campo.
///   2. Si no, la respuesta es el texto crudo recortado.
pub fn parse_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    structured_answer(trimmed)
        .or_else(|| structured_answer(strip_code_fence(trimmed)))
        .unwrap_or_else(|| trimmed.to_string())
}

fn structured_answer(text: &str) -> Option<String> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(map) => match map.get("answer")? {
            Value::String(s) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    text.trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio_test::assert_ok;

    fn chunk(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            url: String::new(),
            title: String::new(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/chat/completions")
    }

    fn synthesizer(endpoint: String) -> AnswerSynthesizer {
        AnswerSynthesizer::new(Client::new(), endpoint, "sk-test", "gpt-4o-mini", 0.2, 500)
    }

    #[test]
    fn plain_text_is_kept_verbatim() {
        assert_eq!(parse_answer("The answer is 42"), "The answer is 42");
        assert_eq!(parse_answer("  The answer is 42\n"), "The answer is 42");
    }

    #[test]
    fn structured_answer_field_wins() {
        assert_eq!(parse_answer(r#"{"answer": "42"}"#), "42");
        assert_eq!(parse_answer("```json\n{\"answer\": \"42\"}\n```"), "42");
    }

    #[test]
    fn json_without_answer_string_falls_back_to_raw() {
        assert_eq!(parse_answer(r#"{"result": 1}"#), r#"{"result": 1}"#);
        assert_eq!(parse_answer(r#"{"answer": 42}"#), r#"{"answer": 42}"#);
        assert_eq!(parse_answer("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn context_joins_chunks_with_blank_line() {
        assert_eq!(build_context(&[chunk("a"), chunk("b")]), "a\n\nb");
        assert_eq!(build_context(&[]), "");
    }

    #[tokio::test]
    async fn sends_one_request_with_context_and_parses_reply() {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push(body);
                    Json(json!({
                        "choices": [{"message": {"role": "assistant", "content": "{\"answer\": \"42\"}"}}]
                    }))
                }
            }),
        );
        let endpoint = serve(app).await;

        let answer = synthesizer(endpoint)
            .synthesize("What?", &[chunk("first"), chunk("second")])
            .await;
        let answer = assert_ok!(answer);
        assert_eq!(answer, "42");

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let body = &requests[0];
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            body["messages"][1]["content"],
            "Context:\nfirst\n\nsecond\n\nQuestion: What?"
        );
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
        );
        let endpoint = serve(app).await;

        let err = synthesizer(endpoint)
            .synthesize("q", &[])
            .await
            .unwrap_err();
        match err {
            RagError::CompletionServiceFailure { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = synthesizer(format!("http://{addr}/v1/chat/completions"))
            .synthesize("q", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::CompletionTransport(_)));
    }
}
