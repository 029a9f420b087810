//! Modelos de dominio: documentos del foro, chunks y payloads de la API.

use serde::{Deserialize, Serialize};

/// Documento producido por el crawler (una línea JSON por documento).
/// El cuerpo puede venir en `content` o en `text`.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Document {
    /// Cuerpo del documento, prefiriendo `content` sobre `text`.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.text.as_deref())
            .unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }
}

/// Ventana de palabras de un documento, con su procedencia.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub title: String,
    pub url: Option<String>,
}

/// Chunk más su vector; es el formato de `embedded_chunks.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Petición del endpoint de preguntas.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Un resultado de la búsqueda, en orden de distancia ascendente.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub url: String,
    pub text: String,
}

/// Respuesta final al usuario. Los enlaces siguen el orden del ranking
/// y pueden repetirse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerPayload {
    pub answer: String,
    pub links: Vec<Link>,
}

impl AnswerPayload {
    /// Construye la respuesta con un enlace por chunk que tenga URL.
    pub fn from_chunks(answer: String, chunks: &[RetrievedChunk]) -> Self {
        let links = chunks
            .iter()
            .filter(|c| !c.url.is_empty())
            .map(|c| Link {
                url: c.url.clone(),
                text: if c.title.is_empty() {
                    c.url.clone()
                } else {
                    c.title.clone()
                },
            })
            .collect();
        Self { answer, links }
    }
}
