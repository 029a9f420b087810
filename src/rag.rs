//! Consulta RAG sobre el corpus del foro.
//!
//! Flujo:
//!   1. Si la petición trae imagen, se resuelve y se pasa por OCR; el texto
//!      extraído se añade a la pregunta.
//!   2. Búsqueda vectorial de los `top_k` chunks más cercanos.
//!   3. El LLM responde usando sólo ese contexto.
//!   4. Se devuelven la respuesta y los enlaces de los chunks usados.
//!
//! `answer_query` es la frontera donde los errores de consulta se convierten
//! en una respuesta degradada; el usuario siempre recibe `answer` y `links`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::embedder::{Embedder, OpenAiEmbedder};
use crate::error::RagError;
use crate::llm::AnswerSynthesizer;
use crate::models::{AnswerPayload, QueryRequest, RetrievedChunk};
use crate::ocr::{load_image, ImageSource, TesseractOcr, TextExtractor};
use crate::retriever::Retriever;
use crate::vector_store::CorpusIndex;

/// Mensaje genérico cuando no hay un detalle mejor que mostrar.
pub const GENERIC_ERROR_ANSWER: &str =
    "Sorry, I encountered an error while processing your request.";

/// Todo lo que necesita una consulta. Se construye una vez al arrancar y
/// no se modifica después.
pub struct RetrievalContext {
    pub retriever: Retriever,
    pub synthesizer: AnswerSynthesizer,
    pub ocr: Arc<dyn TextExtractor>,
    pub http: reqwest::Client,
    pub top_k: usize,
}

impl RetrievalContext {
    /// Carga el índice del disco y prepara los clientes externos.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let corpus = CorpusIndex::load(&cfg.corpus_index_path).with_context(|| {
            format!(
                "Error al cargar el índice {}",
                cfg.corpus_index_path.display()
            )
        })?;

        let embedder = OpenAiEmbedder::from_config(cfg);
        if corpus.model != embedder.model_name() {
            warn!(
                "El índice se construyó con '{}' pero se consultará con '{}'",
                corpus.model,
                embedder.model_name()
            );
        }

        let http = reqwest::Client::builder()
            .timeout(cfg.image_fetch_timeout)
            .build()
            .context("no se pudo construir el cliente HTTP de imágenes")?;

        Ok(Self {
            retriever: Retriever::new(Arc::new(corpus), Arc::new(embedder)),
            synthesizer: AnswerSynthesizer::from_config(cfg)?,
            ocr: Arc::new(TesseractOcr::from_config(cfg)),
            http,
            top_k: cfg.top_k,
        })
    }
}

/// Responde una pregunta. Nunca falla: los errores degradan la respuesta.
pub async fn answer_query(ctx: &RetrievalContext, request: &QueryRequest) -> AnswerPayload {
    let question = match request.image.as_deref().filter(|i| !i.trim().is_empty()) {
        Some(image) => match extract_image_text(ctx, image).await {
            Ok(text) => augment_question(&request.question, &text),
            Err(e) => {
                warn!("Se ignora la imagen: {e}");
                request.question.clone()
            }
        },
        None => request.question.clone(),
    };

    let chunks = match ctx.retriever.retrieve(&question, ctx.top_k).await {
        Ok(chunks) => chunks,
        Err(e) => {
            error!("Error en la búsqueda semántica: {e}");
            Vec::new()
        }
    };
    info!("Pregunta respondida con {} chunks de contexto", chunks.len());

    let answer = match ctx.synthesizer.synthesize(&question, &chunks).await {
        Ok(answer) => answer,
        Err(e) => {
            error!("Error en la síntesis de la respuesta: {e}");
            degraded_answer(&e)
        }
    };

    AnswerPayload::from_chunks(answer, &chunks)
}

/// Obtiene la imagen y devuelve su texto.
pub async fn extract_image_text(
    ctx: &RetrievalContext,
    image: &str,
) -> std::result::Result<String, RagError> {
    let source = ImageSource::parse(image)?;
    let bytes = load_image(&ctx.http, &source).await?;
    let text = ctx.ocr.extract_text(&bytes).await?;
    info!("Texto extraído de la imagen: {} caracteres", text.trim().len());
    Ok(text)
}

/// Añade el texto de la imagen a la pregunta si no está vacío.
pub fn augment_question(question: &str, image_text: &str) -> String {
    let image_text = image_text.trim();
    if image_text.is_empty() {
        question.to_string()
    } else {
        format!("{question}\n\nText extracted from image:\n{image_text}")
    }
}

/// Texto que ve el usuario cuando falla el servicio de completado.
pub fn degraded_answer(err: &RagError) -> String {
    match err {
        RagError::CompletionServiceFailure { status, body } => {
            format!("Error: {status} - {body}")
        }
        RagError::CompletionTransport(detail) => format!("Error: {detail}"),
        _ => GENERIC_ERROR_ANSWER.to_string(),
    }
}

/// Extracto del texto de un chunk para el comando `search`.
pub fn preview(chunk: &RetrievedChunk, max_chars: usize) -> String {
    chunk.text.chars().take(max_chars).collect()
}
