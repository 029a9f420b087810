//! Taxonomía de errores del pipeline RAG.
//!
//! Los errores de construcción (chunking, embeddings, índice) son fatales.
//! Los de consulta se absorben en `rag::answer_query`, que es la única capa
//! que decide cómo degradar la respuesta.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuración inválida: {0}")]
    InvalidConfiguration(String),

    #[error("Servicio de embeddings no disponible: {0}")]
    EmbeddingServiceUnavailable(String),

    #[error("Dimensión incorrecta en el vector {position}: se esperaba {expected}, llegó {actual}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("El embedding de la consulta tiene dimensión {actual}, el índice espera {expected}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Posición {position} fuera de la tabla de metadatos ({len} entradas)")]
    RetrievalDegraded { position: usize, len: usize },

    #[error("Error procesando la imagen: {0}")]
    ImageProcessingFailure(String),

    #[error("El servicio de completado respondió {status}: {body}")]
    CompletionServiceFailure { status: u16, body: String },

    #[error("Error de transporte con el servicio de completado: {0}")]
    CompletionTransport(String),

    #[error("Artefacto de índice corrupto: {0}")]
    CorruptIndex(String),

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error de serialización: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
