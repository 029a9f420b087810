//! RAG sobre el foro de un curso: troceado, embeddings, índice vectorial
//! y respuesta con contexto recuperado.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod rag;
pub mod retriever;
pub mod vector_store;

pub use error::{RagError, Result};
