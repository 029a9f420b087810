//! Búsqueda semántica sobre el índice cargado en memoria.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedder::{embed_one, Embedder};
use crate::error::{RagError, Result};
use crate::models::RetrievedChunk;
use crate::vector_store::{CorpusIndex, Neighbor};

/// Recupera los chunks más cercanos a una pregunta. Comparte el índice en
/// sólo lectura; no necesita bloqueo.
#[derive(Clone)]
pub struct Retriever {
    corpus: Arc<CorpusIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(corpus: Arc<CorpusIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { corpus, embedder }
    }

    pub fn corpus(&self) -> &CorpusIndex {
        &self.corpus
    }

    /// Embebe la pregunta y devuelve hasta `k` chunks por distancia ascendente.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query_vec = embed_one(self.embedder.as_ref(), question).await?;
        if query_vec.len() != self.corpus.dimension() {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: self.corpus.dimension(),
                actual: query_vec.len(),
            });
        }

        let hits = self.corpus.index.search(&query_vec, k)?;
        debug!("Búsqueda vectorial: {} vecinos para k={}", hits.len(), k);
        Ok(self.resolve(&hits))
    }

    /// Traduce posiciones del índice a chunks. Las posiciones sin entrada en
    /// los metadatos se descartan.
    pub fn resolve(&self, hits: &[Neighbor]) -> Vec<RetrievedChunk> {
        hits.iter()
            .filter_map(|hit| match self.corpus.entry(hit.position) {
                Some(entry) => Some(RetrievedChunk {
                    text: entry.text.clone(),
                    url: entry.url.clone().unwrap_or_default(),
                    title: entry.title.clone(),
                }),
                None => {
                    let err = RagError::RetrievalDegraded {
                        position: hit.position,
                        len: self.corpus.len(),
                    };
                    warn!("{err}; se omite");
                    None
                }
            })
            .collect()
    }
}
