//! Cálculo de embeddings sobre Rig.
//!
//! El trait `Embedder` es la costura que usan el pipeline de construcción y
//! el retriever; así ambos comparten modelo y dimensión.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use rig::providers::openai;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{RagError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Devuelve un vector por texto, en el mismo orden de entrada.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Nombre del modelo, se guarda junto al índice.
    fn model_name(&self) -> &str;
}

/// Embeddings de OpenAI (o compatible vía `OPENAI_BASE_URL`) usando Rig.
///
/// El cliente se crea en el primer lote y se reutiliza en los siguientes.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    model: String,
    batch_size: usize,
    timeout: Duration,
    client: OnceLock<openai::Client>,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("client_ready", &self.client.get().is_some())
            .finish()
    }
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>, batch_size: usize, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            batch_size: batch_size.max(1),
            timeout,
            client: OnceLock::new(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.llm_embedding_model.clone(),
            cfg.embedding_batch_size,
            cfg.embedding_timeout,
        )
    }

    fn client(&self) -> &openai::Client {
        self.client.get_or_init(openai::Client::from_env)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        use rig::providers::openai::TEXT_EMBEDDING_3_SMALL;
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = self.client();
        let model_name = if self.model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = tokio::time::timeout(
            self.timeout,
            embedding_model.embed_texts(batch.to_vec()),
        )
        .await
        .map_err(|_| {
            RagError::EmbeddingServiceUnavailable(format!(
                "sin respuesta tras {}s",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| RagError::EmbeddingServiceUnavailable(e.to_string()))?;

        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!("Lote de embeddings {} ({} textos)", i + 1, batch.len());
            let embedded = self.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingServiceUnavailable(format!(
                    "número de embeddings ({}) distinto al número de textos ({})",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embebe un único texto (la pregunta en tiempo de consulta).
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            RagError::EmbeddingServiceUnavailable(
                "no se pudo generar embedding de la consulta".to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl Embedder for Fixed {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct Empty;

    #[async_trait]
    impl Embedder for Empty {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }

        fn model_name(&self) -> &str {
            "empty"
        }
    }

    #[tokio::test]
    async fn embed_one_returns_first_vector() {
        let v = embed_one(&Fixed, "abcd").await.unwrap();
        assert_eq!(v, vec![4.0]);
    }

    #[tokio::test]
    async fn embed_one_without_output_is_unavailable() {
        let err = embed_one(&Empty, "abcd").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingServiceUnavailable(_)));
    }

    #[test]
    fn batch_size_is_never_zero() {
        let e = OpenAiEmbedder::new("m", 0, Duration::from_secs(1));
        assert_eq!(e.batch_size, 1);
        assert_eq!(e.model_name(), "m");
    }

    #[test]
    fn client_is_not_built_until_first_batch() {
        let e = OpenAiEmbedder::new("m", 8, Duration::from_secs(1));
        assert!(e.client.get().is_none());
        assert!(format!("{e:?}").contains("client_ready: false"));
    }
}
