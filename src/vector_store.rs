//! Índice vectorial exacto (L2) y artefacto compuesto índice + metadatos.
//!
//! La posición `i` del índice, la entrada `i` de los metadatos y el chunk `i`
//! del fichero de embeddings son el mismo chunk. Por eso ambos se persisten
//! juntos en un único fichero con recuento y checksum verificados al cargar.
//!
//! API pública:
//!   - `VectorIndex::build(vectors)` / `VectorIndex::search(query, k)`
//!   - `CorpusIndex::build(chunks, model)` / `save` / `load`.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{RagError, Result};
use crate::models::EmbeddedChunk;

/// Versión del formato en disco.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Vecino devuelto por una búsqueda: posición de inserción y distancia L2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Colección ordenada de vectores de dimensión fija con búsqueda k-NN
/// exhaustiva por distancia euclídea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Construye el índice respetando el orden de entrada.
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = match vectors.first() {
            Some(v) => v.len(),
            None => {
                return Err(RagError::InvalidConfiguration(
                    "no hay vectores con los que construir el índice".to_string(),
                ))
            }
        };
        if dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "los vectores tienen dimensión 0".to_string(),
            ));
        }
        if let Some((position, v)) = vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != dimension)
        {
            return Err(RagError::DimensionMismatch {
                position,
                expected: dimension,
                actual: v.len(),
            });
        }
        Ok(Self { dimension, vectors })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Los `k` vectores más cercanos, por distancia ascendente. Los empates
    /// se resuelven por posición de inserción.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                distance: squared_l2(query, v).sqrt(),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Entrada de la tabla de metadatos: procedencia y texto del chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub title: String,
    pub url: Option<String>,
    pub text: String,
}

/// Índice y tabla de metadatos como una sola unidad versionada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusIndex {
    pub version: u32,
    pub model: String,
    pub built_at: String,
    pub index: VectorIndex,
    pub entries: Vec<IndexEntry>,
    pub checksum: String,
}

impl CorpusIndex {
    /// Construye el artefacto a partir de los chunks embebidos, en orden.
    pub fn build(chunks: Vec<EmbeddedChunk>, model: &str) -> Result<Self> {
        let (vectors, entries): (Vec<_>, Vec<_>) = chunks
            .into_iter()
            .map(|c| {
                (
                    c.embedding,
                    IndexEntry {
                        title: c.chunk.title,
                        url: c.chunk.url,
                        text: c.chunk.text,
                    },
                )
            })
            .unzip();

        let index = VectorIndex::build(vectors)?;
        let checksum = compute_checksum(&index, &entries);
        Ok(Self {
            version: INDEX_FORMAT_VERSION,
            model: model.to_string(),
            built_at: Utc::now().to_rfc3339(),
            index,
            entries,
            checksum,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Entrada de metadatos para una posición del índice, si existe.
    pub fn entry(&self, position: usize) -> Option<&IndexEntry> {
        self.entries.get(position)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        info!(
            "Índice guardado en {} ({} vectores, dimensión {})",
            path.display(),
            self.len(),
            self.dimension()
        );
        Ok(())
    }

    /// Carga y verifica el artefacto. Cualquier desalineación entre índice
    /// y metadatos es un error.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let corpus: CorpusIndex = serde_json::from_slice(&bytes)?;
        corpus.verify()?;
        info!(
            "Índice cargado desde {} ({} vectores, modelo '{}')",
            path.display(),
            corpus.len(),
            corpus.model
        );
        Ok(corpus)
    }

    fn verify(&self) -> Result<()> {
        if self.version != INDEX_FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "versión de formato {} no soportada (se esperaba {})",
                self.version, INDEX_FORMAT_VERSION
            )));
        }
        if self.index.len() != self.entries.len() {
            return Err(RagError::CorruptIndex(format!(
                "{} vectores frente a {} entradas de metadatos",
                self.index.len(),
                self.entries.len()
            )));
        }
        if let Some(position) = self
            .index
            .vectors
            .iter()
            .position(|v| v.len() != self.index.dimension)
        {
            return Err(RagError::CorruptIndex(format!(
                "el vector {position} no tiene dimensión {}",
                self.index.dimension
            )));
        }
        let expected = compute_checksum(&self.index, &self.entries);
        if expected != self.checksum {
            return Err(RagError::CorruptIndex(
                "el checksum no coincide con el contenido".to_string(),
            ));
        }
        Ok(())
    }
}

fn compute_checksum(index: &VectorIndex, entries: &[IndexEntry]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((index.dimension as u64).to_le_bytes());
    hasher.update((index.vectors.len() as u64).to_le_bytes());
    for v in &index.vectors {
        for x in v {
            hasher.update(x.to_le_bytes());
        }
    }
    for e in entries {
        for field in [e.title.as_str(), e.url.as_deref().unwrap_or(""), e.text.as_str()] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update([e.url.is_some() as u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn embedded(text: &str, v: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                text: text.to_string(),
                title: format!("title {text}"),
                url: Some(format!("https://forum/t/{text}")),
            },
            embedding: v,
        }
    }

    fn sample() -> CorpusIndex {
        CorpusIndex::build(
            vec![
                embedded("a", vec![0.0, 0.0, 1.0]),
                embedded("b", vec![0.0, 1.0, 0.0]),
                embedded("c", vec![1.0, 0.0, 0.0]),
                embedded("d", vec![0.5, 0.5, 0.0]),
            ],
            "test-model",
        )
        .unwrap()
    }

    #[test]
    fn every_vector_retrieves_itself_first() {
        let corpus = sample();
        for (i, v) in corpus.index.vectors.iter().enumerate() {
            let hits = corpus.index.search(v, 1).unwrap();
            assert_eq!(hits[0].position, i);
            assert_eq!(hits[0].distance, 0.0);
        }
    }

    #[test]
    fn search_orders_by_ascending_distance_and_caps_k() {
        let corpus = sample();
        let hits = corpus.index.search(&[0.9, 0.1, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].position, 2);
        assert_eq!(hits[1].position, 3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn build_rejects_mixed_dimensions() {
        let err = VectorIndex::build(vec![vec![1.0, 2.0], vec![1.0], vec![3.0, 4.0]]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                position: 1,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn build_rejects_empty_input() {
        assert!(VectorIndex::build(Vec::new()).is_err());
    }

    #[test]
    fn search_rejects_query_of_other_dimension() {
        let corpus = sample();
        let err = corpus.index.search(&[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(
            err,
            RagError::EmbeddingDimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn entries_keep_insertion_order() {
        let corpus = sample();
        assert_eq!(corpus.entry(2).unwrap().text, "c");
        assert!(corpus.entry(4).is_none());
    }

    #[test]
    fn saved_index_loads_with_same_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus_index.json");
        let corpus = sample();
        corpus.save(&path).unwrap();

        let loaded = CorpusIndex::load(&path).unwrap();
        assert_eq!(loaded.entries, corpus.entries);
        assert_eq!(loaded.model, "test-model");
        let hits = loaded.index.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(loaded.entry(hits[0].position).unwrap().text, "b");
    }

    #[test]
    fn load_detects_desynchronised_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus_index.json");

        let mut corpus = sample();
        corpus.entries.pop();
        fs::write(&path, serde_json::to_vec(&corpus).unwrap()).unwrap();
        assert!(matches!(
            CorpusIndex::load(&path),
            Err(RagError::CorruptIndex(_))
        ));

        let mut corpus = sample();
        corpus.entries.swap(0, 1);
        fs::write(&path, serde_json::to_vec(&corpus).unwrap()).unwrap();
        assert!(matches!(
            CorpusIndex::load(&path),
            Err(RagError::CorruptIndex(_))
        ));
    }
}
