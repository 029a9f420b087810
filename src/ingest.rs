//! Construcción offline de los artefactos del corpus:
//! documentos JSONL → chunks JSONL → chunks embebidos JSONL → índice.
//!
//! Cada etapa es fatal ante cualquier error: un artefacto corrupto
//! estropearía todas las respuestas posteriores.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::{chunk_document, validate_window};
use crate::embedder::Embedder;
use crate::models::{Chunk, Document, EmbeddedChunk};
use crate::vector_store::CorpusIndex;

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub documents_read: usize,
    pub documents_skipped: usize,
    pub chunks_created: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} documentos leídos, {} omitidos, {} chunks creados.",
            self.documents_read, self.documents_skipped, self.chunks_created
        )
    }
}

/// Lee documentos de uno o varios ficheros JSONL. Las líneas ilegibles se
/// saltan con un aviso.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for path in paths {
        let file = File::open(path).with_context(|| format!("No se pudo abrir {}", path.display()))?;
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Error leyendo {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Document>(&line) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!("{}:{}: línea ignorada ({e})", path.display(), n + 1),
            }
        }
    }
    Ok(docs)
}

/// Trocea todos los documentos en orden.
pub fn chunk_documents(
    docs: &[Document],
    size: usize,
    overlap: usize,
) -> Result<(Vec<Chunk>, IngestionSummary)> {
    validate_window(size, overlap)?;
    let mut summary = IngestionSummary::default();
    let mut chunks = Vec::new();
    for doc in docs {
        summary.documents_read += 1;
        if doc.body().trim().is_empty() {
            summary.documents_skipped += 1;
            continue;
        }
        let doc_chunks = chunk_document(doc, size, overlap)?;
        summary.chunks_created += doc_chunks.len();
        chunks.extend(doc_chunks);
    }
    Ok((chunks, summary))
}

/// Embebe los chunks conservando el orden de entrada.
pub async fn embed_chunks(embedder: &dyn Embedder, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != chunks.len() {
        return Err(anyhow!(
            "Número de embeddings ({}) distinto al número de chunks ({})",
            vectors.len(),
            chunks.len()
        ));
    }
    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
        .collect())
}

/// Etapa 1: documentos → `chunks.jsonl`.
pub fn run_chunk_stage(
    inputs: &[PathBuf],
    output: &Path,
    size: usize,
    overlap: usize,
) -> Result<IngestionSummary> {
    let docs = load_documents(inputs)?;
    let (chunks, summary) = chunk_documents(&docs, size, overlap)?;
    write_jsonl(output, &chunks)?;
    info!("{summary} Escritos en {}", output.display());
    Ok(summary)
}

/// Etapa 2: `chunks.jsonl` → `embedded_chunks.jsonl`. Si falla algún lote no
/// se escribe nada.
pub async fn run_embed_stage(embedder: &dyn Embedder, input: &Path, output: &Path) -> Result<usize> {
    let chunks: Vec<Chunk> = read_jsonl(input)?;
    info!("Generando embeddings de {} chunks...", chunks.len());
    let embedded = embed_chunks(embedder, chunks).await?;
    write_jsonl(output, &embedded)?;
    info!("Guardados {} embeddings en {}", embedded.len(), output.display());
    Ok(embedded.len())
}

/// Etapa 3: `embedded_chunks.jsonl` → artefacto compuesto del índice.
pub fn run_index_stage(input: &Path, output: &Path, model: &str) -> Result<CorpusIndex> {
    let embedded: Vec<EmbeddedChunk> = read_jsonl(input)?;
    let corpus = CorpusIndex::build(embedded, model)
        .with_context(|| format!("No se pudo construir el índice desde {}", input.display()))?;
    corpus.save(output)?;
    Ok(corpus)
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("No se pudo abrir {}", path.display()))?;
    let mut rows = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: registro inválido", path.display(), n + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Escribe en un fichero temporal y lo renombra al final.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let file = File::create(&tmp).with_context(|| format!("No se pudo crear {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("No se pudo escribir {}", path.display()))?;
    Ok(())
}
