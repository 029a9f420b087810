//! Troceado determinista de documentos en ventanas de palabras solapadas.

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Tamaño de ventana por defecto, en palabras.
pub const DEFAULT_CHUNK_SIZE: usize = 300;

/// Palabras compartidas entre ventanas consecutivas.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Divide `content` en ventanas de hasta `size` palabras que avanzan
/// `size - overlap` palabras cada vez. La última ventana puede ser más corta.
///
/// Falla con `InvalidConfiguration` si `overlap >= size`.
pub fn split_words(content: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    let step = validate_window(size, overlap)?;

    let words: Vec<&str> = content.split_whitespace().collect();
    let chunks = (0..words.len())
        .step_by(step)
        .map(|start| {
            let end = (start + size).min(words.len());
            words[start..end].join(" ")
        })
        .collect();

    Ok(chunks)
}

/// Comprueba los parámetros de ventana y devuelve el paso entre ventanas.
pub fn validate_window(size: usize, overlap: usize) -> Result<usize> {
    if overlap >= size {
        return Err(RagError::InvalidConfiguration(format!(
            "el solapamiento ({overlap}) debe ser menor que el tamaño del chunk ({size})"
        )));
    }
    Ok(size - overlap)
}

/// Trocea un documento adjuntando título y URL a cada chunk.
pub fn chunk_document(doc: &Document, size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let chunks = split_words(doc.body(), size, overlap)?
        .into_iter()
        .map(|text| Chunk {
            text,
            title: doc.title().to_string(),
            url: doc.url.clone(),
        })
        .collect();
    Ok(chunks)
}
