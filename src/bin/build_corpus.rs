use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use course_forum_rag::{
    chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config::AppConfig,
    embedder::OpenAiEmbedder,
    ingest,
    rag,
    retriever::Retriever,
    vector_store::CorpusIndex,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "build_corpus",
    about = "Construye offline los artefactos del corpus: chunks, embeddings e índice vectorial"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trocea los documentos JSONL del crawler en chunks de palabras
    Chunk(ChunkArgs),
    /// Calcula el embedding de cada chunk
    Embed(EmbedArgs),
    /// Construye el índice vectorial + metadatos a partir de los embeddings
    Index(IndexArgs),
    /// Ejecuta las tres etapas seguidas
    All(AllArgs),
    /// Busca en un índice ya construido y muestra los resultados
    Search(SearchArgs),
}

#[derive(clap::Args, Debug)]
struct ChunkArgs {
    /// Ficheros JSONL de documentos ({title, content|text, url})
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    #[arg(long, env = "CHUNKS_PATH", default_value = "chunks.jsonl")]
    output: PathBuf,

    /// Palabras por chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    size: usize,

    /// Palabras compartidas entre chunks consecutivos
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    overlap: usize,
}

#[derive(clap::Args, Debug)]
struct EmbedArgs {
    #[arg(long, env = "CHUNKS_PATH", default_value = "chunks.jsonl")]
    input: PathBuf,

    #[arg(long, env = "EMBEDDED_CHUNKS_PATH", default_value = "embedded_chunks.jsonl")]
    output: PathBuf,
}

#[derive(clap::Args, Debug)]
struct IndexArgs {
    #[arg(long, env = "EMBEDDED_CHUNKS_PATH", default_value = "embedded_chunks.jsonl")]
    input: PathBuf,

    #[arg(long, env = "CORPUS_INDEX_PATH", default_value = "corpus_index.json")]
    output: PathBuf,

    /// Modelo con el que se generaron los embeddings
    #[arg(long, env = "LLM_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    model: String,
}

#[derive(clap::Args, Debug)]
struct AllArgs {
    #[command(flatten)]
    chunk: ChunkArgs,

    #[arg(long, env = "EMBEDDED_CHUNKS_PATH", default_value = "embedded_chunks.jsonl")]
    embedded: PathBuf,

    #[arg(long, env = "CORPUS_INDEX_PATH", default_value = "corpus_index.json")]
    index: PathBuf,
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    question: String,

    #[arg(short, long, default_value_t = 3)]
    k: usize,

    #[arg(long, env = "CORPUS_INDEX_PATH", default_value = "corpus_index.json")]
    index: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Chunk(args) => {
            let summary = ingest::run_chunk_stage(&args.inputs, &args.output, args.size, args.overlap)?;
            println!("{summary}");
        }
        Command::Embed(args) => {
            let cfg = AppConfig::from_env()?;
            let embedder = OpenAiEmbedder::from_config(&cfg);
            let n = ingest::run_embed_stage(&embedder, &args.input, &args.output).await?;
            println!("Guardados {n} embeddings en {}", args.output.display());
        }
        Command::Index(args) => {
            let corpus = ingest::run_index_stage(&args.input, &args.output, &args.model)?;
            println!("Índice construido con {} vectores.", corpus.len());
        }
        Command::All(args) => {
            let cfg = AppConfig::from_env()?;
            let embedder = OpenAiEmbedder::from_config(&cfg);
            let chunk = &args.chunk;
            let summary =
                ingest::run_chunk_stage(&chunk.inputs, &chunk.output, chunk.size, chunk.overlap)?;
            info!("{summary}");
            ingest::run_embed_stage(&embedder, &chunk.output, &args.embedded).await?;
            let corpus =
                ingest::run_index_stage(&args.embedded, &args.index, &cfg.llm_embedding_model)?;
            println!("{summary} Índice construido con {} vectores.", corpus.len());
        }
        Command::Search(args) => {
            let cfg = AppConfig::from_env()?;
            let corpus = CorpusIndex::load(&args.index)
                .with_context(|| format!("Error al cargar {}", args.index.display()))?;
            let retriever = Retriever::new(
                Arc::new(corpus),
                Arc::new(OpenAiEmbedder::from_config(&cfg)),
            );
            let results = retriever.retrieve(&args.question, args.k).await?;
            for (i, res) in results.iter().enumerate() {
                println!("\nResult #{}", i + 1);
                println!("Title: {}", res.title);
                println!("URL: {}", res.url);
                println!("Text: {} ...", rag::preview(res, 300));
            }
        }
    }
    Ok(())
}
