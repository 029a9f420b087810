//! Extracción de texto de imágenes adjuntas a una pregunta.
//!
//! La imagen puede llegar como URL remota, ruta local (`file://`) o bytes en
//! base64 (opcionalmente como data URI). El OCR se delega en el binario de
//! Tesseract, al que se le pasan los bytes por stdin.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::config::AppConfig;
use crate::error::{RagError, Result};

/// Origen de la imagen, decidido sólo por el prefijo.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Remote(Url),
    Local(PathBuf),
    Inline(String),
}

impl ImageSource {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| RagError::ImageProcessingFailure(format!("URL inválida: {e}")))?;
            Ok(Self::Remote(url))
        } else if let Some(path) = raw.strip_prefix("file://") {
            Ok(Self::Local(PathBuf::from(path)))
        } else {
            Ok(Self::Inline(raw.to_string()))
        }
    }
}

/// Decodifica base64, aceptando también `data:<mime>;base64,<datos>`.
pub fn decode_inline(data: &str) -> Result<Vec<u8>> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, b64)| b64)
            .ok_or_else(|| RagError::ImageProcessingFailure("data URI sin datos".to_string()))?,
        None => data,
    };
    let compact: String = payload.split_whitespace().collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| RagError::ImageProcessingFailure(format!("base64 inválido: {e}")))
}

/// Obtiene los bytes de la imagen para cualquiera de los tres orígenes.
pub async fn load_image(http: &reqwest::Client, source: &ImageSource) -> Result<Vec<u8>> {
    match source {
        ImageSource::Remote(url) => {
            let resp = http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| RagError::ImageProcessingFailure(format!("descarga fallida: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(RagError::ImageProcessingFailure(format!(
                    "descarga de {url} respondió {status}"
                )));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| RagError::ImageProcessingFailure(format!("descarga fallida: {e}")))?;
            Ok(bytes.to_vec())
        }
        ImageSource::Local(path) => tokio::fs::read(path).await.map_err(|e| {
            RagError::ImageProcessingFailure(format!("no se pudo leer {}: {e}", path.display()))
        }),
        ImageSource::Inline(data) => decode_inline(data),
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String>;
}

/// OCR con el ejecutable `tesseract` (`tesseract stdin stdout`).
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.tesseract_bin.clone(), cfg.ocr_timeout)
    }
}

#[async_trait]
impl TextExtractor for TesseractOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        if image.is_empty() {
            return Err(RagError::ImageProcessingFailure("imagen vacía".to_string()));
        }

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RagError::ImageProcessingFailure(format!("no se pudo lanzar {}: {e}", self.binary))
            })?;

        // Escritura y espera comparten el mismo plazo: un proceso que no lee
        // stdin no debe bloquear la petición.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(image).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| {
            RagError::ImageProcessingFailure(format!(
                "OCR sin respuesta tras {}s",
                self.timeout.as_secs()
            ))
        })?;

        let output =
            output.map_err(|e| RagError::ImageProcessingFailure(format!("OCR falló: {e}")))?;
        if let Err(e) = fed {
            if output.status.success() {
                return Err(RagError::ImageProcessingFailure(format!(
                    "escritura a OCR: {e}"
                )));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RagError::ImageProcessingFailure(format!(
                "OCR falló: {}",
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("OCR extrajo {} caracteres", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_picked_by_prefix() {
        assert!(matches!(
            ImageSource::parse("https://example.com/a.png").unwrap(),
            ImageSource::Remote(_)
        ));
        assert_eq!(
            ImageSource::parse("file:///tmp/shot.png").unwrap(),
            ImageSource::Local(PathBuf::from("/tmp/shot.png"))
        );
        assert_eq!(
            ImageSource::parse("aGVsbG8=").unwrap(),
            ImageSource::Inline("aGVsbG8=".to_string())
        );
    }

    #[test]
    fn inline_accepts_plain_and_data_uri() {
        assert_eq!(decode_inline("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_inline("data:image/png;base64,aGVs\nbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn inline_rejects_garbage() {
        assert!(matches!(
            decode_inline("%%% not base64 %%%"),
            Err(RagError::ImageProcessingFailure(_))
        ));
        assert!(decode_inline("data:image/png;base64").is_err());
    }

    #[tokio::test]
    async fn missing_local_file_is_an_image_failure() {
        let http = reqwest::Client::new();
        let source = ImageSource::Local(PathBuf::from("/definitely/not/here.png"));
        let err = load_image(&http, &source).await.unwrap_err();
        assert!(matches!(err, RagError::ImageProcessingFailure(_)));
    }

    #[tokio::test]
    async fn local_file_bytes_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let http = reqwest::Client::new();
        let bytes = load_image(&http, &ImageSource::Local(path)).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_ocr_binary_fails_cleanly() {
        let ocr = TesseractOcr::new("/no/such/tesseract-binary", Duration::from_secs(5));
        let err = ocr.extract_text(b"\x89PNG").await.unwrap_err();
        assert!(matches!(err, RagError::ImageProcessingFailure(_)));
    }

    async fn serve_images() -> String {
        use axum::{http::StatusCode, routing::get, Router};

        let app = Router::new()
            .route("/shot.png", get(|| async { vec![0x89u8, b'P', b'N', b'G'] }))
            .route("/gone.png", get(|| async { (StatusCode::NOT_FOUND, "no existe") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn remote_image_is_downloaded() {
        let base = serve_images().await;
        let source = ImageSource::parse(&format!("{base}/shot.png")).unwrap();
        let http = reqwest::Client::new();
        let bytes = load_image(&http, &source).await.unwrap();
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn remote_error_status_is_an_image_failure() {
        let base = serve_images().await;
        let source = ImageSource::parse(&format!("{base}/gone.png")).unwrap();
        let http = reqwest::Client::new();
        let err = load_image(&http, &source).await.unwrap_err();
        match err {
            RagError::ImageProcessingFailure(msg) => assert!(msg.contains("404")),
            other => panic!("error inesperado: {other:?}"),
        }
    }

    /// Crea un ejecutable de shell que hace las veces de `tesseract`.
    #[cfg(unix)]
    fn fake_tesseract(dir: &std::path::Path, body: &str) -> String {
        use std::io::Write as _;
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("tesseract");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh\n{body}").unwrap();
            file.sync_all().unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ocr_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_tesseract(dir.path(), "cat > /dev/null\necho 'Error 404 en Vercel'");
        let ocr = TesseractOcr::new(bin, Duration::from_secs(10));
        let text = ocr.extract_text(b"\x89PNG").await.unwrap();
        assert_eq!(text.trim(), "Error 404 en Vercel");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_ocr_that_never_reads_stdin_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_tesseract(dir.path(), "sleep 20");
        let ocr = TesseractOcr::new(bin, Duration::from_secs(1));
        // Mucho mayor que el buffer de una tubería.
        let image = vec![0u8; 4 * 1024 * 1024];

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(8), ocr.extract_text(&image))
            .await
            .expect("extract_text debe respetar su propio plazo");
        assert!(matches!(result, Err(RagError::ImageProcessingFailure(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
