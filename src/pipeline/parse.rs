//! Document parsing: PDF → Markdown text plus page images.
//!
//! ## Why a hosted parser?
//!
//! Exam papers mix scripts (Malayalam, Hindi, English on one page), tables
//! and figures. A layout-aware parsing service turns that into Markdown the
//! extraction model can read, and hands back the embedded images so they can
//! be linked to questions. The service sits behind [`DocumentParser`] so the
//! rest of the pipeline (and its tests) never touch the network.
//!
//! ## Job lifecycle
//!
//! ```text
//! upload ──▶ poll status ──▶ fetch markdown ──▶ list images ──▶ download each
//!  (multipart)  (fixed interval,   (one string)     (result/json)   (diagrams/<stem>/)
//!               bounded by timeout)
//! ```
//!
//! Input files are checked (exists, readable, `%PDF` magic) before upload so
//! a stray `.pdf`-named text file fails locally with a clear error.

use crate::config::ParseServiceConfig;
use crate::error::ExtractError;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Output of parsing one PDF.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// Source file name, e.g. `psc_2024.pdf`.
    pub filename: String,
    /// Markdown for the whole document, pages joined by blank lines.
    pub markdown: String,
    /// Local paths of downloaded page images, in service order.
    pub images: Vec<PathBuf>,
}

/// Turns a PDF on disk into a [`ParsedDocument`].
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, pdf: &Path) -> Result<ParsedDocument, ExtractError>;
}

/// List `*.pdf` files directly inside `dir`, sorted by path.
///
/// A missing or unreadable directory yields an empty list.
pub fn find_pdfs(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read input directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    info!("Found {} PDF(s) in {}", pdfs.len(), dir.display());
    pdfs
}

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn check_pdf(path: &Path) -> Result<(), ExtractError> {
    if !path.exists() {
        return Err(ExtractError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(ExtractError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(ExtractError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Verified PDF: {}", path.display());
    Ok(())
}

// ── Service wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JobStatus {
    id: String,
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarkdownResult {
    markdown: String,
}

#[derive(Debug, Deserialize)]
struct JsonResult {
    #[serde(default)]
    pages: Vec<JsonPage>,
}

#[derive(Debug, Deserialize)]
struct JsonPage {
    #[serde(default)]
    images: Vec<PageImage>,
}

#[derive(Debug, Deserialize)]
struct PageImage {
    name: String,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// [`DocumentParser`] backed by the LlamaParse REST API.
pub struct LlamaParseClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
    download_images: bool,
    diagrams_root: PathBuf,
}

impl std::fmt::Debug for LlamaParseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaParseClient")
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .field("diagrams_root", &self.diagrams_root)
            .finish_non_exhaustive()
    }
}

impl LlamaParseClient {
    /// Build a client. Images are saved under `diagrams_root/<pdf stem>/`.
    ///
    /// # Errors
    /// [`ExtractError::ParseServiceNotConfigured`] when no API key is set.
    pub fn new(config: &ParseServiceConfig, diagrams_root: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ExtractError::ParseServiceNotConfigured {
                hint: "Set LLAMA_CLOUD_API_KEY or pass --parse-api-key.".into(),
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ExtractError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.timeout_secs),
            download_images: config.download_images,
            diagrams_root: diagrams_root.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/parsing/{}", self.base_url, path)
    }

    fn failed(document: &str, reason: impl std::fmt::Display) -> ExtractError {
        ExtractError::ParseFailed {
            document: document.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        document: &str,
        path: &str,
    ) -> Result<T, ExtractError> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Self::failed(document, e))?;
        if !resp.status().is_success() {
            return Err(Self::failed(document, format!("HTTP {} on {}", resp.status(), path)));
        }
        resp.json::<T>().await.map_err(|e| Self::failed(document, e))
    }

    async fn upload(&self, pdf: &Path, document: &str) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(pdf)
            .await
            .map_err(|e| Self::failed(document, format!("read failed: {e}")))?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(document.to_string())
            .mime_str("application/pdf")
            .map_err(|e| Self::failed(document, e))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(self.url("upload"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::failed(document, e))?;
        if !resp.status().is_success() {
            return Err(Self::failed(document, format!("upload returned HTTP {}", resp.status())));
        }
        let job: JobStatus = resp.json().await.map_err(|e| Self::failed(document, e))?;
        info!("Uploaded {} → job {}", document, job.id);
        Ok(job.id)
    }

    async fn wait_for_job(&self, job_id: &str, document: &str) -> Result<(), ExtractError> {
        let started = Instant::now();
        loop {
            let job: JobStatus = self.get_json(document, &format!("job/{job_id}")).await?;
            match classify_status(&job.status) {
                JobState::Done => return Ok(()),
                JobState::Failed => {
                    return Err(Self::failed(
                        document,
                        job.error_message
                            .unwrap_or_else(|| format!("job ended with status {}", job.status)),
                    ))
                }
                JobState::Pending => {}
            }
            if started.elapsed() >= self.timeout {
                return Err(ExtractError::ParseTimeout {
                    document: document.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
            debug!("Job {} for {} still {}", job_id, document, job.status);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download_all(&self, job_id: &str, pdf_filename: &str) -> Vec<PathBuf> {
        let listing: JsonResult = match self.get_json(pdf_filename, &format!("job/{job_id}/result/json")).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Could not list images for {}: {}", pdf_filename, e);
                return Vec::new();
            }
        };

        let dir = document_dir(&self.diagrams_root, pdf_filename);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Cannot create diagram directory {}: {}", dir.display(), e);
            return Vec::new();
        }

        let mut saved = Vec::new();
        for image in listing.pages.into_iter().flat_map(|p| p.images) {
            let Some(local_name) = safe_file_name(&image.name) else {
                warn!("Skipping image with unusable name {:?}", image.name);
                continue;
            };
            let target = dir.join(local_name);
            match self.download_image(job_id, &image.name, &target).await {
                Ok(()) => {
                    debug!("Downloaded image → {}", target.display());
                    saved.push(target);
                }
                Err(e) => warn!("Failed to download image {} for {}: {}", image.name, pdf_filename, e),
            }
        }
        saved
    }

    async fn download_image(&self, job_id: &str, name: &str, target: &Path) -> Result<(), String> {
        let resp = self
            .http
            .get(self.url(&format!("job/{job_id}/result/image/{name}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        tokio::fs::write(target, &bytes).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl DocumentParser for LlamaParseClient {
    async fn parse(&self, pdf: &Path) -> Result<ParsedDocument, ExtractError> {
        check_pdf(pdf)?;
        let filename = pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf.display().to_string());

        info!("Uploading: {}", filename);
        let job_id = self.upload(pdf, &filename).await?;
        self.wait_for_job(&job_id, &filename).await?;

        let result: MarkdownResult = self
            .get_json(&filename, &format!("job/{job_id}/result/markdown"))
            .await?;
        info!("Parsed {} ({} chars)", filename, result.markdown.len());

        let images = if self.download_images {
            self.download_all(&job_id, &filename).await
        } else {
            Vec::new()
        };

        Ok(ParsedDocument {
            filename,
            markdown: result.markdown,
            images,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum JobState {
    Pending,
    Done,
    Failed,
}

fn classify_status(status: &str) -> JobState {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" | "COMPLETED" => JobState::Done,
        "ERROR" | "FAILED" | "CANCELED" | "CANCELLED" => JobState::Failed,
        _ => JobState::Pending,
    }
}

fn document_dir(root: &Path, pdf_filename: &str) -> PathBuf {
    let stem = Path::new(pdf_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf_filename.to_string());
    root.join(stem)
}

/// Last path component of a service-supplied name, rejecting `..` and empties.
fn safe_file_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?;
    (!base.is_empty() && base != "." && base != "..").then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_check_pdf_accepts_magic() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n...").unwrap();
        assert!(check_pdf(f.path()).is_ok());
    }

    #[test]
    fn test_check_pdf_rejects_other_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"<html>").unwrap();
        let err = check_pdf(f.path()).unwrap_err();
        assert!(matches!(err, ExtractError::NotAPdf { magic, .. } if &magic == b"<htm"));
    }

    #[test]
    fn test_check_pdf_short_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        assert!(matches!(check_pdf(f.path()), Err(ExtractError::NotAPdf { .. })));
    }

    #[test]
    fn test_check_pdf_missing() {
        let err = check_pdf(Path::new("/nonexistent/paper.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[test]
    fn test_find_pdfs_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt", "c.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();
        let names: Vec<_> = find_pdfs(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf", "c.pdf"]);
    }

    #[test]
    fn test_find_pdfs_missing_dir() {
        assert!(find_pdfs(Path::new("/nonexistent/input/new")).is_empty());
    }

    #[test]
    fn test_client_requires_api_key() {
        let err = LlamaParseClient::new(&ParseServiceConfig::default(), "out/diagrams").unwrap_err();
        assert!(matches!(err, ExtractError::ParseServiceNotConfigured { .. }));

        let config = ParseServiceConfig {
            api_key: Some("llx-test".into()),
            base_url: "https://parse.example/".into(),
            ..Default::default()
        };
        let client = LlamaParseClient::new(&config, "out/diagrams").unwrap();
        assert_eq!(client.url("upload"), "https://parse.example/api/v1/parsing/upload");
        assert!(!format!("{client:?}").contains("llx-test"));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("SUCCESS"), JobState::Done);
        assert_eq!(classify_status("error"), JobState::Failed);
        assert_eq!(classify_status("PENDING"), JobState::Pending);
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("img_p0_1.png"), Some("img_p0_1.png"));
        assert_eq!(safe_file_name("a/b/q2.png"), Some("q2.png"));
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name("dir/"), None);
    }

    #[test]
    fn test_document_dir_uses_stem() {
        assert_eq!(
            document_dir(Path::new("out/diagrams"), "psc_2024.pdf"),
            PathBuf::from("out/diagrams/psc_2024")
        );
    }
}
