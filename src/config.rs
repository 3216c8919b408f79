//! Configuration types for question extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is an explicit value handed
//! to [`crate::extract::Extractor`] and to each collaborator at construction
//! time; nothing reads process-wide settings, so two extractors with
//! different directories or models can run side by side in one test.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Root URL of the hosted document-parsing service.
pub const DEFAULT_PARSE_BASE_URL: &str = "https://api.cloud.llamaindex.ai";

/// Configuration for extracting questions from a batch of PDFs.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2mcq::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .input_dir("data/input")
///     .output_dir("data/output")
///     .concurrency(3)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.pending_dir(), std::path::Path::new("data/input/new"));
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Root input directory. PDFs awaiting processing live in `input_dir/new`.
    pub input_dir: PathBuf,

    /// Directory for validated JSON results. Default: `data/output`.
    pub output_dir: PathBuf,

    /// Maximum number of documents in flight at once. Default: 5.
    ///
    /// Both the parse service and the LLM API rate-limit per key; this is
    /// the only knob bounding simultaneous requests.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses [`DEFAULT_MODEL`]
    /// for named providers and the provider default otherwise.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate for one document. Default: 16384.
    ///
    /// A whole exam paper is returned in one response; 100 questions with
    /// tags run to roughly 12k output tokens.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Reject questions whose `correct_answer` is not an `answer_options` key.
    /// Default: true.
    pub require_answer_key: bool,

    /// Associate downloaded images with question/answer diagram slots.
    /// Default: true.
    pub link_diagrams: bool,

    /// Document-parsing service settings.
    pub parse: ParseServiceConfig,

    /// Optional progress events for batch runs.
    pub progress_callback: Option<ProgressCallback>,
}

/// Settings for the hosted document-parsing service.
#[derive(Clone)]
pub struct ParseServiceConfig {
    /// API key. Required for [`crate::pipeline::parse::LlamaParseClient`].
    pub api_key: Option<String>,
    /// Service root URL. Default: [`DEFAULT_PARSE_BASE_URL`].
    pub base_url: String,
    /// Delay between job-status polls in milliseconds. Default: 2000.
    pub poll_interval_ms: u64,
    /// Give up on a parse job after this many seconds. Default: 300.
    pub timeout_secs: u64,
    /// Download page images for diagram linking. Default: true.
    pub download_images: bool,
}

impl Default for ParseServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_PARSE_BASE_URL.to_string(),
            poll_interval_ms: 2000,
            timeout_secs: 300,
            download_images: true,
        }
    }
}

impl fmt::Debug for ParseServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseServiceConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("download_images", &self.download_images)
            .finish()
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/input"),
            output_dir: PathBuf::from("data/output"),
            concurrency: 5,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 16384,
            system_prompt: None,
            require_answer_key: true,
            link_diagrams: true,
            parse: ParseServiceConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("require_answer_key", &self.require_answer_key)
            .field("link_diagrams", &self.link_diagrams)
            .field("parse", &self.parse)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory scanned for PDFs awaiting processing.
    pub fn pending_dir(&self) -> PathBuf {
        self.input_dir.join("new")
    }

    /// Directory downloaded diagrams are stored under.
    pub fn diagrams_dir(&self) -> PathBuf {
        self.output_dir.join("diagrams")
    }

    /// Diagram directory for one source document, keyed by its file stem.
    pub fn document_diagrams_dir(&self, pdf_filename: &str) -> PathBuf {
        let stem = Path::new(pdf_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf_filename.to_string());
        self.diagrams_dir().join(stem)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn require_answer_key(mut self, v: bool) -> Self {
        self.config.require_answer_key = v;
        self
    }

    pub fn link_diagrams(mut self, v: bool) -> Self {
        self.config.link_diagrams = v;
        self
    }

    pub fn parse_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.parse.api_key = Some(key.into());
        self
    }

    pub fn parse_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.parse.base_url = url.into();
        self
    }

    pub fn parse_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.parse.poll_interval_ms = ms;
        self
    }

    pub fn parse_timeout_secs(mut self, secs: u64) -> Self {
        self.config.parse.timeout_secs = secs;
        self
    }

    pub fn download_images(mut self, v: bool) -> Self {
        self.config.parse.download_images = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.parse.base_url.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "Parse service base URL must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.concurrency, 5);
        assert!(c.require_answer_key);
        assert_eq!(c.pending_dir(), PathBuf::from("data/input/new"));
        assert_eq!(c.diagrams_dir(), PathBuf::from("data/output/diagrams"));
        assert_eq!(c.parse.base_url, DEFAULT_PARSE_BASE_URL);
    }

    #[test]
    fn builder_clamps_concurrency_and_temperature() {
        let c = ExtractionConfig::builder()
            .concurrency(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = ExtractionConfig::builder()
            .parse_base_url("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn document_diagrams_dir_uses_stem() {
        let c = ExtractionConfig::builder()
            .output_dir("/tmp/out")
            .build()
            .unwrap();
        assert_eq!(
            c.document_diagrams_dir("psc_2024.pdf"),
            PathBuf::from("/tmp/out/diagrams/psc_2024")
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractionConfig::builder()
            .parse_api_key("llx-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("llx-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
