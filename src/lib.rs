//! # edgequake-pdf2mcq
//!
//! Extract structured multiple-choice questions from exam-paper PDFs using
//! a document parser and a Large Language Model.
//!
//! ## Why this crate?
//!
//! Question banks published as PDFs are easy for people to read and hard
//! for software to use: numbering, options, answer keys and figures are all
//! laid out visually. This crate parses the PDF into Markdown, asks an LLM to
//! emit every question as JSON, and then does the part that matters for data
//! quality: it validates each question independently against a typed schema,
//! keeps the good ones, and records exactly why the others were dropped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Parse     upload to the parse service, get Markdown + page images
//!  ├─ 2. LLM       one prompt per document, reply is a JSON envelope
//!  ├─ 3. Decode    strip fences, parse JSON
//!  ├─ 4. Link      attach page images to question / answer-option slots
//!  ├─ 5. Validate  per-question validation with partial recovery
//!  └─ 6. Write     <stem>_<YYYYmmdd_HHMMSS>.json, atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2mcq::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Parse key from LLAMA_CLOUD_API_KEY, LLM provider auto-detected from
//!     // OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ExtractionConfig::builder()
//!         .parse_api_key(std::env::var("LLAMA_CLOUD_API_KEY")?)
//!         .build()?;
//!     let extractor = Extractor::from_config(config)?;
//!     let summary = extractor.run_pending().await;
//!     eprintln!("{}/{} documents extracted", summary.succeeded(), summary.total());
//!     std::process::exit(summary.exit_code());
//! }
//! ```
//!
//! ## Validating model output directly
//!
//! ```rust
//! use edgequake_pdf2mcq::{DocumentContext, ExtractionValidator};
//!
//! let raw = serde_json::json!({ "questions": [ { "question_text": "?" } ] });
//! let ctx = DocumentContext::new("paper.pdf", chrono::Local::now());
//! let err = ExtractionValidator::default().validate(&raw, ctx).unwrap_err();
//! assert!(err.to_string().contains("All 1 question(s) failed validation"));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2mcq` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2mcq = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod maintenance;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ParseServiceConfig};
pub use error::{ExtractError, FailureClass, QuestionRejection, ToolError, Violation, ViolationKind};
pub use extract::{BatchSummary, DocumentOutcome, Extractor, SavedResult};
pub use pipeline::link::{link_diagrams, LinkReport};
pub use pipeline::llm::{extract_with_llm, resolve_provider, ProviderInference, QuestionInference};
pub use pipeline::parse::{DocumentParser, LlamaParseClient, ParsedDocument};
pub use pipeline::postprocess::strip_code_fences;
pub use pipeline::validate::{DocumentContext, ExtractionValidator};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{
    Category, Difficulty, DocumentMetadata, ExtractionResult, Importance, Language, Question,
    QuestionNumber, QuestionTags,
};
