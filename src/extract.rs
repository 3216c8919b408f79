//! Document and batch orchestration.
//!
//! ## Why per-document isolation?
//!
//! A run typically covers a folder of papers. One scanned PDF the parser
//! chokes on, or one reply the model truncates, must not cost the other
//! documents their output. Every document therefore runs to its own
//! `Result`, and a batch only aggregates them into a [`BatchSummary`].
//!
//! Documents run concurrently up to [`ExtractionConfig::concurrency`]; both
//! the parse service and the LLM API rate-limit per key, so the bound is the
//! one knob that keeps a large folder from tripping 429s.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, FailureClass};
use crate::pipeline::link::link_diagrams;
use crate::pipeline::llm::{extract_with_llm, resolve_provider, ProviderInference, QuestionInference};
use crate::pipeline::parse::{check_pdf, find_pdfs, DocumentParser, LlamaParseClient, ParsedDocument};
use crate::pipeline::validate::{DocumentContext, ExtractionValidator};
use crate::pipeline::write::{output_filename, save_json};
use crate::schema::ExtractionResult;
use chrono::{DateTime, Local};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A result that was written to disk.
#[derive(Debug, Clone)]
pub struct SavedResult {
    pub path: PathBuf,
    /// Questions accepted into the output.
    pub questions: usize,
    /// Questions the model returned but validation dropped.
    pub skipped: usize,
}

/// What happened to one input document.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub source: PathBuf,
    pub result: Result<SavedResult, ExtractError>,
}

impl DocumentOutcome {
    pub fn filename(&self) -> String {
        display_name(&self.source)
    }
}

/// Per-document outcomes of a batch run, in input order.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<DocumentOutcome>,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn total_questions(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|s| s.questions)
            .sum()
    }

    /// Failure count per class, for the end-of-run report.
    pub fn failures_by_class(&self) -> Vec<(FailureClass, usize)> {
        let mut counts: Vec<(FailureClass, usize)> = Vec::new();
        for class in self
            .outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err())
            .map(ExtractError::class)
        {
            match counts.iter_mut().find(|(c, _)| *c == class) {
                Some((_, n)) => *n += 1,
                None => counts.push((class, 1)),
            }
        }
        counts
    }

    /// 0 when at least one document produced output, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() > 0 {
            0
        } else {
            1
        }
    }
}

/// Runs the extraction pipeline over one document or a batch.
pub struct Extractor {
    config: ExtractionConfig,
    parser: Arc<dyn DocumentParser>,
    inference: Arc<dyn QuestionInference>,
    validator: ExtractionValidator,
}

impl Extractor {
    /// Assemble an extractor from explicit collaborators.
    pub fn new(
        config: ExtractionConfig,
        parser: Arc<dyn DocumentParser>,
        inference: Arc<dyn QuestionInference>,
    ) -> Self {
        let validator = ExtractionValidator::from_config(&config);
        Self {
            config,
            parser,
            inference,
            validator,
        }
    }

    /// Build the production extractor: LlamaParse for parsing and the
    /// resolved `edgequake_llm` provider for inference.
    ///
    /// # Errors
    /// Missing parse-service key or no usable LLM provider.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractError> {
        let parser = LlamaParseClient::new(&config.parse, config.diagrams_dir())?;
        let provider = resolve_provider(&config)?;
        let inference = ProviderInference::new(provider, &config);
        Ok(Self::new(config, Arc::new(parser), Arc::new(inference)))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// PDFs waiting in the pending directory.
    pub fn pending_pdfs(&self) -> Vec<PathBuf> {
        find_pdfs(&self.config.pending_dir())
    }

    /// Map names given on the command line to paths: existing paths are
    /// used as-is, bare names are looked up in the pending directory.
    pub fn resolve_inputs(&self, names: &[String]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let p = PathBuf::from(name);
                if p.exists() {
                    p
                } else {
                    self.config.pending_dir().join(name)
                }
            })
            .collect()
    }

    /// LLM → link → validate for an already-parsed document.
    pub async fn extract_from_parsed(
        &self,
        parsed: &ParsedDocument,
    ) -> Result<ExtractionResult, ExtractError> {
        self.extract_at(parsed, Local::now()).await.map(|(r, _)| r)
    }

    /// Returns the result and the number of raw questions the model gave.
    async fn extract_at(
        &self,
        parsed: &ParsedDocument,
        at: DateTime<Local>,
    ) -> Result<(ExtractionResult, usize), ExtractError> {
        let document = parsed.filename.as_str();
        info!("Starting extraction for {}", document);

        let mut raw = extract_with_llm(self.inference.as_ref(), document, &parsed.markdown).await?;

        let mut notes = Vec::new();
        if self.config.link_diagrams && !parsed.images.is_empty() {
            if let Some(Value::Array(questions)) = raw.get_mut("questions") {
                let report = link_diagrams(questions, &parsed.images, document);
                for note in &report.notes {
                    warn!("{}: {}", document, note);
                }
                if !report.unmatched.is_empty() {
                    info!(
                        "{}: {} image(s) linked, {} left unlinked",
                        document,
                        report.linked.len(),
                        report.unmatched.len()
                    );
                }
                notes = report.notes;
            }
        }

        let raw_count = raw
            .get("questions")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let ctx = DocumentContext::new(document, at).with_notes(notes);
        let result = self.validator.validate(&raw, ctx)?;
        Ok((result, raw_count))
    }

    /// Extract and write `<stem>_<timestamp>.json` to the output directory.
    pub async fn extract_and_save(&self, parsed: &ParsedDocument) -> Result<SavedResult, ExtractError> {
        let at = Local::now();
        let (result, raw_count) = self.extract_at(parsed, at).await?;
        let filename = output_filename(&parsed.filename, &at);
        let path = save_json(&result, &self.config.output_dir, &filename)?;
        Ok(SavedResult {
            path,
            questions: result.questions.len(),
            skipped: raw_count.saturating_sub(result.questions.len()),
        })
    }

    /// Check → parse → extract → save for one PDF.
    pub async fn process_file(&self, pdf: &Path) -> Result<SavedResult, ExtractError> {
        check_pdf(pdf)?;
        let parsed = self.parser.parse(pdf).await?;
        self.extract_and_save(&parsed).await
    }

    /// Process every PDF in the pending directory.
    pub async fn run_pending(&self) -> BatchSummary {
        let pdfs = self.pending_pdfs();
        if pdfs.is_empty() {
            warn!(
                "No PDF files found in {}",
                self.config.pending_dir().display()
            );
        }
        self.run_batch(&pdfs).await
    }

    /// Process `pdfs` concurrently; one document's failure never affects
    /// another's.
    pub async fn run_batch(&self, pdfs: &[PathBuf]) -> BatchSummary {
        let started = Instant::now();
        let total = pdfs.len();
        let cb = self.config.progress_callback.clone();
        if let Some(ref cb) = cb {
            cb.on_batch_start(total);
        }
        info!(
            "Processing {} PDF(s) with concurrency {}",
            total, self.config.concurrency
        );

        let mut indexed: Vec<(usize, DocumentOutcome)> = stream::iter(pdfs.iter().enumerate())
            .map(|(i, pdf)| {
                let cb = cb.clone();
                async move {
                    let name = display_name(pdf);
                    if let Some(ref cb) = cb {
                        cb.on_document_start(&name, i + 1, total);
                    }
                    info!("Processing [{}/{}]: {}", i + 1, total, name);

                    let result = AssertUnwindSafe(self.process_file(pdf))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(ExtractError::Internal(format!(
                                "extraction task for '{name}' panicked"
                            )))
                        });

                    match &result {
                        Ok(saved) => {
                            info!("✓ {} → {} ({} question(s))", name, saved.path.display(), saved.questions);
                            if let Some(ref cb) = cb {
                                cb.on_document_complete(&name, saved.questions, saved.skipped);
                            }
                        }
                        Err(e) => {
                            error!("✗ {} [{}]: {}", name, e.class(), e);
                            if let Some(ref cb) = cb {
                                cb.on_document_error(&name, &e.to_string());
                            }
                        }
                    }

                    (
                        i,
                        DocumentOutcome {
                            source: pdf.clone(),
                            result,
                        },
                    )
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        indexed.sort_by_key(|(i, _)| *i);
        let summary = BatchSummary {
            outcomes: indexed.into_iter().map(|(_, o)| o).collect(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if let Some(ref cb) = cb {
            cb.on_batch_complete(total, summary.succeeded());
        }
        info!(
            "Batch complete: {}/{} PDF(s) in {}ms",
            summary.succeeded(),
            total,
            summary.duration_ms
        );
        summary
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
