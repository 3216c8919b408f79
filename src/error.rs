//! Error types for the edgequake-pdf2mcq library.
//!
//! Two distinct error families reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal for one document**: the envelope could not
//!   be read, every question was rejected, or a collaborator (parse service,
//!   LLM provider, file system) failed. Returned as `Err(ExtractError)` from
//!   the per-document entry points. A batch never aborts because of one; the
//!   error is recorded against that document and the batch moves on.
//!
//! * [`QuestionRejection`] — **Non-fatal**: a single question failed
//!   validation but the rest of the document is fine. Its `Display` form is
//!   the skip note persisted inside the output JSON's `processing_notes`.
//!
//! Every fatal error maps to a [`FailureClass`] so batch summaries and logs
//! can report *why* a document failed without string matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a fatal document failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The model response had no usable `questions` list or was not JSON.
    Envelope,
    /// Every question failed validation (or there were none).
    TotalLoss,
    /// The parse service or LLM provider failed.
    Collaborator,
    /// The input file is missing, unreadable or not a PDF.
    Input,
    /// The result could not be written.
    Output,
    /// Invalid configuration or an internal fault.
    Internal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureClass::Envelope => "envelope",
            FailureClass::TotalLoss => "total-loss",
            FailureClass::Collaborator => "collaborator",
            FailureClass::Input => "input",
            FailureClass::Output => "output",
            FailureClass::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the edgequake-pdf2mcq library.
///
/// Question-level failures use [`QuestionRejection`] and are recorded in
/// the result's processing notes rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Envelope errors ───────────────────────────────────────────────────
    /// The model response could not be parsed as JSON at all.
    #[error("LLM returned invalid JSON for '{document}': {detail}")]
    InvalidJson { document: String, detail: String },

    /// The response parsed, but has no usable `questions` sequence.
    #[error("No questions found in extraction output for '{document}': {detail}")]
    MissingQuestions { document: String, detail: String },

    // ── Total-loss errors ─────────────────────────────────────────────────
    /// The `questions` list was present but empty.
    #[error("Extraction for '{document}' contained no questions")]
    NoQuestions { document: String },

    /// Every question failed validation; output would be empty.
    #[error("All {total} question(s) failed validation for '{document}'.\nFirst error: {first_error}")]
    AllQuestionsRejected {
        document: String,
        total: usize,
        first_error: String,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The document-parsing service has no API key configured.
    #[error("Document parse service is not configured.\n{hint}")]
    ParseServiceNotConfigured { hint: String },

    /// Upload or parsing of the document failed.
    #[error("Failed to parse '{document}': {reason}")]
    ParseFailed { document: String, reason: String },

    /// The parse job did not finish in time.
    #[error("Parsing '{document}' timed out after {secs}s\nIncrease --parse-timeout.")]
    ParseTimeout { document: String, secs: u64 },

    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API call failed.
    #[error("LLM extraction failed for '{document}': {message}")]
    LlmApiError { document: String, message: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The result could not be serialised.
    #[error("Failed to serialise result for '{document}': {detail}")]
    Serialize { document: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// The failure class this error belongs to.
    pub fn class(&self) -> FailureClass {
        match self {
            ExtractError::FileNotFound { .. }
            | ExtractError::PermissionDenied { .. }
            | ExtractError::NotAPdf { .. } => FailureClass::Input,
            ExtractError::InvalidJson { .. } | ExtractError::MissingQuestions { .. } => {
                FailureClass::Envelope
            }
            ExtractError::NoQuestions { .. } | ExtractError::AllQuestionsRejected { .. } => {
                FailureClass::TotalLoss
            }
            ExtractError::ParseServiceNotConfigured { .. }
            | ExtractError::ParseFailed { .. }
            | ExtractError::ParseTimeout { .. }
            | ExtractError::ProviderNotConfigured { .. }
            | ExtractError::LlmApiError { .. } => FailureClass::Collaborator,
            ExtractError::OutputWriteFailed { .. } | ExtractError::Serialize { .. } => {
                FailureClass::Output
            }
            ExtractError::InvalidConfig(_) | ExtractError::Internal(_) => FailureClass::Internal,
        }
    }
}

/// Errors from the offline tools that read saved results (`validate`,
/// `stats`, `export-csv`, `clean`).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Cannot access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Valid JSON, but not shaped like an extraction result.
    #[error("'{path}' is not an extraction result: {detail}")]
    Shape { path: PathBuf, detail: String },

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a single field failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required field is absent or null.
    Missing,
    /// The value has the wrong JSON type.
    WrongType { expected: String, found: String },
    /// The value is not a member of a closed vocabulary.
    NotInVocabulary { value: String, allowed: Vec<String> },
    /// A numeric value is below its minimum.
    OutOfRange { value: f64, min: f64 },
    /// `correct_answer` does not name one of the answer options.
    UnknownAnswerKey { key: String, available: Vec<String> },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Missing => f.write_str("field required"),
            ViolationKind::WrongType { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            ViolationKind::NotInVocabulary { value, allowed } => {
                write!(f, "'{value}' is not one of {}", allowed.join(", "))
            }
            ViolationKind::OutOfRange { value, min } => {
                write!(f, "{value} is less than the minimum {min}")
            }
            ViolationKind::UnknownAnswerKey { key, available } => write!(
                f,
                "'{key}' is not an answer option (options: {})",
                available.join(", ")
            ),
        }
    }
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path of the offending field, e.g. `tags.difficulty`.
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.field, self.kind)
        }
    }
}

/// A question dropped during lenient validation.
///
/// Stored (as its `Display` text) in the document's processing notes; the
/// rest of the document continues unaffected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRejection {
    /// 0-based position in the raw `questions` list.
    pub index: usize,
    /// The question number the model reported, if it could be read.
    pub question_number: Option<String>,
    pub violations: Vec<Violation>,
}

impl fmt::Display for QuestionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Skipped question at index {}", self.index)?;
        if let Some(ref n) = self.question_number {
            write!(f, " (question_number {n})")?;
        }
        write!(f, ": {} error(s)", self.violations.len())?;
        for (i, v) in self.violations.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for QuestionRejection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_rejected_display() {
        let e = ExtractError::AllQuestionsRejected {
            document: "paper.pdf".into(),
            total: 4,
            first_error: "boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 4"), "got: {msg}");
        assert!(msg.contains("paper.pdf"));
        assert_eq!(e.class(), FailureClass::TotalLoss);
    }

    #[test]
    fn envelope_errors_are_classified() {
        let e = ExtractError::InvalidJson {
            document: "a.pdf".into(),
            detail: "EOF".into(),
        };
        assert_eq!(e.class(), FailureClass::Envelope);
        let e = ExtractError::MissingQuestions {
            document: "a.pdf".into(),
            detail: "no 'questions' key".into(),
        };
        assert_eq!(e.class(), FailureClass::Envelope);
    }

    #[test]
    fn collaborator_errors_are_classified() {
        let e = ExtractError::ParseTimeout {
            document: "a.pdf".into(),
            secs: 300,
        };
        assert!(e.to_string().contains("300s"));
        assert_eq!(e.class(), FailureClass::Collaborator);
    }

    #[test]
    fn rejection_display_lists_each_violation() {
        let r = QuestionRejection {
            index: 3,
            question_number: Some("4".into()),
            violations: vec![
                Violation::new("question_text", ViolationKind::Missing),
                Violation::new(
                    "tags.difficulty",
                    ViolationKind::NotInVocabulary {
                        value: "impossible".into(),
                        allowed: vec!["easy".into(), "medium".into(), "hard".into()],
                    },
                ),
            ],
        };
        assert_eq!(
            r.to_string(),
            "Skipped question at index 3 (question_number 4): 2 error(s): \
             question_text: field required; \
             tags.difficulty: 'impossible' is not one of easy, medium, hard"
        );
    }

    #[test]
    fn tool_error_names_the_file() {
        let e = ToolError::Shape {
            path: PathBuf::from("out/a.json"),
            detail: "no 'questions' key".into(),
        };
        assert_eq!(
            e.to_string(),
            "'out/a.json' is not an extraction result: no 'questions' key"
        );
    }

    #[test]
    fn violation_serialises_with_flattened_kind() {
        let v = Violation::new(
            "marks",
            ViolationKind::OutOfRange {
                value: -1.0,
                min: 0.0,
            },
        );
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["field"], "marks");
        assert_eq!(json["kind"], "out_of_range");
        assert_eq!(json["min"], 0.0);
    }
}
