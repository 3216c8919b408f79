//! Reading saved results back: re-validation, statistics and CSV export.
//!
//! Saved files are re-read with the same [`ExtractionValidator`] that
//! produced them, one question at a time. A file edited by hand (or written
//! by an older schema) still yields its good questions, and the bad ones are
//! reported instead of failing the whole file.

use crate::error::{QuestionRejection, ToolError};
use crate::pipeline::validate::{questions_array, ExtractionValidator};
use crate::schema::{DocumentMetadata, Question};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Column order of the CSV export.
pub const CSV_HEADERS: [&str; 20] = [
    "source_file",
    "question_number",
    "question_text",
    "option_a",
    "option_b",
    "option_c",
    "option_d",
    "correct_answer",
    "language",
    "category",
    "difficulty",
    "topic",
    "subtopic",
    "has_question_diagram",
    "has_answer_diagrams",
    "has_temporal_relevance",
    "explanation",
    "marks",
    "negative_marking",
    "keywords",
];

/// A saved result file, re-validated.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub questions: Vec<Question>,
    pub rejections: Vec<QuestionRejection>,
    /// `None` when absent or not decodable.
    pub metadata: Option<DocumentMetadata>,
}

impl LoadedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Outcome of strictly checking one saved file.
#[derive(Debug, Clone)]
pub struct FileCheck {
    pub questions: usize,
    pub rejections: Vec<QuestionRejection>,
    /// `metadata.total_questions` disagrees with the number of questions.
    pub count_mismatch: Option<usize>,
}

impl FileCheck {
    pub fn is_valid(&self) -> bool {
        self.rejections.is_empty() && self.count_mismatch.is_none()
    }
}

/// `*.json` files directly in `dir`, sorted. Missing dir → empty.
pub fn output_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
        .collect();
    files.sort();
    files
}

/// Read a saved result, keeping every question that still validates.
pub fn load_output_file(path: &Path, validator: &ExtractionValidator) -> Result<LoadedFile, ToolError> {
    let text = std::fs::read_to_string(path).map_err(|source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Value = serde_json::from_str(&text).map_err(|source| ToolError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let name = path.display().to_string();
    let items = questions_array(&name, &raw).map_err(|e| ToolError::Shape {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let (questions, rejections) = validator.partition(items);

    let metadata = match raw.get("metadata") {
        None | Some(Value::Null) => None,
        Some(m) => match serde_json::from_value::<DocumentMetadata>(m.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("{}: unreadable metadata: {}", name, e);
                None
            }
        },
    };

    Ok(LoadedFile {
        path: path.to_path_buf(),
        questions,
        rejections,
        metadata,
    })
}

/// Re-validate a saved result and report every problem found.
pub fn check_output_file(path: &Path, validator: &ExtractionValidator) -> Result<FileCheck, ToolError> {
    let loaded = load_output_file(path, validator)?;
    let total = loaded.questions.len() + loaded.rejections.len();
    let count_mismatch = loaded
        .metadata
        .as_ref()
        .and_then(|m| m.total_questions)
        .filter(|&declared| declared != total);
    Ok(FileCheck {
        questions: loaded.questions.len(),
        rejections: loaded.rejections,
        count_mismatch,
    })
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Aggregate counts over a set of questions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionStats {
    pub total: usize,
    pub with_diagrams: usize,
    pub with_explanations: usize,
    pub temporal: usize,
    /// Most common first; ties broken alphabetically.
    pub categories: Vec<(String, usize)>,
    pub difficulties: Vec<(String, usize)>,
    pub languages: Vec<(String, usize)>,
}

fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().map(|(k, n)| (k.to_string(), n)).collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

impl QuestionStats {
    pub fn from_questions<'a>(questions: impl IntoIterator<Item = &'a Question>) -> Self {
        let questions: Vec<&Question> = questions.into_iter().collect();
        Self {
            total: questions.len(),
            with_diagrams: questions.iter().filter(|q| q.has_question_diagram).count(),
            with_explanations: questions
                .iter()
                .filter(|q| q.explanation.as_deref().is_some_and(|e| !e.is_empty()))
                .count(),
            temporal: questions.iter().filter(|q| q.has_temporal_relevance).count(),
            categories: most_common(questions.iter().map(|q| q.category.as_str())),
            difficulties: most_common(questions.iter().map(|q| q.tags.difficulty.as_str())),
            languages: most_common(questions.iter().map(|q| q.language.as_str())),
        }
    }
}

impl fmt::Display for QuestionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Total questions:       {}", self.total)?;
        writeln!(f, "  With diagrams:         {}", self.with_diagrams)?;
        writeln!(f, "  With explanations:     {}", self.with_explanations)?;
        writeln!(f, "  Temporal (may change): {}", self.temporal)?;
        for (title, rows) in [
            ("Categories", &self.categories),
            ("Difficulty", &self.difficulties),
            ("Languages", &self.languages),
        ] {
            writeln!(f, "\n  {title}:")?;
            for (name, n) in rows {
                writeln!(f, "    {name}: {n}")?;
            }
        }
        Ok(())
    }
}

// ── CSV export ───────────────────────────────────────────────────────────────

fn csv_row(q: &Question, source_file: &str) -> Vec<String> {
    let opt = |k: &str| q.answer_options.get(k).cloned().unwrap_or_default();
    vec![
        source_file.to_string(),
        q.question_number.as_ref().map(|n| n.to_string()).unwrap_or_default(),
        q.question_text.clone(),
        opt("A"),
        opt("B"),
        opt("C"),
        opt("D"),
        q.correct_answer.clone(),
        q.language.to_string(),
        q.category.to_string(),
        q.tags.difficulty.to_string(),
        q.tags.topic.clone(),
        q.tags.subtopic.clone().unwrap_or_default(),
        q.has_question_diagram.to_string(),
        q.has_answer_diagrams.to_string(),
        q.has_temporal_relevance.to_string(),
        q.explanation.clone().unwrap_or_default(),
        q.marks.map(|m| m.to_string()).unwrap_or_default(),
        q.negative_marking.map(|b| b.to_string()).unwrap_or_default(),
        q.tags.keywords.join(", "),
    ]
}

/// Write one CSV row per question across `files`, header first.
/// Returns the number of question rows written.
pub fn export_csv<W: Write>(files: &[LoadedFile], writer: W) -> Result<usize, ToolError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(CSV_HEADERS)?;
    let mut rows = 0;
    for file in files {
        let source = file.file_name();
        for q in &file.questions {
            w.write_record(csv_row(q, &source))?;
            rows += 1;
        }
    }
    w.flush().map_err(csv::Error::from)?;
    Ok(rows)
}
