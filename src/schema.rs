//! Typed records produced by extraction.
//!
//! These types are the output contract: once a raw LLM object has passed
//! [`crate::pipeline::validate`] it becomes a [`Question`] and is never
//! mutated again. Serialising an [`ExtractionResult`] yields the JSON shape
//! persisted to disk:
//!
//! ```text
//! { "questions": [ { …Question… }, … ],
//!   "metadata":  { pdf_filename, extraction_date, total_questions,
//!                  exam_name, exam_date, exam_year, processing_notes } }
//! ```
//!
//! ## Closed vocabularies
//!
//! [`Difficulty`], [`Importance`], [`Language`] and [`Category`] are closed
//! sum types. Their wire form is the exact literal the extraction prompt asks
//! the model to emit (`"Arts & Literature"`, `"easy"`, …). Decoding is
//! case-sensitive with no normalisation, so `"english"` is rejected while
//! `"English"` is accepted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Error returned when a string is not a member of a closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    /// Human-readable vocabulary name, e.g. `"language"`.
    pub vocabulary: &'static str,
    /// The rejected value.
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid {}", self.value, self.vocabulary)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declare a closed vocabulary with explicit string encode/decode.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every member, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            /// Vocabulary name used in error messages.
            pub const LABEL: &'static str = $label;

            /// The exact wire string for this member.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }

            /// All wire strings, in declaration order.
            pub fn values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(UnknownVariant {
                        vocabulary: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

vocabulary! {
    /// How hard a question is judged to be.
    Difficulty, "difficulty" {
        Easy => "easy",
        Medium => "medium",
        Hard => "hard",
    }
}

vocabulary! {
    /// How important a question is for exam preparation.
    Importance, "importance" {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

vocabulary! {
    /// Language a question is written in.
    Language, "language" {
        English => "English",
        Hindi => "Hindi",
        Malayalam => "Malayalam",
        Tamil => "Tamil",
        Telugu => "Telugu",
        Bengali => "Bengali",
        Marathi => "Marathi",
        Gujarati => "Gujarati",
        Kannada => "Kannada",
        Odia => "Odia",
        Punjabi => "Punjabi",
        Urdu => "Urdu",
        Assamese => "Assamese",
    }
}

vocabulary! {
    /// Subject area of a question.
    Category, "category" {
        History => "History",
        CurrentAffairs => "Current Affairs",
        Geography => "Geography",
        Science => "Science",
        Polity => "Polity",
        Economics => "Economics",
        GeneralKnowledge => "General Knowledge",
        Mathematics => "Mathematics",
        Reasoning => "Reasoning",
        English => "English",
        IndianCulture => "Indian Culture",
        Environment => "Environment",
        Technology => "Technology",
        Sports => "Sports",
        ArtsLiterature => "Arts & Literature",
        KeralaStateAffairs => "Kerala State Affairs",
        IndianConstitution => "Indian Constitution",
        InternationalRelations => "International Relations",
    }
}

/// The number printed next to a question in the source PDF.
///
/// Papers number questions either numerically (`12`) or with labels
/// (`"12a"`, `"IV"`), so both forms are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionNumber {
    Int(i64),
    Text(String),
}

impl QuestionNumber {
    /// Whether this number denotes the given 1-based position label `n`.
    pub fn matches(&self, n: u64) -> bool {
        match self {
            QuestionNumber::Int(i) => *i >= 0 && *i as u64 == n,
            QuestionNumber::Text(s) => s.trim().parse::<u64>().map(|v| v == n).unwrap_or(false),
        }
    }
}

impl fmt::Display for QuestionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionNumber::Int(i) => write!(f, "{i}"),
            QuestionNumber::Text(s) => f.write_str(s),
        }
    }
}

/// Classification metadata owned by exactly one [`Question`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionTags {
    pub difficulty: Difficulty,
    pub topic: String,
    pub subtopic: Option<String>,
    /// Year the question is tied to, e.g. `"1947"`.
    pub year_relevance: Option<String>,
    pub exam_type: Option<String>,
    pub importance: Option<Importance>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One validated multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_text: String,
    /// Option key (`"A"`, `"B"`, …) → option text.
    pub answer_options: BTreeMap<String, String>,
    pub has_question_diagram: bool,
    pub question_diagram_path: Option<String>,
    pub language: Language,
    pub category: Category,
    pub tags: QuestionTags,
    /// Key into `answer_options`.
    pub correct_answer: String,
    /// True when the answer may become outdated ("who is the current …").
    pub has_temporal_relevance: bool,
    pub has_answer_diagrams: bool,
    /// Option key → diagram path.
    #[serde(default)]
    pub answer_diagram_paths: BTreeMap<String, String>,
    pub question_id: Option<String>,
    pub explanation: Option<String>,
    pub source: Option<String>,
    pub question_number: Option<QuestionNumber>,
    pub marks: Option<f64>,
    pub negative_marking: Option<bool>,
}

/// Per-document audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub pdf_filename: Option<String>,
    /// ISO-8601 timestamp of the extraction run.
    pub extraction_date: Option<String>,
    pub total_questions: Option<usize>,
    pub exam_name: Option<String>,
    pub exam_date: Option<String>,
    pub exam_year: Option<i32>,
    /// Append-only audit trail: skipped questions, diagram collisions, …
    #[serde(default)]
    pub processing_notes: Vec<String>,
}

/// Top-level output for one processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub questions: Vec<Question>,
    pub metadata: Option<DocumentMetadata>,
}

impl ExtractionResult {
    /// `true` when `metadata.total_questions` (if present) equals the number
    /// of questions actually held.
    pub fn is_consistent(&self) -> bool {
        match self.metadata.as_ref().and_then(|m| m.total_questions) {
            Some(total) => total == self.questions.len(),
            None => true,
        }
    }

    /// Notes recorded while producing this result, or an empty slice.
    pub fn processing_notes(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|m| m.processing_notes.as_slice())
            .unwrap_or(&[])
    }
}
