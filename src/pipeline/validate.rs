//! Validation with partial recovery: raw LLM JSON → [`ExtractionResult`].
//!
//! The model's output is untrusted. It usually matches the requested shape,
//! but any single question may be missing a field, carry an off-vocabulary
//! enum value (`"difficulty": "impossible"`), or point `correct_answer` at an
//! option that does not exist. Losing a 100-question paper to one such slip
//! is not acceptable, so validation is per question:
//!
//! 1. The envelope must hold a `questions` array; otherwise the document
//!    fails ([`ExtractError::MissingQuestions`]).
//! 2. Every raw question is checked field by field. All violations are
//!    collected (not just the first) so the skip note is a complete audit
//!    record. Failing questions are dropped and noted; the rest continue.
//! 3. Zero accepted questions is a failure
//!    ([`ExtractError::NoQuestions`] / [`ExtractError::AllQuestionsRejected`]),
//!    never an empty success.
//! 4. Metadata is lenient per field: a malformed exam field becomes `null`
//!    and is noted. The validator fills `pdf_filename`, `extraction_date`
//!    and `total_questions` itself.
//!
//! The validator is pure: no I/O, no shared state, and the timestamp comes
//! in through [`DocumentContext`].

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, QuestionRejection, Violation, ViolationKind};
use crate::schema::{
    Category, Difficulty, DocumentMetadata, ExtractionResult, Importance, Language, Question,
    QuestionNumber, QuestionTags, UnknownVariant,
};
use chrono::{DateTime, Local, SecondsFormat};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Per-document inputs to validation that do not come from the model.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    /// Source PDF file name, recorded in metadata and used in notes/errors.
    pub pdf_filename: String,
    /// Timestamp recorded as `extraction_date`.
    pub extracted_at: DateTime<Local>,
    /// Notes from earlier stages (e.g. diagram linking), kept ahead of the
    /// skip notes in `processing_notes`.
    pub notes: Vec<String>,
}

impl DocumentContext {
    pub fn new(pdf_filename: impl Into<String>, extracted_at: DateTime<Local>) -> Self {
        Self {
            pdf_filename: pdf_filename.into(),
            extracted_at,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Turns raw model output into typed, schema-conformant records.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionValidator {
    require_answer_key: bool,
}

impl Default for ExtractionValidator {
    fn default() -> Self {
        Self {
            require_answer_key: true,
        }
    }
}

impl ExtractionValidator {
    /// `require_answer_key`: reject questions whose `correct_answer` is not
    /// a key of `answer_options`.
    pub fn new(require_answer_key: bool) -> Self {
        Self { require_answer_key }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.require_answer_key)
    }

    /// Validate a whole envelope, keeping every question that passes.
    ///
    /// # Errors
    /// - [`ExtractError::MissingQuestions`] — no `questions` array
    /// - [`ExtractError::NoQuestions`] — the array is empty
    /// - [`ExtractError::AllQuestionsRejected`] — no question passed
    pub fn validate(
        &self,
        raw: &Value,
        ctx: DocumentContext,
    ) -> Result<ExtractionResult, ExtractError> {
        let document = ctx.pdf_filename.as_str();
        let items = questions_array(document, raw)?;
        if items.is_empty() {
            warn!("No questions in extraction output for {}", document);
            return Err(ExtractError::NoQuestions {
                document: document.to_string(),
            });
        }

        let (questions, rejections) = self.partition(items);

        for rejection in &rejections {
            warn!("{}: {}", document, rejection);
            for v in &rejection.violations {
                debug!("  question index {} field '{}': {}", rejection.index, v.field, v.kind);
            }
        }

        if questions.is_empty() {
            let first_error = rejections
                .first()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            warn!("All questions failed validation for {}", document);
            return Err(ExtractError::AllQuestionsRejected {
                document: document.to_string(),
                total: items.len(),
                first_error,
            });
        }

        if !rejections.is_empty() {
            warn!(
                "{} question(s) skipped due to validation errors in {}",
                rejections.len(),
                document
            );
        }

        let metadata = build_metadata(raw.get("metadata"), &ctx, questions.len(), &rejections);
        info!("Validated {} question(s) from {}", questions.len(), document);

        Ok(ExtractionResult {
            questions,
            metadata: Some(metadata),
        })
    }

    /// Validate each raw question independently, preserving order.
    pub fn partition(&self, items: &[Value]) -> (Vec<Question>, Vec<QuestionRejection>) {
        let mut accepted = Vec::with_capacity(items.len());
        let mut rejected = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match self.validate_question(index, item) {
                Ok(q) => accepted.push(q),
                Err(r) => rejected.push(r),
            }
        }
        (accepted, rejected)
    }

    /// Validate one raw question object.
    ///
    /// `index` is the question's 0-based position, used only for the
    /// rejection record.
    pub fn validate_question(
        &self,
        index: usize,
        raw: &Value,
    ) -> Result<Question, QuestionRejection> {
        let question_number = raw.get("question_number").and_then(|n| match n {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        });
        let reject = |violations| QuestionRejection {
            index,
            question_number: question_number.clone(),
            violations,
        };

        let Some(obj) = raw.as_object() else {
            return Err(reject(vec![Violation::new(
                "",
                ViolationKind::WrongType {
                    expected: "object".into(),
                    found: type_name(raw).into(),
                },
            )]));
        };

        let mut c = Checker::default();
        let question_text = c.required_str(obj, "", "question_text");
        let answer_options = c.string_map(obj, "", "answer_options", true);
        let has_question_diagram = c.required_bool(obj, "", "has_question_diagram");
        let question_diagram_path = c.optional_str(obj, "", "question_diagram_path");
        let language = c.required_vocab::<Language>(obj, "", "language", Language::values());
        let category = c.required_vocab::<Category>(obj, "", "category", Category::values());
        let tags = c.tags(obj);
        let correct_answer = c.required_str(obj, "", "correct_answer");
        let has_temporal_relevance = c.required_bool(obj, "", "has_temporal_relevance");
        let has_answer_diagrams = c.required_bool(obj, "", "has_answer_diagrams");
        let answer_diagram_paths = c.string_map(obj, "", "answer_diagram_paths", false);
        let question_id = c.optional_str(obj, "", "question_id");
        let explanation = c.optional_str(obj, "", "explanation");
        let source = c.optional_str(obj, "", "source");
        let question_number_typed = c.question_number(obj);
        let marks = c.optional_min(obj, "", "marks", 0.0);
        let negative_marking = c.optional_bool(obj, "", "negative_marking");

        if self.require_answer_key {
            if let (Some(key), Some(options)) = (&correct_answer, &answer_options) {
                if !options.contains_key(key) {
                    c.push(
                        "correct_answer",
                        ViolationKind::UnknownAnswerKey {
                            key: key.clone(),
                            available: options.keys().cloned().collect(),
                        },
                    );
                }
            }
        }

        match (
            question_text,
            answer_options,
            has_question_diagram,
            language,
            category,
            tags,
            correct_answer,
            has_temporal_relevance,
            has_answer_diagrams,
        ) {
            (
                Some(question_text),
                Some(answer_options),
                Some(has_question_diagram),
                Some(language),
                Some(category),
                Some(tags),
                Some(correct_answer),
                Some(has_temporal_relevance),
                Some(has_answer_diagrams),
            ) if c.violations.is_empty() => Ok(Question {
                question_text,
                answer_options,
                has_question_diagram,
                question_diagram_path,
                language,
                category,
                tags,
                correct_answer,
                has_temporal_relevance,
                has_answer_diagrams,
                answer_diagram_paths: answer_diagram_paths.unwrap_or_default(),
                question_id,
                explanation,
                source,
                question_number: question_number_typed,
                marks,
                negative_marking,
            }),
            _ => Err(reject(c.violations)),
        }
    }
}

/// Borrow the raw `questions` sequence, or fail the envelope.
pub fn questions_array<'a>(document: &str, raw: &'a Value) -> Result<&'a Vec<Value>, ExtractError> {
    let missing = |detail: String| ExtractError::MissingQuestions {
        document: document.to_string(),
        detail,
    };
    let obj = raw
        .as_object()
        .ok_or_else(|| missing(format!("top-level value is {}, not an object", type_name(raw))))?;
    match obj.get("questions") {
        None => Err(missing("no 'questions' key".into())),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(missing(format!(
            "'questions' is {}, not an array",
            type_name(other)
        ))),
    }
}

fn build_metadata(
    raw: Option<&Value>,
    ctx: &DocumentContext,
    accepted: usize,
    rejections: &[QuestionRejection],
) -> DocumentMetadata {
    let mut notes: Vec<String> = Vec::new();
    let mut meta = DocumentMetadata {
        pdf_filename: Some(ctx.pdf_filename.clone()),
        extraction_date: Some(ctx.extracted_at.to_rfc3339_opts(SecondsFormat::Secs, false)),
        total_questions: Some(accepted),
        ..Default::default()
    };

    let mut field_notes = Vec::new();
    match raw {
        None | Some(Value::Null) => {}
        Some(Value::Object(obj)) => {
            let mut c = Checker::default();
            meta.exam_name = c.optional_str(obj, "metadata.", "exam_name");
            meta.exam_date = c.optional_str(obj, "metadata.", "exam_date");
            meta.exam_year = c
                .optional_int(obj, "metadata.", "exam_year")
                .and_then(|y| match i32::try_from(y) {
                    Ok(year) => Some(year),
                    Err(_) => {
                        c.push(
                            "metadata.exam_year",
                            ViolationKind::WrongType {
                                expected: "32-bit integer".into(),
                                found: y.to_string(),
                            },
                        );
                        None
                    }
                });
            // Notes already present (e.g. a result being reprocessed) are kept.
            notes.extend(c.string_list(obj, "metadata.", "processing_notes"));
            for v in c.violations {
                field_notes.push(format!("Ignored metadata field {v}"));
            }
        }
        Some(other) => {
            field_notes.push(format!(
                "Ignored metadata: expected object, found {}",
                type_name(other)
            ));
        }
    }

    notes.extend(ctx.notes.iter().cloned());
    notes.extend(rejections.iter().map(|r| r.to_string()));
    for note in &field_notes {
        warn!("{}: {}", ctx.pdf_filename, note);
    }
    notes.extend(field_notes);
    meta.processing_notes = notes;
    meta
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field-by-field reader that records every violation it sees.
#[derive(Default)]
struct Checker {
    violations: Vec<Violation>,
}

impl Checker {
    fn push(&mut self, field: impl Into<String>, kind: ViolationKind) {
        self.violations.push(Violation::new(field, kind));
    }

    fn wrong_type(&mut self, prefix: &str, key: &str, expected: &str, found: &Value) {
        self.push(
            format!("{prefix}{key}"),
            ViolationKind::WrongType {
                expected: expected.into(),
                found: type_name(found).into(),
            },
        );
    }

    /// Value of `key`, treating JSON null as absent.
    fn present<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
        obj.get(key).filter(|v| !v.is_null())
    }

    fn required<'v>(
        &mut self,
        obj: &'v Map<String, Value>,
        prefix: &str,
        key: &str,
    ) -> Option<&'v Value> {
        let v = Self::present(obj, key);
        if v.is_none() {
            self.push(format!("{prefix}{key}"), ViolationKind::Missing);
        }
        v
    }

    fn required_str(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<String> {
        match self.required(obj, prefix, key)? {
            Value::String(s) => Some(s.clone()),
            other => {
                self.wrong_type(prefix, key, "string", other);
                None
            }
        }
    }

    fn optional_str(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<String> {
        match Self::present(obj, key)? {
            Value::String(s) => Some(s.clone()),
            other => {
                self.wrong_type(prefix, key, "string or null", other);
                None
            }
        }
    }

    fn required_bool(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<bool> {
        match self.required(obj, prefix, key)? {
            Value::Bool(b) => Some(*b),
            other => {
                self.wrong_type(prefix, key, "boolean", other);
                None
            }
        }
    }

    fn optional_bool(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<bool> {
        match Self::present(obj, key)? {
            Value::Bool(b) => Some(*b),
            other => {
                self.wrong_type(prefix, key, "boolean or null", other);
                None
            }
        }
    }

    fn vocab<T>(
        &mut self,
        value: &Value,
        prefix: &str,
        key: &str,
        allowed: Vec<&'static str>,
    ) -> Option<T>
    where
        T: FromStr<Err = UnknownVariant>,
    {
        let Value::String(s) = value else {
            self.wrong_type(prefix, key, "string", value);
            return None;
        };
        match s.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.push(
                    format!("{prefix}{key}"),
                    ViolationKind::NotInVocabulary {
                        value: s.clone(),
                        allowed: allowed.into_iter().map(String::from).collect(),
                    },
                );
                None
            }
        }
    }

    fn required_vocab<T>(
        &mut self,
        obj: &Map<String, Value>,
        prefix: &str,
        key: &str,
        allowed: Vec<&'static str>,
    ) -> Option<T>
    where
        T: FromStr<Err = UnknownVariant>,
    {
        let value = self.required(obj, prefix, key)?;
        self.vocab(value, prefix, key, allowed)
    }

    fn optional_vocab<T>(
        &mut self,
        obj: &Map<String, Value>,
        prefix: &str,
        key: &str,
        allowed: Vec<&'static str>,
    ) -> Option<T>
    where
        T: FromStr<Err = UnknownVariant>,
    {
        let value = Self::present(obj, key)?;
        self.vocab(value, prefix, key, allowed)
    }

    /// Object of string → string. Null counts as empty when not required.
    fn string_map(
        &mut self,
        obj: &Map<String, Value>,
        prefix: &str,
        key: &str,
        required: bool,
    ) -> Option<BTreeMap<String, String>> {
        let value = if required {
            self.required(obj, prefix, key)?
        } else {
            match Self::present(obj, key) {
                Some(v) => v,
                None => return Some(BTreeMap::new()),
            }
        };
        let Value::Object(map) = value else {
            self.wrong_type(prefix, key, "object", value);
            return None;
        };
        let before = self.violations.len();
        let mut out = BTreeMap::new();
        for (k, v) in map {
            match v {
                Value::String(s) => {
                    out.insert(k.clone(), s.clone());
                }
                other => self.wrong_type(&format!("{prefix}{key}."), k, "string", other),
            }
        }
        (self.violations.len() == before).then_some(out)
    }

    /// Array of strings. Missing or null is an empty list.
    fn string_list(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Vec<String> {
        let Some(value) = Self::present(obj, key) else {
            return Vec::new();
        };
        let Value::Array(items) = value else {
            self.wrong_type(prefix, key, "array", value);
            return Vec::new();
        };
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::String(s) => out.push(s.clone()),
                other => self.wrong_type(&format!("{prefix}{key}."), &i.to_string(), "string", other),
            }
        }
        out
    }

    fn optional_min(
        &mut self,
        obj: &Map<String, Value>,
        prefix: &str,
        key: &str,
        min: f64,
    ) -> Option<f64> {
        let value = Self::present(obj, key)?;
        let Some(n) = value.as_f64() else {
            self.wrong_type(prefix, key, "number or null", value);
            return None;
        };
        if n < min {
            self.push(format!("{prefix}{key}"), ViolationKind::OutOfRange { value: n, min });
            return None;
        }
        Some(n)
    }

    /// Integer field. Integral floats and numeric strings are accepted since
    /// models routinely quote years.
    fn optional_int(&mut self, obj: &Map<String, Value>, prefix: &str, key: &str) -> Option<i64> {
        let value = Self::present(obj, key)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if parsed.is_none() {
            self.wrong_type(prefix, key, "integer or null", value);
        }
        parsed
    }

    fn question_number(&mut self, obj: &Map<String, Value>) -> Option<QuestionNumber> {
        let value = Self::present(obj, "question_number")?;
        match value {
            Value::Number(n) => {
                let int = n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
                if int.is_none() {
                    self.wrong_type("", "question_number", "integer or string", value);
                }
                int.map(QuestionNumber::Int)
            }
            Value::String(s) => Some(QuestionNumber::Text(s.clone())),
            other => {
                self.wrong_type("", "question_number", "integer or string", other);
                None
            }
        }
    }

    fn tags(&mut self, obj: &Map<String, Value>) -> Option<QuestionTags> {
        let value = self.required(obj, "", "tags")?;
        let Value::Object(tags) = value else {
            self.wrong_type("", "tags", "object", value);
            return None;
        };
        let p = "tags.";
        let difficulty = self.required_vocab::<Difficulty>(tags, p, "difficulty", Difficulty::values());
        let topic = self.required_str(tags, p, "topic");
        let subtopic = self.optional_str(tags, p, "subtopic");
        let year_relevance = self.year_relevance(tags);
        let exam_type = self.optional_str(tags, p, "exam_type");
        let importance = self.optional_vocab::<Importance>(tags, p, "importance", Importance::values());
        let before = self.violations.len();
        let keywords = self.string_list(tags, p, "keywords");
        let keywords_ok = self.violations.len() == before;

        let importance_ok = Self::present(tags, "importance").is_none() || importance.is_some();
        match (difficulty, topic) {
            (Some(difficulty), Some(topic)) if keywords_ok && importance_ok => Some(QuestionTags {
                difficulty,
                topic,
                subtopic,
                year_relevance,
                exam_type,
                importance,
                keywords,
            }),
            _ => None,
        }
    }

    /// `year_relevance` is text, but a bare year number is taken as-is.
    fn year_relevance(&mut self, tags: &Map<String, Value>) -> Option<String> {
        match Self::present(tags, "year_relevance")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            other => {
                self.wrong_type("tags.", "year_relevance", "string or null", other);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> DocumentContext {
        let at = Local.with_ymd_and_hms(2026, 2, 14, 16, 30, 0).unwrap();
        DocumentContext::new("psc_2024.pdf", at)
    }

    fn raw_question(n: i64) -> Value {
        json!({
            "question_text": format!("Question {n}?"),
            "answer_options": {"A": "one", "B": "two", "C": "three", "D": "four"},
            "has_question_diagram": false,
            "question_diagram_path": null,
            "language": "English",
            "category": "History",
            "tags": {
                "difficulty": "medium",
                "topic": "Freedom struggle",
                "subtopic": null,
                "year_relevance": "1947",
                "exam_type": null,
                "importance": "high",
                "keywords": ["independence"]
            },
            "correct_answer": "B",
            "has_temporal_relevance": false,
            "has_answer_diagrams": false,
            "answer_diagram_paths": {},
            "question_id": null,
            "explanation": null,
            "source": null,
            "question_number": n,
            "marks": 1.0,
            "negative_marking": true
        })
    }

    fn fields(r: &QuestionRejection) -> Vec<&str> {
        r.violations.iter().map(|v| v.field.as_str()).collect()
    }

    #[test]
    fn accepts_well_formed_question() {
        let q = ExtractionValidator::default()
            .validate_question(0, &raw_question(1))
            .unwrap();
        assert_eq!(q.question_text, "Question 1?");
        assert_eq!(q.language, Language::English);
        assert_eq!(q.tags.difficulty, Difficulty::Medium);
        assert_eq!(q.tags.importance, Some(Importance::High));
        assert_eq!(q.question_number, Some(QuestionNumber::Int(1)));
        assert_eq!(q.answer_options.len(), 4);
        assert_eq!(q.marks, Some(1.0));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let raw = json!({
            "question_text": "Q?",
            "answer_options": {"A": "x", "B": "y"},
            "has_question_diagram": false,
            "language": "Malayalam",
            "category": "Kerala State Affairs",
            "tags": {"difficulty": "easy", "topic": "Rivers"},
            "correct_answer": "A",
            "has_temporal_relevance": true,
            "has_answer_diagrams": false
        });
        let q = ExtractionValidator::default().validate_question(0, &raw).unwrap();
        assert!(q.tags.keywords.is_empty());
        assert!(q.answer_diagram_paths.is_empty());
        assert_eq!(q.question_number, None);
        assert_eq!(q.category, Category::KeralaStateAffairs);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let mut raw = raw_question(1);
        raw.as_object_mut().unwrap().remove("question_text");
        let r = ExtractionValidator::default()
            .validate_question(5, &raw)
            .unwrap_err();
        assert_eq!(r.index, 5);
        assert_eq!(r.question_number.as_deref(), Some("1"));
        assert_eq!(fields(&r), vec!["question_text"]);
        assert_eq!(r.violations[0].kind, ViolationKind::Missing);
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        let mut raw = raw_question(1);
        raw["language"] = Value::Null;
        let r = ExtractionValidator::default()
            .validate_question(0, &raw)
            .unwrap_err();
        assert_eq!(fields(&r), vec!["language"]);
    }

    #[test]
    fn vocabulary_is_case_sensitive() {
        let mut raw = raw_question(1);
        raw["language"] = json!("english");
        let r = ExtractionValidator::default()
            .validate_question(0, &raw)
            .unwrap_err();
        assert!(matches!(
            r.violations[0].kind,
            ViolationKind::NotInVocabulary { ref value, .. } if value == "english"
        ));

        raw["language"] = json!("English");
        raw["category"] = json!("Arts & Literature");
        assert!(ExtractionValidator::default().validate_question(0, &raw).is_ok());
    }

    #[test]
    fn nested_tag_violations_use_dotted_paths() {
        let mut raw = raw_question(4);
        raw["tags"]["difficulty"] = json!("impossible");
        raw["tags"]["importance"] = json!("urgent");
        raw["tags"]["keywords"] = json!(["ok", 3]);
        let r = ExtractionValidator::default()
            .validate_question(3, &raw)
            .unwrap_err();
        assert_eq!(
            fields(&r),
            vec!["tags.difficulty", "tags.importance", "tags.keywords.1"]
        );
    }

    #[test]
    fn all_violations_are_collected() {
        let raw = json!({
            "question_text": 42,
            "answer_options": {"A": "x", "B": 7},
            "language": "Klingon",
            "category": "History",
            "tags": "easy",
            "correct_answer": "A",
            "has_temporal_relevance": "no",
            "has_answer_diagrams": false,
            "marks": -2
        });
        let r = ExtractionValidator::default()
            .validate_question(0, &raw)
            .unwrap_err();
        assert_eq!(
            fields(&r),
            vec![
                "question_text",
                "answer_options.B",
                "has_question_diagram",
                "language",
                "tags",
                "has_temporal_relevance",
                "marks",
            ]
        );
    }

    #[test]
    fn negative_marks_are_out_of_range() {
        let mut raw = raw_question(1);
        raw["marks"] = json!(-0.5);
        let r = ExtractionValidator::default()
            .validate_question(0, &raw)
            .unwrap_err();
        assert_eq!(
            r.violations[0].kind,
            ViolationKind::OutOfRange {
                value: -0.5,
                min: 0.0
            }
        );
        raw["marks"] = json!(0);
        assert!(ExtractionValidator::default().validate_question(0, &raw).is_ok());
    }

    #[test]
    fn correct_answer_must_name_an_option() {
        let mut raw = raw_question(1);
        raw["correct_answer"] = json!("E");
        let r = ExtractionValidator::default()
            .validate_question(0, &raw)
            .unwrap_err();
        assert_eq!(fields(&r), vec!["correct_answer"]);
        assert!(matches!(
            r.violations[0].kind,
            ViolationKind::UnknownAnswerKey { ref key, ref available }
                if key == "E" && available.len() == 4
        ));

        let lax = ExtractionValidator::new(false);
        assert!(lax.validate_question(0, &raw).is_ok());
    }

    #[test]
    fn non_object_question_is_rejected() {
        let r = ExtractionValidator::default()
            .validate_question(2, &json!("Q3. What?"))
            .unwrap_err();
        assert_eq!(r.violations.len(), 1);
        assert_eq!(r.violations[0].field, "");
    }

    #[test]
    fn null_collections_default_to_empty() {
        let mut raw = raw_question(1);
        raw["answer_diagram_paths"] = Value::Null;
        raw["tags"]["keywords"] = Value::Null;
        let q = ExtractionValidator::default().validate_question(0, &raw).unwrap();
        assert!(q.answer_diagram_paths.is_empty());
        assert!(q.tags.keywords.is_empty());
    }

    #[test]
    fn text_question_numbers_are_kept() {
        let mut raw = raw_question(1);
        raw["question_number"] = json!("12a");
        let q = ExtractionValidator::default().validate_question(0, &raw).unwrap();
        assert_eq!(q.question_number, Some(QuestionNumber::Text("12a".into())));
    }

    #[test]
    fn drops_bad_question_and_keeps_order() {
        let mut bad = raw_question(4);
        bad["tags"]["difficulty"] = json!("impossible");
        let raw = json!({
            "questions": [raw_question(1), raw_question(2), bad, raw_question(3)],
            "metadata": {"exam_name": "KAS Prelims", "exam_year": 2024, "total_questions": 4}
        });

        let result = ExtractionValidator::default().validate(&raw, ctx()).unwrap();
        let texts: Vec<_> = result.questions.iter().map(|q| q.question_text.as_str()).collect();
        assert_eq!(texts, vec!["Question 1?", "Question 2?", "Question 3?"]);

        let meta = result.metadata.as_ref().unwrap();
        assert_eq!(meta.total_questions, Some(3));
        assert_eq!(meta.exam_name.as_deref(), Some("KAS Prelims"));
        assert_eq!(meta.exam_year, Some(2024));
        assert_eq!(meta.pdf_filename.as_deref(), Some("psc_2024.pdf"));
        assert_eq!(meta.processing_notes.len(), 1);
        assert!(meta.processing_notes[0].contains("index 2"));
        assert!(meta.processing_notes[0].contains("question_number 4"));
        assert!(meta.processing_notes[0].contains("tags.difficulty"));
        assert!(result.is_consistent());
    }

    #[test]
    fn empty_question_list_is_a_failure() {
        let err = ExtractionValidator::default()
            .validate(&json!({"questions": []}), ctx())
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoQuestions { .. }));
    }

    #[test]
    fn all_invalid_is_a_failure() {
        let mut a = raw_question(1);
        a["category"] = json!("Astrology");
        let raw = json!({"questions": [a, {"question_text": "only text"}]});
        let err = ExtractionValidator::default().validate(&raw, ctx()).unwrap_err();
        match err {
            ExtractError::AllQuestionsRejected {
                total, first_error, ..
            } => {
                assert_eq!(total, 2);
                assert!(first_error.contains("Astrology"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn envelope_without_questions_fails_fast() {
        let v = ExtractionValidator::default();
        for raw in [
            json!({"metadata": {}}),
            json!({"questions": {"0": {}}}),
            json!([raw_question(1)]),
            json!(null),
        ] {
            let err = v.validate(&raw, ctx()).unwrap_err();
            assert!(
                matches!(err, ExtractError::MissingQuestions { .. }),
                "unexpected: {err}"
            );
        }
    }

    #[test]
    fn malformed_metadata_degrades_with_notes() {
        let raw = json!({
            "questions": [raw_question(1)],
            "metadata": {"exam_name": ["x"], "exam_year": "2023", "exam_date": "March 2023"}
        });
        let result = ExtractionValidator::default().validate(&raw, ctx()).unwrap();
        let meta = result.metadata.unwrap();
        assert_eq!(meta.exam_name, None);
        assert_eq!(meta.exam_year, Some(2023));
        assert_eq!(meta.exam_date.as_deref(), Some("March 2023"));
        assert_eq!(meta.processing_notes.len(), 1);
        assert!(meta.processing_notes[0].contains("metadata.exam_name"));

        let raw = json!({"questions": [raw_question(1)], "metadata": "n/a"});
        let meta = ExtractionValidator::default()
            .validate(&raw, ctx())
            .unwrap()
            .metadata
            .unwrap();
        assert_eq!(meta.total_questions, Some(1));
        assert_eq!(meta.exam_name, None);
        assert_eq!(meta.processing_notes, vec!["Ignored metadata: expected object, found string"]);
    }

    #[test]
    fn oversized_exam_year_is_dropped_with_a_note() {
        let raw = json!({
            "questions": [raw_question(1)],
            "metadata": {"exam_year": 20240000000_i64}
        });
        let meta = ExtractionValidator::default()
            .validate(&raw, ctx())
            .unwrap()
            .metadata
            .unwrap();
        assert_eq!(meta.exam_year, None);
        assert_eq!(meta.processing_notes.len(), 1);
        assert!(meta.processing_notes[0].contains("metadata.exam_year"));
        assert!(meta.processing_notes[0].contains("32-bit integer"));
    }

    #[test]
    fn context_notes_precede_skip_notes() {
        let raw = json!({"questions": [raw_question(1), {"bad": true}]});
        let ctx = ctx().with_notes(vec!["linker note".into()]);
        let result = ExtractionValidator::default().validate(&raw, ctx).unwrap();
        let notes = result.processing_notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0], "linker note");
        assert!(notes[1].starts_with("Skipped question at index 1"));
    }

    #[test]
    fn serialised_result_revalidates_to_same_questions() {
        let mut bad = raw_question(9);
        bad["language"] = json!("Esperanto");
        let raw = json!({"questions": [raw_question(1), bad, raw_question(2)]});
        let v = ExtractionValidator::default();
        let first = v.validate(&raw, ctx()).unwrap();

        let reserialised = serde_json::to_value(&first).unwrap();
        let second = v.validate(&reserialised, ctx()).unwrap();
        assert_eq!(first.questions, second.questions);
        // The note from the first pass is carried, nothing new is added.
        assert_eq!(second.processing_notes(), first.processing_notes());
    }
}
