//! Prompts for LLM-based question extraction.
//!
//! The field list and the allowed enum values in the prompt are generated
//! from [`crate::schema`]'s vocabularies, so the literals the model is told
//! to emit are exactly the literals the validator accepts.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the extraction
//! instructions themselves are always built here.

use crate::schema::{Category, Difficulty, Importance, Language};
use once_cell::sync::Lazy;

/// Default system prompt sent ahead of the extraction instructions.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You extract structured question data from \
Public Service Commission exam documents. Always respond with valid JSON only.";

const JSON_EXAMPLE: &str = r#"{
    "questions": [
        {
            "question_text": "...",
            "answer_options": {"A": "...", "B": "...", "C": "...", "D": "..."},
            "has_question_diagram": false,
            "question_diagram_path": null,
            "language": "English",
            "category": "History",
            "tags": {
                "difficulty": "medium",
                "topic": "...",
                "subtopic": null,
                "year_relevance": null,
                "exam_type": null,
                "importance": null,
                "keywords": []
            },
            "correct_answer": "A",
            "has_temporal_relevance": false,
            "has_answer_diagrams": false,
            "answer_diagram_paths": {},
            "question_id": null,
            "explanation": null,
            "source": null,
            "question_number": 1,
            "marks": null,
            "negative_marking": null
        }
    ],
    "metadata": {
        "exam_name": null,
        "exam_date": null,
        "exam_year": null,
        "total_questions": 0
    }
}"#;

fn quoted(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("\"{v}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The extraction instructions, without document content.
pub static EXTRACTION_PROMPT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"You are an expert at extracting structured data from PSC (Public Service Commission) question bank documents.

Given the following document content, extract ALL questions into a structured JSON format.

For EACH question, extract the following fields:
- question_text (required): The full text of the question
- answer_options (required): Dictionary mapping option keys (A, B, C, D) to their text
- has_question_diagram (required): true if the question references or contains a diagram/image, false otherwise
- question_diagram_path: null (will be populated later by the system)
- language (required): The language — one of: {languages}
- category (required): Subject category — one of: {categories}
- tags (required): An object with:
    - difficulty (required): {difficulties}
    - topic (required): Main topic of the question
    - subtopic: Specific subtopic within the main topic, or null
    - year_relevance: Year relevant to the question (e.g. "1947"), or null
    - exam_type: Type of PSC exam if identifiable, or null
    - importance: {importances} — or null
    - keywords: List of keyword strings for tagging, or empty list []
- correct_answer (required): The correct option key (e.g. "A", "B", "C", "D"); it must be one of the keys of answer_options
- has_temporal_relevance (required): true if the answer could change over time (e.g. "Who is the current PM?"), false otherwise
- has_answer_diagrams (required): true if any answer option references a diagram/image, false otherwise
- answer_diagram_paths: empty object {{}} (will be populated later by the system)
- question_id: A unique identifier string, or null
- explanation: Explanation of the correct answer if provided in the document, or null
- source: Source reference for the question if mentioned, or null
- question_number: The original question number from the document (integer or string), or null
- marks: Marks allocated to this question (number >= 0), or null
- negative_marking: true/false if negative marking info is mentioned, or null

Also extract document-level metadata:
- exam_name: Name of the examination if mentioned, or null
- exam_date: Date of the exam if mentioned (as string), or null
- exam_year: Year of the exam if mentioned (as integer), or null
- total_questions: Total count of extracted questions

Return a JSON object with this exact structure:
{example}

IMPORTANT:
- Extract ALL questions from the document, do not skip any
- If the correct answer is not explicitly marked, set correct_answer to the best option
- Set has_temporal_relevance to true ONLY for questions whose answers may change over time
- Use the enumerated values exactly as written above, including capitalisation
- Leave question_diagram_path and answer_diagram_paths as null/{{}} — the system will link them
- Return ONLY valid JSON, no markdown fences, no explanatory text

Document content:
"#,
        languages = Language::values().join(", "),
        categories = Category::values().join(", "),
        difficulties = quoted(&Difficulty::values()),
        importances = quoted(&Importance::values()),
        example = JSON_EXAMPLE,
    )
});

/// Build the full user prompt by appending document content to the
/// extraction instructions.
pub fn build_extraction_prompt(markdown_content: &str) -> String {
    let mut prompt = String::with_capacity(EXTRACTION_PROMPT.len() + markdown_content.len());
    prompt.push_str(&EXTRACTION_PROMPT);
    prompt.push_str(markdown_content);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_vocabulary_member() {
        for v in Language::values()
            .into_iter()
            .chain(Category::values())
            .chain(Difficulty::values())
            .chain(Importance::values())
        {
            assert!(EXTRACTION_PROMPT.contains(v), "prompt is missing '{v}'");
        }
    }

    #[test]
    fn prompt_renders_literal_braces() {
        assert!(EXTRACTION_PROMPT.contains("empty object {}"));
        assert!(EXTRACTION_PROMPT.contains("\"answer_diagram_paths\": {}"));
    }

    #[test]
    fn build_appends_document() {
        let p = build_extraction_prompt("Q1. What is 2+2?");
        assert!(p.starts_with("You are an expert"));
        assert!(p.ends_with("Document content:\nQ1. What is 2+2?"));
    }
}
