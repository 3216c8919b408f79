//! Post-processing: deterministic cleanup of text flowing to and from the LLM.
//!
//! ## Why is post-processing necessary?
//!
//! The prompt asks for bare JSON, yet models still routinely wrap their reply
//! in ` ```json ... ``` ` fences, prefix it with a byte-order mark, or add a
//! sentence before the opening brace. None of that changes the payload, so it
//! is removed here with cheap string rules instead of failing the document.
//!
//! The same module tidies parsed document Markdown before it is prompted:
//! invisible characters and runs of blank lines cost tokens and carry nothing.
//!
//! Every rule is a pure `&str → String` function and independently testable.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Decode a model reply into a JSON value.
///
/// Applies, in order:
/// 1. Strip invisible Unicode (BOM, zero-width spaces)
/// 2. Strip a leading ` ``` ` / ` ```json ` fence and a trailing ` ``` `
/// 3. Parse; if that fails, retry on the slice from the first `{` to the
///    last `}` (prose around the object)
///
/// # Errors
/// [`ExtractError::InvalidJson`] when neither attempt yields JSON. The
/// detail carries the parser's message from the first attempt.
pub fn parse_json_payload(document: &str, text: &str) -> Result<Value, ExtractError> {
    let cleaned = strip_code_fences(&remove_invisible_chars(text));

    let first_err = match serde_json::from_str::<Value>(&cleaned) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    if let Some(slice) = outer_object(&cleaned) {
        if let Ok(v) = serde_json::from_str::<Value>(slice) {
            debug!(
                "Recovered JSON object for {} after discarding {} surrounding bytes",
                document,
                cleaned.len() - slice.len()
            );
            return Ok(v);
        }
    }

    Err(ExtractError::InvalidJson {
        document: document.to_string(),
        detail: first_err.to_string(),
    })
}

/// Tidy parsed document Markdown before it is sent to the model.
pub fn clean_document_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s)
}

// ── Rule: strip code fences ──────────────────────────────────────────────────

static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+.-]*[ \t]*\n?").unwrap());
static RE_CLOSING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?```\s*$").unwrap());

/// Remove one leading fence line and one trailing fence, if present.
///
/// Text without fences comes back trimmed but otherwise unchanged, and
/// applying this twice gives the same result as applying it once.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let s = RE_OPENING_FENCE.replace(trimmed, "");
    let s = RE_CLOSING_FENCE.replace(&s, "");
    s.trim().to_string()
}

// ── Rule: carve the outermost object ────────────────────────────────────────

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ── Rule: normalise line endings ─────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule: remove invisible Unicode characters ───────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule: trim trailing whitespace per line ─────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule: collapse excessive blank lines ────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        let input = "```json\n{\"questions\": []}\n```";
        assert_eq!(strip_code_fences(input), "{\"questions\": []}");
    }

    #[test]
    fn test_strip_bare_fence() {
        let input = "```\n{\"a\": 1}\n```\n";
        assert_eq!(strip_code_fences(input), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_single_line_fence() {
        assert_eq!(strip_code_fences("```json{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_strip_any_language_tag() {
        for tag in ["python", "Json", "jsonc", "json5", "text"] {
            let input = format!("```{tag}\n{{\"a\": 1}}\n```");
            assert_eq!(strip_code_fences(&input), "{\"a\": 1}", "tag: {tag}");
        }
    }

    #[test]
    fn test_missing_closing_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_no_fences_passthrough() {
        assert_eq!(strip_code_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_is_idempotent() {
        for input in ["```json\n{}\n```", "{}", "```\n[1]\n```", "```json{}```"] {
            let once = strip_code_fences(input);
            assert_eq!(strip_code_fences(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_fenced_payload() {
        let v = parse_json_payload("a.pdf", "\u{FEFF}```json\n{\"questions\": [1]}\n```").unwrap();
        assert_eq!(v["questions"][0], 1);
    }

    #[test]
    fn test_parse_recovers_object_from_prose() {
        let text = "Here is the extracted data:\n{\"questions\": []}\nLet me know if you need more.";
        let v = parse_json_payload("a.pdf", text).unwrap();
        assert!(v["questions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = parse_json_payload("a.pdf", "I could not find any questions.").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidJson { ref document, .. } if document == "a.pdf"));
    }

    #[test]
    fn test_parse_truncated_object() {
        let err = parse_json_payload("a.pdf", "{\"questions\": [{\"question_text\": \"Q").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidJson { .. }));
    }

    #[test]
    fn test_clean_document_markdown() {
        let input = "Q1. Capital\u{200B} of Kerala?   \r\n\r\n\r\n\r\n(A) Kochi\r\n";
        assert_eq!(
            clean_document_markdown(input),
            "Q1. Capital of Kerala?\n\n(A) Kochi"
        );
    }
}
