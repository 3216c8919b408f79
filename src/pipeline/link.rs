//! Diagram linking: attach downloaded page images to question slots.
//!
//! Runs on the raw model output, before validation, so linked paths are
//! ordinary optional string fields checked like everything else.
//!
//! ## Naming convention
//!
//! Only the file stem is inspected, case-insensitively:
//!
//! ```text
//! [prefix_]q12.png                → question 12
//! [prefix_]question-12.jpg        → question 12
//! [prefix_]q12_answer_b.png       → question 12, option "B"
//! [prefix_]question_3-opt-C.png   → question 3, option "C"
//! page_1.jpg                      → unmatched
//! ```
//!
//! The number is matched against each question's `question_number`; a
//! question without one is addressed by its 1-based position. The option key
//! is matched case-insensitively against `answer_options` and the key as the
//! model wrote it is used.
//!
//! ## Collisions
//!
//! When two images claim the same slot the later one in the input order wins
//! and a processing note names both files. Paths the model already filled in
//! are never overwritten.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static RE_DIAGRAM_STEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[_\-.\s])(?:question|q)[_-]?(\d+)(?:[_-](?:answer|ans|a|option|opt)[_-]?([a-z0-9]+))?(?:[_\-.\s].*)?$",
    )
    .unwrap()
});

/// The slot a file name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramSlot {
    pub question: u64,
    /// Option key as written in the file name, if this is an answer diagram.
    pub option: Option<String>,
}

/// Parse an image path against the naming convention.
pub fn parse_diagram_name(path: &Path) -> Option<DiagramSlot> {
    let stem = path.file_stem()?.to_str()?;
    let caps = RE_DIAGRAM_STEM.captures(stem)?;
    let question = caps.get(1)?.as_str().parse().ok()?;
    Some(DiagramSlot {
        question,
        option: caps.get(2).map(|m| m.as_str().to_string()),
    })
}

/// One image attached to a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramLink {
    pub image: PathBuf,
    /// 0-based index into the raw questions list.
    pub question_index: usize,
    /// Answer-option key, for answer diagrams.
    pub option: Option<String>,
}

/// What the linker did for one document.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    pub linked: Vec<DiagramLink>,
    /// Images that named no existing slot, or a slot the model had filled.
    pub unmatched: Vec<PathBuf>,
    /// Human-readable notes for the document's `processing_notes`.
    pub notes: Vec<String>,
}

/// Link `images` into the raw `questions`, mutating them in place.
pub fn link_diagrams(questions: &mut [Value], images: &[PathBuf], document: &str) -> LinkReport {
    let mut report = LinkReport::default();
    if images.is_empty() || questions.is_empty() {
        report.unmatched = images.to_vec();
        return report;
    }

    info!("Linking {} image(s) to questions in {}", images.len(), document);

    // (question index, option key) → image; later entries replace earlier.
    let mut slots: BTreeMap<(usize, Option<String>), &PathBuf> = BTreeMap::new();
    for image in images {
        let Some(slot) = parse_diagram_name(image) else {
            debug!("{}: image {} does not follow the diagram naming convention", document, image.display());
            report.unmatched.push(image.clone());
            continue;
        };
        let Some(index) = find_question(questions, slot.question) else {
            debug!("{}: no question {} for image {}", document, slot.question, image.display());
            report.unmatched.push(image.clone());
            continue;
        };
        let option = match slot.option {
            None => None,
            Some(ref wanted) => match find_option_key(&questions[index], wanted) {
                Some(key) => Some(key),
                None => {
                    debug!(
                        "{}: question {} has no option '{}' for image {}",
                        document,
                        slot.question,
                        wanted,
                        image.display()
                    );
                    report.unmatched.push(image.clone());
                    continue;
                }
            },
        };

        if slot_filled(&questions[index], option.as_deref()) {
            debug!("{}: slot for {} already filled by the model", document, file_name(image));
            report.unmatched.push(image.clone());
            continue;
        }

        if let Some(previous) = slots.insert((index, option.clone()), image) {
            let target = match &option {
                Some(key) => format!("question {} option {}", slot.question, key),
                None => format!("question {}", slot.question),
            };
            report.notes.push(format!(
                "Diagram collision for {target}: kept '{}', discarded '{}'",
                file_name(image),
                file_name(previous)
            ));
            report.unmatched.push(previous.clone());
        }
    }

    for ((index, option), image) in slots {
        let Some(q) = questions[index].as_object_mut() else {
            report.unmatched.push(image.clone());
            continue;
        };
        let path = image.to_string_lossy().into_owned();
        let applied = match &option {
            None => set_question_path(q, path),
            Some(key) => set_answer_path(q, key, path),
        };
        if applied {
            debug!("{}: linked {} → question index {}", document, file_name(image), index);
            report.linked.push(DiagramLink {
                image: image.clone(),
                question_index: index,
                option,
            });
        } else {
            debug!("{}: slot for {} already filled by the model", document, file_name(image));
            report.unmatched.push(image.clone());
        }
    }

    report
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn number_matches(value: &Value, n: u64) -> bool {
    match value {
        Value::Number(num) => num.as_u64() == Some(n),
        Value::String(s) => s.trim().parse::<u64>().ok() == Some(n),
        _ => false,
    }
}

fn find_question(questions: &[Value], n: u64) -> Option<usize> {
    if let Some(i) = questions
        .iter()
        .position(|q| q.get("question_number").is_some_and(|v| number_matches(v, n)))
    {
        return Some(i);
    }
    // Position fallback, only for questions the model left unnumbered.
    let i = usize::try_from(n).ok()?.checked_sub(1)?;
    let q = questions.get(i)?;
    match q.get("question_number") {
        None | Some(Value::Null) => Some(i),
        Some(_) => None,
    }
}

fn find_option_key(question: &Value, wanted: &str) -> Option<String> {
    question
        .get("answer_options")?
        .as_object()?
        .keys()
        .find(|k| k.eq_ignore_ascii_case(wanted))
        .cloned()
}

fn is_filled(v: Option<&Value>) -> bool {
    matches!(v, Some(Value::String(s)) if !s.is_empty())
}

/// The model already gave a path for this question or answer slot.
fn slot_filled(question: &Value, option: Option<&str>) -> bool {
    match option {
        None => is_filled(question.get("question_diagram_path")),
        Some(key) => is_filled(question.get("answer_diagram_paths").and_then(|p| p.get(key))),
    }
}

fn set_question_path(q: &mut Map<String, Value>, path: String) -> bool {
    if is_filled(q.get("question_diagram_path")) {
        return false;
    }
    q.insert("question_diagram_path".into(), Value::String(path));
    q.insert("has_question_diagram".into(), Value::Bool(true));
    true
}

fn set_answer_path(q: &mut Map<String, Value>, key: &str, path: String) -> bool {
    let paths = q
        .entry("answer_diagram_paths")
        .or_insert_with(|| Value::Object(Map::new()));
    if paths.is_null() {
        *paths = Value::Object(Map::new());
    }
    let Some(paths) = paths.as_object_mut() else {
        return false;
    };
    if is_filled(paths.get(key)) {
        return false;
    }
    paths.insert(key.to_string(), Value::String(path));
    q.insert("has_answer_diagrams".into(), Value::Bool(true));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn question(n: Option<i64>) -> Value {
        json!({
            "question_text": "Which figure shows a rhombus?",
            "answer_options": {"A": "1", "B": "2", "C": "3", "D": "4"},
            "has_question_diagram": false,
            "question_diagram_path": null,
            "has_answer_diagrams": false,
            "answer_diagram_paths": {},
            "question_number": n,
        })
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("diagrams/paper/{n}"))).collect()
    }

    #[test]
    fn parses_naming_convention() {
        let p = |s: &str| parse_diagram_name(Path::new(s));
        assert_eq!(p("q12.png"), Some(DiagramSlot { question: 12, option: None }));
        assert_eq!(p("Question-3.JPG"), Some(DiagramSlot { question: 3, option: None }));
        assert_eq!(
            p("paper_q2_answer_b.png"),
            Some(DiagramSlot { question: 2, option: Some("b".into()) })
        );
        assert_eq!(
            p("question_7-opt-C.png"),
            Some(DiagramSlot { question: 7, option: Some("C".into()) })
        );
        assert_eq!(
            p("question_4_ans_d.png"),
            Some(DiagramSlot { question: 4, option: Some("d".into()) })
        );
        assert_eq!(p("page_1.jpg"), None);
        assert_eq!(p("image_3.png"), None);
        assert_eq!(p("faq2.png"), None);
    }

    #[test]
    fn links_question_and_answer_slots() {
        let mut qs = vec![question(Some(1)), question(Some(2))];
        let report = link_diagrams(
            &mut qs,
            &paths(&["q2.png", "q2_answer_b.png", "page_1.jpg"]),
            "paper.pdf",
        );
        assert_eq!(report.linked.len(), 2);
        assert_eq!(report.unmatched, paths(&["page_1.jpg"]));
        assert!(report.notes.is_empty());

        assert_eq!(qs[1]["question_diagram_path"], "diagrams/paper/q2.png");
        assert_eq!(qs[1]["has_question_diagram"], true);
        assert_eq!(qs[1]["answer_diagram_paths"]["B"], "diagrams/paper/q2_answer_b.png");
        assert_eq!(qs[1]["has_answer_diagrams"], true);
        assert_eq!(qs[0]["question_diagram_path"], Value::Null);
    }

    #[test]
    fn collision_keeps_last_image_and_notes_it() {
        let mut qs = vec![question(Some(1)), question(Some(2))];
        let report = link_diagrams(&mut qs, &paths(&["q2.png", "question_2.jpg"]), "paper.pdf");
        assert_eq!(qs[1]["question_diagram_path"], "diagrams/paper/question_2.jpg");
        assert_eq!(report.linked.len(), 1);
        assert_eq!(report.unmatched, paths(&["q2.png"]));
        assert_eq!(
            report.notes,
            vec!["Diagram collision for question 2: kept 'question_2.jpg', discarded 'q2.png'"]
        );
    }

    #[test]
    fn model_supplied_paths_are_not_overwritten() {
        let mut q = question(Some(1));
        q["question_diagram_path"] = json!("from_model.png");
        q["answer_diagram_paths"] = json!({"A": "model_a.png"});
        let mut qs = vec![q];
        let report = link_diagrams(&mut qs, &paths(&["q1.png", "q1_a_a.png", "q1_a_c.png"]), "p.pdf");
        assert_eq!(qs[0]["question_diagram_path"], "from_model.png");
        assert_eq!(qs[0]["answer_diagram_paths"]["A"], "model_a.png");
        assert_eq!(qs[0]["answer_diagram_paths"]["C"], "diagrams/paper/q1_a_c.png");
        assert_eq!(report.linked.len(), 1);
        assert_eq!(report.unmatched.len(), 2);
    }

    #[test]
    fn colliding_images_on_a_model_filled_slot_leave_no_note() {
        let mut q = question(Some(3));
        q["question_diagram_path"] = json!("from_model.png");
        let mut qs = vec![q];
        let report = link_diagrams(&mut qs, &paths(&["q3.png", "question_3.png"]), "p.pdf");
        assert_eq!(qs[0]["question_diagram_path"], "from_model.png");
        assert!(report.linked.is_empty());
        assert_eq!(report.unmatched, paths(&["q3.png", "question_3.png"]));
        assert!(report.notes.is_empty(), "{:?}", report.notes);
    }

    #[test]
    fn falls_back_to_position_for_unnumbered_questions() {
        let mut qs = vec![question(None), question(None), question(Some(9))];
        let report = link_diagrams(&mut qs, &paths(&["q2.png", "q3.png", "q9.png"]), "p.pdf");
        assert_eq!(qs[1]["question_diagram_path"], "diagrams/paper/q2.png");
        // Position 3 is numbered 9, so q3 does not fall back onto it.
        assert_eq!(qs[2]["question_diagram_path"], "diagrams/paper/q9.png");
        assert_eq!(report.unmatched, paths(&["q3.png"]));
    }

    #[test]
    fn unknown_option_key_is_unmatched() {
        let mut qs = vec![question(Some(1))];
        let report = link_diagrams(&mut qs, &paths(&["q1_answer_e.png"]), "p.pdf");
        assert!(report.linked.is_empty());
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(qs[0]["answer_diagram_paths"], json!({}));
    }

    #[test]
    fn null_answer_paths_are_replaced() {
        let mut q = question(None);
        q["question_number"] = json!("5");
        q["answer_diagram_paths"] = Value::Null;
        let mut qs = vec![q];
        link_diagrams(&mut qs, &paths(&["q5_opt_d.png"]), "p.pdf");
        assert_eq!(qs[0]["answer_diagram_paths"], json!({"D": "diagrams/paper/q5_opt_d.png"}));
    }

    #[test]
    fn no_images_is_a_no_op() {
        let mut qs = vec![question(Some(1))];
        let before = qs.clone();
        let report = link_diagrams(&mut qs, &[], "p.pdf");
        assert!(report.linked.is_empty() && report.unmatched.is_empty());
        assert_eq!(qs, before);
    }
}
