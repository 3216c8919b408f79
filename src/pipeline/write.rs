//! Persisting validated results.
//!
//! Results are written atomically: serialise to a temp file in the target
//! directory, then rename over the final name. A crash mid-write leaves
//! either no file or a complete one, never a truncated JSON document that
//! `validate` would later report as corrupt.

use crate::error::ExtractError;
use crate::schema::ExtractionResult;
use chrono::{DateTime, Local};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// `<stem>_<YYYYmmdd_HHMMSS>.json`, e.g. `psc_2024_20260214_163000.json`.
pub fn output_filename(pdf_filename: &str, at: &DateTime<Local>) -> String {
    let stem = Path::new(pdf_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdf_filename.to_string());
    format!("{}_{}.json", stem, at.format("%Y%m%d_%H%M%S"))
}

/// Write `result` as pretty JSON to `dir/filename`, creating `dir`.
pub fn save_json(
    result: &ExtractionResult,
    dir: &Path,
    filename: &str,
) -> Result<PathBuf, ExtractError> {
    let path = dir.join(filename);
    let write_err = |source: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.clone(),
        source,
    };

    let json = serde_json::to_vec_pretty(result).map_err(|e| ExtractError::Serialize {
        document: filename.to_string(),
        detail: e.to_string(),
    })?;

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.write_all(b"\n").map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    info!("Saved JSON → {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DocumentMetadata;
    use chrono::TimeZone;

    #[test]
    fn test_output_filename() {
        let at = Local.with_ymd_and_hms(2026, 2, 14, 16, 30, 0).unwrap();
        assert_eq!(output_filename("psc_2024.pdf", &at), "psc_2024_20260214_163000.json");
        assert_eq!(output_filename("paper.v2.pdf", &at), "paper.v2_20260214_163000.json");
    }

    #[test]
    fn test_save_json_creates_dir_and_leaves_no_temp_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested/output");
        let result = ExtractionResult {
            questions: vec![],
            metadata: Some(DocumentMetadata {
                exam_name: Some("KAS — മലയാളം".into()),
                ..Default::default()
            }),
        };

        let path = save_json(&result, &dir, "x.json").unwrap();
        assert_eq!(path, dir.join("x.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("മലയാളം"), "non-ASCII must be written verbatim");
        let back: ExtractionResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, result);

        let entries = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_save_json_unwritable_dir() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot act as a directory.
        let err = save_json(
            &ExtractionResult { questions: vec![], metadata: None },
            file.path(),
            "x.json",
        )
        .unwrap_err();
        assert!(matches!(err, ExtractError::OutputWriteFailed { .. }));
    }
}
