//! Output-directory cleanup.
//!
//! Cleanup is split into planning and applying so a dry run is simply a plan
//! that is printed and never applied.

use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Files a cleanup would remove.
#[derive(Debug, Clone, Default)]
pub struct CleanupPlan {
    /// JSON results to delete, oldest first.
    pub json_files: Vec<PathBuf>,
    /// JSON results left in place.
    pub kept: usize,
    /// Diagram directory to empty, if it is part of the plan.
    pub diagrams_dir: Option<PathBuf>,
    pub diagram_files: usize,
    pub diagram_bytes: u64,
}

impl CleanupPlan {
    pub fn is_empty(&self) -> bool {
        self.json_files.is_empty() && self.diagrams_dir.is_none()
    }

    /// Delete everything in the plan. The diagrams directory is recreated
    /// empty. Returns the number of files removed.
    pub fn apply(&self) -> Result<usize, ToolError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ToolError::Io { path, source }
        };

        let mut removed = 0;
        if let Some(ref dir) = self.diagrams_dir {
            std::fs::remove_dir_all(dir).map_err(io(dir))?;
            std::fs::create_dir_all(dir).map_err(io(dir))?;
            removed += self.diagram_files;
            info!("Removed {} diagram file(s) from {}", self.diagram_files, dir.display());
        }
        for f in &self.json_files {
            std::fs::remove_file(f).map_err(io(f))?;
            removed += 1;
        }
        info!("Removed {} output file(s)", self.json_files.len());
        Ok(removed)
    }
}

/// Plan a cleanup of `output_dir`.
///
/// * `keep` — number of most recent JSON results to keep; the diagrams
///   directory is only cleared when `keep == 0`
/// * `diagrams_only` — leave JSON results alone
pub fn plan_cleanup(output_dir: &Path, keep: usize, diagrams_only: bool) -> Result<CleanupPlan, ToolError> {
    let mut plan = CleanupPlan::default();

    let diagrams = output_dir.join("diagrams");
    if keep == 0 && diagrams.is_dir() {
        let (files, bytes) = tree_size(&diagrams)?;
        plan.diagram_files = files;
        plan.diagram_bytes = bytes;
        plan.diagrams_dir = Some(diagrams);
    }

    if diagrams_only {
        return Ok(plan);
    }

    let mut results: Vec<(SystemTime, PathBuf)> = Vec::new();
    for path in crate::report::output_files(output_dir) {
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|source| ToolError::Io {
                path: path.clone(),
                source,
            })?;
        results.push((modified, path));
    }
    results.sort();

    let delete = results.len().saturating_sub(keep);
    plan.kept = results.len() - delete;
    plan.json_files = results.into_iter().take(delete).map(|(_, p)| p).collect();
    Ok(plan)
}

fn tree_size(dir: &Path) -> Result<(usize, u64), ToolError> {
    let io = |source| ToolError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = 0;
    let mut bytes = 0;
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let entry = entry.map_err(io)?;
        let meta = entry.metadata().map_err(io)?;
        if meta.is_dir() {
            let (f, b) = tree_size(&entry.path())?;
            files += f;
            bytes += b;
        } else {
            files += 1;
            bytes += meta.len();
        }
    }
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        // Names sort opposite to age so ordering must come from mtime.
        for (i, name) in ["c.json", "b.json", "a.json"].iter().enumerate() {
            let p = dir.path().join(name);
            fs::write(&p, "{}").unwrap();
            let f = fs::File::options().write(true).open(&p).unwrap();
            f.set_modified(base + Duration::from_secs(60 * i as u64)).unwrap();
        }
        let d = dir.path().join("diagrams/paper");
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("q1.png"), [0u8; 10]).unwrap();
        fs::write(d.join("q2.png"), [0u8; 5]).unwrap();
        dir
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn keep_preserves_newest_and_diagrams() {
        let dir = setup();
        let plan = plan_cleanup(dir.path(), 1, false).unwrap();
        assert_eq!(names(&plan.json_files), vec!["c.json", "b.json"]);
        assert_eq!(plan.kept, 1);
        assert!(plan.diagrams_dir.is_none());

        assert_eq!(plan.apply().unwrap(), 2);
        assert!(dir.path().join("a.json").exists());
        assert!(dir.path().join("diagrams/paper/q1.png").exists());
    }

    #[test]
    fn dry_run_plan_touches_nothing() {
        let dir = setup();
        let plan = plan_cleanup(dir.path(), 0, false).unwrap();
        assert_eq!(plan.json_files.len(), 3);
        assert_eq!(plan.diagram_files, 2);
        assert_eq!(plan.diagram_bytes, 15);
        assert!(dir.path().join("c.json").exists());
        assert!(dir.path().join("diagrams/paper/q2.png").exists());
    }

    #[test]
    fn full_clean_recreates_empty_diagrams_dir() {
        let dir = setup();
        let removed = plan_cleanup(dir.path(), 0, false).unwrap().apply().unwrap();
        assert_eq!(removed, 5);
        assert!(crate::report::output_files(dir.path()).is_empty());
        let diagrams = dir.path().join("diagrams");
        assert!(diagrams.is_dir());
        assert_eq!(fs::read_dir(diagrams).unwrap().count(), 0);
    }

    #[test]
    fn diagrams_only_leaves_json() {
        let dir = setup();
        let plan = plan_cleanup(dir.path(), 0, true).unwrap();
        assert!(plan.json_files.is_empty());
        assert!(plan.diagrams_dir.is_some());
        plan.apply().unwrap();
        assert_eq!(crate::report::output_files(dir.path()).len(), 3);
    }

    #[test]
    fn missing_output_dir_is_an_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_cleanup(&dir.path().join("nope"), 0, false).unwrap();
        assert!(plan.is_empty());
    }
}
