use anyhow::Context;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::dependency_graph::StageGraph;
use crate::logger::Logger;
use crate::timing::TimingLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanScope {
    /// Declared outputs only.
    Outputs,
    /// Outputs, per-stage `clean` paths and the timing log.
    All,
}

#[derive(Debug, Default)]
pub struct CleanSummary {
    pub removed: Vec<PathBuf>,
    pub missing: usize,
    pub timing_cleared: bool,
}

impl fmt::Display for CleanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Removed {} path(s), {} already absent",
            self.removed.len(),
            self.missing
        )?;
        if self.timing_cleared {
            write!(f, "; timing log cleared")?;
        }
        Ok(())
    }
}

/// Removes a file or directory tree; `Ok(false)` when nothing was there.
pub fn remove_path(path: &Path) -> anyhow::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to inspect {}", path.display()))
        }
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

pub fn clean(
    graph: &StageGraph,
    timing: &TimingLog,
    scope: CleanScope,
    logger: &Logger,
) -> anyhow::Result<CleanSummary> {
    let mut summary = CleanSummary::default();

    for &index in graph.order().iter().rev() {
        let stage = graph.stage(index);
        let extra: &[PathBuf] = match scope {
            CleanScope::Outputs => &[],
            CleanScope::All => &stage.clean,
        };

        for path in stage.outputs.iter().chain(extra) {
            if remove_path(path)? {
                logger.info(&format!("{}: removed {}", stage.id, path.display()));
                summary.removed.push(path.clone());
            } else {
                logger.debug(&format!("{}: {} not present", stage.id, path.display()));
                summary.missing += 1;
            }
        }
    }

    if scope == CleanScope::All {
        timing.clear()?;
        summary.timing_cleared = true;
        logger.info(&format!("cleared timing log {}", timing.dir().display()));
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency_graph::StageRegistry;
    use crate::stage::{CommandSpec, Stage};
    use crate::timing::TimingRecord;
    use tempfile::TempDir;

    fn fixture(dir: &Path) -> StageGraph {
        let kernel = Stage::new("kernel", CommandSpec::new("make"))
            .output(dir.join("zImage"))
            .clean_path(dir.join("linux-build"));
        let sd = Stage::new("sd-image", CommandSpec::new("make"))
            .input(dir.join("zImage"))
            .output(dir.join("sd.img"));

        StageRegistry::from_stages(vec![kernel, sd])
            .unwrap()
            .build_graph()
            .unwrap()
    }

    fn populate(dir: &Path, timing: &TimingLog) {
        fs::write(dir.join("zImage"), "kernel").unwrap();
        fs::write(dir.join("sd.img"), "image").unwrap();
        fs::create_dir_all(dir.join("linux-build/arch/arm")).unwrap();
        fs::write(dir.join("linux-build/arch/arm/Image"), "obj").unwrap();
        timing.append(&TimingRecord::new("kernel", 0, 10, 10.0)).unwrap();
    }

    #[test]
    fn test_clean_removes_outputs_and_keeps_timing() {
        let dir = TempDir::new().unwrap();
        let graph = fixture(dir.path());
        let timing = TimingLog::new(dir.path().join(".build_timing"));
        populate(dir.path(), &timing);

        let summary = clean(&graph, &timing, CleanScope::Outputs, &Logger::plain()).unwrap();

        assert_eq!(summary.removed.len(), 2);
        assert!(!summary.timing_cleared);
        assert!(!dir.path().join("zImage").exists());
        assert!(!dir.path().join("sd.img").exists());
        assert!(dir.path().join("linux-build").exists());
        assert_eq!(timing.load().unwrap().len(), 1);
    }

    #[test]
    fn test_clean_all_removes_everything() {
        let dir = TempDir::new().unwrap();
        let graph = fixture(dir.path());
        let timing = TimingLog::new(dir.path().join(".build_timing"));
        populate(dir.path(), &timing);

        let summary = clean(&graph, &timing, CleanScope::All, &Logger::plain()).unwrap();

        assert_eq!(summary.removed.len(), 3);
        assert!(summary.timing_cleared);
        assert!(!dir.path().join("linux-build").exists());
        assert!(!timing.dir().exists());
        assert!(timing.load().unwrap().is_empty());
    }

    #[test]
    fn test_clean_ignores_missing_paths() {
        let dir = TempDir::new().unwrap();
        let graph = fixture(dir.path());
        let timing = TimingLog::new(dir.path().join(".build_timing"));

        let summary = clean(&graph, &timing, CleanScope::All, &Logger::plain()).unwrap();

        assert!(summary.removed.is_empty());
        assert_eq!(summary.missing, 3);
        assert_eq!(
            summary.to_string(),
            "Removed 0 path(s), 3 already absent; timing log cleared"
        );
    }

    #[test]
    fn test_remove_path_handles_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("rootfs.tar");
        let tree = dir.path().join("rootfs");
        fs::write(&file, "tar").unwrap();
        fs::create_dir_all(tree.join("etc")).unwrap();

        assert!(remove_path(&file).unwrap());
        assert!(remove_path(&tree).unwrap());
        assert!(!remove_path(&file).unwrap());
    }
}
