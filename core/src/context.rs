use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::logger::Logger;
use crate::output::OutputClassifier;
use crate::timing::TimingLog;

/// Per-invocation state shared by every component of a build.
#[derive(Clone)]
pub struct BuildContext {
    root: PathBuf,
    jobs: usize,
    toolchain_env: BTreeMap<String, String>,
    logger: Arc<Logger>,
    timing: Arc<TimingLog>,
    classifier: OutputClassifier,
}

impl BuildContext {
    pub fn new(root: impl Into<PathBuf>, config: &Config, logger: Logger) -> Self {
        let root = root.into();
        let timing = TimingLog::new(config.timing_dir(&root));

        Self {
            jobs: config.effective_jobs(),
            toolchain_env: config.toolchain_env(),
            logger: Arc::new(logger),
            timing: Arc::new(timing),
            classifier: OutputClassifier::new(),
            root,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn is_parallel(&self) -> bool {
        self.jobs > 1
    }

    pub fn toolchain_env(&self) -> &BTreeMap<String, String> {
        &self.toolchain_env
    }

    pub fn logger(&self) -> Arc<Logger> {
        Arc::clone(&self.logger)
    }

    pub fn timing(&self) -> &TimingLog {
        &self.timing
    }

    pub fn classifier(&self) -> OutputClassifier {
        self.classifier
    }
}
