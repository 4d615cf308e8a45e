use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

pub const TIMING_LOG_NAME: &str = "timing.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub stage: String,
    pub start: i64,
    pub end: i64,
    pub duration_secs: f64,
}

impl TimingRecord {
    pub fn new(stage: impl Into<String>, start: i64, end: i64, duration_secs: f64) -> Self {
        Self {
            stage: stage.into(),
            start,
            end,
            duration_secs,
        }
    }
}

pub struct StageTimer {
    stage: String,
    start_epoch: i64,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            start_epoch: Utc::now().timestamp(),
            started: Instant::now(),
        }
    }

    pub fn finish(self) -> TimingRecord {
        TimingRecord {
            duration_secs: self.started.elapsed().as_secs_f64(),
            end: Utc::now().timestamp(),
            start: self.start_epoch,
            stage: self.stage,
        }
    }
}

/// Append-only JSON-lines store of timing records.
///
/// Appends hold `writer` for the whole write so that records finishing on
/// different workers never interleave.
pub struct TimingLog {
    dir: PathBuf,
    path: PathBuf,
    writer: Mutex<()>,
}

impl TimingLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(TIMING_LOG_NAME);
        Self {
            dir,
            path,
            writer: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TimingRecord) -> anyhow::Result<()> {
        let mut line =
            serde_json::to_string(record).context("Failed to serialize timing record")?;
        line.push('\n');

        let _guard = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("timing log writer lock poisoned"))?;

        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create timing directory: {}", self.dir.display())
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open timing log: {}", self.path.display()))?;

        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to timing log: {}", self.path.display()))?;

        Ok(())
    }

    pub fn load(&self) -> anyhow::Result<Vec<TimingRecord>> {
        self.read().map(|(records, _)| records)
    }

    /// Parses the log, skipping lines that are not valid records (e.g. a
    /// partial write from a killed run). Each skipped line yields a warning.
    pub fn read(&self) -> anyhow::Result<(Vec<TimingRecord>, Vec<String>)> {
        if !self.path.exists() {
            return Ok((Vec::new(), Vec::new()));
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read timing log: {}", self.path.display()))?;

        let mut records = Vec::new();
        let mut warnings = Vec::new();

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(err) => warnings.push(format!(
                    "skipping {} line {}: {}",
                    self.path.display(),
                    number + 1,
                    err
                )),
            }
        }

        Ok((records, warnings))
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("timing log writer lock poisoned"))?;

        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).with_context(|| {
                format!("Failed to remove timing directory: {}", self.dir.display())
            })?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingReport {
    pub stages: Vec<(String, f64)>,
    pub total: f64,
}

impl TimingReport {
    /// Sums durations per stage, keeping the order stages first appear in.
    pub fn from_records(records: &[TimingRecord]) -> Self {
        let mut stages: Vec<(String, f64)> = Vec::new();

        for record in records {
            match stages.iter_mut().find(|(stage, _)| *stage == record.stage) {
                Some((_, duration)) => *duration += record.duration_secs,
                None => stages.push((record.stage.clone(), record.duration_secs)),
            }
        }

        let total = stages.iter().map(|(_, duration)| duration).sum();

        Self { stages, total }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .stages
            .iter()
            .map(|(stage, _)| stage.len())
            .max()
            .unwrap_or(0)
            .max("TOTAL".len());

        for (stage, duration) in &self.stages {
            writeln!(f, "{:<width$}  {}", stage, format_duration(*duration), width = width)?;
        }
        writeln!(f, "{}", "-".repeat(width + 7))?;
        write!(f, "{:<width$}  {}", "TOTAL", format_duration(self.total), width = width)
    }
}

/// Formats seconds as `MM:SS`, rounding to the nearest second.
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
