use chrono::{DateTime, Local};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactStatus {
    pub path: PathBuf,
    pub producer: Option<String>,
    pub exists: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Local>>,
    pub error: Option<String>,
}

impl ArtifactStatus {
    pub fn inspect(path: &Path, producer: Option<String>) -> Self {
        let mut status = Self {
            path: path.to_path_buf(),
            producer,
            exists: false,
            size: None,
            modified: None,
            error: None,
        };

        match std::fs::metadata(path) {
            Ok(metadata) => {
                status.exists = true;
                status.size = Some(if metadata.is_dir() {
                    directory_size(path)
                } else {
                    metadata.len()
                });
                status.modified = metadata.modified().ok().map(DateTime::<Local>::from);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => status.error = Some(err.to_string()),
        }

        status
    }
}

fn directory_size(path: &Path) -> u64 {
    std::fs::read_dir(path)
        .ok()
        .into_iter()
        .flat_map(|entries| entries.flatten())
        .map(|entry| match entry.metadata() {
            Ok(metadata) if metadata.is_dir() => directory_size(&entry.path()),
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        })
        .sum()
}

/// Snapshot of artifact attributes; never runs a stage or a staleness check.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub artifacts: Vec<ArtifactStatus>,
    pub generated_at: DateTime<Local>,
}

impl StatusReport {
    pub fn collect<I>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, Option<String>)>,
    {
        Self {
            artifacts: artifacts
                .into_iter()
                .map(|(path, producer)| ArtifactStatus::inspect(&path, producer))
                .collect(),
            generated_at: Local::now(),
        }
    }

    pub fn present(&self) -> usize {
        self.artifacts.iter().filter(|a| a.exists).count()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Artifacts ({}/{} present):",
            self.present(),
            self.artifacts.len()
        )?;

        for artifact in &self.artifacts {
            let marker = if artifact.exists { "✓" } else { "✗" };
            let producer = artifact
                .producer
                .as_deref()
                .map(|p| format!(" [{}]", p))
                .unwrap_or_default();

            if let Some(error) = &artifact.error {
                writeln!(
                    f,
                    "  ? {}{} (cannot stat: {})",
                    artifact.path.display(),
                    producer,
                    error
                )?;
            } else if artifact.exists {
                let size = artifact.size.map(human_size).unwrap_or_default();
                let modified = artifact
                    .modified
                    .map(|time| {
                        format!(
                            "{} ({} ago)",
                            time.format("%Y-%m-%d %H:%M:%S"),
                            human_age(self.generated_at.signed_duration_since(time).num_seconds())
                        )
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                writeln!(
                    f,
                    "  {} {}{} | {} | {}",
                    marker,
                    artifact.path.display(),
                    producer,
                    size,
                    modified
                )?;
            } else {
                writeln!(
                    f,
                    "  {} {}{} | missing",
                    marker,
                    artifact.path.display(),
                    producer
                )?;
            }
        }

        Ok(())
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", value, UNITS[unit])
}

pub fn human_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}
