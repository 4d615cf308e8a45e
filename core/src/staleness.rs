use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::stage::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    OutputMissing(PathBuf),
    InputNewer { input: PathBuf, output: PathBuf },
    UpToDate,
}

impl Staleness {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, Staleness::UpToDate)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::OutputMissing(path) => write!(f, "output missing: {}", path.display()),
            Staleness::InputNewer { input, output } => write!(
                f,
                "{} is newer than {}",
                input.display(),
                output.display()
            ),
            Staleness::UpToDate => write!(f, "up to date"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StalenessCheck {
    pub verdict: Staleness,
    pub warnings: Vec<String>,
}

impl StalenessCheck {
    pub fn needs_rebuild(&self) -> bool {
        self.verdict.needs_rebuild()
    }
}

pub fn needs_rebuild(stage: &Stage) -> bool {
    check(stage).needs_rebuild()
}

/// Compares modification times of a stage's declared artifacts.
///
/// Inputs that do not exist are ignored rather than forcing a rebuild. A
/// stage whose only change is a deleted input is therefore reported as up to
/// date; callers rely on this. A stage without declared outputs has nothing
/// missing and nothing older than its inputs, so it is never stale.
pub fn check(stage: &Stage) -> StalenessCheck {
    let mut warnings = Vec::new();
    let mut oldest: Option<(SystemTime, &PathBuf)> = None;

    for output in &stage.outputs {
        match modified(output) {
            Ok(Some(time)) => {
                if oldest.map_or(true, |(current, _)| time < current) {
                    oldest = Some((time, output));
                }
            }
            Ok(None) => {
                return StalenessCheck {
                    verdict: Staleness::OutputMissing(output.clone()),
                    warnings,
                };
            }
            Err(err) => {
                warnings.push(format!("cannot stat output {}: {}", output.display(), err));
                return StalenessCheck {
                    verdict: Staleness::OutputMissing(output.clone()),
                    warnings,
                };
            }
        }
    }

    let Some((oldest_time, oldest_output)) = oldest else {
        return StalenessCheck {
            verdict: Staleness::UpToDate,
            warnings,
        };
    };

    for input in &stage.inputs {
        match modified(input) {
            Ok(Some(time)) if time > oldest_time => {
                return StalenessCheck {
                    verdict: Staleness::InputNewer {
                        input: input.clone(),
                        output: oldest_output.clone(),
                    },
                    warnings,
                };
            }
            Ok(_) => {}
            Err(err) => {
                warnings.push(format!("cannot stat input {}: {}", input.display(), err));
            }
        }
    }

    StalenessCheck {
        verdict: Staleness::UpToDate,
        warnings,
    }
}

fn modified(path: &Path) -> io::Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.modified().map(Some),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
