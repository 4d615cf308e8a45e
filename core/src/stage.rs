use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Layers `base` underneath this command's own environment overrides.
    pub fn with_base_env(mut self, base: &BTreeMap<String, String>) -> Self {
        for (key, value) in base {
            self.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{}'", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Success | StageStatus::Skipped | StageStatus::Failed
        )
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::Skipped)
    }

    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        match self {
            StageStatus::Pending => matches!(
                next,
                StageStatus::Running | StageStatus::Skipped | StageStatus::Failed
            ),
            StageStatus::Running => matches!(next, StageStatus::Success | StageStatus::Failed),
            _ => false,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Success => "success",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub id: String,
    pub description: String,
    pub command: CommandSpec,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub after: Vec<String>,
    pub clean: Vec<PathBuf>,
}

impl Stage {
    pub fn new(id: impl Into<String>, command: CommandSpec) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            command,
            inputs: Vec::new(),
            outputs: Vec::new(),
            after: Vec::new(),
            clean: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.after.push(stage.into());
        self
    }

    pub fn clean_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.clean.push(path.into());
        self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.command)
    }
}
