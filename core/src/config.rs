use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::dependency_graph::StageGraph;
use crate::error::ConfigError;
use crate::pipeline;
use crate::stage::{CommandSpec, Stage};

pub const CONFIG_FILE_NAME: &str = "socforge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default = "default_cross_compile")]
    pub cross_compile: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default = "default_timing_dir")]
    pub timing_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clean: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: default_jobs(),
            cross_compile: default_cross_compile(),
            arch: default_arch(),
            timing_dir: default_timing_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_jobs() -> usize {
    2
}

fn default_cross_compile() -> String {
    "arm-linux-gnueabihf-".to_string()
}

fn default_arch() -> String {
    "arm".to_string()
}

fn default_timing_dir() -> String {
    ".build_timing".to_string()
}

impl StageConfig {
    pub fn to_stage(&self, root: &Path) -> Stage {
        let mut command = CommandSpec::new(&self.command).args(self.args.iter().cloned());
        command.cwd = Some(
            self.cwd
                .as_deref()
                .map(|cwd| resolve(root, cwd))
                .unwrap_or_else(|| root.to_path_buf()),
        );
        command.env = self.env.clone();

        let mut stage = Stage::new(&self.id, command);
        if let Some(description) = &self.description {
            stage = stage.with_description(description);
        }
        stage.inputs = self.inputs.iter().map(|p| resolve(root, p)).collect();
        stage.outputs = self.outputs.iter().map(|p| resolve(root, p)).collect();
        stage.clean = self.clean.iter().map(|p| resolve(root, p)).collect();
        stage.after = self.after.clone();
        stage
    }
}

impl Config {
    pub fn load_from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| cli.source_directory().join(CONFIG_FILE_NAME));

        let mut config = Config::load_from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;

        if let Some(jobs) = cli.jobs {
            config.build.jobs = jobs;
            config.build.parallel = true;
        }
        if cli.serial {
            config.build.parallel = false;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = Self::expand_path(&path.as_ref().to_string_lossy());

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Applies `PARALLEL_BUILD`, `PARALLEL_JOBS`, `CROSS_COMPILE` and `ARCH`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PARALLEL_BUILD") {
            self.build.parallel = match value.trim() {
                "0" => false,
                "1" => true,
                _ => return Err(ConfigError::invalid("PARALLEL_BUILD", value)),
            };
        }

        if let Some(value) = lookup("PARALLEL_JOBS") {
            self.build.jobs = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&jobs| jobs > 0)
                .ok_or_else(|| ConfigError::invalid("PARALLEL_JOBS", value.clone()))?;
        }

        if let Some(value) = lookup("CROSS_COMPILE") {
            self.build.cross_compile = value;
        }

        if let Some(value) = lookup("ARCH") {
            self.build.arch = value;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.jobs == 0 {
            return Err(ConfigError::invalid("jobs", "0"));
        }
        Ok(())
    }

    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.as_ref())
    }

    /// Worker count actually used: one when parallel builds are disabled.
    pub fn effective_jobs(&self) -> usize {
        if self.build.parallel {
            self.build.jobs.max(1)
        } else {
            1
        }
    }

    pub fn stage_configs(&self) -> Vec<StageConfig> {
        if self.stages.is_empty() {
            pipeline::default_stage_configs()
        } else {
            self.stages.clone()
        }
    }

    pub fn stages(&self, root: &Path) -> Vec<Stage> {
        self.stage_configs()
            .iter()
            .map(|stage| stage.to_stage(root))
            .collect()
    }

    pub fn timing_dir(&self, root: &Path) -> PathBuf {
        resolve(root, &self.build.timing_dir)
    }

    pub fn toolchain_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CROSS_COMPILE".to_string(), self.build.cross_compile.clone());
        env.insert("ARCH".to_string(), self.build.arch.clone());
        env
    }

    /// Paths shown by `status`, each tagged with the stage that produces it.
    pub fn status_artifacts(&self, root: &Path, graph: &StageGraph) -> Vec<(PathBuf, Option<String>)> {
        let producer_of = |path: &Path| {
            graph
                .stages()
                .iter()
                .find(|stage| stage.outputs.iter().any(|output| output == path))
                .map(|stage| stage.id.clone())
        };

        if self.status.artifacts.is_empty() {
            graph
                .order()
                .iter()
                .flat_map(|&i| {
                    let stage = graph.stage(i);
                    stage
                        .outputs
                        .iter()
                        .map(move |output| (output.clone(), Some(stage.id.clone())))
                })
                .collect()
        } else {
            self.status
                .artifacts
                .iter()
                .map(|p| {
                    let path = resolve(root, p);
                    let producer = producer_of(&path);
                    (path, producer)
                })
                .collect()
        }
    }
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    root.join(Config::expand_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency_graph::StageRegistry;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.build.parallel);
        assert_eq!(config.build.jobs, 2);
        assert_eq!(config.effective_jobs(), 2);
        assert_eq!(config.build.timing_dir, ".build_timing");
        assert_eq!(config.stage_configs(), pipeline::default_stage_configs());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("PARALLEL_BUILD", "0"),
                ("PARALLEL_JOBS", "6"),
                ("CROSS_COMPILE", "aarch64-linux-gnu-"),
                ("ARCH", "arm64"),
            ]))
            .unwrap();

        assert!(!config.build.parallel);
        assert_eq!(config.build.jobs, 6);
        assert_eq!(config.effective_jobs(), 1);

        let env = config.toolchain_env();
        assert_eq!(env["CROSS_COMPILE"], "aarch64-linux-gnu-");
        assert_eq!(env["ARCH"], "arm64");
    }

    #[test]
    fn test_invalid_env_values() {
        let mut config = Config::default();
        assert_eq!(
            config.apply_env(lookup(&[("PARALLEL_BUILD", "yes")])),
            Err(ConfigError::invalid("PARALLEL_BUILD", "yes"))
        );
        assert_eq!(
            config.apply_env(lookup(&[("PARALLEL_JOBS", "0")])),
            Err(ConfigError::invalid("PARALLEL_JOBS", "0"))
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from_file(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(config.stages.is_empty());
        assert_eq!(config.build.arch, "arm");
    }

    #[test]
    fn test_parse_stages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[build]
parallel = false
jobs = 4

[[stages]]
id = "kernel"
command = "make"
args = ["-C", "kernel", "zImage"]
inputs = ["kernel/config"]
outputs = ["kernel/zImage"]
clean = ["kernel/build"]

[stages.env]
KBUILD_VERBOSE = "1"

[[stages]]
id = "sd-image"
command = "./mkimage.sh"
cwd = "tools"
inputs = ["kernel/zImage"]
outputs = ["sd.img"]
after = ["kernel"]
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert!(!config.build.parallel);
        assert_eq!(config.build.jobs, 4);
        assert_eq!(config.stages.len(), 2);

        let stages = config.stages(dir.path());
        let kernel = &stages[0];
        assert_eq!(kernel.command.command_line(), "make -C kernel zImage");
        assert_eq!(kernel.command.cwd.as_deref(), Some(dir.path()));
        assert_eq!(kernel.outputs, vec![dir.path().join("kernel/zImage")]);
        assert_eq!(kernel.clean, vec![dir.path().join("kernel/build")]);
        assert_eq!(kernel.command.env["KBUILD_VERBOSE"], "1");

        let image = &stages[1];
        assert_eq!(image.command.cwd, Some(dir.path().join("tools")));
        assert_eq!(image.after, vec!["kernel".to_string()]);

        let graph = StageRegistry::from_stages(stages).unwrap().build_graph().unwrap();
        assert_eq!(graph.dependency_ids("sd-image"), vec!["kernel"]);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = Config {
            stages: pipeline::default_stage_configs(),
            ..Config::default()
        };
        config.save_to_file(&path).unwrap();

        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.stages, config.stages);
    }

    #[test]
    fn test_status_artifacts_default_to_declared_outputs() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let graph = StageRegistry::from_stages(config.stages(dir.path()))
            .unwrap()
            .build_graph()
            .unwrap();

        let artifacts = config.status_artifacts(dir.path(), &graph);
        let declared: usize = graph.stages().iter().map(|s| s.outputs.len()).sum();
        assert_eq!(artifacts.len(), declared);
        assert!(artifacts.iter().all(|(_, producer)| producer.is_some()));
    }

    #[test]
    fn test_status_artifacts_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.status.artifacts = vec![
            "build/sd-image.img".to_string(),
            "notes.txt".to_string(),
        ];
        let graph = StageRegistry::from_stages(config.stages(dir.path()))
            .unwrap()
            .build_graph()
            .unwrap();

        let artifacts = config.status_artifacts(dir.path(), &graph);
        assert_eq!(
            artifacts,
            vec![
                (dir.path().join("build/sd-image.img"), Some("sd-image".to_string())),
                (dir.path().join("notes.txt"), None),
            ]
        );
    }
}
