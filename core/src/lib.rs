pub mod clean;
pub mod cli;
pub mod config;
pub mod context;
pub mod dependency_graph;
pub mod error;
pub mod executor;
pub mod logger;
pub mod output;
pub mod pipeline;
pub mod stage;
pub mod stage_runner;
pub mod staleness;
pub mod status;
pub mod target;
pub mod timing;

pub use clean::{CleanScope, CleanSummary};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use context::BuildContext;
pub use dependency_graph::{StageGraph, StageRegistry};
pub use error::ConfigError;
pub use executor::{execute_command, ExecutionResult, OutputStream};
pub use logger::{LogLevel, Logger};
pub use stage::{CommandSpec, Stage, StageStatus};
pub use stage_runner::{BuildRun, PlannedStage, StageEvent, StageOutcome, StageRunner};
pub use staleness::{Staleness, StalenessCheck};
pub use status::StatusReport;
pub use target::Target;
pub use timing::{TimingLog, TimingRecord, TimingReport};
