use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;

use socforge_core::clean::{self, CleanScope};
use socforge_core::config::CONFIG_FILE_NAME;
use socforge_core::dependency_graph::{StageGraph, StageRegistry};
use socforge_core::pipeline;
use socforge_core::{
    BuildContext, Cli, Commands, Config, ConfigError, LogLevel, Logger, StageRunner, StatusReport,
    Target, TimingReport,
};

fn make_logger(cli: &Cli) -> Logger {
    let logger = Logger::new().verbose(cli.verbose);
    if cli.no_color {
        logger.with_colors(false)
    } else {
        logger
    }
}

fn init_config(cli: &Cli, root: &Path, logger: &Logger) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));

    if config_path.exists() {
        anyhow::bail!(
            "{} already exists. Remove it first if you want to reinitialize.",
            config_path.display()
        );
    }

    let config = Config {
        stages: pipeline::default_stage_configs(),
        ..Config::default()
    };

    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to save {}", config_path.display()))?;

    logger.info(&format!("Created {}", config_path.display()));
    Ok(())
}

async fn build(ctx: &BuildContext, graph: &StageGraph, target: Target, dry_run: bool) -> Result<i32> {
    let roots = target.roots(graph)?;
    let plan = graph.closure(&roots);
    let runner = StageRunner::new(ctx.clone());

    if dry_run {
        let width = plan
            .iter()
            .map(|&index| graph.stage(index).id.len())
            .max()
            .unwrap_or(0);

        println!("Plan for {} ({} stage(s)):", target, plan.len());
        for planned in runner.dry_run(graph, &plan) {
            let action = if planned.check.needs_rebuild() { "run" } else { "skip" };
            println!(
                "  {:<width$}  {:<4}  {}",
                planned.id,
                action,
                planned.check.verdict,
                width = width
            );
            if planned.description != planned.id {
                println!("  {:<width$}        {}", "", planned.description, width = width);
            }
            if planned.check.needs_rebuild() {
                println!("  {:<width$}        $ {}", "", planned.command, width = width);
            }
            for warning in &planned.check.warnings {
                println!("  {:<width$}  warning: {}", "", warning, width = width);
            }
        }
        return Ok(0);
    }

    let run = runner.run(graph, &plan).await?;
    println!("{}", run);

    if !run.is_success() {
        ctx.logger().error(&format!("Build of {} failed", target));
    }

    Ok(run.exit_code())
}

fn show_status(config: &Config, root: &Path, graph: &StageGraph) {
    let report = StatusReport::collect(config.status_artifacts(root, graph));
    print!("{}", report);
}

fn show_timing_report(ctx: &BuildContext) -> Result<()> {
    let (records, warnings) = ctx.timing().read().context("Failed to load timing log")?;
    for warning in &warnings {
        ctx.logger().warn(warning);
    }

    let report = TimingReport::from_records(&records);

    if report.is_empty() {
        ctx.logger().info(&format!(
            "No timing data recorded in {}",
            ctx.timing().path().display()
        ));
        return Ok(());
    }

    println!("{}", report);
    Ok(())
}

fn clean_artifacts(ctx: &BuildContext, graph: &StageGraph, scope: CleanScope) -> Result<()> {
    let logger = ctx.logger();
    let summary = clean::clean(graph, ctx.timing(), scope, &logger)?;
    logger.info(&summary.to_string());
    Ok(())
}

async fn run(cli: &Cli, logger: Logger) -> Result<i32> {
    let root = cli.source_directory();

    if cli.command == Commands::Init {
        init_config(cli, &root, &logger)?;
        return Ok(0);
    }

    let config = Config::load_from_cli(cli)?;
    let registry = StageRegistry::from_stages(config.stages(&root))?;
    let graph = registry.build_graph()?;
    Target::validate_all(&graph)?;

    logger.debug(&format!("Stage order: {}", graph.order_ids().join(" -> ")));

    let ctx = BuildContext::new(root, &config, logger);

    if let Some(target) = cli.command.target() {
        return build(&ctx, &graph, target, cli.dry_run).await;
    }

    match cli.command {
        Commands::Status => show_status(&config, ctx.root(), &graph),
        Commands::TimingReport => show_timing_report(&ctx)?,
        Commands::Clean => clean_artifacts(&ctx, &graph, CleanScope::Outputs)?,
        Commands::CleanAll => clean_artifacts(&ctx, &graph, CleanScope::All)?,
        _ => {}
    }

    Ok(0)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let logger = make_logger(&cli);
    let fatal = logger.clone();

    let code = match run(&cli, logger).await {
        Ok(code) => code,
        Err(err) => {
            fatal.log(LogLevel::Fatal, &format!("{:#}", err));
            if err.downcast_ref::<ConfigError>().is_some() {
                2
            } else {
                1
            }
        }
    };

    std::process::exit(code);
}
