use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::target::Target;

#[derive(Parser, Debug)]
#[command(name = "socforge")]
#[command(author, version, about = "Incremental build orchestrator for FPGA SoC images", long_about = None)]
pub struct Cli {
    #[arg(
        short = 'C',
        long = "directory",
        value_name = "DIR",
        help = "Project directory"
    )]
    pub source_dir: Option<PathBuf>,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_name = "N", help = "Number of parallel workers")]
    pub jobs: Option<usize>,

    #[arg(long, conflicts_with = "jobs", help = "Run stages one at a time")]
    pub serial: bool,

    #[arg(long, help = "Show the plan and staleness verdicts without running anything")]
    pub dry_run: bool,

    #[arg(short, long, help = "Enable debug output")]
    pub verbose: bool,

    #[arg(long, help = "Disable coloured output")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "Synthesize the FPGA bitstream")]
    Fpga,

    #[command(about = "Build the Linux kernel")]
    Kernel,

    #[command(about = "Build the root filesystem")]
    Rootfs,

    #[command(name = "sd-image", about = "Assemble the bootable SD card image")]
    SdImage,

    #[command(about = "Build every stage")]
    Everything,

    #[command(about = "Show artifact presence, size and age")]
    Status,

    #[command(name = "timing-report", about = "Summarize recorded stage durations")]
    TimingReport,

    #[command(about = "Remove declared stage outputs")]
    Clean,

    #[command(
        name = "clean-all",
        about = "Remove outputs, stage clean paths and the timing log"
    )]
    CleanAll,

    #[command(about = "Write a socforge.toml with the built-in pipeline")]
    Init,
}

impl Commands {
    pub fn target(&self) -> Option<Target> {
        match self {
            Commands::Fpga => Some(Target::Fpga),
            Commands::Kernel => Some(Target::Kernel),
            Commands::Rootfs => Some(Target::Rootfs),
            Commands::SdImage => Some(Target::SdImage),
            Commands::Everything => Some(Target::Everything),
            _ => None,
        }
    }
}

impl Cli {
    pub fn source_directory(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_build_target_with_flags() {
        let cli = Cli::try_parse_from(["socforge", "-j", "4", "--dry-run", "sd-image"]).unwrap();

        assert_eq!(cli.jobs, Some(4));
        assert!(cli.dry_run);
        assert!(!cli.serial);
        assert_eq!(cli.command, Commands::SdImage);
        assert_eq!(cli.command.target(), Some(Target::SdImage));
    }

    #[test]
    fn test_maintenance_commands_have_no_target() {
        for (arg, command) in [
            ("status", Commands::Status),
            ("timing-report", Commands::TimingReport),
            ("clean", Commands::Clean),
            ("clean-all", Commands::CleanAll),
            ("init", Commands::Init),
        ] {
            let cli = Cli::try_parse_from(["socforge", arg]).unwrap();
            assert_eq!(cli.command, command);
            assert!(cli.command.target().is_none());
        }
    }

    #[test]
    fn test_serial_conflicts_with_jobs() {
        assert!(Cli::try_parse_from(["socforge", "--serial", "-j", "2", "kernel"]).is_err());
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["socforge", "bootloader"]).is_err());
    }

    #[test]
    fn test_source_directory_override() {
        let cli = Cli::try_parse_from(["socforge", "-C", "/work/soc", "status"]).unwrap();
        assert_eq!(cli.source_directory(), PathBuf::from("/work/soc"));
    }
}
