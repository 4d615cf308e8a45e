use std::io::Write;

use chrono::Local;

use crate::stage::CommandSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn to_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            LogLevel::Debug => "\x1b[90m",
            LogLevel::Info => "\x1b[37m",
            LogLevel::Warning => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
            LogLevel::Fatal => "\x1b[31;1m",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTransition {
    Start,
    Skip,
    Success,
    Fail,
    Blocked,
}

impl StageTransition {
    fn as_str(&self) -> &'static str {
        match self {
            StageTransition::Start => "start",
            StageTransition::Skip => "skip",
            StageTransition::Success => "success",
            StageTransition::Fail => "fail",
            StageTransition::Blocked => "blocked",
        }
    }

    fn level(&self) -> LogLevel {
        match self {
            StageTransition::Start | StageTransition::Skip | StageTransition::Success => {
                LogLevel::Info
            }
            StageTransition::Fail => LogLevel::Error,
            StageTransition::Blocked => LogLevel::Warning,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Logger {
    use_colors: bool,
    min_level: LogLevel,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stdout),
            min_level: LogLevel::Info,
        }
    }

    pub fn plain() -> Self {
        Self {
            use_colors: false,
            min_level: LogLevel::Info,
        }
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors && atty::is(atty::Stream::Stdout);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.min_level = if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };
        self
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }

        let timestamp = Local::now().format("%H:%M:%S");

        if self.use_colors {
            println!(
                "\x1b[90m[{}]\x1b[0m {}{}\x1b[0m",
                timestamp,
                level.color(),
                message
            );
        } else if level >= LogLevel::Warning {
            println!("[{}] {}: {}", timestamp, level.to_str(), message);
        } else {
            println!("[{}] {}", timestamp, message);
        }

        let _ = std::io::stdout().flush();
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn stage(&self, stage: &str, transition: StageTransition, detail: &str) {
        self.log(transition.level(), &format_transition(stage, transition, detail));
    }

    pub fn tool_output(&self, stage: &str, level: LogLevel, line: &str) {
        let level = if level == LogLevel::Info {
            LogLevel::Debug
        } else {
            level
        };
        self.log(level, &format!("  {} | {}", stage, line));
    }

    pub fn failure_banner(&self, stage: &str, command: &CommandSpec, exit_code: Option<i32>) {
        let code = exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        let message = format!(
            "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\
             Stage '{}' failed\n\
             Command:   {}\n\
             Exit code: {}\n\
             ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━",
            stage,
            command.command_line(),
            code
        );
        self.log(LogLevel::Fatal, &message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_transition(stage: &str, transition: StageTransition, detail: &str) -> String {
    if detail.is_empty() {
        format!("stage={} event={}", stage, transition.as_str())
    } else {
        format!("stage={} event={} {}", stage, transition.as_str(), detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_format() {
        assert_eq!(
            format_transition("kernel", StageTransition::Start, "cmd=\"make zImage\""),
            "stage=kernel event=start cmd=\"make zImage\""
        );
        assert_eq!(
            format_transition("rootfs", StageTransition::Success, ""),
            "stage=rootfs event=success"
        );
    }

    #[test]
    fn test_verbose_enables_debug() {
        let logger = Logger::plain();
        assert!(!logger.enabled(LogLevel::Debug));
        assert!(logger.enabled(LogLevel::Warning));

        let logger = Logger::plain().verbose(true);
        assert!(logger.enabled(LogLevel::Debug));
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Fatal > LogLevel::Error);
        assert!(LogLevel::Warning > LogLevel::Info);
        assert_eq!(LogLevel::Warning.to_str(), "WARNING");
    }
}
