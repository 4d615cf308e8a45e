use once_cell::sync::Lazy;
use regex::Regex;

use crate::logger::LogLevel;

static GCC_CLANG_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:\s]+):(\d+):(\d+): (fatal )?error: (.+)$").unwrap());
static GCC_CLANG_WARNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:\s]+):(\d+):(\d+): warning: (.+)$").unwrap());
static MAKE_FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^make(\[\d+\])?: \*\*\* ").unwrap());
static SYNTHESIS_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Critical Warning|Error) \(\d+\): ").unwrap());
static SYNTHESIS_WARNING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Warning \(\d+\): ").unwrap());
static DTC_ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\S+: )?(ERROR|Error)( \(\w+\))?: ").unwrap());
static DTC_WARNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+: )?Warning \([\w_-]+\): ").unwrap());
static LINKER_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"undefined reference to|multiple definition of").unwrap());
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

/// Assigns a log level to a line of toolchain output.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputClassifier;

impl OutputClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, line: &str) -> LogLevel {
        let stripped = strip_ansi(line);
        let line = stripped.trim_end();

        if GCC_CLANG_ERROR.is_match(line)
            || MAKE_FAILURE.is_match(line)
            || SYNTHESIS_ERROR.is_match(line)
            || DTC_ERROR.is_match(line)
            || LINKER_ERROR.is_match(line)
        {
            return LogLevel::Error;
        }

        if GCC_CLANG_WARNING.is_match(line)
            || SYNTHESIS_WARNING.is_match(line)
            || DTC_WARNING.is_match(line)
        {
            return LogLevel::Warning;
        }

        LogLevel::Info
    }
}

pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").to_string()
}
