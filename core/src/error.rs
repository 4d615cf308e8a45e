use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("stage '{0}' is registered more than once")]
    DuplicateStage(String),

    #[error(
        "output {} of stage '{}' is already owned by stage '{}'",
        .path.display(),
        .claimant,
        .owner
    )]
    DuplicateOutput {
        path: PathBuf,
        owner: String,
        claimant: String,
    },

    #[error("circular dependency detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("stage '{stage}' references unknown stage '{reference}'")]
    UnknownReference { stage: String, reference: String },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("stage '{0}' has an empty command")]
    EmptyCommand(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_members() {
        let err = ConfigError::CycleDetected(vec![
            "kernel".to_string(),
            "dtb".to_string(),
            "kernel".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "circular dependency detected: kernel -> dtb -> kernel"
        );
    }

    #[test]
    fn test_duplicate_output_message() {
        let err = ConfigError::DuplicateOutput {
            path: PathBuf::from("build/zImage"),
            owner: "kernel".to_string(),
            claimant: "rootfs".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "output build/zImage of stage 'rootfs' is already owned by stage 'kernel'"
        );
    }
}
