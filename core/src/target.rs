use std::fmt;

use crate::dependency_graph::StageGraph;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Fpga,
    Kernel,
    Rootfs,
    SdImage,
    Everything,
}

impl Target {
    pub fn all() -> Vec<Target> {
        vec![
            Target::Fpga,
            Target::Kernel,
            Target::Rootfs,
            Target::SdImage,
            Target::Everything,
        ]
    }

    /// Stage id this target builds, `None` for the aggregate target.
    pub fn stage_id(&self) -> Option<&'static str> {
        match self {
            Target::Fpga => Some("fpga"),
            Target::Kernel => Some("kernel"),
            Target::Rootfs => Some("rootfs"),
            Target::SdImage => Some("sd-image"),
            Target::Everything => None,
        }
    }

    /// Every named target must map onto a registered stage.
    pub fn validate_all(graph: &StageGraph) -> Result<(), ConfigError> {
        for target in Target::all() {
            if let Some(id) = target.stage_id() {
                if graph.index_of(id).is_none() {
                    return Err(ConfigError::UnknownStage(id.to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn roots(&self, graph: &StageGraph) -> Result<Vec<usize>, ConfigError> {
        match self.stage_id() {
            Some(id) => graph
                .index_of(id)
                .map(|index| vec![index])
                .ok_or_else(|| ConfigError::UnknownStage(id.to_string())),
            None => Ok(graph.order().to_vec()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Target::Fpga => "fpga",
            Target::Kernel => "kernel",
            Target::Rootfs => "rootfs",
            Target::SdImage => "sd-image",
            Target::Everything => "everything",
        };

        write!(f, "{value}")
    }
}
