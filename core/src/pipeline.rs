use std::collections::BTreeMap;

use crate::config::StageConfig;

pub const FPGA_BITSTREAM: &str = "hw/output_files/soc_system.rbf";
pub const FPGA_SOPCINFO: &str = "hw/soc_system.sopcinfo";
pub const DEVICE_TREE_BLOB: &str = "hw/soc_system.dtb";
pub const KERNEL_IMAGE: &str = "kernel/build/arch/arm/boot/zImage";
pub const ROOTFS_ARCHIVE: &str = "rootfs/rootfs.tar.gz";
pub const SD_IMAGE: &str = "build/sd-image.img";

fn make_stage(id: &str, description: &str, dir: &str, target: Option<&str>) -> StageConfig {
    let mut args = vec!["-C".to_string(), dir.to_string()];
    if let Some(target) = target {
        args.push(target.to_string());
    }

    StageConfig {
        id: id.to_string(),
        description: Some(description.to_string()),
        command: "make".to_string(),
        args,
        cwd: None,
        inputs: Vec::new(),
        outputs: Vec::new(),
        after: Vec::new(),
        clean: Vec::new(),
        env: BTreeMap::new(),
    }
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The SoC image pipeline used when no stages are configured.
///
/// Each stage delegates to the make target of its sub-directory; toolchain
/// variables reach those builds through the environment.
pub fn default_stage_configs() -> Vec<StageConfig> {
    let mut fpga = make_stage("fpga", "FPGA synthesis", "hw", Some("rbf"));
    fpga.inputs = paths(&[
        "hw/soc_system.qsys",
        "hw/soc_system.qpf",
        "hw/soc_system.qsf",
        "hw/soc_top.v",
    ]);
    fpga.outputs = paths(&[FPGA_BITSTREAM, FPGA_SOPCINFO]);
    fpga.clean = paths(&["hw/db", "hw/incremental_db", "hw/soc_system"]);

    let mut dtb = make_stage("dtb", "Device tree generation", "hw", Some("dtb"));
    dtb.inputs = paths(&[FPGA_SOPCINFO, "hw/soc_system_board_info.xml"]);
    dtb.outputs = paths(&[DEVICE_TREE_BLOB]);
    dtb.clean = paths(&["hw/soc_system.dts"]);

    let mut kernel = make_stage("kernel", "Kernel cross-compile", "kernel", Some("zImage"));
    kernel.inputs = paths(&["kernel/config", "kernel/Makefile"]);
    kernel.outputs = paths(&[KERNEL_IMAGE]);
    kernel.clean = paths(&["kernel/build"]);

    let mut rootfs = make_stage("rootfs", "Root filesystem assembly", "rootfs", None);
    rootfs.inputs = paths(&["rootfs/packages.list", "rootfs/overlay", "rootfs/Makefile"]);
    rootfs.outputs = paths(&[ROOTFS_ARCHIVE]);
    rootfs.clean = paths(&["rootfs/staging"]);

    let mut sd_image = make_stage("sd-image", "SD card image composition", "sd-image", None);
    sd_image.inputs = paths(&[
        FPGA_BITSTREAM,
        DEVICE_TREE_BLOB,
        KERNEL_IMAGE,
        ROOTFS_ARCHIVE,
        "sd-image/layout.cfg",
    ]);
    sd_image.outputs = paths(&[SD_IMAGE]);
    sd_image.clean = paths(&["sd-image/work"]);

    vec![fpga, dtb, kernel, rootfs, sd_image]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency_graph::StageRegistry;
    use crate::target::Target;
    use std::path::Path;

    #[test]
    fn test_default_pipeline_graph() {
        let root = Path::new("/work/soc");
        let stages = default_stage_configs()
            .iter()
            .map(|s| s.to_stage(root))
            .collect();
        let graph = StageRegistry::from_stages(stages)
            .unwrap()
            .build_graph()
            .unwrap();

        assert!(Target::validate_all(&graph).is_ok());
        assert_eq!(
            graph.order_ids(),
            vec!["fpga", "dtb", "kernel", "rootfs", "sd-image"]
        );
        assert_eq!(graph.dependency_ids("dtb"), vec!["fpga"]);
        assert_eq!(
            graph.dependency_ids("sd-image"),
            vec!["fpga", "dtb", "kernel", "rootfs"]
        );
        assert!(graph.dependency_ids("kernel").is_empty());
        assert!(graph.dependency_ids("rootfs").is_empty());
    }

    #[test]
    fn test_kernel_target_closure_is_kernel_only() {
        let root = Path::new("/work/soc");
        let stages = default_stage_configs()
            .iter()
            .map(|s| s.to_stage(root))
            .collect();
        let graph = StageRegistry::from_stages(stages)
            .unwrap()
            .build_graph()
            .unwrap();

        let roots = Target::Kernel.roots(&graph).unwrap();
        let plan: Vec<&str> = graph
            .closure(&roots)
            .into_iter()
            .map(|i| graph.stage(i).id.as_str())
            .collect();
        assert_eq!(plan, vec!["kernel"]);
    }
}
