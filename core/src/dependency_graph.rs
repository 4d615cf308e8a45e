use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::stage::Stage;

#[derive(Debug, Default)]
pub struct StageRegistry {
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
    owners: HashMap<PathBuf, usize>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stages(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for stage in stages {
            registry.register(stage)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, stage: Stage) -> Result<(), ConfigError> {
        if self.index.contains_key(&stage.id) {
            return Err(ConfigError::DuplicateStage(stage.id));
        }

        if stage.command.program.trim().is_empty() {
            return Err(ConfigError::EmptyCommand(stage.id));
        }

        let position = self.stages.len();
        let mut claimed: Vec<&PathBuf> = Vec::new();

        for output in &stage.outputs {
            if let Some(&owner) = self.owners.get(output) {
                return Err(ConfigError::DuplicateOutput {
                    path: output.clone(),
                    owner: self.stages[owner].id.clone(),
                    claimant: stage.id.clone(),
                });
            }
            if claimed.contains(&output) {
                return Err(ConfigError::DuplicateOutput {
                    path: output.clone(),
                    owner: stage.id.clone(),
                    claimant: stage.id.clone(),
                });
            }
            claimed.push(output);
        }

        for output in &stage.outputs {
            self.owners.insert(output.clone(), position);
        }
        self.index.insert(stage.id.clone(), position);
        self.stages.push(stage);

        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn build_graph(&self) -> Result<StageGraph, ConfigError> {
        let count = self.stages.len();
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];

        for (i, stage) in self.stages.iter().enumerate() {
            // A stage may rewrite its own output in place.
            for input in &stage.inputs {
                if let Some(&owner) = self.owners.get(input) {
                    if owner != i {
                        dependencies[i].insert(owner);
                    }
                }
            }

            for reference in &stage.after {
                let owner = self.index.get(reference).copied().ok_or_else(|| {
                    ConfigError::UnknownReference {
                        stage: stage.id.clone(),
                        reference: reference.clone(),
                    }
                })?;
                dependencies[i].insert(owner);
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree: Vec<usize> = vec![0; count];

        for (i, deps) in dependencies.iter().enumerate() {
            in_degree[i] = deps.len();
            for &dep in deps {
                dependents[dep].push(i);
            }
        }

        let mut queue: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(count);

        while let Some(Reverse(current)) = queue.pop() {
            order.push(current);

            for &dependent in &dependents[current] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(Reverse(dependent));
                }
            }
        }

        if order.len() != count {
            let cycle = find_cycle(&dependencies, &in_degree)
                .into_iter()
                .map(|i| self.stages[i].id.clone())
                .collect();
            return Err(ConfigError::CycleDetected(cycle));
        }

        Ok(StageGraph {
            stages: self.stages.clone(),
            index: self.index.clone(),
            dependencies: dependencies
                .into_iter()
                .map(|deps| deps.into_iter().collect())
                .collect(),
            dependents,
            order,
        })
    }
}

// Every stage left with a nonzero in-degree has at least one unresolved
// dependency that is itself unresolved, so walking those edges must revisit
// a node.
fn find_cycle(dependencies: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let Some(start) = in_degree.iter().position(|&degree| degree > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;

    loop {
        if let Some(pos) = path.iter().position(|&node| node == current) {
            let mut cycle = path.split_off(pos);
            cycle.push(current);
            return cycle;
        }
        path.push(current);

        match dependencies[current]
            .iter()
            .copied()
            .find(|&dep| in_degree[dep] > 0)
        {
            Some(next) => current = next,
            None => return path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl StageGraph {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, index: usize) -> &Stage {
        &self.stages[index]
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Topological order; ties are broken by registration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn order_ids(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.stages[i].id.as_str())
            .collect()
    }

    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    pub fn dependency_ids(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| {
                self.dependencies[i]
                    .iter()
                    .map(|&dep| self.stages[dep].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Roots plus everything they transitively depend on, in topological order.
    pub fn closure(&self, roots: &[usize]) -> Vec<usize> {
        let mut selected = vec![false; self.stages.len()];
        let mut stack: Vec<usize> = roots.to_vec();

        while let Some(current) = stack.pop() {
            if selected[current] {
                continue;
            }
            selected[current] = true;
            stack.extend(self.dependencies[current].iter().copied());
        }

        self.order
            .iter()
            .copied()
            .filter(|&i| selected[i])
            .collect()
    }

    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.stages.len()];
        let mut stack: Vec<usize> = self.dependents[index].clone();

        while let Some(current) = stack.pop() {
            if seen[current] {
                continue;
            }
            seen[current] = true;
            stack.extend(self.dependents[current].iter().copied());
        }

        self.order.iter().copied().filter(|&i| seen[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::CommandSpec;

    fn stage(id: &str) -> Stage {
        Stage::new(id, CommandSpec::new("true"))
    }

    fn position(order: &[&str], id: &str) -> usize {
        order.iter().position(|s| *s == id).unwrap()
    }

    #[test]
    fn test_dependencies_derived_from_outputs() {
        let registry = StageRegistry::from_stages(vec![
            stage("fpga").output("hw/soc.rbf"),
            stage("kernel").output("kernel/zImage"),
            stage("sd-image")
                .input("hw/soc.rbf")
                .input("kernel/zImage")
                .input("board/boot.cmd")
                .output("sd.img"),
        ])
        .unwrap();

        let graph = registry.build_graph().unwrap();

        assert_eq!(graph.dependency_ids("sd-image"), vec!["fpga", "kernel"]);
        assert!(graph.dependency_ids("fpga").is_empty());
        assert_eq!(graph.order_ids(), vec!["fpga", "kernel", "sd-image"]);
    }

    #[test]
    fn test_order_is_topological() {
        let registry = StageRegistry::from_stages(vec![
            stage("image").input("b.out").input("c.out").output("img"),
            stage("c").input("a.out").output("c.out"),
            stage("b").input("a.out").output("b.out"),
            stage("a").output("a.out"),
        ])
        .unwrap();

        let graph = registry.build_graph().unwrap();
        let order = graph.order_ids();

        assert_eq!(order.len(), 4);
        for (i, stage) in graph.stages().iter().enumerate() {
            for &dep in graph.dependencies(i) {
                let dep_id = graph.stage(dep).id.as_str();
                assert!(position(&order, dep_id) < position(&order, &stage.id));
            }
        }
    }

    #[test]
    fn test_ties_broken_by_registration_order() {
        let registry = StageRegistry::from_stages(vec![
            stage("B").output("b"),
            stage("A").output("a"),
            stage("C").input("a").input("b").output("c"),
        ])
        .unwrap();

        let graph = registry.build_graph().unwrap();
        assert_eq!(graph.order_ids(), vec!["B", "A", "C"]);

        let again = registry.build_graph().unwrap();
        assert_eq!(graph.order_ids(), again.order_ids());
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut registry = StageRegistry::new();
        registry.register(stage("kernel").output("out/zImage")).unwrap();

        let result = registry.register(stage("other").output("out/zImage"));

        assert_eq!(
            result,
            Err(ConfigError::DuplicateOutput {
                path: PathBuf::from("out/zImage"),
                owner: "kernel".to_string(),
                claimant: "other".to_string(),
            })
        );
        assert_eq!(registry.stages().len(), 1);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut registry = StageRegistry::new();
        registry.register(stage("kernel")).unwrap();
        assert_eq!(
            registry.register(stage("kernel")),
            Err(ConfigError::DuplicateStage("kernel".to_string()))
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut registry = StageRegistry::new();
        assert_eq!(
            registry.register(Stage::new("broken", CommandSpec::new(" "))),
            Err(ConfigError::EmptyCommand("broken".to_string()))
        );
    }

    #[test]
    fn test_cycle_detected_names_members() {
        let registry = StageRegistry::from_stages(vec![
            stage("root").output("root.out"),
            stage("x").input("y.out").input("root.out").output("x.out"),
            stage("y").input("x.out").output("y.out"),
        ])
        .unwrap();

        match registry.build_graph() {
            Err(ConfigError::CycleDetected(cycle)) => {
                assert!(cycle.contains(&"x".to_string()));
                assert!(cycle.contains(&"y".to_string()));
                assert!(!cycle.contains(&"root".to_string()));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("Expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn test_in_place_stage_has_no_dependencies() {
        let registry = StageRegistry::from_stages(vec![
            stage("patch").input("fw.bin").output("fw.bin"),
            stage("sign").input("fw.bin").input("fw.sig").output("fw.sig"),
        ])
        .unwrap();

        let graph = registry.build_graph().unwrap();

        assert!(graph.dependency_ids("patch").is_empty());
        assert_eq!(graph.dependency_ids("sign"), vec!["patch"]);
        assert_eq!(graph.order_ids(), vec!["patch", "sign"]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let registry = StageRegistry::from_stages(vec![stage("loop").after("loop")]).unwrap();

        assert_eq!(
            registry.build_graph().unwrap_err(),
            ConfigError::CycleDetected(vec!["loop".to_string(), "loop".to_string()])
        );
    }

    #[test]
    fn test_explicit_references() {
        let registry = StageRegistry::from_stages(vec![
            stage("fpga"),
            stage("dtb").after("fpga"),
        ])
        .unwrap();

        let graph = registry.build_graph().unwrap();
        assert_eq!(graph.dependency_ids("dtb"), vec!["fpga"]);

        let registry = StageRegistry::from_stages(vec![stage("dtb").after("missing")]).unwrap();
        assert_eq!(
            registry.build_graph().unwrap_err(),
            ConfigError::UnknownReference {
                stage: "dtb".to_string(),
                reference: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_closure_and_dependents() {
        let registry = StageRegistry::from_stages(vec![
            stage("fpga").output("rbf"),
            stage("kernel").output("zImage"),
            stage("rootfs").output("rootfs.tar"),
            stage("sd-image")
                .input("rbf")
                .input("zImage")
                .input("rootfs.tar")
                .output("sd.img"),
        ])
        .unwrap();
        let graph = registry.build_graph().unwrap();

        let kernel = graph.index_of("kernel").unwrap();
        assert_eq!(graph.closure(&[kernel]), vec![kernel]);

        let image = graph.index_of("sd-image").unwrap();
        assert_eq!(graph.closure(&[image]).len(), 4);

        assert_eq!(graph.transitive_dependents(kernel), vec![image]);
        assert!(graph.transitive_dependents(image).is_empty());
    }

    #[test]
    fn test_empty_registry() {
        let graph = StageRegistry::new().build_graph().unwrap();
        assert!(graph.is_empty());
        assert!(graph.order().is_empty());
    }
}
