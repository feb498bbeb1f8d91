use std::collections::{HashMap, HashSet};
use crate::errors::ConductorError;
use crate::models::PipelineStep;

/// Check that every dependency names a step of the same pipeline and that
/// the dependency graph has no cycle.
pub fn validate_step_graph(steps: &[PipelineStep]) -> Result<(), ConductorError> {
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(steps.len());
    for step in steps {
        let mut edges = Vec::with_capacity(step.depends_on.len());
        for dep in &step.depends_on {
            match id_to_idx.get(dep.as_str()) {
                Some(&idx) => edges.push(idx),
                None => {
                    return Err(ConductorError::InvalidPipeline(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name, dep
                    )))
                }
            }
        }
        deps.push(edges);
    }

    fn dfs(
        node: usize,
        deps: &[Vec<usize>],
        visited: &mut HashSet<usize>,
        in_stack: &mut HashSet<usize>,
        steps: &[PipelineStep],
    ) -> Result<(), ConductorError> {
        if in_stack.contains(&node) {
            return Err(ConductorError::InvalidPipeline(format!(
                "circular dependency involving step '{}'",
                steps[node].name
            )));
        }
        if visited.contains(&node) {
            return Ok(());
        }

        in_stack.insert(node);
        for &dep in &deps[node] {
            dfs(dep, deps, visited, in_stack, steps)?;
        }
        in_stack.remove(&node);
        visited.insert(node);
        Ok(())
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    for i in 0..steps.len() {
        dfs(i, &deps, &mut visited, &mut in_stack, steps)?;
    }
    Ok(())
}
