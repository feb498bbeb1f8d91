use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One step as produced by the planner or written in a plan file.
/// Dependencies are 0-based indices into the plan's step list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    #[serde(default = "default_step_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default, deserialize_with = "lenient_indices")]
    pub depends_on: Vec<usize>,
}

fn default_step_name() -> String {
    "Unnamed step".to_string()
}

/// Planner output is model-generated: keep the integer entries, drop the rest.
fn lenient_indices<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let indices = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|n| usize::try_from(n).ok())
            .collect(),
        _ => Vec::new(),
    };
    Ok(indices)
}

/// A plan file: the input of `pipeline create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub name: String,
    #[serde(default)]
    pub spec: Option<String>,
    pub steps: Vec<PlannedStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_step_with_nulls() {
        let step: PlannedStep = serde_json::from_str(
            r#"{"name":"Write tests","agent":null,"depends_on":[0,"x",2]}"#,
        )
        .unwrap();
        assert_eq!(step.name, "Write tests");
        assert!(step.agent.is_none());
        assert_eq!(step.depends_on, vec![0, 2]);
    }

    #[test]
    fn test_missing_fields_default() {
        let step: PlannedStep = serde_json::from_str("{}").unwrap();
        assert_eq!(step.name, "Unnamed step");
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn test_plan_file_yaml() {
        let plan: PipelinePlan = serde_yaml::from_str(
            "name: release\nsteps:\n  - name: build\n  - name: test\n    depends_on: [0]\n",
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec![0]);
    }
}
