use serde::Serialize;
use crate::models::PlannedStep;

/// Keyword to agent table, checked in order; the first keyword found in the
/// step text wins.
pub const AGENT_ROUTING: &[(&str, &str)] = &[
    ("implement", "backend-dev"),
    ("code", "backend-dev"),
    ("build", "backend-dev"),
    ("feature", "backend-dev"),
    ("test", "qa-engineer"),
    ("tests", "qa-engineer"),
    ("testing", "qa-engineer"),
    ("review", "code-reviewer"),
    ("refactor", "code-reviewer"),
    ("docs", "doc-expert"),
    ("document", "doc-expert"),
    ("readme", "doc-expert"),
    ("security", "compliance-officer"),
    ("auth", "compliance-officer"),
    ("architecture", "dev-architect"),
    ("design", "dev-architect"),
    ("database", "data-architect"),
    ("schema", "data-architect"),
    ("migration", "data-architect"),
    ("deploy", "devops"),
    ("ci", "devops"),
    ("docker", "devops"),
    ("ml", "ai-developer"),
    ("model", "ai-developer"),
    ("performance", "performance-analyst"),
    ("optimize", "performance-analyst"),
];

/// Suggest an agent from keywords in the step name and description.
pub fn suggest_agent(name: &str, description: Option<&str>) -> Option<&'static str> {
    let mut text = name.to_lowercase();
    if let Some(desc) = description {
        text.push(' ');
        text.push_str(&desc.to_lowercase());
    }
    AGENT_ROUTING
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, agent)| *agent)
}

/// Fill the agent of every step that has none, when a keyword matches.
pub fn enrich_steps_with_routing(steps: &mut [PlannedStep]) {
    for step in steps.iter_mut() {
        if step.agent.as_deref().map_or(true, str::is_empty) {
            if let Some(agent) = suggest_agent(&step.name, step.description.as_deref()) {
                step.agent = Some(agent.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Routable agents with their keywords, in first-appearance order.
pub fn available_agents() -> Vec<AgentInfo> {
    let mut agents: Vec<AgentInfo> = Vec::new();
    for (keyword, agent) in AGENT_ROUTING {
        match agents.iter_mut().find(|a| a.name == *agent) {
            Some(info) => info.keywords.push(keyword.to_string()),
            None => agents.push(AgentInfo {
                name: agent.to_string(),
                keywords: vec![keyword.to_string()],
            }),
        }
    }
    agents
}
