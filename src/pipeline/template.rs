use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;
use regex::{Captures, Regex};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("static regex"))
}

/// Substitute `{{key}}` placeholders in one pass. Substituted values are not
/// scanned again and unknown keys stay as written.
pub fn resolve_template<'a>(template: &'a str, context: &HashMap<String, String>) -> Cow<'a, str> {
    placeholder_re().replace_all(template, |caps: &Captures| match context.get(&caps[1]) {
        Some(value) => value.clone(),
        None => caps[0].to_string(),
    })
}

/// Placeholder keys left in `text`.
pub fn unresolved_keys(text: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_resolves_known_keys() {
        let context = ctx(&[("spec", "Build a CLI"), ("prev_output", "done")]);
        assert_eq!(
            resolve_template("Spec: {{spec}}\nPrevious: {{prev_output}}", &context),
            "Spec: Build a CLI\nPrevious: done"
        );
    }

    #[test]
    fn test_step_output_keys_with_dots() {
        let context = ctx(&[("step.abc.output", "result A")]);
        assert_eq!(resolve_template("Use {{step.abc.output}}", &context), "Use result A");
    }

    #[test]
    fn test_unknown_placeholders_left_intact() {
        let context = ctx(&[("spec", "x")]);
        let resolved = resolve_template("{{spec}} and {{issue_body}}", &context);
        assert_eq!(resolved, "x and {{issue_body}}");
        assert_eq!(unresolved_keys(&resolved), vec!["issue_body".to_string()]);
    }

    #[test]
    fn test_substitution_is_not_recursive() {
        let context = ctx(&[("spec", "{{prev_output}}"), ("prev_output", "SHOULD NOT APPEAR")]);
        assert_eq!(resolve_template("{{spec}}", &context), "{{prev_output}}");
    }

    #[test]
    fn test_template_without_placeholders() {
        assert_eq!(resolve_template("plain", &HashMap::new()), "plain");
    }
}
