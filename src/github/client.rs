use std::time::Duration;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ConductorError;
use crate::utils::{run_helper, truncate_chars};

/// Thin wrapper over `gh api`.
#[derive(Debug, Clone)]
pub struct GhClient {
    binary: String,
    timeout: Duration,
}

impl Default for GhClient {
    fn default() -> Self {
        Self::new("gh", Duration::from_secs(15))
    }
}

impl GhClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Call `gh api <path> --method <method>`, sending `body` as JSON on
    /// stdin. Empty output is `{}`.
    pub async fn api(&self, path: &str, method: &str, body: Option<&Value>) -> Result<Value, ConductorError> {
        let mut args = vec!["api", path, "--method", method];
        let payload = match body {
            Some(b) => {
                args.extend(["--input", "-"]);
                Some(serde_json::to_vec(b)?)
            }
            None => None,
        };

        debug!(method, path, "gh api");
        let output = run_helper(&self.binary, &args, None, payload.as_deref(), self.timeout)
            .await
            .map_err(|e| match e {
                ConductorError::Timeout(_) => ConductorError::GitHub {
                    message: format!("gh api timeout after {}s: {} {}", self.timeout.as_secs(), method, path),
                    exit_code: 1,
                },
                other => ConductorError::GitHub {
                    message: other.to_string(),
                    exit_code: 1,
                },
            })?;

        if !output.success() {
            warn!(method, path, stderr = %truncate_chars(&output.stderr, 200), "gh api failed");
            return Err(ConductorError::GitHub {
                message: format!("gh api error: {}", output.stderr),
                exit_code: output.exit_code.filter(|c| *c != 0).unwrap_or(1),
            });
        }

        if output.stdout.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&output.stdout).map_err(|e| ConductorError::GitHub {
            message: format!("gh api returned invalid JSON: {}", e),
            exit_code: 1,
        })
    }

    /// Open and closed issues of one milestone, as `{number, title, body}` objects.
    pub async fn milestone_issues(&self, owner: &str, repo: &str, milestone: u64) -> Result<Vec<Value>, ConductorError> {
        let path = format!("repos/{}/{}/issues?milestone={}&state=all&per_page=100", owner, repo, milestone);
        let issues = self.api(&path, "GET", None).await?;
        let list = match issues {
            Value::Array(items) => items,
            other => {
                return Err(ConductorError::GitHub {
                    message: format!("expected an issue list, got {}", truncate_chars(&other.to_string(), 100)),
                    exit_code: 1,
                })
            }
        };
        Ok(list
            .into_iter()
            .filter(|issue| issue.get("pull_request").is_none())
            .collect())
    }
}
