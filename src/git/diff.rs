use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use regex::Regex;
use tracing::debug;

use crate::errors::ConductorError;
use crate::models::DiffCapture;
use crate::utils::{run_helper, truncate_chars};

/// Cap on concatenated diff content, in characters.
pub const MAX_DIFF_CHARS: usize = 50_000;

/// Runs git commands in one workspace with a fixed per-call timeout.
#[derive(Debug, Clone)]
pub struct GitHelper {
    binary: String,
    timeout: Duration,
}

impl Default for GitHelper {
    fn default() -> Self {
        Self::new("git", Duration::from_secs(10))
    }
}

impl GitHelper {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Trimmed stdout of `git <args>`; a non-zero exit is a `Git` error.
    pub async fn run(&self, workspace: &Path, args: &[&str]) -> Result<String, ConductorError> {
        let output = run_helper(&self.binary, args, Some(workspace), None, self.timeout).await?;
        if !output.success() {
            return Err(ConductorError::Git(format!(
                "git {} exited with {:?}: {}",
                args.join(" "),
                output.exit_code,
                output.stderr
            )));
        }
        Ok(output.stdout)
    }

    /// Same as `run`, but any failure or empty output is "no data".
    async fn try_run(&self, workspace: &Path, args: &[&str]) -> Option<String> {
        match self.run(workspace, args).await {
            Ok(out) if !out.is_empty() => Some(out),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, workspace = %workspace.display(), "git helper returned no data");
                None
            }
        }
    }

    pub async fn capture_head_ref(&self, workspace: &Path) -> Option<String> {
        self.try_run(workspace, &["rev-parse", "HEAD"]).await
    }

    /// Measure what a run changed: commits made since `head_before` (when
    /// known) plus any uncommitted working-tree changes.
    pub async fn compute_session_diff(&self, workspace: &Path, head_before: Option<&str>) -> DiffCapture {
        let mut capture = DiffCapture::default();
        let mut parts: Vec<String> = Vec::new();

        if let Some(before) = head_before {
            let after = self.capture_head_ref(workspace).await;
            if let Some(after) = after.filter(|a| a != before) {
                let range = format!("{}..{}", before, after);

                if let Some(log) = self.try_run(workspace, &["log", "--oneline", &range]).await {
                    parts.push(format!("# Commits\n{}\n", log));
                }
                if let Some(stat) = self.try_run(workspace, &["diff", "--stat", &range]).await {
                    apply_stat(&mut capture, stat);
                }
                if let Some(diff) = self.try_run(workspace, &["diff", &range]).await {
                    parts.push(diff);
                }
            }
        }

        if let Some(wt_stat) = self.try_run(workspace, &["diff", "--stat"]).await {
            if capture.diff_stat.is_none() {
                apply_stat(&mut capture, wt_stat);
            }
            if let Some(wt_diff) = self.try_run(workspace, &["diff"]).await {
                parts.push(format!("\n# Uncommitted changes\n{}", wt_diff));
            }
        }

        if !parts.is_empty() {
            let full = parts.join("\n");
            capture.diff_content = Some(truncate_chars(&full, MAX_DIFF_CHARS).to_string());
        }
        capture
    }
}

fn apply_stat(capture: &mut DiffCapture, stat: String) {
    let (files, insertions, deletions) = parse_diff_stat(&stat);
    capture.files_changed = files;
    capture.insertions = insertions;
    capture.deletions = deletions;
    capture.diff_stat = Some(stat);
}

fn stat_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(\d+)\s+files?\s+changed").expect("static regex"),
            Regex::new(r"(\d+)\s+insertions?\(\+\)").expect("static regex"),
            Regex::new(r"(\d+)\s+deletions?\(-\)").expect("static regex"),
        ]
    })
}

/// Parse the summary line of `git diff --stat` (its last line) into
/// `(files_changed, insertions, deletions)`. Missing clauses count as zero.
pub fn parse_diff_stat(stat_output: &str) -> (u32, u32, u32) {
    let last_line = stat_output.trim().lines().last().unwrap_or("");
    let [files, ins, dels] = stat_patterns();
    let count = |re: &Regex| {
        re.captures(last_line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };
    (count(files), count(ins), count(dels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_summary() {
        assert_eq!(parse_diff_stat("3 files changed, 42 insertions(+), 5 deletions(-)"), (3, 42, 5));
    }

    #[test]
    fn test_parse_partial_summary() {
        assert_eq!(parse_diff_stat("1 file changed, 10 insertions(+)"), (1, 10, 0));
        assert_eq!(parse_diff_stat("2 files changed, 1 deletion(-)"), (2, 0, 1));
    }

    #[test]
    fn test_parse_uses_last_line() {
        let stat = " src/a.rs | 4 ++--\n src/b.rs | 1 +\n 2 files changed, 3 insertions(+), 2 deletions(-)\n";
        assert_eq!(parse_diff_stat(stat), (2, 3, 2));
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert_eq!(parse_diff_stat(""), (0, 0, 0));
        assert_eq!(parse_diff_stat("nothing to see"), (0, 0, 0));
    }

    #[test]
    fn test_parse_is_idempotent_on_summary_line() {
        let line = "7 files changed, 100 insertions(+), 30 deletions(-)";
        assert_eq!(parse_diff_stat(line), parse_diff_stat(&format!("header\n{}", line)));
    }
}
