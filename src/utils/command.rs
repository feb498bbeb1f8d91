use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ConductorError;

/// Captured result of a short-lived helper command.
#[derive(Debug, Clone)]
pub struct HelperOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl HelperOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `binary args...` to completion within `timeout`, optionally feeding
/// `stdin`. The child is killed when the timeout elapses.
pub async fn run_helper(
    binary: &str,
    args: &[&str],
    cwd: Option<&Path>,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<HelperOutput, ConductorError> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(binary, ?args, "Running helper command");
    let mut child = cmd
        .spawn()
        .map_err(|e| ConductorError::Process(format!("failed to spawn {}: {}", binary, e)))?;

    let pipe = child.stdin.take();
    let feed = async move {
        if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
            if let Err(e) = pipe.write_all(input).await {
                debug!(binary, error = %e, "Helper closed stdin before reading all input");
            }
        }
    };
    // Input and output are pumped together so the timeout covers both.
    let exchange = async {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| {
            ConductorError::Timeout(format!("{} {} timed out after {}s", binary, args.join(" "), timeout.as_secs()))
        })??;

    Ok(HelperOutput {
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        exit_code: output.status.code(),
    })
}
