#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use conductor::db::Database;
use conductor::models::Workspace;
use conductor::runner::{AgentLauncher, ProcessLauncher, RunnerSettings};

/// Write an executable shell script standing in for the agent binary.
#[cfg(unix)]
pub fn fake_agent(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn launcher_for(script: &Path) -> Arc<dyn AgentLauncher> {
    Arc::new(ProcessLauncher::new(RunnerSettings {
        binary: script.to_string_lossy().into_owned(),
        kill_grace: Duration::from_secs(1),
        ..RunnerSettings::default()
    }))
}

pub fn workspace(db: &Database, dir: &Path) -> Workspace {
    let cfg = dir.join("cfg");
    db.upsert_workspace("test", &dir.to_string_lossy(), &cfg.to_string_lossy())
        .unwrap()
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

/// Initialise a repository with one committed file, `notes.txt`.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("notes.txt"), "first line\n").unwrap();
    git(dir, &["add", "notes.txt"]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}
