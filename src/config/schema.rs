use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "agent": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "binary": { "type": "string", "minLength": 1 },
                    "config_dir": { "type": "string" },
                    "kill_grace_secs": { "type": "integer", "minimum": 0 },
                    "run_timeout_secs": { "type": "integer", "minimum": 1 },
                    "stderr_cap": { "type": "integer", "minimum": 0 }
                }
            },
            "scheduler": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "max_parallel": { "type": "integer", "minimum": 1 },
                    "poll_interval_ms": { "type": "integer", "minimum": 1 }
                }
            },
            "database": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "path": { "type": "string" }
                }
            },
            "helpers": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "git_binary": { "type": "string" },
                    "git_timeout_secs": { "type": "integer", "minimum": 1 },
                    "gh_binary": { "type": "string" },
                    "gh_timeout_secs": { "type": "integer", "minimum": 1 }
                }
            }
        }
    })
});
