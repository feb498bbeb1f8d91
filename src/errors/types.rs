use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("GitHub error: {message}")]
    GitHub { message: String, exit_code: i32 },

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for ConductorError {
    fn from(e: rusqlite::Error) -> Self {
        ConductorError::Database(e.to_string())
    }
}
