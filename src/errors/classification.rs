use super::types::ConductorError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub exit_code: i32,
}

impl ConductorError {
    /// Classify this error into a stable type label and the exit code the
    /// binary reports for it.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            ConductorError::Config(_) | ConductorError::Yaml(_) => ErrorClassification {
                error_type: "ConfigError",
                exit_code: 2,
            },
            ConductorError::NotFound(_) => ErrorClassification {
                error_type: "NotFoundError",
                exit_code: 3,
            },
            ConductorError::InvalidPipeline(_) => ErrorClassification {
                error_type: "InvalidPipelineError",
                exit_code: 4,
            },
            ConductorError::Planner(_) => ErrorClassification {
                error_type: "PlannerError",
                exit_code: 5,
            },
            ConductorError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                exit_code: 1,
            },
            ConductorError::Git(_) => ErrorClassification {
                error_type: "GitError",
                exit_code: 1,
            },
            ConductorError::GitHub { .. } => ErrorClassification {
                error_type: "GitHubError",
                exit_code: 1,
            },
            ConductorError::Process(_) => ErrorClassification {
                error_type: "ProcessError",
                exit_code: 1,
            },
            ConductorError::Database(_) => ErrorClassification {
                error_type: "DatabaseError",
                exit_code: 1,
            },
            ConductorError::Pipeline(_) => ErrorClassification {
                error_type: "PipelineError",
                exit_code: 1,
            },
            ConductorError::Io(_) => ErrorClassification {
                error_type: "IoError",
                exit_code: 1,
            },
            ConductorError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                exit_code: 1,
            },
            ConductorError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                exit_code: 1,
            },
        }
    }
}
