//! Error types for pipeline definitions and command execution.

/// Errors raised while constructing a [`PipelineDefinition`].
///
/// These are the only errors that stop a run from starting.
///
/// [`PipelineDefinition`]: crate::definition::PipelineDefinition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("pipeline has no jobs")]
    EmptyPipeline,

    #[error("duplicate job name: {name}")]
    DuplicateJobName { name: String },

    #[error("job name must not be empty")]
    EmptyJobName,

    #[error("job '{job}' has an empty command")]
    EmptyCommand { job: String },

    #[error("pipeline trigger lists no events")]
    NoTriggerEvents,
}

/// A job command could not be started.
///
/// A command that starts and exits non-zero is not an error; it is a failed
/// job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// `exit_code` and `log` carry whatever the shell produced before giving
    /// up (`sh` exits 126/127 for commands it cannot run).
    #[error("failed to launch '{command}': {reason}")]
    Launch {
        command: String,
        reason: String,
        exit_code: Option<i32>,
        log: Vec<u8>,
    },
}

impl ExecutionError {
    pub(crate) fn launch(command: &str, reason: impl Into<String>) -> Self {
        ExecutionError::Launch {
            command: command.to_string(),
            reason: reason.into(),
            exit_code: None,
            log: Vec::new(),
        }
    }
}
