//! Task dispatch: maps inbound task names to handlers
//!
//! The dispatcher is total: unknown task names and handler failures are
//! reported through the [`TaskResult`] envelope with `success = false`, never
//! raised, so a failing task can never take down the tasking channel.

use crate::config::TaskingSection;
use crate::protocol::TaskResult;
use crate::state::RuntimeState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub mod builtin;

/// Result string for task names with no registered handler, preserved from
/// the deployed wire behavior.
pub const UNSUPPORTED_TASK_CONTENTS: &str =
    "Unable to parse task, check that task is supported.";

/// Errors surfaced by task handlers. All of these are converted into
/// `success:false` results at the dispatch boundary.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Command failed: {0}")]
    CommandFailed(String),
    #[error("Internal task error: {0}")]
    Internal(String),
}

/// A single task implementation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task name as it appears in the inbound `task` field.
    fn name(&self) -> &'static str;

    /// Execute with the raw argument string; the returned string becomes
    /// `TaskResult::contents`.
    async fn execute(&self, arguments: &str) -> Result<String, TaskError>;
}

/// Registry of task handlers keyed by task name.
pub struct TaskDispatcher {
    handlers: HashMap<&'static str, Box<dyn TaskHandler>>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Build the dispatcher with the built-in handlers. The `exec` handler is
    /// registered only when the configuration explicitly enables it.
    pub fn from_config(config: &TaskingSection, state: Arc<RuntimeState>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Box::new(builtin::PingTask));
        dispatcher.register(Box::new(builtin::HostReconTask));
        dispatcher.register(Box::new(builtin::SetDwellTimeTask::new(state.clone())));
        dispatcher.register(Box::new(builtin::ExitTask::new(state)));

        if config.allow_exec {
            warn!("Shell execution task enabled by configuration");
            dispatcher.register(Box::new(builtin::ExecTask));
        }

        dispatcher
    }

    pub fn register(&mut self, handler: Box<dyn TaskHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Look up and invoke the handler for `task`, packaging the outcome.
    pub async fn dispatch(&self, task: &str, arguments: &str) -> TaskResult {
        let Some(handler) = self.handlers.get(task) else {
            warn!(task, "Received unsupported task");
            return TaskResult::failure(UNSUPPORTED_TASK_CONTENTS);
        };

        debug!(task, "Dispatching task");
        match handler.execute(arguments).await {
            Ok(contents) => TaskResult::ok(contents),
            Err(e) => {
                warn!(task, error = %e, "Task failed");
                TaskResult::failure(e.to_string())
            }
        }
    }
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTask;

    #[async_trait]
    impl TaskHandler for FailingTask {
        fn name(&self) -> &'static str {
            "always-fails"
        }

        async fn execute(&self, _arguments: &str) -> Result<String, TaskError> {
            Err(TaskError::Internal("deliberate failure".to_string()))
        }
    }

    fn dispatcher_with_exec(allow_exec: bool) -> TaskDispatcher {
        let config = TaskingSection {
            allow_exec,
            ..TaskingSection::default()
        };
        TaskDispatcher::from_config(&config, Arc::new(RuntimeState::default()))
    }

    #[tokio::test]
    async fn test_unknown_task_reports_instead_of_failing() {
        let dispatcher = dispatcher_with_exec(false);
        let result = dispatcher.dispatch("bogus-task", "").await;
        assert!(!result.success);
        assert_eq!(result.contents, UNSUPPORTED_TASK_CONTENTS);
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_result() {
        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(Box::new(FailingTask));

        let result = dispatcher.dispatch("always-fails", "").await;
        assert!(!result.success);
        assert!(result.contents.contains("deliberate failure"));
    }

    #[tokio::test]
    async fn test_exec_registered_only_when_enabled() {
        let gated = dispatcher_with_exec(false);
        assert!(!gated.task_names().contains(&"exec"));
        let result = gated.dispatch("exec", "echo hi").await;
        assert!(!result.success);
        assert_eq!(result.contents, UNSUPPORTED_TASK_CONTENTS);

        let open = dispatcher_with_exec(true);
        assert!(open.task_names().contains(&"exec"));
    }

    #[tokio::test]
    async fn test_builtin_registry() {
        let dispatcher = dispatcher_with_exec(false);
        assert_eq!(
            dispatcher.task_names(),
            vec!["exit", "host-recon", "ping", "set-dwell-time"]
        );
    }
}
