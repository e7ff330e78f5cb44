//! Agent lifecycle: connect, subscribe, beacon, shut down
//!
//! `AgentLifecycle` wires the transport, the task dispatcher, and the shared
//! runtime state together. After `start`, inbound tasks flow through an mpsc
//! channel to a worker task that dwells, dispatches, and publishes results,
//! while `run` drives the beacon loop on the caller's context until the
//! running flag clears or the session is lost for good.

use crate::config::AgentConfig;
use crate::protocol::TaskMessage;
use crate::state::RuntimeState;
use crate::tasks::TaskDispatcher;
use crate::transport::mqtt::ConnectionState;
use crate::transport::Transport;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Depth of the inbound task queue between the transport and the worker.
const TASK_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error")]
    Configuration(#[from] crate::config::ConfigError),
    #[error("Transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection permanently lost: {0}")]
    ConnectionLost(String),
    #[error("Lifecycle called out of order: {0}")]
    OutOfOrder(&'static str),
}

/// Lifecycle driver, generic over the transport so the whole sequence can be
/// exercised against a mock.
pub struct AgentLifecycle<T>
where
    T: Transport + 'static,
{
    config: AgentConfig,
    state: Arc<RuntimeState>,
    transport: Option<T>,
    shared_transport: Option<Arc<T>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl<T> AgentLifecycle<T>
where
    T: Transport + 'static,
{
    pub fn new(config: AgentConfig, transport: T) -> Self {
        let state = Arc::new(RuntimeState::new(config.tasking.dwell_secs));
        Self {
            config,
            state,
            transport: Some(transport),
            shared_transport: None,
            worker_handle: None,
        }
    }

    /// Shared runtime state (dwell interval, running flag).
    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    pub fn client_id(&self) -> &str {
        &self.config.agent.client_id
    }

    /// Shared transport handle, available after [`start`](Self::start).
    pub fn transport(&self) -> Option<&Arc<T>> {
        self.shared_transport.as_ref()
    }

    /// Establish the broker session. Fatal on failure; there is nothing the
    /// agent can do without a session.
    pub async fn initialize(&mut self) -> Result<(), LifecycleError> {
        info!(client_id = %self.client_id(), "Initializing agent");

        let transport = self
            .transport
            .as_mut()
            .ok_or(LifecycleError::OutOfOrder("initialize after start"))?;
        transport
            .connect()
            .await
            .map_err(|e| LifecycleError::Transport(Box::new(e)))?;

        info!("Transport connected");
        Ok(())
    }

    /// Subscribe to tasking and start the dispatch worker.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let transport = self
            .transport
            .take()
            .ok_or(LifecycleError::OutOfOrder("start called twice"))?;
        let transport = Arc::new(transport);

        transport
            .subscribe_to_tasking()
            .await
            .map_err(|e| LifecycleError::Transport(Box::new(e)))?;

        let (task_sender, task_receiver) = mpsc::channel(TASK_QUEUE_DEPTH);
        transport.set_task_sender(task_sender);

        let dispatcher = TaskDispatcher::from_config(&self.config.tasking, self.state.clone());
        info!(tasks = ?dispatcher.task_names(), "Task dispatcher ready");

        self.worker_handle = Some(Self::spawn_task_worker(
            transport.clone(),
            dispatcher,
            task_receiver,
            self.state.clone(),
        ));
        self.shared_transport = Some(transport);

        info!("Agent started");
        Ok(())
    }

    /// Worker consuming the inbound task queue. Each task waits out the
    /// current dwell interval before dispatch, then its result is published.
    fn spawn_task_worker(
        transport: Arc<T>,
        dispatcher: TaskDispatcher,
        mut task_receiver: mpsc::Receiver<TaskMessage>,
        state: Arc<RuntimeState>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = task_receiver.recv().await {
                tokio::time::sleep(state.dwell()).await;

                let result = dispatcher.dispatch(&message.task, &message.arguments).await;
                if let Err(e) = transport.publish_result(&result).await {
                    error!(task = %message.task, error = %e, "Failed to publish task result");
                }
            }
            debug!("Task queue closed, worker stopping");
        })
    }

    /// Beacon loop: publish a heartbeat, sleep the current dwell interval,
    /// repeat until the running flag clears. A permanently disconnected
    /// session ends the loop with an error instead.
    pub async fn run(&self) -> Result<(), LifecycleError> {
        let transport = self
            .shared_transport
            .as_ref()
            .ok_or(LifecycleError::OutOfOrder("run before start"))?;

        info!(client_id = %self.client_id(), "Beacon loop started");
        while self.state.is_running() {
            if transport.is_permanently_disconnected() {
                let reason = match transport.connection_state() {
                    ConnectionState::PermanentlyDisconnected(reason) => reason,
                    other => format!("{other:?}"),
                };
                error!(%reason, "Session unrecoverable, stopping beacon loop");
                return Err(LifecycleError::ConnectionLost(reason));
            }

            if let Err(e) = transport.publish_heartbeat().await {
                // Transient: the supervisor may still recover the session.
                warn!(error = %e, "Heartbeat publish failed");
            }

            tokio::time::sleep(self.state.dwell()).await;
        }

        info!("Running flag cleared, beacon loop stopped");
        Ok(())
    }

    /// Stop the worker and close the session.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!(client_id = %self.client_id(), "Shutting down agent");

        if let Some(handle) = self.worker_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Task worker ended with error");
                }
            }
        }

        if let Some(transport) = &self.shared_transport {
            transport
                .disconnect()
                .await
                .map_err(|e| LifecycleError::Transport(Box::new(e)))?;
        }

        info!("Agent shutdown complete");
        Ok(())
    }
}
