//! Compute-resource state and the readiness guard run before context creation.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::ExecutionApi;
use crate::error::{ExecError, ExecResult};
use crate::interrupt::CancelSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    Pending,
    Running,
    Restarting,
    Resizing,
    Terminating,
    Terminated,
    Error,
    Unknown(String),
}

impl ClusterState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => ClusterState::Pending,
            "RUNNING" => ClusterState::Running,
            "RESTARTING" => ClusterState::Restarting,
            "RESIZING" => ClusterState::Resizing,
            "TERMINATING" => ClusterState::Terminating,
            "TERMINATED" => ClusterState::Terminated,
            "ERROR" => ClusterState::Error,
            _ => ClusterState::Unknown(raw.to_string()),
        }
    }

    /// States that resolve on their own given time.
    pub fn is_transitional(&self) -> bool {
        matches!(self, ClusterState::Pending | ClusterState::Restarting | ClusterState::Resizing)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Pending => "PENDING",
            ClusterState::Running => "RUNNING",
            ClusterState::Restarting => "RESTARTING",
            ClusterState::Resizing => "RESIZING",
            ClusterState::Terminating => "TERMINATING",
            ClusterState::Terminated => "TERMINATED",
            ClusterState::Error => "ERROR",
            ClusterState::Unknown(raw) => raw.as_str(),
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeResource {
    pub id: String,
    pub state: ClusterState,
}

pub struct ReadinessGuard<'a> {
    api: &'a dyn ExecutionApi,
    poll_interval: Duration,
}

impl<'a> ReadinessGuard<'a> {
    pub fn new(api: &'a dyn ExecutionApi, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    pub async fn fetch(&self, cluster_id: &str) -> ExecResult<ComputeResource> {
        let raw = self.api.cluster_state(cluster_id).await?;
        Ok(ComputeResource { id: cluster_id.to_string(), state: ClusterState::parse(&raw) })
    }

    /// Returns once the resource is `RUNNING`. Transitional states are polled
    /// for at most `wait`; stopped or failed resources fail immediately. An
    /// interrupt ends the wait with [`ExecError::Interrupted`].
    pub async fn ensure_ready(
        &self,
        cluster_id: &str,
        wait: Duration,
        cancel: &mut CancelSignal,
    ) -> ExecResult<ComputeResource> {
        let started = Instant::now();
        loop {
            let resource = self.fetch(cluster_id).await?;
            match &resource.state {
                ClusterState::Running => return Ok(resource),
                s if s.is_transitional() => {
                    let waited = started.elapsed();
                    if waited + self.poll_interval > wait {
                        return Err(ExecError::ResourceNotReady {
                            cluster_id: cluster_id.to_string(),
                            state: s.to_string(),
                            waited,
                        });
                    }
                    debug!(cluster_id, state = %s, "waiting for cluster");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = cancel.cancelled() => {
                            return Err(ExecError::Interrupted(format!("waiting for cluster {}", cluster_id)));
                        }
                    }
                }
                ClusterState::Unknown(raw) => {
                    return Err(ExecError::Protocol(format!("unrecognised cluster state {:?}", raw)))
                }
                s => {
                    return Err(ExecError::ResourceUnavailable {
                        cluster_id: cluster_id.to_string(),
                        state: s.to_string(),
                    })
                }
            }
        }
    }

    /// Requests a start when the resource is stopped, then waits for readiness.
    pub async fn start_and_wait(
        &self,
        cluster_id: &str,
        wait: Duration,
        cancel: &mut CancelSignal,
    ) -> ExecResult<ComputeResource> {
        let resource = self.fetch(cluster_id).await?;
        if resource.state == ClusterState::Terminated {
            info!(cluster_id, "starting cluster");
            self.api.start_cluster(cluster_id).await?;
        }
        self.ensure_ready(cluster_id, wait, cancel).await
    }
}
