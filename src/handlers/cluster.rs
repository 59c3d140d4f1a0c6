//! `--check-cluster`: report the cluster state.

use anyhow::Result;

use crate::cluster::{ClusterState, ReadinessGuard};
use crate::handlers::Runtime;

pub async fn run(rt: &Runtime) -> Result<i32> {
    let guard = ReadinessGuard::new(&rt.api, rt.poll.interval);
    let resource = guard.fetch(&rt.profile.cluster_id).await?;
    tracing::debug!(cluster_id = %resource.id, state = %resource.state, "cluster fetched");
    println!("Cluster state: {}", resource.state);
    Ok(if resource.state == ClusterState::Running { 0 } else { 1 })
}
