//! Remote operations of the execution service, behind one async trait.
//!
//! `HttpApi` speaks the REST contract; tests substitute an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::Language;
use crate::error::{ExecError, ExecResult};
use crate::transport::Transport;

/// Raw answer of a status poll, before result normalisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub results: Option<Value>,
}

#[async_trait]
pub trait ExecutionApi: Send + Sync {
    /// Raw cluster state string, e.g. `RUNNING`.
    async fn cluster_state(&self, cluster_id: &str) -> ExecResult<String>;
    async fn start_cluster(&self, cluster_id: &str) -> ExecResult<()>;
    async fn create_context(&self, cluster_id: &str, language: Language) -> ExecResult<String>;
    async fn destroy_context(&self, cluster_id: &str, context_id: &str) -> ExecResult<()>;
    async fn execute(
        &self,
        cluster_id: &str,
        context_id: &str,
        language: Language,
        code: &str,
    ) -> ExecResult<String>;
    async fn command_status(
        &self,
        cluster_id: &str,
        context_id: &str,
        command_id: &str,
    ) -> ExecResult<StatusPayload>;
    async fn cancel_command(&self, cluster_id: &str, context_id: &str, command_id: &str) -> ExecResult<()>;
}

pub struct HttpApi {
    transport: Transport,
}

impl HttpApi {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

fn require_id(v: &Value, what: &str) -> ExecResult<String> {
    v.get("id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExecError::Protocol(format!("{} response has no id: {}", what, v)))
}

/// The service answers a destroy of an unknown context with 404, or with 400
/// and an error body naming the context. Both mean nothing is left to remove.
fn context_already_gone(err: &ExecError) -> bool {
    match err {
        ExecError::NotFound(_) => true,
        ExecError::BadRequest(body) => {
            let lower = body.to_ascii_lowercase();
            lower.contains("context") && (lower.contains("not found") || lower.contains("does not exist"))
        }
        _ => false,
    }
}

#[async_trait]
impl ExecutionApi for HttpApi {
    async fn cluster_state(&self, cluster_id: &str) -> ExecResult<String> {
        let v = self
            .transport
            .get("/api/2.0/clusters/get", &[("cluster_id", cluster_id)])
            .await?;
        Ok(v.get("state")
            .and_then(|s| s.as_str())
            .unwrap_or("UNKNOWN")
            .to_string())
    }

    async fn start_cluster(&self, cluster_id: &str) -> ExecResult<()> {
        self.transport
            .post("/api/2.0/clusters/start", &json!({ "cluster_id": cluster_id }))
            .await?;
        Ok(())
    }

    async fn create_context(&self, cluster_id: &str, language: Language) -> ExecResult<String> {
        let v = self
            .transport
            .post(
                "/api/1.2/contexts/create",
                &json!({ "language": language.as_str(), "clusterId": cluster_id }),
            )
            .await
            .map_err(|e| ExecError::ContextCreationFailed(e.to_string()))?;
        require_id(&v, "context create").map_err(|e| ExecError::ContextCreationFailed(e.to_string()))
    }

    async fn destroy_context(&self, cluster_id: &str, context_id: &str) -> ExecResult<()> {
        match self
            .transport
            .post(
                "/api/1.2/contexts/destroy",
                &json!({ "contextId": context_id, "clusterId": cluster_id }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if context_already_gone(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn execute(
        &self,
        cluster_id: &str,
        context_id: &str,
        language: Language,
        code: &str,
    ) -> ExecResult<String> {
        let v = self
            .transport
            .post(
                "/api/1.2/commands/execute",
                &json!({
                    "language": language.as_str(),
                    "contextId": context_id,
                    "clusterId": cluster_id,
                    "command": code,
                }),
            )
            .await?;
        require_id(&v, "command execute")
    }

    async fn command_status(
        &self,
        cluster_id: &str,
        context_id: &str,
        command_id: &str,
    ) -> ExecResult<StatusPayload> {
        let v = self
            .transport
            .get(
                "/api/1.2/commands/status",
                &[
                    ("clusterId", cluster_id),
                    ("contextId", context_id),
                    ("commandId", command_id),
                ],
            )
            .await?;
        serde_json::from_value(v).map_err(|e| ExecError::Protocol(format!("malformed status payload: {}", e)))
    }

    async fn cancel_command(&self, cluster_id: &str, context_id: &str, command_id: &str) -> ExecResult<()> {
        self.transport
            .post(
                "/api/1.2/commands/cancel",
                &json!({ "clusterId": cluster_id, "contextId": context_id, "commandId": command_id }),
            )
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::transport::RetryPolicy;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn api(server: &MockServer) -> HttpApi {
        let profile = Profile {
            host: server.base_url(),
            token: "t".into(),
            cluster_id: "c-1".into(),
            language: Language::Python,
        };
        let retry = RetryPolicy { max_retries: 0, ..Default::default() };
        HttpApi::new(Transport::new(&profile, Duration::from_secs(5), retry).unwrap())
    }

    #[tokio::test]
    async fn create_context_sends_language_and_cluster() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/1.2/contexts/create")
                    .json_body(json!({"language": "sql", "clusterId": "c-1"}));
                then.status(200).json_body(json!({"id": "ctx-9"}));
            })
            .await;

        let id = api(&server).create_context("c-1", Language::Sql).await.unwrap();
        assert_eq!(id, "ctx-9");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn create_context_failure_keeps_remote_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/1.2/contexts/create");
                then.status(400).body("Too many execution contexts are open right now");
            })
            .await;

        let err = api(&server).create_context("c-1", Language::Python).await.unwrap_err();
        assert!(matches!(err, ExecError::ContextCreationFailed(ref m) if m.contains("Too many execution contexts")));
    }

    #[tokio::test]
    async fn destroy_of_missing_context_is_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/1.2/contexts/destroy");
                then.status(404).body("{\"error\":\"ContextNotFound\"}");
            })
            .await;

        api(&server).destroy_context("c-1", "ctx-gone").await.unwrap();
    }

    #[tokio::test]
    async fn status_query_uses_camel_case_parameters() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/1.2/commands/status")
                    .query_param("clusterId", "c-1")
                    .query_param("contextId", "ctx-1")
                    .query_param("commandId", "cmd-1");
                then.status(200).json_body(json!({
                    "id": "cmd-1",
                    "status": "Finished",
                    "results": {"resultType": "text", "data": "2"}
                }));
            })
            .await;

        let payload = api(&server).command_status("c-1", "ctx-1", "cmd-1").await.unwrap();
        assert_eq!(payload.status, "Finished");
        assert_eq!(payload.results.unwrap()["data"], "2");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn missing_cluster_state_reads_as_unknown() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/2.0/clusters/get").query_param("cluster_id", "c-1");
                then.status(200).json_body(json!({"cluster_id": "c-1"}));
            })
            .await;

        assert_eq!(api(&server).cluster_state("c-1").await.unwrap(), "UNKNOWN");
    }
}
