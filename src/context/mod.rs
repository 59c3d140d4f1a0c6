//! Execution-context lifecycle: create, destroy, and scoped ownership.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::api::ExecutionApi;
use crate::error::{ExecError, ExecResult};
use crate::interrupt::{CancelSignal, Interrupts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Language {
    #[default]
    Python,
    Sql,
    Scala,
    R,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Sql => "sql",
            Language::Scala => "scala",
            Language::R => "r",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "sql" => Ok(Language::Sql),
            "scala" => Ok(Language::Scala),
            "r" => Ok(Language::R),
            other => Err(format!("unsupported language: {} (supported: python, sql, scala, r)", other)),
        }
    }
}

/// Handle to live interpreter state on the cluster. Opaque: only the id matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub id: String,
    pub cluster_id: String,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

pub struct ContextController<'a> {
    api: &'a dyn ExecutionApi,
    live: Mutex<HashSet<(String, Language)>>,
    interrupts: Option<Interrupts>,
}

impl<'a> ContextController<'a> {
    pub fn new(api: &'a dyn ExecutionApi) -> Self {
        Self { api, live: Mutex::new(HashSet::new()), interrupts: None }
    }

    /// Makes [`scoped`](Self::scoped) give up, after cleaning up, when an
    /// interrupt arrives while the context is being created.
    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = Some(interrupts);
        self
    }

    pub async fn create(&self, cluster_id: &str, language: Language) -> ExecResult<ExecutionContext> {
        let key = (cluster_id.to_string(), language);
        {
            let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
            if !live.insert(key.clone()) {
                return Err(ExecError::ContextCreationFailed(format!(
                    "a {} context on {} is already held by this session",
                    language, cluster_id
                )));
            }
        }

        debug!(cluster_id, %language, "creating execution context");
        match self.api.create_context(cluster_id, language).await {
            Ok(id) => {
                debug!(context_id = %id, "context created");
                Ok(ExecutionContext {
                    id,
                    cluster_id: cluster_id.to_string(),
                    language,
                    created_at: Utc::now(),
                })
            }
            Err(e) => {
                self.release_slot(cluster_id, language);
                Err(match e {
                    ExecError::ContextCreationFailed(_) => e,
                    other => ExecError::ContextCreationFailed(other.to_string()),
                })
            }
        }
    }

    /// Best effort and idempotent: a context the service no longer knows is
    /// already destroyed.
    pub async fn destroy(&self, ctx: &ExecutionContext) -> ExecResult<()> {
        let age = (Utc::now() - ctx.created_at).to_std().unwrap_or_default();
        debug!(context_id = %ctx.id, ?age, "destroying context");
        let res = self.api.destroy_context(&ctx.cluster_id, &ctx.id).await;
        self.release_slot(&ctx.cluster_id, ctx.language);
        res
    }

    fn release_slot(&self, cluster_id: &str, language: Language) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        live.remove(&(cluster_id.to_string(), language));
    }

    /// Creates a context, runs `body` with it, then destroys it whether `body`
    /// returned normally, returned an error, or panicked.
    pub async fn scoped<T, F, Fut>(&self, cluster_id: &str, language: Language, body: F) -> ExecResult<T>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = ExecResult<T>>,
    {
        let signal = self.interrupts.as_ref().map(Interrupts::signal);
        // The create call is never raced: dropping it mid-flight could leave
        // a context whose id we never learn.
        let ctx = self.create(cluster_id, language).await?;
        if signal.as_ref().is_some_and(CancelSignal::is_cancelled) {
            if let Err(e) = self.destroy(&ctx).await {
                warn!(context_id = %ctx.id, error = %e, "failed to destroy context");
            }
            return Err(ExecError::Interrupted("creating execution context".into()));
        }
        let outcome = AssertUnwindSafe(body(ctx.clone())).catch_unwind().await;

        if let Err(e) = self.destroy(&ctx).await {
            warn!(context_id = %ctx.id, error = %e, "failed to destroy context");
        }

        match outcome {
            Ok(res) => res,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{Call, FakeApi};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn language_parses_case_insensitively() {
        assert_eq!("SQL".parse::<Language>().unwrap(), Language::Sql);
        assert_eq!(" r ".parse::<Language>().unwrap(), Language::R);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[tokio::test]
    async fn second_context_for_same_pair_is_refused() {
        let api = FakeApi::new();
        let ctl = ContextController::new(&api);
        let first = ctl.create("c-1", Language::Python).await.unwrap();
        let err = ctl.create("c-1", Language::Python).await.unwrap_err();
        assert!(matches!(err, ExecError::ContextCreationFailed(_)));

        // other language is independent
        let sql = ctl.create("c-1", Language::Sql).await.unwrap();
        ctl.destroy(&first).await.unwrap();
        ctl.destroy(&sql).await.unwrap();
        ctl.create("c-1", Language::Python).await.unwrap();
        assert_eq!(api.count(|c| matches!(c, Call::Create(_))), 3);
    }

    #[tokio::test]
    async fn destroy_twice_is_harmless() {
        let api = FakeApi::new();
        let ctl = ContextController::new(&api);
        let ctx = ctl.create("c-1", Language::Python).await.unwrap();
        ctl.destroy(&ctx).await.unwrap();
        ctl.destroy(&ctx).await.unwrap();
        assert!(api.live_contexts().is_empty());
    }

    #[tokio::test]
    async fn scoped_destroys_after_error() {
        let api = FakeApi::new();
        let ctl = ContextController::new(&api);
        let res: ExecResult<()> = ctl
            .scoped("c-1", Language::Python, |_ctx| async { Err(ExecError::EmptyCommand) })
            .await;
        assert!(matches!(res, Err(ExecError::EmptyCommand)));
        assert_eq!(api.count(|c| matches!(c, Call::Destroy(_))), 1);
        assert!(api.live_contexts().is_empty());
    }

    #[tokio::test]
    async fn interrupt_during_create_tears_down_before_running() {
        let api = FakeApi::new();
        let ints = Interrupts::new();
        api.interrupt_on_create(ints.clone());
        let ctl = ContextController::new(&api).with_interrupts(ints);

        let ran = &AtomicBool::new(false);
        let res = ctl
            .scoped("c-1", Language::Python, |_ctx| async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ExecError::Interrupted(_))));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(api.count(|c| matches!(c, Call::Destroy(_))), 1);
        assert!(api.live_contexts().is_empty());
    }

    #[tokio::test]
    async fn scoped_destroys_after_panic() {
        let api = FakeApi::new();
        let ctl = ContextController::new(&api);
        let caught = AssertUnwindSafe(ctl.scoped("c-1", Language::Scala, |_ctx| async {
            if true {
                panic!("boom");
            }
            Ok(())
        }))
        .catch_unwind()
        .await;
        assert!(caught.is_err());
        assert_eq!(api.count(|c| matches!(c, Call::Destroy(_))), 1);
        assert!(api.live_contexts().is_empty());
    }
}
