//! Command submission and the command status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::ExecutionApi;
use crate::context::ExecutionContext;
use crate::error::{ExecError, ExecResult};
use crate::output::ExecOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Queued,
    Running,
    Finished,
    Error,
    Cancelled,
}

impl CommandStatus {
    /// `None` for strings outside the protocol vocabulary.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Queued" => Some(CommandStatus::Queued),
            "Running" => Some(CommandStatus::Running),
            "Finished" => Some(CommandStatus::Finished),
            "Error" => Some(CommandStatus::Error),
            "Cancelled" => Some(CommandStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Finished | CommandStatus::Error | CommandStatus::Cancelled)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    pub id: String,
    pub context_id: String,
    pub cluster_id: String,
    pub code: String,
    pub status: CommandStatus,
    pub submitted_at: DateTime<Utc>,
    pub result: Option<ExecOutput>,
}

pub struct Dispatcher<'a> {
    api: &'a dyn ExecutionApi,
}

impl<'a> Dispatcher<'a> {
    pub fn new(api: &'a dyn ExecutionApi) -> Self {
        Self { api }
    }

    pub async fn submit(&self, ctx: &ExecutionContext, code: &str) -> ExecResult<Command> {
        if code.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        debug!(context_id = %ctx.id, chars = code.len(), "submitting command");
        let id = self
            .api
            .execute(&ctx.cluster_id, &ctx.id, ctx.language, code)
            .await
            .map_err(|e| ExecError::SubmissionFailed(Box::new(e)))?;
        debug!(command_id = %id, "command submitted");

        Ok(Command {
            id,
            context_id: ctx.id.clone(),
            cluster_id: ctx.cluster_id.clone(),
            code: code.to_string(),
            status: CommandStatus::Queued,
            submitted_at: Utc::now(),
            result: None,
        })
    }
}
