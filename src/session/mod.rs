//! One submit-then-wait cycle against a context, with an ordered history.

use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::api::ExecutionApi;
use crate::command::{CommandStatus, Dispatcher};
use crate::context::ExecutionContext;
use crate::error::ExecResult;
use crate::interrupt::Interrupts;
use crate::output::ExecOutput;
use crate::poller::{PollOptions, Poller};

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub command_id: String,
    pub code: String,
    pub status: CommandStatus,
    /// Finished with an error result.
    pub failed: bool,
    pub elapsed: Duration,
}

pub struct Session<'a> {
    dispatcher: Dispatcher<'a>,
    poller: Poller<'a>,
    interrupts: Interrupts,
    history: Vec<HistoryEntry>,
}

impl<'a> Session<'a> {
    pub fn new(api: &'a dyn ExecutionApi, poll: PollOptions, interrupts: Interrupts) -> Self {
        Self {
            dispatcher: Dispatcher::new(api),
            poller: Poller::new(api, poll),
            interrupts,
            history: Vec::new(),
        }
    }

    /// Submits `code` and waits for it to finish. Takes `&mut self`, so a
    /// second fragment can never be submitted while one is in flight.
    pub async fn execute(&mut self, ctx: &ExecutionContext, code: &str) -> ExecResult<ExecOutput> {
        let mut signal = self.interrupts.signal();
        let mut cmd = self.dispatcher.submit(ctx, code).await?;
        let res = self.poller.wait(&mut cmd, &mut signal).await;

        let elapsed = (Utc::now() - cmd.submitted_at).to_std().unwrap_or_default();
        debug!(command_id = %cmd.id, status = %cmd.status, ?elapsed, "fragment done");
        self.history.push(HistoryEntry {
            command_id: cmd.id,
            code: cmd.code,
            status: cmd.status,
            failed: cmd.result.as_ref().map(ExecOutput::is_error).unwrap_or(false),
            elapsed,
        });
        res
    }

    /// A termination signal arrived; no further fragment should run.
    pub fn terminating(&self) -> bool {
        self.interrupts.is_terminating()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}
