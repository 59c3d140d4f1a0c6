//! Waits for a submitted command to reach a terminal state.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::{ExecutionApi, StatusPayload};
use crate::command::{Command, CommandStatus};
use crate::error::{ExecError, ExecResult};
use crate::interrupt::CancelSignal;
use crate::output::ExecOutput;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Upper bound for the cancel request and for the confirmation poll after it.
const CANCEL_CONFIRM_BUDGET: Duration = Duration::from_secs(5);

/// Timeouts beyond this are treated as "no deadline".
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self { interval: DEFAULT_POLL_INTERVAL, timeout: DEFAULT_TIMEOUT }
    }
}

pub struct Poller<'a> {
    api: &'a dyn ExecutionApi,
    opts: PollOptions,
}

enum Wake {
    Tick,
    Deadline,
    Interrupted,
}

enum Polled {
    Status(ExecResult<StatusPayload>),
    Deadline,
    Interrupted,
}

impl<'a> Poller<'a> {
    pub fn new(api: &'a dyn ExecutionApi, opts: PollOptions) -> Self {
        Self { api, opts }
    }

    /// Polls until `Finished` or `Error` and returns the normalised result,
    /// recording status and result on `cmd`.
    ///
    /// On deadline or interrupt the command is cancelled on the service and
    /// the call returns [`ExecError::TimedOut`] or [`ExecError::Cancelled`];
    /// it never returns while the command is still queued or running. A status
    /// answer that cannot be read becomes an [`ExecOutput::Error`] result.
    pub async fn wait(&self, cmd: &mut Command, cancel: &mut CancelSignal) -> ExecResult<ExecOutput> {
        let deadline = Instant::now() + self.opts.timeout.min(MAX_WAIT);
        let mut polls = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(self.abort(cmd, false).await);
            }

            // a status call stuck in transport retries must not hold off
            // the deadline or an interrupt
            let polled = tokio::select! {
                res = self.status(cmd) => Polled::Status(res),
                _ = tokio::time::sleep_until(deadline) => Polled::Deadline,
                _ = cancel.cancelled() => Polled::Interrupted,
            };
            let payload = match polled {
                Polled::Status(Ok(p)) => p,
                Polled::Status(Err(ExecError::Protocol(detail))) => return Ok(self.unreadable(cmd, detail).await),
                Polled::Status(Err(e)) => return Err(e),
                Polled::Deadline => return Err(self.abort(cmd, true).await),
                Polled::Interrupted => return Err(self.abort(cmd, false).await),
            };
            polls += 1;
            match CommandStatus::parse(&payload.status) {
                Some(status) if status.is_terminal() => {
                    cmd.status = status;
                    debug!(command_id = %cmd.id, %status, polls, "command completed");
                    if status == CommandStatus::Cancelled {
                        return Err(ExecError::Cancelled { command_id: cmd.id.clone() });
                    }
                    let output = ExecOutput::from_payload(status, payload.results.as_ref());
                    cmd.result = Some(output.clone());
                    return Ok(output);
                }
                Some(status) => cmd.status = status,
                None => warn!(command_id = %cmd.id, status = %payload.status, "unknown command status"),
            }

            if polls % 10 == 0 {
                debug!(command_id = %cmd.id, polls, "still running");
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.abort(cmd, true).await);
            }
            let nap = self.opts.interval.min(deadline - now);
            let wake = tokio::select! {
                _ = tokio::time::sleep(nap) => {
                    if Instant::now() >= deadline { Wake::Deadline } else { Wake::Tick }
                }
                _ = cancel.cancelled() => Wake::Interrupted,
            };
            match wake {
                Wake::Tick => {}
                Wake::Deadline => return Err(self.abort(cmd, true).await),
                Wake::Interrupted => return Err(self.abort(cmd, false).await),
            }
        }
    }

    async fn status(&self, cmd: &Command) -> ExecResult<StatusPayload> {
        let payload = self
            .api
            .command_status(&cmd.cluster_id, &cmd.context_id, &cmd.id)
            .await?;
        if !payload.id.is_empty() && payload.id != cmd.id {
            return Err(ExecError::Protocol(format!(
                "status for {} answered with command {}",
                cmd.id, payload.id
            )));
        }
        Ok(payload)
    }

    async fn send_cancel(&self, cmd: &Command) {
        let req = self.api.cancel_command(&cmd.cluster_id, &cmd.context_id, &cmd.id);
        match tokio::time::timeout(CANCEL_CONFIRM_BUDGET, req).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(command_id = %cmd.id, error = %e, "cancel request failed"),
            Err(_) => warn!(command_id = %cmd.id, "cancel request timed out"),
        }
    }

    /// The service answered with something we cannot read. The command is
    /// cancelled so nothing keeps running unobserved, and the session gets an
    /// error result instead of a failure.
    async fn unreadable(&self, cmd: &mut Command, detail: String) -> ExecOutput {
        warn!(command_id = %cmd.id, error = %detail, "unreadable status response, cancelling command");
        self.send_cancel(cmd).await;
        cmd.status = CommandStatus::Error;
        let output = ExecOutput::Error {
            summary: "Unrecognised response from the execution service".into(),
            detail,
        };
        cmd.result = Some(output.clone());
        output
    }

    /// Cancels remotely, checks status at most once more, and builds the error
    /// to hand back. Never waits on the service past the confirm budget.
    async fn abort(&self, cmd: &mut Command, timed_out: bool) -> ExecError {
        debug!(command_id = %cmd.id, timed_out, "cancelling command");
        self.send_cancel(cmd).await;

        match tokio::time::timeout(CANCEL_CONFIRM_BUDGET, self.status(cmd)).await {
            Ok(Ok(p)) => match CommandStatus::parse(&p.status) {
                Some(CommandStatus::Cancelled) => cmd.status = CommandStatus::Cancelled,
                other => debug!(command_id = %cmd.id, status = ?other, "cancel not yet confirmed"),
            },
            Ok(Err(e)) => debug!(command_id = %cmd.id, error = %e, "cancel confirmation failed"),
            Err(_) => debug!(command_id = %cmd.id, "cancel confirmation timed out"),
        }
        cmd.status = CommandStatus::Cancelled;

        if timed_out {
            ExecError::TimedOut { command_id: cmd.id.clone(), timeout: self.opts.timeout }
        } else {
            ExecError::Cancelled { command_id: cmd.id.clone() }
        }
    }
}
