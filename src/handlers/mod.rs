//! Caller-facing modes: one-shot command, file, REPL and cluster check.

pub mod cluster;
pub mod repl;
pub mod run;

use std::time::Duration;

use crate::api::HttpApi;
use crate::cli::Cli;
use crate::cluster::ReadinessGuard;
use crate::config::{Config, Profile, ProfileOverrides};
use crate::context::ContextController;
use crate::error::{ExecError, ExecResult};
use crate::interrupt::Interrupts;
use crate::output::OutputMode;
use crate::poller::{PollOptions, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::transport::Transport;

/// Everything a handler needs, resolved once from CLI and config.
pub struct Runtime {
    pub profile: Profile,
    pub api: HttpApi,
    pub poll: PollOptions,
    pub mode: OutputMode,
    pub interrupts: Interrupts,
    pub start_cluster: bool,
    pub wait_cluster: Duration,
    pub idle_timeout: Option<Duration>,
}

/// Anything faster just hammers the status endpoint.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn secs(flag: &str, v: f64) -> ExecResult<Duration> {
    Duration::try_from_secs_f64(v).map_err(|_| ExecError::Config(format!("{} must be a non-negative number of seconds", flag)))
}

impl Runtime {
    pub fn build(cfg: &Config, args: &Cli, interrupts: Interrupts) -> ExecResult<Self> {
        let overrides = ProfileOverrides {
            host: args.host.clone(),
            token: args.token.clone(),
            cluster_id: args.cluster_id.clone(),
            language: args.language,
        };
        let profile = Profile::resolve(cfg, &overrides)?;
        let api = HttpApi::new(Transport::from_config(cfg, &profile)?);

        let interval = match args.poll_interval {
            Some(v) => secs("--poll-interval", v)?,
            None => cfg.get_secs("POLL_INTERVAL").unwrap_or(DEFAULT_POLL_INTERVAL),
        };
        if interval < MIN_POLL_INTERVAL {
            return Err(ExecError::Config(format!(
                "poll interval must be at least {:?}, got {:?}",
                MIN_POLL_INTERVAL, interval
            )));
        }
        let timeout = match args.timeout {
            Some(v) => secs("--timeout", v)?,
            None => cfg.get_secs("COMMAND_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT),
        };
        let mode = match args.output {
            Some(m) => m,
            None => cfg
                .get("OUTPUT_MODE")
                .and_then(|m| <OutputMode as clap::ValueEnum>::from_str(&m, true).ok())
                .unwrap_or_default(),
        };
        let idle_timeout = args.idle_timeout.map(|v| secs("--idle-timeout", v)).transpose()?;

        Ok(Self {
            profile,
            api,
            poll: PollOptions { interval, timeout },
            mode,
            interrupts,
            start_cluster: args.start_cluster,
            wait_cluster: secs("--wait-cluster", args.wait_cluster)?,
            idle_timeout,
        })
    }

    /// Makes sure the cluster can take a context before one is created.
    /// Ctrl-C during the wait gives up with [`ExecError::Interrupted`].
    pub async fn ensure_cluster(&self) -> ExecResult<()> {
        let guard = ReadinessGuard::new(&self.api, self.poll.interval.max(Duration::from_secs(1)));
        let cluster_id = &self.profile.cluster_id;
        let mut cancel = self.interrupts.signal();
        if self.start_cluster {
            guard.start_and_wait(cluster_id, self.wait_cluster, &mut cancel).await?;
        } else {
            guard.ensure_ready(cluster_id, self.wait_cluster, &mut cancel).await?;
        }
        Ok(())
    }

    pub fn controller(&self) -> ContextController<'_> {
        ContextController::new(&self.api).with_interrupts(self.interrupts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn build(extra: &[&str]) -> ExecResult<Runtime> {
        let cfg = Config::from_pairs(&[
            ("DATABRICKS_HOST", "example.cloud.databricks.com"),
            ("DATABRICKS_TOKEN", "dapi-test"),
            ("DATABRICKS_CLUSTER_ID", "c-1"),
        ]);
        let mut argv = vec!["dbx-exec", "-c", "1"];
        argv.extend_from_slice(extra);
        Runtime::build(&cfg, &Cli::parse_from(argv), Interrupts::new())
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = build(&["--poll-interval", "0"]).err().unwrap();
        assert!(matches!(err, ExecError::Config(ref m) if m.contains("poll interval")));
    }

    #[test]
    fn tunable_poll_interval_is_accepted() {
        let rt = build(&["--poll-interval", "0.25", "--timeout", "1e15"]).unwrap();
        assert_eq!(rt.poll.interval, Duration::from_millis(250));
    }
}
