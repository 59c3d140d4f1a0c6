use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::context::Language;
use crate::output::OutputMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "dbx-exec", about = "Run code on a remote cluster through execution contexts", version)]
#[command(group(ArgGroup::new("mode").args(["command", "file", "repl", "check_cluster"]).multiple(false)))]
pub struct Cli {
    /// Workspace URL.
    #[arg(long, help_heading = "Connection")]
    pub host: Option<String>,

    /// Personal access token.
    #[arg(long, help_heading = "Connection")]
    pub token: Option<String>,

    /// Cluster to execute on.
    #[arg(long = "cluster-id", help_heading = "Connection")]
    pub cluster_id: Option<String>,

    /// Code to execute.
    #[arg(short = 'c', long, help_heading = "Execution")]
    pub command: Option<String>,

    /// File whose whole content runs as one command.
    #[arg(short = 'f', long, help_heading = "Execution")]
    pub file: Option<PathBuf>,

    /// Start an interactive REPL on one persistent context.
    #[arg(long, help_heading = "Execution")]
    pub repl: bool,

    /// Language of the execution context.
    #[arg(short = 'l', long, value_enum, help_heading = "Execution")]
    pub language: Option<Language>,

    /// Seconds between status polls.
    #[arg(long = "poll-interval", help_heading = "Execution")]
    pub poll_interval: Option<f64>,

    /// Seconds a command may run before it is cancelled.
    #[arg(long, help_heading = "Execution")]
    pub timeout: Option<f64>,

    /// End the REPL after this many seconds without input.
    #[arg(long = "idle-timeout", help_heading = "Execution")]
    pub idle_timeout: Option<f64>,

    /// Output shape for results.
    #[arg(short = 'o', long = "output", visible_alias = "output-format", value_enum, help_heading = "Output")]
    pub output: Option<OutputMode>,

    /// Debug logging on stderr.
    #[arg(short = 'v', long, help_heading = "Output")]
    pub verbose: bool,

    /// Log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", help_heading = "Output")]
    pub log_level: Option<String>,

    /// Print the cluster state and exit (0 only when RUNNING).
    #[arg(long = "check-cluster", help_heading = "Cluster")]
    pub check_cluster: bool,

    /// Start the cluster if it is terminated, then wait for it.
    #[arg(long = "start-cluster", help_heading = "Cluster")]
    pub start_cluster: bool,

    /// Seconds to wait for a starting cluster before giving up.
    #[arg(long = "wait-cluster", default_value_t = 0.0, help_heading = "Cluster")]
    pub wait_cluster: f64,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
