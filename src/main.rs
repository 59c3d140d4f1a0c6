mod api;
mod cli;
mod cluster;
mod command;
mod config;
mod context;
mod error;
mod handlers;
mod interrupt;
mod output;
mod poller;
mod printer;
mod repl;
mod session;
mod transport;

use anyhow::Result;
use clap::CommandFactory;
use config::Config;
use error::{ErrorClass, ExecError};
use handlers::Runtime;
use interrupt::Interrupts;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    // Logging
    let lvl = match args.log_level.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("error") => Level::ERROR,
        Some(_) => Level::WARN,
        None if args.verbose => Level::DEBUG,
        None => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(lvl)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let exec_err = e.downcast_ref::<ExecError>();
            if let Some(hint) = exec_err.and_then(hint_for) {
                eprintln!("{}", hint);
            }
            match exec_err {
                Some(ExecError::Cancelled { .. } | ExecError::Interrupted(_)) => EXIT_INTERRUPTED,
                _ => EXIT_FAILURE,
            }
        }
    };
    std::process::exit(code);
}

fn hint_for(e: &ExecError) -> Option<&'static str> {
    match e.class() {
        ErrorClass::Configuration => {
            Some("Check --host/--token/--cluster-id, the DATABRICKS_* variables, or the .dbxrc file.")
        }
        ErrorClass::Lifecycle => Some("The cluster or context is not usable; try --start-cluster or --wait-cluster."),
        ErrorClass::Transient => Some("The service kept failing after retries; try again later."),
        _ => None,
    }
}

async fn run(args: cli::Cli) -> Result<i32> {
    if args.command.is_none() && args.file.is_none() && !args.repl && !args.check_cluster {
        cli::Cli::command().print_help()?;
        eprintln!("\nError: Must specify -c/--command, -f/--file, --repl or --check-cluster");
        return Ok(EXIT_FAILURE);
    }

    // Load config
    let cfg = Config::load();
    tracing::debug!(path = %cfg.config_path.display(), "config loaded");
    let rt = Runtime::build(&cfg, &args, Interrupts::listen())?;
    tracing::debug!(profile = ?rt.profile, "profile resolved");

    // Route to handler
    if args.check_cluster {
        handlers::cluster::run(&rt).await
    } else if args.repl {
        handlers::repl::run(&rt).await
    } else if let Some(code) = args.command.as_deref() {
        handlers::run::run_command(&rt, code).await
    } else if let Some(path) = args.file.as_deref() {
        handlers::run::run_file(&rt, path).await
    } else {
        Ok(EXIT_FAILURE)
    }
}
