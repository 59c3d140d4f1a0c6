//! One-shot execution of a command string or a whole file.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::handlers::Runtime;
use crate::printer::TextPrinter;
use crate::session::Session;

/// Runs `code` on a fresh context and prints the result. Exit code 1 when
/// the command itself failed.
pub async fn run_command(rt: &Runtime, code: &str) -> Result<i32> {
    rt.ensure_cluster().await?;

    let controller = rt.controller();
    let mut session = Session::new(&rt.api, rt.poll, rt.interrupts.clone());
    let output = controller
        .scoped(&rt.profile.cluster_id, rt.profile.language, |ctx| async move {
            session.execute(&ctx, code).await
        })
        .await?;

    let mut printer = TextPrinter::stdout(rt.mode);
    printer.print_output(&output);
    Ok(if output.is_error() { 1 } else { 0 })
}

pub async fn run_file(rt: &Runtime, path: &Path) -> Result<i32> {
    let code = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("File not found or unreadable: {}", path.display()))?;
    info!(file = %path.display(), bytes = code.len(), "executing file");
    run_command(rt, &code).await
}
