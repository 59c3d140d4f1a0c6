//! Interactive REPL on stdin.

use anyhow::Result;

use crate::handlers::Runtime;
use crate::printer::TextPrinter;
use crate::repl::{self, ReplOptions, StdinSource};
use crate::session::Session;

pub async fn run(rt: &Runtime) -> Result<i32> {
    rt.ensure_cluster().await?;

    let controller = rt.controller();
    let mut session = Session::new(&rt.api, rt.poll, rt.interrupts.clone());
    let mut source = StdinSource::new(rt.interrupts.clone());
    let mut printer = TextPrinter::stdout(rt.mode);

    repl::run(
        &controller,
        &mut session,
        &rt.profile.cluster_id,
        rt.profile.language,
        &mut source,
        &mut printer,
        ReplOptions { idle_timeout: rt.idle_timeout },
    )
    .await?;
    Ok(0)
}
