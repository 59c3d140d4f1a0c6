//! Interactive loop over one persistent execution context.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, warn};

use crate::context::{ContextController, Language};
use crate::error::ExecResult;
use crate::interrupt::Interrupts;
use crate::printer::TextPrinter;
use crate::session::{HistoryEntry, Session};

const CONTINUATION_MARKERS: [char; 3] = [':', '\\', ','];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// More lines are needed.
    Pending,
    Ready(String),
    /// Nothing but whitespace was entered.
    Skip,
    Exit,
}

/// Splits typed lines into fragments.
///
/// A single line runs as soon as it is entered unless it ends with `:`, `\`
/// or `,`; in that case lines accumulate until a blank one.
#[derive(Debug, Default)]
pub struct FragmentReader {
    lines: Vec<String>,
}

impl FragmentReader {
    pub fn is_continuing(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }

    pub fn push(&mut self, line: &str) -> Framing {
        let line = line.trim_end_matches(['\r', '\n']);
        if self.lines.is_empty() && is_sentinel(line) {
            return Framing::Exit;
        }

        if self.lines.is_empty() && !line.trim_end().ends_with(CONTINUATION_MARKERS) {
            return finish(vec![line.to_string()]);
        }
        if self.is_continuing() && line.trim().is_empty() {
            return finish(std::mem::take(&mut self.lines));
        }
        self.lines.push(line.to_string());
        Framing::Pending
    }
}

fn is_sentinel(line: &str) -> bool {
    let t = line.trim();
    t.eq_ignore_ascii_case("exit") || t.eq_ignore_ascii_case("quit")
}

fn finish(lines: Vec<String>) -> Framing {
    let code = lines.join("\n");
    if code.trim().is_empty() {
        Framing::Skip
    } else {
        Framing::Ready(code)
    }
}

pub enum ReadEvent {
    Line(String),
    Interrupted,
    Eof,
}

#[async_trait]
pub trait LineSource: Send {
    async fn read_line(&mut self, printer: &mut TextPrinter, prompt: &str) -> ReadEvent;
}

pub struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
    interrupts: Interrupts,
}

impl StdinSource {
    pub fn new(interrupts: Interrupts) -> Self {
        Self { lines: BufReader::new(tokio::io::stdin()).lines(), interrupts }
    }
}

#[async_trait]
impl LineSource for StdinSource {
    async fn read_line(&mut self, printer: &mut TextPrinter, prompt: &str) -> ReadEvent {
        printer.prompt(prompt);
        let mut signal = self.interrupts.signal();
        tokio::select! {
            line = self.lines.next_line() => match line {
                Ok(Some(l)) => ReadEvent::Line(l),
                Ok(None) => ReadEvent::Eof,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    ReadEvent::Eof
                }
            },
            _ = signal.cancelled() => ReadEvent::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplOptions {
    pub idle_timeout: Option<Duration>,
}

/// Runs the REPL until `exit`/`quit`, end of input, idle timeout or a fatal
/// error. The context is destroyed on every one of those paths.
pub async fn run(
    controller: &ContextController<'_>,
    session: &mut Session<'_>,
    cluster_id: &str,
    language: Language,
    source: &mut dyn LineSource,
    printer: &mut TextPrinter,
    opts: ReplOptions,
) -> ExecResult<()> {
    printer.line("");
    printer.line("Remote Execution Context REPL");
    printer.line(&format!("Language: {} | Cluster: {}", language, cluster_id));
    printer.line("Type 'exit' or 'quit' to end session. Multi-line: end with blank line.");
    printer.line("");

    controller
        .scoped(cluster_id, language, |ctx| async move {
            let mut reader = FragmentReader::default();
            loop {
                let prompt = if reader.is_continuing() {
                    "... ".to_string()
                } else {
                    format!("[{}]>>> ", language)
                };
                let read = source.read_line(printer, &prompt);
                let event = match opts.idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, read).await.ok(),
                    None => Some(read.await),
                };
                let Some(event) = event else {
                    printer.line("");
                    printer.warn("No input before the idle timeout; ending session.");
                    break;
                };

                let line = match event {
                    ReadEvent::Line(l) => l,
                    ReadEvent::Eof => {
                        printer.line("");
                        printer.line("Exiting...");
                        break;
                    }
                    ReadEvent::Interrupted if session.terminating() => {
                        printer.line("");
                        printer.line("Terminated.");
                        break;
                    }
                    ReadEvent::Interrupted => {
                        reader.reset();
                        printer.line("");
                        printer.warn("Interrupted. Type 'exit' to quit.");
                        continue;
                    }
                };

                let code = match reader.push(&line) {
                    Framing::Pending | Framing::Skip => continue,
                    Framing::Exit => {
                        printer.line("Exiting...");
                        break;
                    }
                    Framing::Ready(code) => code,
                };

                match session.execute(&ctx, &code).await {
                    Ok(output) => {
                        printer.print_output(&output);
                        printer.line("");
                    }
                    Err(e) if e.is_recoverable() => printer.warn(&e.to_string()),
                    Err(e) => return Err(e),
                }
                if session.terminating() {
                    printer.line("Terminated.");
                    break;
                }
            }
            log_history(session.history());
            Ok(())
        })
        .await
}

fn log_history(history: &[HistoryEntry]) {
    for (i, h) in history.iter().enumerate() {
        debug!(
            n = i + 1,
            command_id = %h.command_id,
            chars = h.code.len(),
            status = %h.status,
            failed = h.failed,
            elapsed = ?h.elapsed,
            "history"
        );
    }
}
