//! Printers: rendered results to stdout, notices to stderr (owo-colors).

use std::io::{self, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::output::{render, truncation_notice, ExecOutput, OutputMode};

pub struct TextPrinter {
    pub color: bool,
    pub mode: OutputMode,
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

impl TextPrinter {
    pub fn stdout(mode: OutputMode) -> Self {
        Self {
            color: io::stdout().is_terminal(),
            mode,
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
        }
    }

    /// Collects both streams into one shared buffer, uncoloured.
    #[cfg(test)]
    pub fn buffered(mode: OutputMode) -> (Self, SharedBuf) {
        let buf = SharedBuf::default();
        let printer = Self {
            color: false,
            mode,
            out: Box::new(buf.clone()),
            err: Box::new(buf.clone()),
        };
        (printer, buf)
    }

    pub fn print_output(&mut self, output: &ExecOutput) {
        let text = render(output, self.mode);
        if output.is_error() && self.color {
            let _ = writeln!(self.out, "{}", text.red());
        } else {
            let _ = writeln!(self.out, "{}", text);
        }
        if let Some(note) = truncation_notice(output, self.mode) {
            self.warn(note);
        }
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
    }

    pub fn prompt(&mut self, text: &str) {
        let _ = write!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    pub fn warn(&mut self, text: &str) {
        if self.color {
            let _ = writeln!(self.err, "{}", text.yellow());
        } else {
            let _ = writeln!(self.err, "{}", text);
        }
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuf {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
