//! User interrupts (Ctrl-C) and termination signals fanned out to whoever is
//! currently waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Counts interrupts. Cloned handles share the same counter.
///
/// A termination (SIGTERM, SIGHUP) also fires the counter, so the current wait
/// is cancelled, and stays latched so loops know not to continue.
#[derive(Debug, Clone)]
pub struct Interrupts {
    tx: watch::Sender<u64>,
    terminating: Arc<AtomicBool>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx, terminating: Arc::new(AtomicBool::new(false)) }
    }

    /// Spawns tasks that record every Ctrl-C, and on unix every SIGTERM and
    /// SIGHUP, for the rest of the process.
    pub fn listen() -> Self {
        let interrupts = Self::new();
        let handle = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received");
                handle.trigger();
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            for (kind, name) in [(SignalKind::terminate(), "SIGTERM"), (SignalKind::hangup(), "SIGHUP")] {
                match signal(kind) {
                    Ok(mut stream) => {
                        let handle = interrupts.clone();
                        tokio::spawn(async move {
                            while stream.recv().await.is_some() {
                                debug!(signal = name, "termination requested");
                                handle.terminate();
                            }
                        });
                    }
                    Err(e) => tracing::warn!(signal = name, error = %e, "cannot listen for signal"),
                }
            }
        }

        interrupts
    }

    pub fn trigger(&self) {
        self.tx.send_modify(|n| *n += 1);
    }

    /// Latches termination, then interrupts whatever is waiting.
    pub fn terminate(&self) {
        self.terminating.store(true, Ordering::SeqCst);
        self.trigger();
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// A signal that fires on the next interrupt after this call, or at once
    /// when termination was already requested.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal { rx: Some(self.tx.subscribe()), terminating: Some(self.terminating.clone()) }
    }
}

#[derive(Debug)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<u64>>,
    terminating: Option<Arc<AtomicBool>>,
}

impl CancelSignal {
    /// Never fires.
    #[cfg(test)]
    pub fn never() -> Self {
        Self { rx: None, terminating: None }
    }

    fn is_terminating(&self) -> bool {
        self.terminating.as_ref().is_some_and(|t| t.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_terminating()
            || self
                .rx
                .as_ref()
                .map(|rx| rx.has_changed().unwrap_or(false))
                .unwrap_or(false)
    }

    /// Resolves when an interrupt arrives; pends forever otherwise.
    pub async fn cancelled(&mut self) {
        if self.is_terminating() {
            return;
        }
        match self.rx.as_mut() {
            Some(rx) => {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_ignores_earlier_interrupts() {
        let ints = Interrupts::new();
        ints.trigger();
        let sig = ints.signal();
        assert!(!sig.is_cancelled());
        ints.trigger();
        assert!(sig.is_cancelled());
    }

    #[test]
    fn terminate_latches_and_fires_signals() {
        let ints = Interrupts::new();
        let sig = ints.signal();
        assert!(!ints.is_terminating());

        ints.clone().terminate();
        assert!(sig.is_cancelled());
        assert!(ints.is_terminating());
        // later waits see the latch even though they missed the bump
        assert!(ints.signal().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wakes_on_trigger() {
        let ints = Interrupts::new();
        let mut sig = ints.signal();
        let trigger = ints.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });
        tokio::time::timeout(Duration::from_secs(5), sig.cancelled())
            .await
            .expect("signal should fire");
    }
}
