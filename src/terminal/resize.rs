// ABOUTME: Forwards local terminal size changes to the remote exec instance
// Resize pushes are best effort: failures are logged and reported, never fatal

use crate::error::ExecSpawnError;
use crate::portainer::exec::ExecSessionManager;
use crate::portainer::types::{ExecInstanceId, TerminalDimensions};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeEvent {
    /// Push whatever size the terminal has right now.
    Trigger,
    /// The terminal was observed at a new size.
    Changed(TerminalDimensions),
}

#[derive(Debug, Error)]
pub enum ResizeFailure {
    #[error("failed to read terminal size: {0}")]
    Sample(#[source] io::Error),

    #[error(transparent)]
    Push(#[from] ExecSpawnError),
}

pub trait SizeSource: Send + Sync + 'static {
    fn size(&self) -> io::Result<TerminalDimensions>;
}

/// Reads the controlling terminal size through crossterm.
pub struct CrosstermSize;

impl SizeSource for CrosstermSize {
    fn size(&self) -> io::Result<TerminalDimensions> {
        let (width, height) = crossterm::terminal::size()?;
        Ok(TerminalDimensions { width, height })
    }
}

pub struct ResizeSignaler {
    events: mpsc::Sender<ResizeEvent>,
    failures: mpsc::UnboundedReceiver<ResizeFailure>,
    source: Arc<dyn SizeSource>,
    worker: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
}

impl ResizeSignaler {
    /// Samples the current size and starts the push loop for `exec_id`.
    pub fn spawn(
        exec: ExecSessionManager,
        exec_id: ExecInstanceId,
        source: Arc<dyn SizeSource>,
    ) -> Self {
        let initial = match source.size() {
            Ok(size) => Some(size),
            Err(e) => {
                debug!("terminal size unavailable at startup: {}", e);
                None
            }
        };

        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let (failure_tx, failures) = mpsc::unbounded_channel();
        let worker = tokio::spawn(push_loop(
            exec,
            exec_id,
            Arc::clone(&source),
            initial,
            rx,
            failure_tx,
        ));

        Self {
            events,
            failures,
            source,
            worker,
            watcher: None,
        }
    }

    /// Subscribes to SIGWINCH and feeds every new size into the push loop.
    #[cfg(unix)]
    pub fn watch_window_changes(&mut self) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sig = signal(SignalKind::window_change())?;
        let events = self.events.clone();
        let source = Arc::clone(&self.source);
        self.watcher = Some(tokio::spawn(async move {
            while sig.recv().await.is_some() {
                match source.size() {
                    Ok(size) => {
                        if events.send(ResizeEvent::Changed(size)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to read terminal size after SIGWINCH: {}", e),
                }
            }
        }));
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn watch_window_changes(&mut self) -> io::Result<()> {
        debug!("window change notifications are not supported on this platform");
        Ok(())
    }

    /// Forces an immediate resize push. Never blocks the caller.
    pub fn trigger(&self) {
        self.send(ResizeEvent::Trigger);
    }

    /// Queues an event without blocking. Callers with their own change
    /// detection feed sizes in here; the SIGWINCH watcher uses the channel directly.
    pub fn send(&self, event: ResizeEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Dropped resize event {:?}: {}", event, e);
        }
    }

    /// Stops watching for size changes, lets queued events finish pushing,
    /// then returns every reported failure.
    pub async fn finish(mut self) -> Vec<ResizeFailure> {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
            // The watcher holds an event sender until it is gone.
            let _ = watcher.await;
        }
        let Self {
            events,
            mut failures,
            worker,
            ..
        } = self;
        drop(events);
        if let Err(e) = worker.await {
            debug!("resize worker ended abnormally: {}", e);
        }
        drain(&mut failures)
    }
}

fn drain(failures: &mut mpsc::UnboundedReceiver<ResizeFailure>) -> Vec<ResizeFailure> {
    let mut collected = Vec::new();
    while let Ok(failure) = failures.try_recv() {
        collected.push(failure);
    }
    collected
}

async fn push_loop(
    exec: ExecSessionManager,
    exec_id: ExecInstanceId,
    source: Arc<dyn SizeSource>,
    mut current: Option<TerminalDimensions>,
    mut events: mpsc::Receiver<ResizeEvent>,
    failures: mpsc::UnboundedSender<ResizeFailure>,
) {
    while let Some(event) = events.recv().await {
        let size = match event {
            ResizeEvent::Trigger => match source.size() {
                Ok(size) => size,
                Err(e) => {
                    warn!("Failed to read terminal size: {}", e);
                    let _ = failures.send(ResizeFailure::Sample(e));
                    continue;
                }
            },
            ResizeEvent::Changed(size) if current == Some(size) => continue,
            ResizeEvent::Changed(size) => size,
        };

        current = Some(size);
        if let Err(e) = exec.resize(&exec_id, size).await {
            warn!("Terminal resize failed: {}", e);
            let _ = failures.send(e.into());
        }
    }
    debug!(exec_id = %exec_id, "resize loop finished");
}
