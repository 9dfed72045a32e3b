// ABOUTME: Bidirectional byte pump between the local terminal and the remote shell websocket
// Raw mode is held by a guard so the terminal is restored on every exit path

use crate::error::{ShellError, TerminalIoError, TransportError};
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use std::any::Any;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Local terminal mode control.
#[cfg_attr(test, mockall::automock)]
pub trait TerminalMode: Send {
    fn is_terminal(&self) -> bool;
    fn enable_raw(&mut self) -> io::Result<()>;
    fn restore(&mut self) -> io::Result<()>;
}

/// The process's own stdin, switched with crossterm.
pub struct CrosstermTerminal;

impl TerminalMode for CrosstermTerminal {
    fn is_terminal(&self) -> bool {
        use crossterm::tty::IsTty;
        io::stdin().is_tty()
    }

    fn enable_raw(&mut self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore(&mut self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }
}

/// Holds raw mode for its lifetime. Input that is not a terminal is left alone.
pub struct RawModeGuard<'a> {
    terminal: &'a mut dyn TerminalMode,
    active: bool,
}

impl<'a> RawModeGuard<'a> {
    pub fn engage(terminal: &'a mut dyn TerminalMode) -> Result<Self, TerminalIoError> {
        if !terminal.is_terminal() {
            debug!("local input is not a terminal, leaving mode untouched");
            return Ok(Self {
                terminal,
                active: false,
            });
        }
        terminal.enable_raw().map_err(TerminalIoError::RawMode)?;
        Ok(Self {
            terminal,
            active: true,
        })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            debug!(state = ?ProxyState::Restoring);
            if let Err(e) = self.terminal.restore() {
                warn!("Failed to restore terminal mode: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Idle,
    RawMode,
    Piping,
    Restoring,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pump {
    Outbound,
    Inbound,
}

impl Pump {
    const fn name(self) -> &'static str {
        match self {
            Pump::Outbound => "outbound",
            Pump::Inbound => "inbound",
        }
    }
}

struct PumpOutcome {
    pump: Pump,
    result: Result<(), ShellError>,
}

pub struct TerminalProxy<R, W> {
    input: R,
    output: W,
    terminal: Box<dyn TerminalMode>,
}

impl TerminalProxy<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), Box::new(CrosstermTerminal))
    }
}

impl<R, W> TerminalProxy<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(input: R, output: W, terminal: Box<dyn TerminalMode>) -> Self {
        Self {
            input,
            output,
            terminal,
        }
    }

    /// Pumps bytes until the first pump finishes, then tears the transport down.
    ///
    /// Local EOF ends the outbound pump silently; the session then lasts until
    /// the remote side closes. A normal or abnormal close is a clean finish and
    /// is answered with a close frame. A panic in either pump is a failure.
    pub async fn run<S>(self, transport: WebSocketStream<S>) -> Result<(), ShellError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            input,
            output,
            mut terminal,
        } = self;

        debug!(state = ?ProxyState::Idle);
        let guard = RawModeGuard::engage(terminal.as_mut())?;
        debug!(state = ?ProxyState::RawMode, raw = guard.active);

        let (sink, stream) = transport.split();
        let sink = Arc::new(Mutex::new(sink));
        let (outcome_tx, mut outcome_rx) = mpsc::channel(2);
        let outbound = tokio::spawn(supervise(
            Pump::Outbound,
            pump_outbound(input, Arc::clone(&sink), outcome_tx.clone()),
            outcome_tx.clone(),
        ));
        let inbound = tokio::spawn(supervise(
            Pump::Inbound,
            pump_inbound(stream, output, outcome_tx.clone()),
            outcome_tx,
        ));
        debug!(state = ?ProxyState::Piping);

        let result = match outcome_rx.recv().await {
            Some(outcome) => {
                debug!(pump = ?outcome.pump, ok = outcome.result.is_ok(), "pump finished first");
                outcome.result
            }
            None => Err(TransportError::PumpFailed {
                pump: "both",
                reason: "pumps ended without reporting an outcome".to_string(),
            }
            .into()),
        };

        // Outbound stops first so the close frame has the sink to itself.
        outbound.abort();
        log_join(Pump::Outbound, outbound.await);
        if result.is_ok() {
            send_close(&sink).await;
        }
        inbound.abort();
        log_join(Pump::Inbound, inbound.await);

        drop(guard);
        debug!(state = ?ProxyState::Terminated);
        match &result {
            Ok(()) => info!("Shell session ended"),
            Err(e) => warn!("Shell session ended with error: {}", e),
        }
        result
    }
}

async fn report(outcomes: &mpsc::Sender<PumpOutcome>, pump: Pump, result: Result<(), ShellError>) {
    let _ = outcomes.send(PumpOutcome { pump, result }).await;
}

/// Runs a pump and reports a panic inside it as that pump's outcome.
async fn supervise<F>(pump: Pump, work: F, outcomes: mpsc::Sender<PumpOutcome>)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
        let reason = panic_reason(&*panic);
        warn!(pump = pump.name(), %reason, "pump panicked");
        let failure = TransportError::PumpFailed {
            pump: pump.name(),
            reason,
        };
        report(&outcomes, pump, Err(failure.into())).await;
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

fn log_join(pump: Pump, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            warn!(pump = pump.name(), "pump task ended abnormally: {}", e);
        }
    }
}

/// Best effort: also flushes the reply to a close the peer already sent.
async fn send_close<S>(sink: &Mutex<S>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut sink = sink.lock().await;
    match tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await {
        Ok(Ok(())) => debug!("sent close frame"),
        Ok(Err(e)) => debug!("close frame not sent: {}", e),
        Err(_) => debug!("timed out sending close frame"),
    }
}

async fn pump_outbound<R, S>(mut input: R, sink: Arc<Mutex<S>>, outcomes: mpsc::Sender<PumpOutcome>)
where
    R: AsyncRead + Unpin,
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut key = [0u8; 1];
    loop {
        match input.read(&mut key).await {
            Ok(0) => {
                debug!("local input reached EOF");
                return;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                report(&outcomes, Pump::Outbound, Err(TerminalIoError::Read(e).into())).await;
                return;
            }
        }

        let sent = sink.lock().await.send(Message::Binary(key.to_vec())).await;
        if let Err(e) = sent {
            report(&outcomes, Pump::Outbound, classify_socket_error(e)).await;
            return;
        }
    }
}

async fn pump_inbound<S, W>(mut stream: S, mut output: W, outcomes: mpsc::Sender<PumpOutcome>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let message = match stream.next().await {
            None => break Ok(()),
            Some(Err(e)) => break classify_socket_error(e),
            Some(Ok(message)) => message,
        };

        let data = match message {
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
            Message::Close(frame) => break classify_close(frame.as_ref()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let data = strip_nul_bytes(data);
        if data.is_empty() {
            continue;
        }
        if let Err(e) = write_flush(&mut output, &data).await {
            break Err(TerminalIoError::Write(e).into());
        }
    };
    report(&outcomes, Pump::Inbound, result).await;
}

async fn write_flush<W: AsyncWrite + Unpin>(output: &mut W, data: &[u8]) -> io::Result<()> {
    output.write_all(data).await?;
    output.flush().await
}

/// Removes NUL bytes the remote end pads frames with, keeping everything else in order.
pub fn strip_nul_bytes(mut data: Vec<u8>) -> Vec<u8> {
    data.retain(|&b| b != 0);
    data
}

/// Normal and abnormal closures end the session cleanly; other codes are errors.
pub fn classify_close(frame: Option<&CloseFrame<'_>>) -> Result<(), ShellError> {
    match frame {
        None => Ok(()),
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Abnormal) => Ok(()),
        Some(frame) => Err(TransportError::Closed {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        }
        .into()),
    }
}

/// Socket failures that amount to the peer going away are clean endings.
pub fn classify_socket_error(error: WsError) -> Result<(), ShellError> {
    match error {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => Ok(()),
        WsError::Io(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(()),
        other => Err(TransportError::Socket(other).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::borrow::Cow;
    use tokio::io::duplex;
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn close(code: CloseCode) -> CloseFrame<'static> {
        CloseFrame {
            code,
            reason: Cow::Borrowed(""),
        }
    }

    #[test]
    fn test_strip_nul_bytes() {
        assert_eq!(strip_nul_bytes(vec![0x41, 0x00, 0x42, 0x00]), vec![0x41, 0x42]);
        assert_eq!(strip_nul_bytes(b"plain".to_vec()), b"plain".to_vec());
        assert_eq!(strip_nul_bytes(vec![0, 0, 0]), Vec::<u8>::new());
    }

    #[test]
    fn test_strip_nul_bytes_is_idempotent() {
        let once = strip_nul_bytes(vec![0, 1, 0, 2, 3, 0]);
        assert_eq!(strip_nul_bytes(once.clone()), once);
    }

    #[test]
    fn test_close_classification() {
        assert!(classify_close(None).is_ok());
        assert!(classify_close(Some(&close(CloseCode::Normal))).is_ok());
        assert!(classify_close(Some(&close(CloseCode::Abnormal))).is_ok());

        match classify_close(Some(&close(CloseCode::Error))) {
            Err(ShellError::Transport(TransportError::Closed { code, .. })) => assert_eq!(code, 1011),
            other => panic!("unexpected {:?}", other),
        }
        assert!(classify_close(Some(&close(CloseCode::Away))).is_err());
    }

    #[test]
    fn test_socket_error_classification() {
        assert!(classify_socket_error(WsError::ConnectionClosed).is_ok());
        assert!(classify_socket_error(WsError::AlreadyClosed).is_ok());
        assert!(classify_socket_error(WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        ))
        .is_ok());
        assert!(classify_socket_error(WsError::Io(io::Error::new(
            ErrorKind::ConnectionRefused,
            "refused"
        )))
        .is_err());
    }

    #[test]
    fn test_panic_reason() {
        let payload: Box<dyn Any + Send> = Box::new("write exploded");
        assert_eq!(panic_reason(&*payload), "write exploded");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_reason(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_reason(&*payload), "panicked");
    }

    #[test]
    fn test_guard_restores_once_on_drop() {
        let mut terminal = MockTerminalMode::new();
        terminal.expect_is_terminal().return_const(true);
        terminal.expect_enable_raw().times(1).returning(|| Ok(()));
        terminal.expect_restore().times(1).returning(|| Ok(()));

        let guard = RawModeGuard::engage(&mut terminal).unwrap();
        drop(guard);
    }

    #[test]
    fn test_guard_skips_non_terminals() {
        let mut terminal = MockTerminalMode::new();
        terminal.expect_is_terminal().return_const(false);
        terminal.expect_enable_raw().times(0);
        terminal.expect_restore().times(0);

        let guard = RawModeGuard::engage(&mut terminal).unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn test_raw_mode_failure_is_terminal_error() {
        let mut terminal = MockTerminalMode::new();
        terminal.expect_is_terminal().return_const(true);
        terminal
            .expect_enable_raw()
            .times(1)
            .returning(|| Err(io::Error::new(ErrorKind::Other, "no tty")));
        terminal.expect_restore().times(0);

        let (client, _server) = duplex(64);
        let transport = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let proxy = TerminalProxy::new(tokio::io::empty(), tokio::io::sink(), Box::new(terminal));

        let result = proxy.run(transport).await;
        assert!(matches!(
            result,
            Err(ShellError::TerminalIo(TerminalIoError::RawMode(_)))
        ));
    }
}
