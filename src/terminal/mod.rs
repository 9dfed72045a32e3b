// ABOUTME: Local terminal side of a remote shell session
// Pumps bytes over the websocket and keeps the remote TTY size in sync

pub mod proxy;
pub mod resize;

pub use proxy::{CrosstermTerminal, RawModeGuard, TerminalMode, TerminalProxy};
pub use resize::{CrosstermSize, ResizeEvent, ResizeFailure, ResizeSignaler, SizeSource};
