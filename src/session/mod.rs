// ABOUTME: Remote shell session coordination

pub mod shell;

pub use shell::{exec_websocket_url, handshake_request, ShellSession, ShellTransport};
