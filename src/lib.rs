// ABOUTME: Library crate for portainer-shell exposing the session pieces for testing and reuse

pub mod config;
pub mod error;
pub mod portainer;
pub mod session;
pub mod terminal;
