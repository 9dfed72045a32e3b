// ABOUTME: Portainer API integration for locating containers and driving exec instances

pub mod auth;
pub mod client;
pub mod containers;
pub mod exec;
pub mod types;

pub use auth::{AuthHeader, Authenticator, Credentials};
pub use client::PortainerClient;
pub use containers::{Chooser, ContainerCandidate, ContainerResolver, NamePattern, StdinChooser};
pub use exec::ExecSessionManager;
pub use types::{ContainerId, ExecInstanceId, TerminalDimensions};
