// ABOUTME: Main entry point for portainer-shell, an interactive shell into a Portainer-managed container

use anyhow::Result;
use clap::Parser;
use crossterm::terminal::disable_raw_mode;
use portainer_shell::config::{AppConfig, ConfigOverrides, ExecTarget, FileConfig};
use portainer_shell::error::ShellError;
use portainer_shell::portainer::{PortainerClient, StdinChooser};
use portainer_shell::session::ShellSession;
use portainer_shell::terminal::{CrosstermSize, TerminalProxy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const LOG_ENV: &str = "PORTAINER_SHELL_LOG";

#[derive(Debug, Parser)]
#[command(name = "portainer-shell", version, about)]
struct Cli {
    /// Portainer API base URL, e.g. https://portainer.example.com/api
    #[arg(long)]
    api_url: Option<String>,

    /// Portainer environment (endpoint) id
    #[arg(long)]
    endpoint: Option<u64>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Takes precedence over user and password
    #[arg(long)]
    api_key: Option<String>,

    /// HTTP and handshake timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Run the command as this user inside the container
    #[arg(short = 'u', long)]
    run_as_user: Option<String>,

    /// Working directory for the command inside the container
    #[arg(short = 'w', long)]
    workdir: Option<String>,

    /// Explicit config file (.toml or .json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write logs to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,

    /// Container name or pattern; `*` and `%` match any run of characters
    container: String,

    /// Command to run, defaults to bash
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            settings: FileConfig {
                api_url: self.api_url.clone(),
                endpoint: self.endpoint,
                user: self.user.clone(),
                password: self.password.clone(),
                api_key: self.api_key.clone(),
                timeout_secs: self.timeout,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.log_stderr);
    setup_panic_handler();

    let code = match run(cli).await {
        Ok(code) => {
            eprintln!("Good bye.");
            code
        }
        Err(e) => {
            error!("Fatal: {:#}", e);
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ShellError>()
                .map_or(1, ShellError::exit_code)
        }
    };

    // Exiting here avoids waiting on the blocking stdin reader at runtime shutdown.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::load(&cli.overrides()).map_err(ShellError::from)?;
    let target = ExecTarget::new(
        &cli.container,
        cli.command,
        cli.run_as_user,
        cli.workdir,
    )
    .map_err(ShellError::from)?;
    info!(?config, ?target, "starting shell session");

    let credentials = config.credentials().map_err(ShellError::from)?;
    let client = PortainerClient::new(
        &config.api_url,
        config.endpoint,
        credentials,
        config.timeout(),
    )?;

    let session = ShellSession::establish(
        Arc::new(client),
        &target,
        Arc::new(StdinChooser),
        Arc::new(CrosstermSize),
    )
    .await?;

    let code = session.run(TerminalProxy::stdio()).await?;
    info!(exit_code = code, "remote command finished");
    Ok(code)
}

fn setup_logging(to_stderr: bool) {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "portainer_shell=info".into());

    if to_stderr {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
        return;
    }

    let log_dir = dirs::home_dir()
        .map(|home| home.join(".portainer-shell").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".portainer-shell/logs"));
    let _ = std::fs::create_dir_all(&log_dir);

    let log_file = log_dir.join(format!(
        "portainer-shell-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    // The terminal belongs to the remote shell, so without a log file we stay silent.
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_file) else {
        return;
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(file)
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        // Restore the terminal before anything is printed
        let _ = disable_raw_mode();

        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
