use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, info};
use tabled::{Table, Tabled};

use lmlocal::config::{self, Settings};
use lmlocal::constants::{MachineModel, DEFAULT_PORT};
use lmlocal::StreamMessage;

#[derive(Parser)]
#[command(name = "lm")]
#[command(about = "A CLI for talking to La Marzocco espresso machines on your local network")]
#[command(version)]
struct Cli {
    /// Hostname or IP address of the machine
    #[arg(long, env = "LM_HOST", global = true)]
    host: Option<String>,

    /// Port of the machine's local API
    #[arg(long, env = "LM_PORT", global = true)]
    port: Option<u16>,

    /// Bearer token for the machine's local API
    #[arg(long, env = "LM_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store connection settings for future use (token is prompted for if not provided)
    Configure,
    /// Remove stored connection settings
    Forget,
    /// Print the machine's current configuration
    Config,
    /// Print live updates from the machine until interrupted
    Stream,
    /// List supported machine models
    Models,
}

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Physical keys")]
    keys: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Configure => {
            let host = cli.host.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "Host is required. Provide via --host or LM_HOST environment variable."
                )
            })?;
            let token = match cli.token.clone() {
                Some(token) => token,
                None => rpassword::prompt_password("Local API token: ")?,
            };
            let settings = Settings {
                port: cli.port.unwrap_or(DEFAULT_PORT),
                ..Settings::new(host, token)
            };
            config::save_config(&settings)?;
            println!(
                "Settings saved for machine at {}:{}.",
                settings.host, settings.port
            );
        }
        Commands::Forget => {
            config::clear_config()?;
            println!("Settings removed.");
        }
        Commands::Config => {
            let client = resolve_settings(&cli)?.client();
            info!("Fetching configuration from {}", client.host());
            let machine_config = client.get_config().await?;
            println!("{}", serde_json::to_string_pretty(&machine_config)?);
        }
        Commands::Stream => {
            let client = resolve_settings(&cli)?.client();
            let mut sink = |message: StreamMessage| -> Result<()> {
                match message {
                    StreamMessage::Text(text) => println!("{}", text),
                    StreamMessage::Binary(data) => println!("<{} bytes>", data.len()),
                }
                Ok(())
            };

            info!("Streaming updates from {}", client.host());
            tokio::select! {
                () = client.websocket_connect(Some(&mut sink), false) => {}
                result = shutdown_requested() => {
                    result?;
                    debug!("Shutdown requested, stopping stream");
                    client.terminate();
                }
            }
        }
        Commands::Models => {
            let rows: Vec<ModelRow> = MachineModel::ALL
                .iter()
                .map(|model| ModelRow {
                    model: model.to_string(),
                    keys: model.physical_keys(),
                })
                .collect();
            println!("{}", Table::new(&rows));
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it
async fn shutdown_requested() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Stored settings, with any connection flags layered on top
fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match (&cli.host, &cli.token) {
        (Some(host), Some(token)) => Settings::new(host.clone(), token.clone()),
        _ => config::load_config()?,
    };

    if let Some(host) = &cli.host {
        settings.host = host.clone();
    }
    if let Some(token) = &cli.token {
        settings.local_bearer = token.clone();
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }

    debug!("Using machine at {}:{}", settings.host, settings.port);
    Ok(settings)
}
