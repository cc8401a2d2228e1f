mod doctor;
mod server;

use chatrelay::{CancellationToken, ConfigManager, ImageOptions, Mode, RelayClient, RelayConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chatrelay-proxy", version, about = "Multi-provider AI relay with fallback")]
struct Cli {
    /// Config file (defaults to ~/.chatrelay/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP relay server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8787")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Probe every enabled provider
    Doctor,

    /// List providers in priority order
    Providers {
        /// Only providers serving this mode
        #[arg(short, long)]
        mode: Option<Mode>,
    },

    /// Send one prompt through the relay
    Ask {
        #[arg(short, long, default_value = "chat")]
        mode: Mode,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        prompt: String,
    },

    /// Generate one image
    Image {
        prompt: String,

        /// Pin a backend instead of the highest-priority image provider
        #[arg(long)]
        provider: Option<String>,

        #[arg(long, default_value = "1024")]
        width: u32,

        #[arg(long, default_value = "1024")]
        height: u32,

        #[arg(long)]
        negative_prompt: Option<String>,
    },

    /// Write a config file listing the built-in providers
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay=info,chatrelay_proxy=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let manager = match cli.config {
        Some(path) => ConfigManager::new(path),
        None => ConfigManager::default_path(),
    };

    match cli.command {
        Commands::InitConfig { force } => {
            init_config(&manager, force)?;
        }
        Commands::Serve { port, host } => {
            let (_, client) = load(&manager)?;
            server::run_server(client, &host, port).await?;
        }
        Commands::Doctor => {
            let (config, client) = load(&manager)?;
            doctor::run_doctor(&client, &config).await?;
        }
        Commands::Providers { mode } => {
            let (_, client) = load(&manager)?;
            doctor::print_providers(&client, mode).await;
        }
        Commands::Ask { mode, system, prompt } => {
            let (_, client) = load(&manager)?;
            let cancel = cancel_on_ctrl_c();
            let reply = client.reply(mode, &prompt, system.as_deref(), &cancel).await;
            println!("{}", reply);
        }
        Commands::Image {
            prompt,
            provider,
            width,
            height,
            negative_prompt,
        } => {
            let (_, client) = load(&manager)?;
            let options = ImageOptions {
                width,
                height,
                negative_prompt,
                provider,
                ..Default::default()
            };
            let cancel = cancel_on_ctrl_c();
            println!("{}", client.image_reply(&prompt, &options, &cancel).await);
        }
    }

    Ok(())
}

fn load(manager: &ConfigManager) -> anyhow::Result<(RelayConfig, RelayClient)> {
    let config = manager.load()?;
    let client = RelayClient::from_config(&config)?;
    tracing::debug!(path = %manager.path().display(), providers = client.registry().len(), "relay ready");
    Ok((config, client))
}

fn init_config(manager: &ConfigManager, force: bool) -> anyhow::Result<()> {
    if manager.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            manager.path().display()
        );
    }
    manager.save(&RelayConfig::with_builtin_providers())?;
    println!("Wrote {}", manager.path().display());
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}
