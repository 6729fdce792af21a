// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! lmbridge CLI entry point.
//!
//! `lmbridge` with no arguments starts the server; `config` and `models`
//! are one-shot inspection commands.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use lmbridge::config::{default_config_path, ConfigOverrides, ConfigSource, FileConfigSource};
use lmbridge::provider::OllamaProvider;
use lmbridge::server::{shutdown_signal, BridgeServer};

#[derive(Parser)]
#[command(
    name = "lmbridge",
    version,
    about = "Loopback-only HTTP bridge for local chat models"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge server (default when no command is given)
    Serve(ServeArgs),
    /// Inspect the bridge configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// List the models the provider currently offers
    Models {
        /// Provider base URL override
        #[arg(long)]
        provider_url: Option<String>,
    },
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Bind address (normalized to loopback)
    #[arg(long)]
    bind: Option<String>,

    /// Bearer token required on every request
    #[arg(long)]
    token: Option<String>,

    /// Default model family when requests carry no hint
    #[arg(long)]
    family: Option<String>,

    /// Maximum request body size in bytes
    #[arg(long)]
    max_body_bytes: Option<usize>,

    /// Provider base URL
    #[arg(long)]
    provider_url: Option<String>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => serve(args).await,
        Commands::Config { command } => handle_config(command),
        Commands::Models { provider_url } => list_provider_models(provider_url).await,
    }
}

/// Start the server and run until a shutdown signal arrives.
async fn serve(args: ServeArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        port: args.port,
        bind_address: args.bind,
        token: args.token,
        default_family: args.family,
        max_body_bytes: args.max_body_bytes,
        provider_url: args.provider_url,
    };

    let source = Arc::new(FileConfigSource::at_default_path().with_overrides(overrides));
    let startup = source.snapshot();

    if startup.token.is_empty() {
        tracing::warn!("No bearer token configured; any local process may use the bridge");
    }

    let provider = Arc::new(
        OllamaProvider::with_url(&startup.provider_url).with_default_family(&startup.default_family),
    );

    let server = BridgeServer::new(source, provider);
    let addr = server.start().await?;
    println!("lmbridge listening on http://{}", addr);

    shutdown_signal().await;
    server.stop().await?;
    Ok(())
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = FileConfigSource::at_default_path().snapshot();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            println!("{}", default_config_path().display());
        }
    }
    Ok(())
}

/// One-shot provider model listing, printed as the wire payload.
async fn list_provider_models(provider_url: Option<String>) -> Result<()> {
    let mut config = FileConfigSource::at_default_path().snapshot();
    if let Some(url) = provider_url {
        config.provider_url = url;
    }

    let provider = OllamaProvider::with_url(&config.provider_url);
    let payload = lmbridge::bridge::list_models(&provider)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
