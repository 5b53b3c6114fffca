//! Pricewatch - price tracking backend
//!
//! Cached affiliate product search and Web Push price-drop alerts.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{CommandFactory, Parser};
use tracing::{error, info};

use pricewatch::{
    cli::{Cli, Command, ConfigCommand, PushCommand, VapidCommand},
    config::Config,
    push::{Dispatcher, PushPayload, VapidKeys, WebPushSender},
    server::{Server, open_store},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Some(Command::Push(cmd)) => run_push_command(&cli, cmd).await,
        Some(Command::Vapid(VapidCommand::Generate)) => run_vapid_generate(),
        Some(Command::Config(ConfigCommand::Show)) => run_config_show(&cli),
        Some(Command::Completions { shell }) => {
            clap_complete::generate(*shell, &mut Cli::command(), "pricewatch", &mut io::stdout());
            Ok(())
        }
        Some(Command::Serve) | None => return run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> pricewatch::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Dispatch one notification from the command line (scheduled jobs)
async fn run_push_command(cli: &Cli, cmd: &PushCommand) -> anyhow::Result<()> {
    let config = load_config(cli).context("Failed to load configuration")?;
    let keys = VapidKeys::from_config(&config.push)?
        .context("push.vapid_public_key and push.vapid_private_key must be configured")?;

    let (payload, user) = match cmd {
        PushCommand::Send {
            title,
            body,
            url,
            user,
            icon,
            event,
        } => {
            let mut payload = PushPayload::new(title.as_str(), body, url.as_str(), event);
            if let Some(icon) = icon {
                payload = payload.with_icon(icon.as_str());
            }
            (payload, user)
        }
        PushCommand::PriceDrop {
            product,
            previous_price,
            current_price,
            url,
            image,
            user,
        } => {
            if current_price >= previous_price {
                bail!("--current-price must be lower than --previous-price");
            }
            let mut payload = PushPayload::price_drop(product, *previous_price, *current_price, url.as_str());
            if let Some(image) = image {
                payload = payload.with_image(image.as_str());
            }
            (payload, user)
        }
    };
    payload.validate()?;

    let store = open_store(&config).await?;
    let sender = WebPushSender::new(keys, &config.push)?;
    let dispatcher = Dispatcher::new(store, Arc::new(sender), config.push.max_concurrency);

    let report = dispatcher.dispatch(&payload, user.as_deref()).await?;
    println!(
        "✅ sent={} expired={}",
        report.sent_count, report.expired_count
    );
    Ok(())
}

fn run_vapid_generate() -> anyhow::Result<()> {
    let (public, private) = VapidKeys::generate()?;
    println!("# Add to your pricewatch config (keep the private key secret)");
    println!("push:");
    println!("  vapid_public_key: {public}");
    println!("  vapid_private_key: {private}");
    Ok(())
}

fn run_config_show(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli).context("Failed to load configuration")?;
    let yaml = serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?;
    print!("{yaml}");
    Ok(())
}

async fn run_server(cli: &Cli) -> ExitCode {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        persistent_store = config.store.path.is_some(),
        "Starting pricewatch"
    );

    let server = match Server::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
