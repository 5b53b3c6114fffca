//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Pricewatch - cached product search and Web Push price-drop alerts
#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PRICEWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PRICEWATCH_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "PRICEWATCH_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "PRICEWATCH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PRICEWATCH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Push notification commands
    #[command(subcommand)]
    Push(PushCommand),

    /// VAPID key management
    #[command(subcommand)]
    Vapid(VapidCommand),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Push subcommands
#[derive(Subcommand, Debug)]
pub enum PushCommand {
    /// Send a notification to stored subscriptions
    Send {
        /// Notification title
        #[arg(long)]
        title: String,

        /// Notification text
        #[arg(long)]
        body: String,

        /// Page opened on click
        #[arg(long, default_value = "/")]
        url: String,

        /// Only notify this user's subscriptions
        #[arg(long)]
        user: Option<String>,

        /// Icon URL
        #[arg(long)]
        icon: Option<String>,

        /// Event type used for the notification tag
        #[arg(long, default_value = "notification")]
        event: String,
    },

    /// Send a price-drop alert
    PriceDrop {
        /// Product name
        #[arg(long)]
        product: String,

        /// Price before the drop
        #[arg(long)]
        previous_price: u64,

        /// Current price
        #[arg(long)]
        current_price: u64,

        /// Product page
        #[arg(long)]
        url: String,

        /// Product image URL
        #[arg(long)]
        image: Option<String>,

        /// Only notify this user's subscriptions
        #[arg(long)]
        user: Option<String>,
    },
}

/// VAPID subcommands
#[derive(Subcommand, Debug)]
pub enum VapidCommand {
    /// Generate a new VAPID key pair
    Generate,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as YAML, secrets redacted
    Show,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_push_send() {
        let cli = Cli::parse_from([
            "pricewatch",
            "push",
            "send",
            "--title",
            "Hi",
            "--body",
            "Hello",
            "--user",
            "u1",
        ]);
        match cli.command {
            Some(Command::Push(PushCommand::Send { title, url, user, event, .. })) => {
                assert_eq!(title, "Hi");
                assert_eq!(url, "/");
                assert_eq!(user.as_deref(), Some("u1"));
                assert_eq!(event, "notification");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_defaults_to_server_mode() {
        let cli = Cli::parse_from(["pricewatch"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }
}
