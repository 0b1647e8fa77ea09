#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use burdock::config::Config;
use burdock::manager::BurdockManager;
use burdock::message::predicates;
use burdock::transport::JsonLinesTransport;
use burdock::KernelClient;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Drive a compute kernel over its JSON-lines bridge.
#[derive(Parser, Debug)]
#[command(name = "burdock")]
#[command(author = "burdock contributors")]
#[command(version)]
#[command(about = "Talk to a compute kernel: ping it, run code, stream its output.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (default: ~/.burdock)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Kernel address, overrides [connection].address
    #[arg(long, global = true)]
    connect: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Kernel(KernelCommand),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

/// Commands that talk to a running kernel.
#[derive(Subcommand, Debug)]
enum KernelCommand {
    /// Evaluate a trivial expression and print the result message
    Ping,

    /// Print three lines remotely and check they stream back in order
    StreamedPing,

    /// Install the analysis agent into the kernel
    Install,

    /// Run code and print its published result
    Exec {
        /// Code to execute
        code: String,
    },

    /// Run code and print its stdout/stderr as it arrives
    Stream {
        /// Code to execute
        code: String,
    },

    /// Run code for side effects and print the reply once the kernel is idle
    Run {
        /// Code to execute
        code: String,
    },

    /// List data frame variables known to the agent
    Vars,

    /// Generate invariant-detector inputs for a data frame variable
    Analyze {
        /// Variable name
        variable: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the JSON schema of config.toml
    Schema,
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON results only.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = Config::load(cli.config_dir.as_deref()).await?;
    if let Some(address) = cli.connect {
        if address.trim().is_empty() {
            bail!("--connect cannot be empty");
        }
        config.connection.address = address;
    }

    match cli.command {
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => print_json(&Config::json_schema()),
            ConfigCommands::Show => {
                println!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
                Ok(())
            }
        },
        Commands::Kernel(command) => run_kernel_command(&config, command).await,
    }
}

async fn run_kernel_command(config: &Config, command: KernelCommand) -> Result<()> {
    let (transport, inbound) =
        JsonLinesTransport::connect_tcp(&config.connection.address, config.streams.inbound_buffer).await?;
    let client = KernelClient::from_config(transport, inbound, config);
    let manager = BurdockManager::new(client).with_request_timeout(config.manager.request_timeout());

    let result = match command {
        KernelCommand::Ping => manager.ping().await?,
        KernelCommand::StreamedPing => manager.streamed_ping().await?,
        KernelCommand::Install => manager.install().await?,
        KernelCommand::Exec { code } => manager.execute_for_value(&code).await?,
        KernelCommand::Vars => manager.data_frame_variables().await?,
        KernelCommand::Analyze { variable } => {
            serde_json::to_value(manager.analyze_data_frame(&variable).await?)?
        }
        KernelCommand::Run { code } => {
            let client = manager.client();
            client.run(client.request(code)).await?.to_value()
        }
        KernelCommand::Stream { code } => {
            let client = manager.client();
            let stream = client
                .execute_output(
                    client.request(code),
                    predicates::stdout().or(predicates::stderr()),
                    None,
                )
                .await?;
            while let Some(message) = stream.next().await? {
                print_json(&message.to_value())?;
            }
            return Ok(());
        }
    };
    print_json(&result)
}

fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["burdock", "exec", "1 + 1", "--connect", "kernel:1"]).unwrap();
        assert_eq!(cli.connect.as_deref(), Some("kernel:1"));
        assert!(matches!(
            cli.command,
            Commands::Kernel(KernelCommand::Exec { ref code }) if code == "1 + 1"
        ));
    }
}
