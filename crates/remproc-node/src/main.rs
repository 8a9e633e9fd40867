//! remproc-node -- control-link agent and client in one binary.
//!
//! Usage:
//!   remproc-node                          # Run the agent with default config
//!   remproc-node --config path.toml agent # Run the agent with custom config
//!   remproc-node ping                     # Probe a running agent
//!   remproc-node dial tcp 10.0.0.5:22     # Ask the agent to open a socket

use std::time::Duration;

use clap::{Parser, Subcommand};
use remproc_node::agent::Agent;
use remproc_node::config::NodeConfig;
use remproc_node::{connect_agent, expand_tilde};
use remproc_protocol::Ping;

#[derive(Parser)]
#[command(name = "remproc-node", about = "remproc control-link agent and client")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.remproc/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Agent,
    /// Check that the agent answers
    Ping,
    /// Open a socket from the agent's side, then close it again
    Dial {
        /// Network: tcp, tcp4 or tcp6
        network: String,
        /// host:port as seen from the agent
        address: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remproc_node=info,remproc_channel=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Agent) | None => run_agent(cfg).await?,
        Some(Commands::Ping) => run_ping(&cfg).await?,
        Some(Commands::Dial { network, address }) => run_dial(&cfg, &network, &address).await?,
        Some(Commands::Config) => {
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

async fn run_agent(cfg: NodeConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&cfg.agent.listen_addr).await?;
    tracing::info!(
        listen = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        dial_timeout_secs = cfg.agent.dial_timeout_secs,
        "starting remproc agent"
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let agent = Agent::from_config(&cfg.agent);
    let shutdown = shutdown_tx.subscribe();
    let accept_loop = tokio::spawn(async move { agent.listen(listener, shutdown).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, shutting down");
    let _ = shutdown_tx.send(());
    accept_loop.await?;
    Ok(())
}

async fn run_ping(cfg: &NodeConfig) -> anyhow::Result<()> {
    let (channel, _dispatch) = connect_agent(&cfg.client.agent_addr).await?;
    let started = std::time::Instant::now();

    let slot = channel.issue(&Ping {}).await?;
    let result = slot.wait_timeout(cfg.client.request_timeout()).await?;
    println!(
        "{}: ok={} in {:?}",
        cfg.client.agent_addr,
        result.ok,
        started.elapsed()
    );

    channel.close().await;
    Ok(())
}

async fn run_dial(cfg: &NodeConfig, network: &str, address: &str) -> anyhow::Result<()> {
    let (channel, _dispatch) = connect_agent(&cfg.client.agent_addr).await?;
    let timeout: Duration = cfg.client.request_timeout();
    let dialer = channel.remote_ip_dialer();

    let conn = tokio::time::timeout(timeout, dialer.dial(network, address))
        .await
        .map_err(|_| anyhow::anyhow!("dial {address}: no answer within {timeout:?}"))??;
    println!("{network} {address}: connected as handle {}", conn.handle());

    tokio::time::timeout(timeout, conn.close())
        .await
        .map_err(|_| anyhow::anyhow!("close: no answer within {timeout:?}"))??;

    channel.close().await;
    Ok(())
}
