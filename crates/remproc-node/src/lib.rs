//! remproc node -- library crate for the agent and its command-line client.
//!
//! Exposes the agent service, config types, and the TCP glue that opens a
//! control channel to a running agent, so integration tests and main.rs share
//! one code path.

pub mod agent;
pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use remproc_channel::{stream_pipe, ChannelError, ControlChannel, StreamReader, StreamWriter};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Control channel over a TCP connection to an agent.
pub type AgentChannel =
    ControlChannel<StreamReader<ReadHalf<TcpStream>>, StreamWriter<WriteHalf<TcpStream>>>;

/// Connect to an agent, run the handshake, and start dispatch.
pub async fn connect_agent(
    addr: &str,
) -> anyhow::Result<(Arc<AgentChannel>, JoinHandle<Result<(), ChannelError>>)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream_pipe(stream);

    let channel = Arc::new(ControlChannel::new(reader, writer));
    let version = channel.handshake().await?;
    tracing::info!(addr, version, "control channel open");

    let dispatch = channel.spawn_dispatch();
    Ok((channel, dispatch))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
