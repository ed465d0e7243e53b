use std::net::SocketAddr;

use anyhow::{Context, Result};
use medsrv_types::GatewayMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

/// Tell the supervisor listening on `addr` which port the gateway is serving on
pub async fn notify_ready(addr: SocketAddr, port: u16) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to reach supervisor at {addr}"))?;

    let line = GatewayMessage::GatewayReady { port }.to_line()?;
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    info!(%addr, port, "Readiness reported to supervisor");
    Ok(())
}
