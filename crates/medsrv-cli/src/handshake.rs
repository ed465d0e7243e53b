//! Readiness handshake between the supervisor and a freshly spawned gateway.
//!
//! The supervisor binds a loopback listener and hands its address to the
//! child through `MEDSRV_READY_ADDR`. The first well-formed
//! `GATEWAY_READY` line wins; later connections are never accepted.

use std::net::SocketAddr;
use std::time::Duration;

use medsrv_types::GatewayMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::error::SupervisorError;

const LINE_READ_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ReadinessListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ReadinessListener {
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        debug!(%addr, "Readiness listener bound");
        Ok(Self { listener, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the child to report its port.
    ///
    /// Fails with `ChildExitedEarly` if the child exits first and with
    /// `HandshakeTimeout` once `timeout` elapses. The caller owns cleanup of
    /// the child in both cases.
    pub async fn wait(self, child: &mut Child, timeout: Duration) -> Result<u16, SupervisorError> {
        let accept = accept_ready(self.listener);
        tokio::pin!(accept);

        tokio::select! {
            biased;
            port = &mut accept => Ok(port),
            status = child.wait() => {
                let code = status.ok().and_then(|status| status.code());
                Err(SupervisorError::ChildExitedEarly { code })
            }
            _ = tokio::time::sleep(timeout) => Err(SupervisorError::HandshakeTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

async fn accept_ready(listener: TcpListener) -> u16 {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Readiness accept failed");
                continue;
            }
        };

        let mut line = String::new();
        let mut reader = BufReader::new(stream);
        match tokio::time::timeout(LINE_READ_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "Readiness connection failed");
                continue;
            }
            Err(_) => {
                warn!(%peer, "Readiness connection sent nothing");
                continue;
            }
        }

        match parse_ready_line(&line) {
            Some(port) => return port,
            None => warn!(%peer, line = line.trim(), "Ignoring malformed readiness message"),
        }
    }
}

pub fn parse_ready_line(line: &str) -> Option<u16> {
    match serde_json::from_str::<GatewayMessage>(line.trim()) {
        Ok(GatewayMessage::GatewayReady { port }) => Some(port),
        Err(_) => None,
    }
}
