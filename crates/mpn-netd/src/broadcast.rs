//! LAN discovery responder. Emulators broadcast a single `0x01` byte on the
//! well-known port; the server answers with a JSON map from its name to the
//! lobby WebSocket URL.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{error, info};

/// Well-known discovery port, independent of `--baseport`.
pub const BROADCAST_PORT: u16 = 45000;

pub async fn run_broadcast_responder(
    server_name: String,
    base_port: u16,
    listen_port: u16,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", listen_port)).await?;
    info!(port = listen_port, "listening for broadcasts");

    let mut buf = [0u8; 1500];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!(error = %e, "error reading broadcast packet");
                continue;
            }
        };
        if len == 0 || buf[0] != 1 {
            continue;
        }
        info!(%addr, "received broadcast");

        let local_ip = match outbound_ip(addr).await {
            Ok(ip) => ip,
            Err(e) => {
                error!(error = %e, "could not get outbound IP");
                continue;
            }
        };
        let response = HashMap::from([(
            server_name.clone(),
            format!("ws://{local_ip}:{base_port}"),
        )]);
        let data = match serde_json::to_vec(&response) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "could not encode broadcast reply");
                continue;
            }
        };
        if let Err(e) = socket.send_to(&data, addr).await {
            error!(error = %e, "could not reply to broadcast");
        }
    }
}

/// The local address the kernel picks when dialling the peer; this is the
/// address LAN clients can actually reach us on.
async fn outbound_ip(dest: SocketAddr) -> anyhow::Result<IpAddr> {
    let probe = UdpSocket::bind(("0.0.0.0", 0)).await?;
    probe.connect(dest).await?;
    Ok(probe.local_addr()?.ip())
}
