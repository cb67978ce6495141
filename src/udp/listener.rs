// UDP Listener for WSJT-X / JTDX status broadcasts
// Listens on the configured port (default 2237), broadcast enabled

use std::io;

use tokio::net::UdpSocket;

use crate::daemon::AutoQso;

/// Bind the status port at startup. A bind failure is fatal to the caller;
/// the daemon cannot function without its feed.
pub async fn bind_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    socket.set_broadcast(true)?;
    log::info!("UDP listener bound to 0.0.0.0:{} (broadcast enabled)", port);
    Ok(socket)
}

/// Receive loop. Every datagram is handed to the daemon in arrival order;
/// the daemon spawns anything slow, so nothing here blocks the socket
/// beyond its own read. Receive errors are logged and the loop continues.
pub async fn run_listener(socket: UdpSocket, daemon: AutoQso) {
    let mut buf = [0u8; 4096];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                log::trace!("Received {} bytes from {}", len, src);
                daemon.handle_datagram(&buf[..len]);
            }
            Err(e) => {
                log::error!("UDP receive error: {}", e);
            }
        }
    }
}
