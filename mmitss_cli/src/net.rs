//! Non-blocking UDP endpoints used between the three processes.

use std::net::{SocketAddr, UdpSocket};

use anyhow::{Context, Result};

/// Socket bound for receiving, non-blocking.
pub fn bind(addr: &str) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
    socket
        .set_nonblocking(true)
        .context("failed to set non-blocking")?;
    Ok(socket)
}

/// Sender socket with a fixed peer, non-blocking.
pub fn sender(peer: &str) -> Result<(UdpSocket, SocketAddr)> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind sender")?;
    socket
        .set_nonblocking(true)
        .context("failed to set non-blocking")?;
    let addr: SocketAddr = peer
        .parse()
        .with_context(|| format!("bad socket address {peer}"))?;
    Ok((socket, addr))
}

/// Resolves a `host:port` peer string.
pub fn peer(peer: &str) -> Result<SocketAddr> {
    peer.parse()
        .with_context(|| format!("bad socket address {peer}"))
}

/// Drains one datagram; `None` when the socket has nothing pending.
pub fn recv_from(socket: &UdpSocket, buf: &mut [u8]) -> Option<usize> {
    match socket.recv_from(buf) {
        Ok((n, _)) => Some(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
        Err(e) => {
            log::error!("udp recv error: {e}");
            None
        },
    }
}

/// Fire-and-forget send; EAGAIN and peer errors are logged, not fatal.
pub fn send_to(socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) {
    if let Err(e) = socket.send_to(payload, addr) {
        if e.kind() != std::io::ErrorKind::WouldBlock {
            log::error!("udp send to {addr} failed: {e}");
        }
    }
}
