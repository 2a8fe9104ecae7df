//! Outbound frame transport

use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::trace;

use crate::protocol::{format_hex, FRAME_LEN};

/// Destination for encoded outbound frames
pub trait FrameSink: Send + Sync {
    /// Send one 13-byte datagram
    fn send_frame(&self, datagram: &[u8; FRAME_LEN]) -> io::Result<()>;
}

/// Sends frames to the device over UDP from an ephemeral local port
pub struct UdpSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSender {
    /// Bind an ephemeral socket for sending to `target`
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self { socket, target })
    }

    /// Device address frames are sent to
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl FrameSink for UdpSender {
    fn send_frame(&self, datagram: &[u8; FRAME_LEN]) -> io::Result<()> {
        trace!("TX {} -> {}", format_hex(datagram), self.target);
        self.socket.send_to(datagram, self.target)?;
        Ok(())
    }
}
