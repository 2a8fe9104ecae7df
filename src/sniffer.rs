//! CS2 frame sniffer for debugging and development
//!
//! Binds the receive port and prints every datagram, decoded where possible.
//! Nothing is routed into state.

use anyhow::{Context, Result};
use colored::*;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

use crate::listener::{bind_reusable, RECV_ERROR_BACKOFF};
use crate::protocol::{format_hex, Command, Frame};
use crate::shutdown::Shutdown;

/// Run the CLI sniffer until `shutdown` is triggered
pub fn run_cli_sniffer(bind: SocketAddr, recv_timeout: Duration, shutdown: Shutdown) -> Result<()> {
    let socket =
        bind_reusable(bind).with_context(|| format!("Failed to bind sniffer socket on {}", bind))?;
    socket
        .set_read_timeout(Some(recv_timeout))
        .context("Failed to set sniffer read timeout")?;

    println!("{}", "=== CS2 Frame Sniffer ===".bold().cyan());
    println!("Listening on {} - press Ctrl+C to exit\n", bind);
    println!(
        "{}",
        "Format: [timestamp] DIR PEER | HEX => PARSED".dimmed()
    );
    println!("{}\n", "─".repeat(80).dimmed());
    info!("Sniffer bound to {}", bind);

    let start = Instant::now();
    let mut buf = [0u8; 2048];
    while !shutdown.is_triggered() {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                println!("{}", format_line(elapsed, peer, &buf[..len]));
            }
            Err(e) => on_recv_error(&e, &shutdown),
        }
    }

    println!("\n{}", "Sniffer stopped".yellow());
    Ok(())
}

/// Report a failed receive; real errors pause before the next attempt
fn on_recv_error(e: &io::Error, shutdown: &Shutdown) {
    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
        return;
    }
    eprintln!("{} {}", "recv error:".red(), e);
    shutdown.wait_timeout(RECV_ERROR_BACKOFF);
}

/// Render one datagram as a sniffer line
pub fn format_line(timestamp_ms: u64, peer: SocketAddr, datagram: &[u8]) -> String {
    let timestamp = format!("{:08}", timestamp_ms);
    let hex = format_hex(datagram);

    let (dir, hex_colored, parsed) = match Frame::decode(datagram) {
        Ok(frame) => {
            let dir = if frame.is_response() {
                "RSP".green()
            } else {
                "REQ".yellow()
            };
            let hex_colored = match frame.command() {
                Some(Command::System) => hex.bright_magenta(),
                Some(Command::Speed) => hex.bright_green(),
                Some(Command::Direction) => hex.bright_cyan(),
                Some(Command::Function) => hex.bright_yellow(),
                Some(Command::Switch) => hex.bright_blue(),
                None => hex.normal(),
            };
            let parsed = format!(" => {}", frame.to_string().bright_blue());
            (dir, hex_colored, parsed)
        }
        Err(e) => ("???".red(), hex.bright_black(), format!(" => {}", e.to_string().red())),
    };

    format!(
        "[{}ms] {} {:21} | {}{}",
        timestamp.dimmed(),
        dir,
        peer.to_string().white(),
        hex_colored,
        parsed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_identifier;

    #[test]
    fn test_format_line() {
        colored::control::set_override(false);
        let peer: SocketAddr = "192.168.1.50:15731".parse().unwrap();

        let frame = Frame {
            identifier: build_identifier(0, Command::Speed.code(), 0, true),
            dlc: 6,
            data: [0, 0, 0x40, 0x06, 0x01, 0xF4, 0, 0],
        };
        let line = format_line(12, peer, &frame.encode());
        assert!(line.starts_with("[00000012ms] RSP 192.168.1.50:15731"));
        assert!(line.contains("| 00 09 03 00 06 00 00 40 06 01 F4 00 00"));
        assert!(line.contains("=> SPEED RSP hash=0x0300 dlc=6"));

        let bad = format_line(0, peer, &[1, 2, 3]);
        assert!(bad.contains("???"));
        assert!(bad.contains("got 3"));
    }

    #[test]
    fn test_recv_error_backs_off() {
        let shutdown = Shutdown::new();

        let start = Instant::now();
        on_recv_error(&io::Error::from(io::ErrorKind::ConnectionRefused), &shutdown);
        assert!(start.elapsed() >= RECV_ERROR_BACKOFF - Duration::from_millis(10));

        let start = Instant::now();
        on_recv_error(&io::Error::from(io::ErrorKind::WouldBlock), &shutdown);
        assert!(start.elapsed() < RECV_ERROR_BACKOFF);

        shutdown.trigger();
        let start = Instant::now();
        on_recv_error(&io::Error::from(io::ErrorKind::ConnectionRefused), &shutdown);
        assert!(start.elapsed() < RECV_ERROR_BACKOFF);
    }
}
