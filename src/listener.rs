//! InboundListener - receives device status frames and applies them to state
//!
//! Binds the receive port with `SO_REUSEADDR`, then loops on a bounded
//! `recv_from` so the shutdown token is checked at least once per timeout.
//! Only response frames (device-originated status) are routed; everything
//! else on the bus is noise and is dropped silently.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{format_hex, Command, Direction, Frame};
use crate::shutdown::Shutdown;
use crate::state::{Event, StateStore, SystemState, MAX_FUNCTION};

/// Receive buffer size; anything longer than a frame is rejected anyway
const RECV_BUFFER_LEN: usize = 2048;

/// Pause after a receive error before trying again
pub(crate) const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bind a UDP socket with address reuse enabled
pub fn bind_reusable(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Decode one datagram and apply it to the store
///
/// Returns the command that was applied, or `None` if the datagram was
/// dropped (bad length, request frame, unknown command, short DLC, or an
/// out-of-range value).
pub fn route_datagram(store: &StateStore, datagram: &[u8]) -> Option<Command> {
    let frame = match Frame::decode(datagram) {
        Ok(frame) => frame,
        Err(e) => {
            trace!("Dropped datagram: {}", e);
            return None;
        }
    };
    if !frame.is_response() {
        return None;
    }
    let command = frame.command()?;
    if frame.dlc < command.min_response_dlc() {
        trace!("Dropped short {} frame (dlc={})", command, frame.dlc);
        return None;
    }

    let data = &frame.data;
    match command {
        Command::System => {
            let state = SystemState::from_sub_code(data[4])?;
            store.set_system_state(state);
        }
        Command::Speed => {
            let speed = u16::from_be_bytes([data[4], data[5]]);
            store.set_loco_speed(frame.uid(), speed);
        }
        Command::Direction => {
            let direction = Direction::from_code(data[4])?;
            store.set_loco_direction(frame.uid(), direction);
        }
        Command::Function => {
            let index = data[4];
            if index > MAX_FUNCTION {
                return None;
            }
            let active = if frame.dlc >= 6 { data[5] != 0 } else { true };
            store.set_loco_function(frame.uid(), index, active);
        }
        Command::Switch => {
            store.set_switch(data[3] as i64, data[4] as i64);
        }
    }
    Some(command)
}

/// Lifecycle of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, not yet bound
    Idle,
    /// Bound and receiving
    Listening,
    /// Stopped by shutdown or bind failure
    Stopped,
}

/// Receives device frames on a background thread
pub struct InboundListener {
    store: Arc<StateStore>,
    bind_addr: SocketAddr,
    recv_timeout: Duration,
    shutdown: Shutdown,
}

impl InboundListener {
    pub fn new(
        store: Arc<StateStore>,
        bind_addr: SocketAddr,
        recv_timeout: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            bind_addr,
            recv_timeout,
            shutdown,
        }
    }

    /// Bind the socket and start the receive thread
    ///
    /// A bind failure is not an error here: it is published as an `error`
    /// event and the returned handle is already [`ListenerState::Stopped`].
    /// Only a failure to spawn the thread is returned.
    pub fn spawn(self) -> io::Result<ListenerHandle> {
        let state = Arc::new(Mutex::new(ListenerState::Idle));

        let socket = match bind_reusable(self.bind_addr)
            .and_then(|s| s.set_read_timeout(Some(self.recv_timeout)).map(|_| s))
        {
            Ok(socket) => socket,
            Err(e) => {
                error!("UDP bind on {} failed: {}", self.bind_addr, e);
                self.store
                    .publish(&Event::error(format!("UDP bind failed: {}", e)));
                *state.lock() = ListenerState::Stopped;
                return Ok(ListenerHandle {
                    state,
                    local_addr: None,
                    thread: None,
                });
            }
        };
        let local_addr = socket.local_addr().ok();
        *state.lock() = ListenerState::Listening;
        info!("Listening for CS2 frames on {}", local_addr.unwrap_or(self.bind_addr));

        let thread_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("cs2-listener".to_string())
            .spawn(move || {
                self.run(socket);
                *thread_state.lock() = ListenerState::Stopped;
                info!("CS2 listener stopped");
            });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                *state.lock() = ListenerState::Stopped;
                return Err(e);
            }
        };

        Ok(ListenerHandle {
            state,
            local_addr,
            thread: Some(thread),
        })
    }

    fn run(&self, socket: UdpSocket) {
        let mut buf = [0u8; RECV_BUFFER_LEN];
        while !self.shutdown.is_triggered() {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    let datagram = &buf[..len];
                    trace!("RX {} <- {}", format_hex(datagram), peer);
                    if let Some(command) = route_datagram(&self.store, datagram) {
                        debug!(command = %command, "Applied inbound frame from {}", peer);
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    warn!("UDP recv error: {}", e);
                    self.store
                        .publish(&Event::error(format!("UDP recv error: {}", e)));
                    self.shutdown.wait_timeout(RECV_ERROR_BACKOFF);
                }
            }
        }
    }
}

/// Handle to a spawned listener
pub struct ListenerHandle {
    state: Arc<Mutex<ListenerState>>,
    local_addr: Option<SocketAddr>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    /// Bound address, if the bind succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Wait for the receive thread to exit (after shutdown was triggered)
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("CS2 listener thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBus, Subscription};
    use crate::protocol::{build_identifier, FRAME_LEN};

    fn setup() -> (Arc<StateStore>, Subscription) {
        let bus = Arc::new(EventBus::new());
        let sub = bus.subscribe();
        (Arc::new(StateStore::new(bus)), sub)
    }

    fn response(command: Command, dlc: u8, data: [u8; 8]) -> [u8; FRAME_LEN] {
        Frame {
            identifier: build_identifier(0, command.code(), 0, true),
            dlc,
            data,
        }
        .encode()
    }

    fn events(sub: &Subscription) -> Vec<Event> {
        sub.drain()
            .iter()
            .map(|m| serde_json::from_str(m).unwrap())
            .collect()
    }

    #[test]
    fn test_wrong_length_is_dropped() {
        let (store, sub) = setup();
        let frame = response(Command::Speed, 6, [0, 0, 0, 1, 0, 10, 0, 0]);

        assert_eq!(route_datagram(&store, &frame[..12]), None);
        let mut long = frame.to_vec();
        long.push(0);
        assert_eq!(route_datagram(&store, &long), None);
        assert_eq!(route_datagram(&store, &[]), None);

        assert!(sub.is_empty());
        assert_eq!(store.loco_count(), 0);
    }

    #[test]
    fn test_system_go_publishes_once() {
        let (store, sub) = setup();
        let frame = response(Command::System, 5, [0, 0, 0, 0, 1, 0, 0, 0]);

        assert_eq!(route_datagram(&store, &frame), Some(Command::System));
        assert_eq!(route_datagram(&store, &frame), Some(Command::System));

        assert_eq!(store.system_state(), SystemState::Running);
        assert_eq!(events(&sub), vec![Event::System { status: 1 }]);
    }

    #[test]
    fn test_request_frames_are_ignored() {
        let (store, sub) = setup();
        let frame = Frame::request(
            0,
            &crate::protocol::Request::Speed {
                loc_id: 1,
                speed: 10,
            },
        )
        .encode();

        assert_eq!(route_datagram(&store, &frame), None);
        assert!(sub.is_empty());
    }

    #[test]
    fn test_short_dlc_and_unknown_command_are_ignored() {
        let (store, sub) = setup();
        assert_eq!(
            route_datagram(&store, &response(Command::Speed, 5, [0, 0, 0, 1, 0, 10, 0, 0])),
            None
        );
        let unknown = Frame {
            identifier: build_identifier(0, 0x31, 0, true),
            dlc: 8,
            data: [0; 8],
        }
        .encode();
        assert_eq!(route_datagram(&store, &unknown), None);
        assert!(sub.is_empty());
    }

    #[test]
    fn test_loco_frames() {
        let (store, sub) = setup();

        route_datagram(&store, &response(Command::Speed, 6, [0, 0, 0x40, 0x06, 0x01, 0xF4, 0, 0]));
        route_datagram(&store, &response(Command::Direction, 5, [0, 0, 0x40, 0x06, 2, 0, 0, 0]));
        route_datagram(&store, &response(Command::Function, 5, [0, 0, 0x40, 0x06, 4, 0, 0, 0]));
        route_datagram(&store, &response(Command::Function, 6, [0, 0, 0x40, 0x06, 5, 0, 0, 0]));

        let st = store.snapshot_loco(0x4006).unwrap();
        assert_eq!(st.speed, 500);
        assert_eq!(st.direction, Direction::Reverse);
        assert_eq!(st.functions.get(&4), Some(&true));
        assert_eq!(st.functions.get(&5), Some(&false));
        assert_eq!(sub.len(), 4);
    }

    #[test]
    fn test_invalid_direction_and_function_are_ignored() {
        let (store, sub) = setup();
        assert_eq!(
            route_datagram(&store, &response(Command::Direction, 5, [0, 0, 0, 1, 9, 0, 0, 0])),
            None
        );
        assert_eq!(
            route_datagram(&store, &response(Command::Function, 6, [0, 0, 0, 1, 40, 1, 0, 0])),
            None
        );
        assert!(sub.is_empty());
    }

    #[test]
    fn test_switch_frame() {
        let (store, sub) = setup();
        route_datagram(&store, &response(Command::Switch, 6, [0, 0, 0x30, 0x02, 1, 1, 0, 0]));

        assert_eq!(store.snapshot_switches()[2], 1);
        assert_eq!(events(&sub), vec![Event::Switch { idx: 2, value: 1 }]);

        // index byte beyond the switch table
        route_datagram(&store, &response(Command::Switch, 6, [0, 0, 0x30, 0x50, 1, 1, 0, 0]));
        assert!(sub.is_empty());
    }

    #[test]
    fn test_listener_over_loopback() {
        let (store, sub) = setup();
        let shutdown = Shutdown::new();
        let handle = InboundListener::new(
            Arc::clone(&store),
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(50),
            shutdown.clone(),
        )
        .spawn()
        .unwrap();
        assert_eq!(handle.state(), ListenerState::Listening);

        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.send_to(b"noise", handle.local_addr().unwrap()).unwrap();
        tx.send_to(
            &response(Command::Speed, 6, [0, 0, 0, 7, 0, 42, 0, 0]),
            handle.local_addr().unwrap(),
        )
        .unwrap();

        let msg = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(&*msg, r#"{"type":"speed","loc_id":7,"value":42}"#);

        shutdown.trigger();
        let state = Arc::clone(&handle.state);
        handle.join();
        assert_eq!(*state.lock(), ListenerState::Stopped);
    }

    #[test]
    fn test_bind_failure_publishes_error() {
        let (store, sub) = setup();
        let handle = InboundListener::new(
            store,
            "192.0.2.1:0".parse().unwrap(),
            Duration::from_millis(50),
            Shutdown::new(),
        )
        .spawn()
        .unwrap();

        assert_eq!(handle.state(), ListenerState::Stopped);
        assert!(handle.local_addr().is_none());
        match &events(&sub)[..] {
            [Event::Error { message }] => assert!(message.starts_with("UDP bind failed: ")),
            other => panic!("unexpected events: {:?}", other),
        }
    }
}
