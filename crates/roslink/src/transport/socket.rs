// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking TCP socket wrapper.
//!
//! [`TcpIpSocket`] owns at most one OS handle and never returns `Err` from
//! its I/O operations: each call reports a [`SocketState`] so the protocol
//! processes can branch on "would block", "peer gone" and "hard failure"
//! without unwinding.
//!
//! # Lifecycle
//!
//! ```text
//!   empty --open()--> open --connect()-------> connected (client)
//!                        \--bind_listen()----> listening (server)
//!   listener.accept(&mut empty) -------------> connected (inbound)
//!   any --close()--> empty
//! ```
//!
//! # Error classification
//!
//! | errno                               | state          |
//! |-------------------------------------|----------------|
//! | `EINPROGRESS`, `EALREADY`, `EAGAIN` | `InProgress`   |
//! | `EISCONN`                           | `Done`         |
//! | `ECONNREFUSED`                      | `Refused`      |
//! | `ENOTCONN`, `ECONNRESET`, `EPIPE`   | `Disconnected` |
//! | anything else                       | `Failed`       |

use std::fmt;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};

use crate::buffer::DynBuffer;
use crate::config::READ_CHUNK_SIZE;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Without `MSG_NOSIGNAL`, the per-socket option keeps writes to a closed
/// peer from raising SIGPIPE.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn suppress_sigpipe(socket: &Socket) {
    if let Err(e) = socket.set_nosigpipe(true) {
        log::warn!("[socket] SO_NOSIGPIPE failed: {}", e);
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
fn suppress_sigpipe(_socket: &Socket) {}

/// Outcome of a socket operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Operation completed
    Done,
    /// Would block; retry on the next readiness signal
    InProgress,
    /// Peer closed or reset the connection
    Disconnected,
    /// Unexpected OS error
    Failed,
    /// Connect refused (nobody listening)
    Refused,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketState::Done => write!(f, "Done"),
            SocketState::InProgress => write!(f, "InProgress"),
            SocketState::Disconnected => write!(f, "Disconnected"),
            SocketState::Failed => write!(f, "Failed"),
            SocketState::Refused => write!(f, "Refused"),
        }
    }
}

/// Map an I/O error onto the socket state vocabulary.
pub fn classify_error(err: &io::Error) -> SocketState {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
            return SocketState::InProgress
        }
        io::ErrorKind::ConnectionRefused => return SocketState::Refused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => return SocketState::Disconnected,
        _ => {}
    }
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EALREADY) => SocketState::InProgress,
        Some(libc::EISCONN) => SocketState::Done,
        Some(libc::ECONNREFUSED) => SocketState::Refused,
        Some(libc::ENOTCONN) | Some(libc::ECONNRESET) | Some(libc::EPIPE) => {
            SocketState::Disconnected
        }
        _ => SocketState::Failed,
    }
}

/// Resolve `host:port` to the first IPv4 address.
pub fn resolve_ipv4(host: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(SocketAddr::V4(SocketAddrV4::new(ip, port)));
    }
    (host, port)
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4())
}

/// Non-blocking TCP socket owning at most one OS handle.
#[derive(Debug)]
pub struct TcpIpSocket {
    socket: Option<Socket>,
    port: u16,
    peer: Option<SocketAddr>,
    connected: bool,
    connecting: bool,
    listening: bool,
    non_blocking: bool,
    read_chunk: usize,
    scratch: Vec<u8>,
    /// Whether the handle is currently registered with the event loop poller
    pub(crate) registered: bool,
}

impl Default for TcpIpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpIpSocket {
    pub fn new() -> Self {
        Self::with_read_chunk(READ_CHUNK_SIZE)
    }

    /// Socket whose reads return at most `read_chunk` bytes per call.
    pub fn with_read_chunk(read_chunk: usize) -> Self {
        Self {
            socket: None,
            port: 0,
            peer: None,
            connected: false,
            connecting: false,
            listening: false,
            non_blocking: false,
            read_chunk: read_chunk.max(1),
            scratch: Vec::new(),
            registered: false,
        }
    }

    /// Create the OS handle. Already open is success.
    pub fn open(&mut self) -> bool {
        if self.socket.is_some() {
            return true;
        }
        match Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) => {
                log::trace!("[socket] opened fd {}", socket.as_raw_fd());
                suppress_sigpipe(&socket);
                self.socket = Some(socket);
                true
            }
            Err(e) => {
                log::error!("[socket] socket() failed: {}", e);
                false
            }
        }
    }

    /// Release the handle and return to the empty state.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            log::trace!("[socket] closing fd {}", socket.as_raw_fd());
        }
        self.port = 0;
        self.peer = None;
        self.connected = false;
        self.connecting = false;
        self.listening = false;
        self.non_blocking = false;
        self.registered = false;
    }

    pub fn set_non_blocking(&mut self) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        match socket.set_nonblocking(true) {
            Ok(()) => {
                self.non_blocking = true;
                true
            }
            Err(e) => {
                log::error!("[socket] set_nonblocking failed: {}", e);
                false
            }
        }
    }

    pub fn set_reuse(&self) -> bool {
        self.socket
            .as_ref()
            .map(|s| s.set_reuse_address(true).is_ok())
            .unwrap_or(false)
    }

    pub fn set_no_delay(&self, enable: bool) -> bool {
        self.socket
            .as_ref()
            .map(|s| s.set_nodelay(enable).is_ok())
            .unwrap_or(false)
    }

    /// Enable keep-alive probing (idle and interval in seconds).
    pub fn set_keep_alive(&self, idle: u32, interval: u32, count: u32) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(idle as u64));
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let keepalive = keepalive
            .with_interval(Duration::from_secs(interval as u64))
            .with_retries(count);
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let _ = (interval, count);
        match socket.set_tcp_keepalive(&keepalive) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[socket] keepalive setup failed: {}", e);
                false
            }
        }
    }

    /// Start or complete a non-blocking connect.
    ///
    /// Opens the handle on demand. Repeated calls while a connect is
    /// pending report `InProgress` until the kernel settles it.
    pub fn connect(&mut self, host: &str, port: u16) -> SocketState {
        if self.connected {
            return SocketState::Done;
        }
        if self.socket.is_none() && !(self.open() && self.set_reuse() && self.set_non_blocking())
        {
            return SocketState::Failed;
        }
        let Some(addr) = resolve_ipv4(host, port) else {
            log::error!("[socket] can't resolve {}:{}", host, port);
            return SocketState::Failed;
        };
        let Some(socket) = self.socket.as_ref() else {
            return SocketState::Failed;
        };
        let state = match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => SocketState::Done,
            Err(e) => classify_error(&e),
        };
        match state {
            SocketState::Done => {
                self.connected = true;
                self.connecting = false;
                self.peer = Some(addr);
                log::debug!("[socket] connected to {}", addr);
            }
            SocketState::InProgress => {
                self.connecting = true;
            }
            SocketState::Refused => {
                self.connecting = false;
                log::debug!("[socket] connection to {} refused", addr);
            }
            SocketState::Disconnected | SocketState::Failed => {
                self.connecting = false;
                log::debug!("[socket] connect to {} failed", addr);
                return SocketState::Failed;
            }
        }
        state
    }

    /// Bind and listen. Port 0 picks an ephemeral port. Idempotent.
    pub fn bind_listen(&mut self, host: &str, port: u16, backlog: usize) -> bool {
        if self.listening {
            return true;
        }
        let Some(socket) = self.socket.as_ref() else {
            log::error!("[socket] bind_listen on a closed socket");
            return false;
        };
        let Some(addr) = resolve_ipv4(host, port) else {
            log::error!("[socket] can't get a valid address from {}", host);
            return false;
        };
        if let Err(e) = socket.bind(&SockAddr::from(addr)) {
            log::error!("[socket] bind {} failed: {}", addr, e);
            return false;
        }
        if let Err(e) = socket.listen(backlog.min(i32::MAX as usize) as i32) {
            log::error!("[socket] listen failed: {}", e);
            return false;
        }
        let bound = socket.local_addr().ok().and_then(|a| a.as_socket());
        let Some(bound) = bound else {
            log::error!("[socket] getsockname failed");
            return false;
        };
        self.port = bound.port();
        self.listening = true;
        true
    }

    /// Accept one pending connection into `into` (which is reset first).
    pub fn accept(&self, into: &mut TcpIpSocket) -> SocketState {
        into.close();
        let Some(socket) = self.socket.as_ref().filter(|_| self.listening) else {
            log::error!("[socket] accept on a socket that is not listening");
            return SocketState::Failed;
        };
        match socket.accept() {
            Ok((accepted, addr)) => {
                suppress_sigpipe(&accepted);
                into.socket = Some(accepted);
                into.connected = true;
                into.port = self.port;
                into.peer = addr.as_socket();
                SocketState::Done
            }
            Err(e) => match classify_error(&e) {
                SocketState::InProgress => SocketState::InProgress,
                _ => {
                    log::error!("[socket] accept failed: {}", e);
                    SocketState::Failed
                }
            },
        }
    }

    /// Send the unread part of `buf`, advancing its cursor.
    pub fn write_buffer(&mut self, buf: &mut DynBuffer) -> SocketState {
        if !self.connected {
            log::error!("[socket] write on a socket that is not connected");
            return SocketState::Failed;
        }
        let Some(socket) = self.socket.as_ref() else {
            return SocketState::Failed;
        };
        while buf.remaining() > 0 {
            match socket.send_with_flags(buf.data(), SEND_FLAGS) {
                Ok(0) => return SocketState::InProgress,
                Ok(n) => {
                    log::trace!("[socket] sent {} bytes", n);
                    buf.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let state = classify_error(&e);
                    match state {
                        SocketState::InProgress => {
                            log::trace!("[socket] write would block, {} left", buf.remaining());
                        }
                        SocketState::Disconnected => {
                            self.connected = false;
                        }
                        _ => log::error!("[socket] send failed: {}", e),
                    }
                    return match state {
                        SocketState::InProgress | SocketState::Disconnected => state,
                        _ => SocketState::Failed,
                    };
                }
            }
        }
        SocketState::Done
    }

    /// One read of up to `max_size` bytes (capped by the read chunk),
    /// appended to `buf`. Returns the state and the byte count.
    pub fn read_buffer_ex(&mut self, buf: &mut DynBuffer, max_size: usize) -> (SocketState, usize) {
        if !self.connected {
            log::error!("[socket] read on a socket that is not connected");
            return (SocketState::Failed, 0);
        }
        if max_size == 0 {
            return (SocketState::Done, 0);
        }
        let limit = max_size.min(self.read_chunk);
        if self.scratch.len() < limit {
            self.scratch.resize(limit, 0);
        }
        let Some(socket) = self.socket.as_mut() else {
            return (SocketState::Failed, 0);
        };
        match socket.read(&mut self.scratch[..limit]) {
            Ok(0) => {
                log::debug!("[socket] peer closed");
                self.connected = false;
                (SocketState::Disconnected, 0)
            }
            Ok(n) => {
                log::trace!("[socket] read {} bytes", n);
                buf.push_back(&self.scratch[..n]);
                (SocketState::Done, n)
            }
            Err(e) => match classify_error(&e) {
                SocketState::InProgress | SocketState::Done => (SocketState::InProgress, 0),
                SocketState::Disconnected => {
                    self.connected = false;
                    (SocketState::Disconnected, 0)
                }
                _ => {
                    log::error!("[socket] recv failed: {}", e);
                    (SocketState::Failed, 0)
                }
            },
        }
    }

    /// One read of up to one chunk.
    pub fn read_buffer(&mut self, buf: &mut DynBuffer) -> SocketState {
        let chunk = self.read_chunk;
        self.read_buffer_ex(buf, chunk).0
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// A non-blocking connect was started and has not settled.
    pub fn is_connecting(&self) -> bool {
        self.connecting && !self.connected
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    /// Bound port (listeners) or the listener's port (accepted sockets).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }
}

// ============================================================================
// Tests
// ============================================================================
