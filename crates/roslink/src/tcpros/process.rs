// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed connection slot shared by the streaming (TCPROS) and
//! service (RPCROS) roles.
//!
//! The role modules own the transitions; this type owns the socket, the
//! packet buffer, the `left_to_recv` counter and the timestamps, and
//! provides the two-phase size/body read every role uses.

use crate::buffer::DynBuffer;
use crate::process::{is_stalled, Watch, MAX_STEPS_PER_DISPATCH};
use crate::slot::SlotId;
use crate::transport::{decode_len, read_exact_step, ReadStep, StreamIo, TcpIpSocket, FRAME_HEADER_SIZE};
use crate::uri::Endpoint;

/// Streaming/service connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcprosState {
    Idle,
    /// Client: connect in progress
    Connecting,
    WritingHeader,
    ReadingHeaderSize,
    ReadingHeader,
    /// Reading the 4-byte length of the next message/request/response
    ReadingSize,
    /// Reading the body announced by `ReadingSize`
    Reading,
    /// Waiting for the cycle timer (or an expedite) before producing data
    WaitForWriting,
    /// Producing the next frame
    StartWriting,
    Writing,
    /// Service caller: reading the one-byte ok flag of a response
    ReadingOk,
}

impl TcprosState {
    /// States that wait on the wire (subject to stall detection).
    pub fn is_io(self) -> bool {
        !matches!(self, TcprosState::Idle | TcprosState::WaitForWriting)
    }
}

/// Outcome of one read toward the current unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Unit {
    /// `left_to_recv` bytes are in the packet buffer
    Ready,
    /// Some or no bytes arrived; wait for the next readiness
    Pending,
    /// Error path taken (slot Idle)
    Lost,
}

/// One streaming or service connection slot.
#[derive(Debug)]
pub struct TcprosProcess<S = TcpIpSocket> {
    pub(crate) socket: S,
    state: TcprosState,
    pub(crate) packet: DynBuffer,
    pub(crate) left_to_recv: usize,
    last_change: u64,
    /// Next cycle (publisher server, service caller)
    pub wake_at: u64,
    /// Registration this slot serves
    pub topic: Option<SlotId>,
    /// Service connection only exchanges headers
    pub probe: bool,
    /// Service connection loops request/response
    pub persistent: bool,
    /// Next publish-queue sequence to send (publisher server)
    pub send_cursor: u64,
    pub tcp_nodelay: bool,
    /// Where a client slot connects
    pub target: Option<Endpoint>,
    /// `callerid` announced by the peer
    pub peer_id: String,
    /// Ok flag of the service response being read
    pub(crate) ok: bool,
    /// Set by the error path, cleared by [`TcprosProcess::take_failed`]
    failed: bool,
    max_frame: usize,
}

impl<S: StreamIo> TcprosProcess<S> {
    pub fn new(socket: S, max_frame: usize) -> Self {
        Self {
            socket,
            state: TcprosState::Idle,
            packet: DynBuffer::new(),
            left_to_recv: 0,
            last_change: 0,
            wake_at: 0,
            topic: None,
            probe: false,
            persistent: false,
            send_cursor: 0,
            tcp_nodelay: false,
            target: None,
            peer_id: String::new(),
            ok: false,
            failed: false,
            max_frame,
        }
    }

    pub fn state(&self) -> TcprosState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TcprosState::Idle
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn last_change(&self) -> u64 {
        self.last_change
    }

    pub(crate) fn set_state(&mut self, state: TcprosState, now: u64) {
        if self.state != state {
            log::debug!("[tcpros] {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.last_change = now;
    }

    /// Clear and go Idle. The registration binding of client slots stays.
    pub fn reset(&mut self, now: u64) {
        self.socket.close();
        self.packet.clear();
        self.left_to_recv = 0;
        self.probe = false;
        self.persistent = false;
        self.ok = false;
        self.target = None;
        self.peer_id.clear();
        self.set_state(TcprosState::Idle, now);
    }

    /// Error path: reset and remember the failure.
    pub fn fail(&mut self, now: u64) {
        self.failed = true;
        self.reset(now);
    }

    /// Whether the error path ran since the last call.
    pub fn take_failed(&mut self) -> bool {
        std::mem::take(&mut self.failed)
    }

    /// Begin serving a freshly accepted connection (header size first).
    pub fn start_server(&mut self, now: u64) {
        self.packet.clear();
        self.topic = None;
        self.send_cursor = 0;
        self.tcp_nodelay = false;
        self.probe = false;
        self.persistent = false;
        self.wake_at = now;
        self.expect(FRAME_HEADER_SIZE, TcprosState::ReadingHeaderSize, now);
    }

    /// Arm a client slot toward `target`.
    pub fn start_client(&mut self, target: Endpoint, now: u64) {
        self.packet.clear();
        self.target = Some(target);
        self.failed = false;
        self.set_state(TcprosState::Connecting, now);
    }

    /// Clear the packet buffer and wait for `len` bytes in `state`.
    pub(crate) fn expect(&mut self, len: usize, state: TcprosState, now: u64) {
        self.packet.clear();
        self.left_to_recv = len;
        self.set_state(state, now);
    }

    /// One read toward the current unit.
    pub(crate) fn read_unit(&mut self, now: u64) -> Unit {
        match read_exact_step(&mut self.socket, &mut self.packet, &mut self.left_to_recv) {
            ReadStep::Complete => Unit::Ready,
            ReadStep::Progress | ReadStep::Blocked => Unit::Pending,
            ReadStep::Closed => {
                log::debug!("[tcpros] peer closed in {:?}", self.state);
                self.reset(now);
                Unit::Lost
            }
            ReadStep::Failed => {
                log::error!("[tcpros] read failed in {:?}", self.state);
                self.fail(now);
                Unit::Lost
            }
        }
    }

    /// Decode the length prefix held in the packet buffer.
    ///
    /// Lengths above the frame ceiling take the error path.
    pub(crate) fn take_size(&mut self, now: u64) -> Option<usize> {
        let Some(len) = decode_len(self.packet.data()) else {
            self.fail(now);
            return None;
        };
        let len = len as usize;
        if len > self.max_frame {
            log::error!("[tcpros] frame of {} bytes exceeds {}", len, self.max_frame);
            self.fail(now);
            return None;
        }
        Some(len)
    }

    /// Flush the packet buffer. `Some(true)` when done, `Some(false)` when
    /// the socket would block, `None` after the error path.
    pub(crate) fn flush(&mut self, now: u64) -> Option<bool> {
        use crate::transport::SocketState;
        match self.socket.write_buffer(&mut self.packet) {
            SocketState::Done => {
                self.packet.clear();
                Some(true)
            }
            SocketState::InProgress => Some(false),
            SocketState::Disconnected => {
                log::debug!("[tcpros] peer closed in {:?}", self.state);
                self.reset(now);
                None
            }
            state => {
                log::error!("[tcpros] write failed in {:?}: {}", self.state, state);
                self.fail(now);
                None
            }
        }
    }

    /// Start (or finish) a connect. `Some(true)` once connected.
    pub(crate) fn connect(&mut self, now: u64) -> Option<bool> {
        use crate::transport::SocketState;
        let Some(target) = self.target.as_ref() else {
            log::error!("[tcpros] client slot armed without a target");
            self.fail(now);
            return None;
        };
        match self.socket.connect(&target.host, target.port) {
            SocketState::Done => Some(true),
            SocketState::InProgress => Some(false),
            state => {
                log::warn!("[tcpros] connect to {} failed: {}", target, state);
                self.fail(now);
                None
            }
        }
    }

    /// Drop bytes a peer sends while the slot waits for its cycle, so the
    /// socket stops reporting readable. `false` once the slot went Idle.
    pub(crate) fn discard_pending(&mut self, now: u64) -> bool {
        use crate::transport::SocketState;
        let mut sink = DynBuffer::new();
        for _ in 0..MAX_STEPS_PER_DISPATCH {
            sink.clear();
            match self.socket.read_buffer(&mut sink) {
                SocketState::Done => {
                    log::debug!(
                        "[tcpros] dropped {} unsolicited bytes in {:?}",
                        sink.len(),
                        self.state
                    );
                }
                SocketState::InProgress => return true,
                SocketState::Disconnected => {
                    log::debug!("[tcpros] peer closed in {:?}", self.state);
                    self.reset(now);
                    return false;
                }
                state => {
                    log::error!("[tcpros] read failed in {:?}: {}", self.state, state);
                    self.fail(now);
                    return false;
                }
            }
        }
        true
    }

    pub fn watch(&self) -> Watch {
        match self.state {
            TcprosState::Idle => Watch::None,
            TcprosState::Connecting if self.socket.is_connecting() => Watch::Write,
            TcprosState::Connecting | TcprosState::StartWriting => Watch::Immediate,
            TcprosState::WritingHeader | TcprosState::Writing => Watch::Write,
            TcprosState::ReadingHeaderSize
            | TcprosState::ReadingHeader
            | TcprosState::ReadingSize
            | TcprosState::Reading
            | TcprosState::ReadingOk => Watch::Read,
            TcprosState::WaitForWriting => Watch::ErrorOnly,
        }
    }

    /// Cycle timer of a waiting slot has expired.
    pub fn is_due(&self, now: u64) -> bool {
        self.state == TcprosState::WaitForWriting && now >= self.wake_at
    }

    pub fn is_stalled(&self, now: u64, ceiling: u64) -> bool {
        self.state.is_io() && is_stalled(now, self.last_change, ceiling)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stream::mock::MockStream;

    #[test]
    fn test_server_start_expects_header_size() {
        let mut process = TcprosProcess::new(MockStream::connected(), 1024);
        process.start_server(7);
        assert_eq!(process.state(), TcprosState::ReadingHeaderSize);
        assert_eq!(process.left_to_recv, 4);
        assert_eq!(process.wake_at, 7);
        assert_eq!(process.watch(), Watch::Read);
    }

    #[test]
    fn test_take_size_ceiling() {
        let mut process = TcprosProcess::new(MockStream::connected(), 16);
        process.start_server(0);
        process.socket.feed(&[17, 0, 0, 0]);
        assert_eq!(process.read_unit(0), Unit::Ready);
        assert_eq!(process.take_size(0), None);
        assert!(process.is_idle());
        assert!(process.take_failed());
        assert!(!process.take_failed());
    }

    #[test]
    fn test_peer_reset_goes_idle() {
        let mut process = TcprosProcess::new(MockStream::connected(), 16);
        process.start_server(0);
        process.socket.feed(&[1, 0]);
        process.socket.reset();
        assert_eq!(process.read_unit(0), Unit::Pending);
        assert_eq!(process.read_unit(0), Unit::Lost);
        assert!(process.is_idle());
        assert!(!process.socket.is_open());
    }

    #[test]
    fn test_connect_watch() {
        let mut socket = MockStream::new();
        socket.script_connect(crate::transport::SocketState::InProgress);
        let mut process = TcprosProcess::new(socket, 16);
        process.start_client(Endpoint::new("tcpros", "h", 1), 0);
        assert_eq!(process.watch(), Watch::Immediate);
        assert_eq!(process.connect(0), Some(false));
        assert_eq!(process.watch(), Watch::Write);
        assert_eq!(process.connect(1), Some(true));
    }

    #[test]
    fn test_waiting_slot_discards_stray_bytes() {
        let mut process = TcprosProcess::new(MockStream::connected(), 16);
        process.start_server(0);
        process.set_state(TcprosState::WaitForWriting, 0);
        process.socket.feed(b"junk");
        process.socket.feed(b"more junk");
        process.socket.would_block();

        assert!(process.discard_pending(5));
        assert_eq!(process.socket.pending_reads(), 0);
        assert_eq!(process.state(), TcprosState::WaitForWriting);
        assert!(process.packet.is_empty());
        assert!(!process.take_failed());
    }

    #[test]
    fn test_waiting_slot_resets_on_hang_up() {
        let mut process = TcprosProcess::new(MockStream::connected(), 16);
        process.start_server(0);
        process.set_state(TcprosState::WaitForWriting, 0);
        process.socket.feed(b"bye");
        process.socket.reset();

        assert!(!process.discard_pending(5));
        assert!(process.is_idle());
        assert!(!process.socket.is_open());
        assert!(!process.take_failed());
    }

    #[test]
    fn test_stall_only_in_io_states() {
        let mut process = TcprosProcess::new(MockStream::connected(), 16);
        assert!(!process.is_stalled(10_000, 10));
        process.start_server(0);
        assert!(process.is_stalled(11, 10));
        process.set_state(TcprosState::WaitForWriting, 0);
        assert!(!process.is_stalled(10_000, 10));
        assert_eq!(process.watch(), Watch::ErrorOnly);
    }
}
