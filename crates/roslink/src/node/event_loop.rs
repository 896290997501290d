// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One iteration of the node loop.
//!
//! ```text
//! spin_once(budget)
//!   fire timers           master ping, publish and caller cycles, reconnects
//!   arm interests         every polled socket is re-registered, so readiness
//!                         behaves level-triggered on top of mio
//!   poll                  min(budget, next wake), 0 when a slot is Immediate
//!   dispatch              accept, error path, or up to MAX_STEPS_PER_DISPATCH
//!                         transitions of the ready slot
//!   step Immediate slots, fire timers, reset stalled slots
//! ```
//!
//! Tokens encode `table * TABLE_STRIDE + slot index`.

use std::io;
use std::time::Duration;

use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};

use crate::api::calls;
use crate::clock::Clock;
use crate::config::ACCEPT_KEEPALIVE;
use crate::error::Result;
use crate::process::{Flow, Watch, MAX_STEPS_PER_DISPATCH};
use crate::slot::{SlotId, SlotTable};
use crate::tcpros::TcprosProcess;
use crate::transport::{SocketState, TcpIpSocket};
use crate::xmlrpc::{ClientStep, ServerStep, XmlRpcProcess};

use super::Node;

/// Readiness events handled per poll
pub const MAX_EVENTS: usize = 128;

const TABLE_STRIDE: usize = 1 << 16;

/// Token namespace of each socket family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Table {
    XmlRpcListener,
    TcprosListener,
    RpcrosListener,
    XmlRpcClient,
    XmlRpcServer,
    TcprosClient,
    TcprosServer,
    RpcrosClient,
    RpcrosServer,
}

const TABLES: [Table; 9] = [
    Table::XmlRpcListener,
    Table::TcprosListener,
    Table::RpcrosListener,
    Table::XmlRpcClient,
    Table::XmlRpcServer,
    Table::TcprosClient,
    Table::TcprosServer,
    Table::RpcrosClient,
    Table::RpcrosServer,
];

/// Tables of connection slots, in dispatch order.
const SLOT_TABLES: [Table; 6] = [
    Table::XmlRpcClient,
    Table::XmlRpcServer,
    Table::TcprosClient,
    Table::TcprosServer,
    Table::RpcrosClient,
    Table::RpcrosServer,
];

fn token(table: Table, index: usize) -> Token {
    Token(table as usize * TABLE_STRIDE + index)
}

fn decode(token: Token) -> Option<(Table, SlotId)> {
    let table = TABLES.get(token.0 / TABLE_STRIDE)?;
    Some((*table, SlotId::new(token.0 % TABLE_STRIDE)))
}

/// Readiness of one event, copied out of mio's buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub read_closed: bool,
    pub write_closed: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
        }
    }
}

/// A slot whose socket takes part in polling.
trait Polled {
    fn watch(&self) -> Watch;
    fn socket_mut(&mut self) -> &mut TcpIpSocket;
}

impl Polled for XmlRpcProcess {
    fn watch(&self) -> Watch {
        XmlRpcProcess::watch(self)
    }

    fn socket_mut(&mut self) -> &mut TcpIpSocket {
        &mut self.socket
    }
}

impl Polled for TcprosProcess {
    fn watch(&self) -> Watch {
        TcprosProcess::watch(self)
    }

    fn socket_mut(&mut self) -> &mut TcpIpSocket {
        &mut self.socket
    }
}

/// Bring the registration of `socket` in line with `watch`.
fn apply_interest(registry: &Registry, socket: &mut TcpIpSocket, token: Token, watch: Watch) {
    let Some(fd) = socket.raw_fd() else {
        socket.registered = false;
        return;
    };
    let interest = match watch {
        Watch::Read | Watch::ErrorOnly => Some(Interest::READABLE),
        Watch::Write => Some(Interest::WRITABLE),
        Watch::None | Watch::Immediate => None,
    };
    let mut source = SourceFd(&fd);
    match interest {
        Some(interest) if socket.registered => {
            if let Err(e) = registry.reregister(&mut source, token, interest) {
                log::warn!("[node] reregister fd {} failed: {}", fd, e);
                socket.registered = false;
            }
        }
        Some(interest) => match registry.register(&mut source, token, interest) {
            Ok(()) => socket.registered = true,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                socket.registered = registry.reregister(&mut source, token, interest).is_ok();
            }
            Err(e) => log::warn!("[node] register fd {} failed: {}", fd, e),
        },
        None if socket.registered => {
            let _ = registry.deregister(&mut source);
            socket.registered = false;
        }
        None => {}
    }
}

fn arm_table<P: Polled>(registry: &Registry, table: &mut SlotTable<P>, kind: Table) {
    for (id, process) in table.iter_mut() {
        let watch = process.watch();
        apply_interest(registry, process.socket_mut(), token(kind, id.index()), watch);
    }
}

/// Accept every pending connection into Idle slots of `table`.
fn accept_into(
    listener: &TcpIpSocket,
    table: &mut SlotTable<TcprosProcess>,
    what: &str,
    now: u64,
) {
    while let Some(id) = table.first_where(|p| p.is_idle()) {
        let Some(process) = table.get_mut(id) else {
            break;
        };
        if listener.accept(&mut process.socket) != SocketState::Done {
            break;
        }
        if !process.socket.set_non_blocking() {
            process.socket.close();
            continue;
        }
        let (idle, interval, count) = ACCEPT_KEEPALIVE;
        process.socket.set_keep_alive(idle, interval, count);
        log::debug!(
            "[{}] accepted {:?} into slot {}",
            what,
            process.socket.peer_addr(),
            id
        );
        process.start_server(now);
    }
}

impl<C: Clock> Node<C> {
    /// Run one loop iteration, blocking at most `budget_ms`.
    pub fn spin_once(&mut self, budget_ms: u64) -> Result<()> {
        let now = self.clock.now_ms();
        self.fire_timers(now);
        let timeout = self.next_timeout(now, budget_ms);
        self.update_interests();

        if let Err(e) = self
            .poll
            .poll(&mut self.events, Some(Duration::from_millis(timeout)))
        {
            if e.kind() != io::ErrorKind::Interrupted {
                log::error!("[node] poll failed: {}", e);
                return Err(e.into());
            }
            self.events.clear();
        }
        self.ready.clear();
        self.ready.extend(
            self.events
                .iter()
                .map(|event| (event.token(), Readiness::from_event(event))),
        );

        let now = self.clock.now_ms();
        for i in 0..self.ready.len() {
            let (token, readiness) = self.ready[i];
            self.dispatch(token, readiness, now);
        }
        self.step_immediate(now);
        self.fire_timers(now);
        self.reset_stalled(now);
        Ok(())
    }

    /// Poll timeout: the budget, shortened to the nearest wake time.
    pub(crate) fn next_timeout(&self, now: u64, budget_ms: u64) -> u64 {
        if SLOT_TABLES.iter().any(|&table| {
            (0..self.table_len(table))
                .any(|i| self.watch_of(table, SlotId::new(i)) == Some(Watch::Immediate))
        }) {
            return 0;
        }

        let mut timeout = budget_ms;
        let mut wake = |at: u64| timeout = timeout.min(at.saturating_sub(now));

        if let Some(master) = self.xmlrpc_clients.get(SlotId::MASTER) {
            if master.is_idle() {
                wake(master.wake_at);
            }
        }
        for (_, process) in self.tcpros_servers.iter().chain(self.rpcros_clients.iter()) {
            if process.state() == crate::tcpros::TcprosState::WaitForWriting {
                wake(process.wake_at);
            }
        }
        for (id, caller) in self.callers.iter() {
            let idle = self.rpcros_clients.get(id).is_some_and(|p| p.is_idle());
            if idle && caller.request_callback.is_some() {
                wake(caller.next_call_at.max(caller.retry_at));
            } else if idle && caller.has_queued() {
                wake(caller.retry_at);
            }
        }
        for (id, subscriber) in self.subscribers.iter() {
            let idle = self.tcpros_clients.get(id).is_some_and(|p| p.is_idle());
            if idle && !subscriber.publishers.is_empty() {
                wake(subscriber.retry_at);
            }
        }
        timeout
    }

    fn update_interests(&mut self) {
        let registry = self.poll.registry();
        let listen = |idle: bool| if idle { Watch::Read } else { Watch::None };

        let xmlrpc = listen(self.xmlrpc_servers.iter().any(|(_, p)| p.is_idle()));
        let tcpros = listen(self.tcpros_servers.iter().any(|(_, p)| p.is_idle()));
        let rpcros = listen(self.rpcros_servers.iter().any(|(_, p)| p.is_idle()));
        apply_interest(
            registry,
            &mut self.xmlrpc_listener,
            token(Table::XmlRpcListener, 0),
            xmlrpc,
        );
        apply_interest(
            registry,
            &mut self.tcpros_listener,
            token(Table::TcprosListener, 0),
            tcpros,
        );
        apply_interest(
            registry,
            &mut self.rpcros_listener,
            token(Table::RpcrosListener, 0),
            rpcros,
        );

        arm_table(registry, &mut self.xmlrpc_clients, Table::XmlRpcClient);
        arm_table(registry, &mut self.xmlrpc_servers, Table::XmlRpcServer);
        arm_table(registry, &mut self.tcpros_clients, Table::TcprosClient);
        arm_table(registry, &mut self.tcpros_servers, Table::TcprosServer);
        arm_table(registry, &mut self.rpcros_clients, Table::RpcrosClient);
        arm_table(registry, &mut self.rpcros_servers, Table::RpcrosServer);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(&mut self, token: Token, readiness: Readiness, now: u64) {
        let Some((table, id)) = decode(token) else {
            log::warn!("[node] event for unknown token {:?}", token);
            return;
        };
        match table {
            Table::XmlRpcListener => self.accept_control(now),
            Table::TcprosListener => {
                accept_into(&self.tcpros_listener, &mut self.tcpros_servers, "tcpros", now)
            }
            Table::RpcrosListener => {
                accept_into(&self.rpcros_listener, &mut self.rpcros_servers, "rpcros", now)
            }
            _ => self.dispatch_slot(table, id, readiness, now),
        }
    }

    fn dispatch_slot(&mut self, table: Table, id: SlotId, readiness: Readiness, now: u64) {
        let Some(watch) = self.watch_of(table, id) else {
            return;
        };
        if readiness.error {
            log::debug!("[node] socket error on {:?} slot {}", table, id);
            self.fail_slot(table, id, now);
            return;
        }
        let ready = match watch {
            Watch::Read => readiness.readable || readiness.read_closed,
            Watch::Write => readiness.writable || readiness.write_closed,
            Watch::ErrorOnly => {
                if readiness.readable || readiness.read_closed {
                    self.drain_waiting(table, id, now);
                }
                false
            }
            Watch::None | Watch::Immediate => false,
        };
        if ready {
            self.step_slot(table, id, now);
        }
    }

    fn accept_control(&mut self, now: u64) {
        while let Some(id) = self.xmlrpc_servers.first_where(|p| p.is_idle()) {
            let Some(process) = self.xmlrpc_servers.get_mut(id) else {
                break;
            };
            if self.xmlrpc_listener.accept(&mut process.socket) != SocketState::Done {
                break;
            }
            if !process.socket.set_non_blocking() {
                process.socket.close();
                continue;
            }
            log::debug!(
                "[xmlrpc] accepted {:?} into slot {}",
                process.socket.peer_addr(),
                id
            );
            process.start_server(now);
        }
    }

    /// Trampoline: step while the slot says `Continue`, bounded.
    pub(crate) fn step_slot(&mut self, table: Table, id: SlotId, now: u64) {
        for _ in 0..MAX_STEPS_PER_DISPATCH {
            if self.step_once(table, id, now) == Flow::Yield {
                break;
            }
        }
    }

    fn step_once(&mut self, table: Table, id: SlotId, now: u64) -> Flow {
        let caller_id = self.config.name.as_str();
        match table {
            Table::XmlRpcClient => {
                let Some(process) = self.xmlrpc_clients.get_mut(id) else {
                    return Flow::Yield;
                };
                match process.client_step(now) {
                    ClientStep::Continue => Flow::Continue,
                    ClientStep::Yield => Flow::Yield,
                    ClientStep::Completed { call, response } => {
                        let requeued = self.handle_response(id, call, response, now);
                        self.resume_control(id, !requeued, now);
                        Flow::Yield
                    }
                    ClientStep::Failed { dropped } => {
                        if let Some(call) = dropped {
                            self.on_call_dropped(call, now);
                        }
                        self.resume_control(id, false, now);
                        Flow::Yield
                    }
                }
            }
            Table::XmlRpcServer => {
                let Some(process) = self.xmlrpc_servers.get_mut(id) else {
                    return Flow::Yield;
                };
                match process.server_step(now) {
                    ServerStep::Continue => Flow::Continue,
                    ServerStep::Request(call) => {
                        let reply = self.handle_slave_call(&call, now);
                        if let Some(process) = self.xmlrpc_servers.get_mut(id) {
                            process.respond(&reply, now);
                        }
                        Flow::Continue
                    }
                    ServerStep::Yield | ServerStep::Closed | ServerStep::Failed => Flow::Yield,
                }
            }
            Table::TcprosClient => {
                let (Some(process), Some(subscriber)) =
                    (self.tcpros_clients.get_mut(id), self.subscribers.get_mut(id))
                else {
                    return Flow::Yield;
                };
                crate::tcpros::subscriber::step(process, subscriber, caller_id, now)
            }
            Table::TcprosServer => {
                let Some(process) = self.tcpros_servers.get_mut(id) else {
                    return Flow::Yield;
                };
                crate::tcpros::publisher::step(process, &mut self.publishers, caller_id, now)
            }
            Table::RpcrosClient => {
                let (Some(process), Some(caller)) =
                    (self.rpcros_clients.get_mut(id), self.callers.get_mut(id))
                else {
                    return Flow::Yield;
                };
                crate::rpcros::client::step(process, caller, caller_id, now)
            }
            Table::RpcrosServer => {
                let Some(process) = self.rpcros_servers.get_mut(id) else {
                    return Flow::Yield;
                };
                crate::rpcros::server::step(process, &mut self.providers, caller_id, now)
            }
            Table::XmlRpcListener | Table::TcprosListener | Table::RpcrosListener => Flow::Yield,
        }
    }

    /// Start the next queued call of an Idle control slot. After a failure
    /// the master slot waits for its ping timer instead.
    fn resume_control(&mut self, id: SlotId, progressed: bool, now: u64) {
        let Some(process) = self.xmlrpc_clients.get_mut(id) else {
            return;
        };
        if !process.is_idle() || !process.has_pending() {
            return;
        }
        if id == SlotId::MASTER && !progressed {
            return;
        }
        process.activate(now);
    }

    fn step_immediate(&mut self, now: u64) {
        for table in SLOT_TABLES {
            for index in 0..self.table_len(table) {
                let id = SlotId::new(index);
                if self.watch_of(table, id) == Some(Watch::Immediate) {
                    self.step_slot(table, id, now);
                }
            }
        }
    }

    // ========================================================================
    // Error paths
    // ========================================================================

    /// Error path of one slot.
    fn fail_slot(&mut self, table: Table, id: SlotId, now: u64) {
        match table {
            Table::XmlRpcClient => {
                let dropped = self.xmlrpc_clients.get_mut(id).and_then(|p| p.abort(now));
                if let Some(call) = dropped {
                    self.on_call_dropped(call, now);
                }
                self.resume_control(id, false, now);
            }
            Table::XmlRpcServer => {
                if let Some(process) = self.xmlrpc_servers.get_mut(id) {
                    process.reset(now);
                }
            }
            _ => {
                if let Some(process) = self.stream_table_mut(table).and_then(|t| t.get_mut(id)) {
                    process.fail(now);
                }
            }
        }
    }

    /// A waiting stream slot turned readable: drop what the peer sent, or
    /// reset the slot when the peer went away.
    fn drain_waiting(&mut self, table: Table, id: SlotId, now: u64) {
        let Some(process) = self.stream_table_mut(table).and_then(|t| t.get_mut(id)) else {
            return;
        };
        if !process.discard_pending(now) {
            log::debug!("[node] peer of {:?} slot {} hung up", table, id);
        }
    }

    fn reset_stalled(&mut self, now: u64) {
        let ceiling = self.config.io_timeout_ms;
        for table in SLOT_TABLES {
            for index in 0..self.table_len(table) {
                let id = SlotId::new(index);
                let stalled = match table {
                    Table::XmlRpcClient => self
                        .xmlrpc_clients
                        .get(id)
                        .is_some_and(|p| p.is_stalled(now, ceiling)),
                    Table::XmlRpcServer => self
                        .xmlrpc_servers
                        .get(id)
                        .is_some_and(|p| p.is_stalled(now, ceiling)),
                    _ => self
                        .stream_table(table)
                        .and_then(|t| t.get(id))
                        .is_some_and(|p| p.is_stalled(now, ceiling)),
                };
                if stalled {
                    log::warn!(
                        "[node] {:?} slot {} idle in I/O for over {} ms, resetting",
                        table,
                        id,
                        ceiling
                    );
                    self.fail_slot(table, id, now);
                }
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Master ping, publisher and caller cycles, reconnect attempts.
    pub(crate) fn fire_timers(&mut self, now: u64) {
        self.ping_master(now);

        for index in 0..self.tcpros_servers.len() {
            let id = SlotId::new(index);
            if self.tcpros_servers.get(id).is_some_and(|p| p.is_due(now)) {
                self.step_slot(Table::TcprosServer, id, now);
            }
        }

        for index in 0..self.callers.len() {
            let id = SlotId::new(index);
            if self.rpcros_clients.get(id).is_some_and(|p| p.is_due(now)) {
                self.step_slot(Table::RpcrosClient, id, now);
            }
            self.arm_caller(id, now);
        }

        for index in 0..self.subscribers.len() {
            let id = SlotId::new(index);
            let due = self
                .subscribers
                .get(id)
                .is_some_and(|s| !s.publishers.is_empty() && now >= s.retry_at);
            if due {
                self.request_topic(id, now);
            }
        }
    }

    /// Once per ping period of idleness, start the next master call; with
    /// nothing queued that is a `getPid`.
    fn ping_master(&mut self, now: u64) {
        let period = self.config.ping_period_ms;
        let Some(master) = self.xmlrpc_clients.get_mut(SlotId::MASTER) else {
            return;
        };
        if !master.is_idle() || now < master.wake_at {
            return;
        }
        master.wake_at = now + period;
        if !master.has_pending() {
            if self.unregistering {
                return;
            }
            master.enqueue(calls::get_pid(&self.config.name, &self.master));
        }
        log::trace!("[master] ping");
        master.activate(now);
    }

    // ========================================================================
    // Table access
    // ========================================================================

    fn stream_table(&self, table: Table) -> Option<&SlotTable<TcprosProcess>> {
        match table {
            Table::TcprosClient => Some(&self.tcpros_clients),
            Table::TcprosServer => Some(&self.tcpros_servers),
            Table::RpcrosClient => Some(&self.rpcros_clients),
            Table::RpcrosServer => Some(&self.rpcros_servers),
            _ => None,
        }
    }

    fn stream_table_mut(&mut self, table: Table) -> Option<&mut SlotTable<TcprosProcess>> {
        match table {
            Table::TcprosClient => Some(&mut self.tcpros_clients),
            Table::TcprosServer => Some(&mut self.tcpros_servers),
            Table::RpcrosClient => Some(&mut self.rpcros_clients),
            Table::RpcrosServer => Some(&mut self.rpcros_servers),
            _ => None,
        }
    }

    fn table_len(&self, table: Table) -> usize {
        match table {
            Table::XmlRpcClient => self.xmlrpc_clients.len(),
            Table::XmlRpcServer => self.xmlrpc_servers.len(),
            _ => self.stream_table(table).map_or(0, |t| t.len()),
        }
    }

    fn watch_of(&self, table: Table, id: SlotId) -> Option<Watch> {
        match table {
            Table::XmlRpcClient => self.xmlrpc_clients.get(id).map(|p| p.watch()),
            Table::XmlRpcServer => self.xmlrpc_servers.get(id).map(|p| p.watch()),
            _ => self.stream_table(table)?.get(id).map(|p| p.watch()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiMethod;
    use crate::buffer::DynBuffer;
    use crate::clock::ManualClock;
    use crate::config::NodeConfig;
    use crate::node::{PublisherSpec, TypeInfo};
    use crate::tcpros::{ConnectionHeader, TcprosState};
    use crate::xmlrpc::{self, MethodResponse, Parse, XmlRpcState, XmlRpcValue};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Instant;

    fn node(clock: ManualClock) -> Node<ManualClock> {
        let config = NodeConfig::new("/n")
            .with_host("127.0.0.1")
            .with_master_uri("http://127.0.0.1:1/");
        Node::with_clock(config, clock).unwrap()
    }

    #[test]
    fn test_token_round_trip() {
        let t = token(Table::RpcrosServer, 7);
        assert_eq!(decode(t), Some((Table::RpcrosServer, SlotId::new(7))));
        let listener = token(Table::XmlRpcListener, 0);
        assert_eq!(decode(listener), Some((Table::XmlRpcListener, SlotId::MASTER)));
        assert_eq!(decode(Token(TABLES.len() * TABLE_STRIDE)), None);
    }

    #[test]
    fn test_ping_fires_once_per_period() {
        let mut node = node(ManualClock::new(0));
        node.fire_timers(999);
        assert!(node.xmlrpc_clients.get(SlotId::MASTER).unwrap().is_idle());

        node.fire_timers(1000);
        let master = node.xmlrpc_clients.get(SlotId::MASTER).unwrap();
        assert_eq!(master.state(), XmlRpcState::Writing);
        assert_eq!(master.current().map(|c| c.method), Some(ApiMethod::GetPid));
        assert_eq!(master.wake_at, 2000);

        node.fire_timers(1500);
        assert_eq!(node.master_backlog(), 1);
    }

    #[test]
    fn test_timeout_follows_wakes() {
        let node = node(ManualClock::new(0));
        assert_eq!(node.next_timeout(0, 100), 100);
        assert_eq!(node.next_timeout(950, 100), 50);
        assert_eq!(node.next_timeout(1200, 100), 0);
    }

    #[test]
    fn test_immediate_slot_zeroes_timeout() {
        let mut node = node(ManualClock::new(0));
        node.register_publisher(PublisherSpec::new("/t", TypeInfo::any()))
            .unwrap();
        // The master slot is Writing but not connected yet
        assert_eq!(node.next_timeout(0, 100), 0);
    }

    #[test]
    fn test_serves_slave_call_over_loopback() {
        let mut node = node(ManualClock::new(0));
        let mut stream = TcpStream::connect(("127.0.0.1", node.xmlrpc_port())).unwrap();
        let mut request = DynBuffer::new();
        xmlrpc::prepare_request(
            "getMasterUri",
            &[XmlRpcValue::from("/probe")],
            "127.0.0.1",
            &mut request,
        );
        stream.write_all(request.as_slice()).unwrap();
        stream.set_nonblocking(true).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        let mut response = None;
        for _ in 0..200 {
            node.spin_once(5).unwrap();
            match stream.read(&mut buf) {
                Ok(n) if n > 0 => received.extend_from_slice(&buf[..n]),
                _ => {}
            }
            if let Parse::Done(r) = xmlrpc::parse_response(&received, false) {
                response = Some(r);
                break;
            }
        }
        let Some(MethodResponse::Success(value)) = response else {
            panic!("no response: {:?}", String::from_utf8_lossy(&received));
        };
        let reply = calls::RosReply::from_response(&MethodResponse::Success(value)).unwrap();
        assert_eq!(reply.value.as_str(), Some("http://127.0.0.1:1/"));
        // Keep-alive: the slot is back to reading the next request
        let slot = node.xmlrpc_servers.get(SlotId::new(0)).unwrap();
        assert_eq!(slot.state(), XmlRpcState::Reading);
    }

    /// Publisher on `/t` with one subscriber socket parked in WaitForWriting.
    fn waiting_publisher() -> (Node<ManualClock>, TcpStream) {
        let mut node = node(ManualClock::new(0));
        node.register_publisher(PublisherSpec::new("/t", TypeInfo::any()).with_period_ms(1000))
            .unwrap();
        // Let the refused master call settle so only the ping timer remains
        for _ in 0..100 {
            node.spin_once(5).unwrap();
            if node.xmlrpc_clients.get(SlotId::MASTER).unwrap().is_idle() {
                break;
            }
        }

        let mut stream = TcpStream::connect(("127.0.0.1", node.tcpros_port())).unwrap();
        let mut header = DynBuffer::new();
        ConnectionHeader::new()
            .with("callerid", "/sub")
            .with("topic", "/t")
            .with("md5sum", "*")
            .with("type", "*")
            .encode(&mut header);
        stream.write_all(header.as_slice()).unwrap();

        let slot = SlotId::new(0);
        for _ in 0..200 {
            node.spin_once(5).unwrap();
            let state = node.tcpros_servers.get(slot).map(|p| p.state());
            if state == Some(TcprosState::WaitForWriting) {
                return (node, stream);
            }
        }
        panic!("subscriber never reached WaitForWriting");
    }

    #[test]
    fn test_stray_bytes_do_not_wake_the_loop() {
        let (mut node, mut stream) = waiting_publisher();
        stream.write_all(b"junk").unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            node.spin_once(300).unwrap();
        }
        // The first iteration drains the bytes; the next ones block again
        assert!(
            started.elapsed() >= Duration::from_millis(250),
            "loop spun for only {:?}",
            started.elapsed()
        );
        let slot = node.tcpros_servers.get(SlotId::new(0)).unwrap();
        assert_eq!(slot.state(), TcprosState::WaitForWriting);
    }

    #[test]
    fn test_waiting_slot_resets_when_peer_hangs_up() {
        let (mut node, stream) = waiting_publisher();
        assert_eq!(node.subscriber_count(SlotId::new(0)), 1);
        drop(stream);

        for _ in 0..100 {
            node.spin_once(20).unwrap();
            if node.tcpros_servers.get(SlotId::new(0)).unwrap().is_idle() {
                break;
            }
        }
        let slot = node.tcpros_servers.get(SlotId::new(0)).unwrap();
        assert!(slot.is_idle());
        assert!(!slot.socket.is_open());
        assert_eq!(node.subscriber_count(SlotId::new(0)), 0);
    }
}
