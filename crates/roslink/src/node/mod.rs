// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The node: registration records, connection tables and the event loop
//! that drives them.
//!
//! # Architecture
//!
//! ```text
//!                         +-------------------------------+
//!   register_* / publish  |             Node              |
//!   call_service -------> |  publishers   subscribers     |
//!                         |  providers    callers         |
//!                         +---------------+---------------+
//!                                         |
//!            spin_once: fire timers, arm interests, poll, dispatch
//!                                         |
//!   +------------+------------+-----------+-----------+------------+
//!   v            v            v           v           v            v
//! xmlrpc       xmlrpc       tcpros      tcpros      rpcros      rpcros
//! clients      servers      clients     servers     clients     servers
//! (master +    (slave API)  (one per    (accepted   (one per    (accepted
//!  requestTopic)            subscriber)  streams)    caller)     calls)
//! ```
//!
//! Everything runs on the calling thread. Callbacks are invoked from
//! inside [`Node::spin_once`].
//!
//! # Modules
//!
//! - `registry` - Publisher, subscriber and service records
//! - `master` - Handling of master and peer responses
//! - `slave` - The node's own XML-RPC API
//! - `event_loop` - Interest registration, polling, dispatch and timers

mod event_loop;
mod master;
pub mod registry;
mod slave;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Poll};

use crate::api::calls;
use crate::api::ApiCall;
use crate::clock::{Clock, SystemClock};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::slot::{SlotId, SlotTable};
use crate::tcpros::{TcprosProcess, TcprosState};
use crate::transport::TcpIpSocket;
use crate::uri::Endpoint;
use crate::xmlrpc::XmlRpcProcess;

pub use event_loop::MAX_EVENTS;
pub use registry::{
    PublishQueue, Publisher, PublisherSpec, ServiceCaller, ServiceCallerSpec, ServiceProvider,
    ServiceProviderSpec, ServiceResult, Subscriber, SubscriberSpec, TypeInfo,
};

/// Slice of a shutdown spent in one loop iteration
const SHUTDOWN_SPIN_MS: u64 = 20;

/// A ROS node bound to one master.
pub struct Node<C: Clock = SystemClock> {
    pub(crate) config: NodeConfig,
    pub(crate) host: String,
    pub(crate) master: Endpoint,
    pub(crate) clock: C,
    poll: Poll,
    events: Events,
    /// Readiness copied out of `events` before dispatch
    ready: Vec<(mio::Token, event_loop::Readiness)>,

    pub(crate) xmlrpc_listener: TcpIpSocket,
    pub(crate) tcpros_listener: TcpIpSocket,
    pub(crate) rpcros_listener: TcpIpSocket,

    /// Slot 0 talks to the master, slot `i + 1` serves subscriber `i`
    pub(crate) xmlrpc_clients: SlotTable<XmlRpcProcess>,
    pub(crate) xmlrpc_servers: SlotTable<XmlRpcProcess>,
    /// Slot `i` streams subscriber `i`
    pub(crate) tcpros_clients: SlotTable<TcprosProcess>,
    pub(crate) tcpros_servers: SlotTable<TcprosProcess>,
    /// Slot `i` serves caller `i`
    pub(crate) rpcros_clients: SlotTable<TcprosProcess>,
    pub(crate) rpcros_servers: SlotTable<TcprosProcess>,

    pub(crate) publishers: SlotTable<Publisher>,
    pub(crate) subscribers: SlotTable<Subscriber>,
    pub(crate) providers: SlotTable<ServiceProvider>,
    pub(crate) callers: SlotTable<ServiceCaller>,

    /// Master pid from the last successful ping
    pub(crate) master_pid: Option<i32>,
    /// Set by the `shutdown` slave call
    pub(crate) shutdown_requested: bool,
    /// Unregistration phase: no more pings or re-advertising
    pub(crate) unregistering: bool,
}

impl Node<SystemClock> {
    /// Create a node on the wall clock.
    pub fn create(config: NodeConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::new())
    }
}

fn open_listener(
    host: &str,
    backlog: usize,
    read_chunk: usize,
    what: &str,
) -> Result<TcpIpSocket> {
    let mut socket = TcpIpSocket::with_read_chunk(read_chunk);
    if socket.open()
        && socket.set_reuse()
        && socket.set_non_blocking()
        && socket.bind_listen(host, 0, backlog)
    {
        return Ok(socket);
    }
    Err(Error::SocketSetup(format!("{} listener on {}", what, host)))
}

impl<C: Clock> Node<C> {
    /// Create a node on `clock`: validate the configuration, open the
    /// three listeners on ephemeral ports and size every table.
    pub fn with_clock(config: NodeConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let master = config.master()?;
        let host = config.resolved_host();
        let chunk = config.read_chunk_size;
        let max_frame = config.max_frame_size;

        let xmlrpc_listener =
            open_listener(&host, config.xmlrpc_server_slots, chunk, "xmlrpc")?;
        let tcpros_listener =
            open_listener(&host, config.tcpros_server_slots, chunk, "tcpros")?;
        let rpcros_listener =
            open_listener(&host, config.max_service_providers, chunk, "rpcros")?;

        let xmlrpc = |_| XmlRpcProcess::new(TcpIpSocket::with_read_chunk(chunk), max_frame);
        let tcpros = |_| TcprosProcess::new(TcpIpSocket::with_read_chunk(chunk), max_frame);

        let mut xmlrpc_clients =
            SlotTable::filled("xmlrpc clients", config.xmlrpc_client_slots(), xmlrpc);
        let now = clock.now_ms();
        if let Some(master_slot) = xmlrpc_clients.get_mut(SlotId::MASTER) {
            master_slot.wake_at = now + config.ping_period_ms;
        }

        let node = Self {
            xmlrpc_servers: SlotTable::filled(
                "xmlrpc servers",
                config.xmlrpc_server_slots,
                xmlrpc,
            ),
            tcpros_clients: SlotTable::filled("tcpros clients", config.max_subscribers, tcpros),
            tcpros_servers: SlotTable::filled(
                "tcpros servers",
                config.tcpros_server_slots,
                tcpros,
            ),
            rpcros_clients: SlotTable::filled(
                "rpcros clients",
                config.max_service_callers,
                tcpros,
            ),
            rpcros_servers: SlotTable::filled(
                "rpcros servers",
                config.max_service_providers,
                tcpros,
            ),
            xmlrpc_clients,
            publishers: SlotTable::with_capacity("publishers", config.max_publishers),
            subscribers: SlotTable::with_capacity("subscribers", config.max_subscribers),
            providers: SlotTable::with_capacity(
                "service providers",
                config.max_service_providers,
            ),
            callers: SlotTable::with_capacity("service callers", config.max_service_callers),
            poll: Poll::new()?,
            events: Events::with_capacity(MAX_EVENTS),
            ready: Vec::with_capacity(MAX_EVENTS),
            xmlrpc_listener,
            tcpros_listener,
            rpcros_listener,
            master,
            host,
            clock,
            config,
            master_pid: None,
            shutdown_requested: false,
            unregistering: false,
        };
        log::info!(
            "[node] {} up on {} (xmlrpc {}, tcpros {}, rpcros {}), master {}",
            node.config.name,
            node.host,
            node.xmlrpc_port(),
            node.tcpros_port(),
            node.rpcros_port(),
            node.master
        );
        Ok(node)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Host advertised to peers.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn master(&self) -> &Endpoint {
        &self.master
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn xmlrpc_port(&self) -> u16 {
        self.xmlrpc_listener.port()
    }

    pub fn tcpros_port(&self) -> u16 {
        self.tcpros_listener.port()
    }

    pub fn rpcros_port(&self) -> u16 {
        self.rpcros_listener.port()
    }

    /// XML-RPC URI of this node (`http://host:port/`).
    pub fn uri(&self) -> String {
        Endpoint::new("http", &self.host, self.xmlrpc_port()).to_string()
    }

    /// Service URI of this node (`rosrpc://host:port`).
    pub fn service_uri(&self) -> String {
        format!("rosrpc://{}:{}", self.host, self.rpcros_port())
    }

    /// Pid reported by the master's last answered ping.
    pub fn master_pid(&self) -> Option<i32> {
        self.master_pid
    }

    /// A peer or the master asked this node to exit.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn publisher(&self, id: SlotId) -> Option<&Publisher> {
        self.publishers.get(id)
    }

    pub fn subscriber(&self, id: SlotId) -> Option<&Subscriber> {
        self.subscribers.get(id)
    }

    pub fn service_provider(&self, id: SlotId) -> Option<&ServiceProvider> {
        self.providers.get(id)
    }

    pub fn service_caller(&self, id: SlotId) -> Option<&ServiceCaller> {
        self.callers.get(id)
    }

    /// State of a subscriber's stream slot.
    pub fn stream_state(&self, subscriber: SlotId) -> Option<TcprosState> {
        self.tcpros_clients.get(subscriber).map(|p| p.state())
    }

    /// The subscriber's stream is past its handshake.
    pub fn is_subscribed(&self, subscriber: SlotId) -> bool {
        matches!(
            self.stream_state(subscriber),
            Some(TcprosState::ReadingSize | TcprosState::Reading)
        )
    }

    /// Streaming connections currently serving `publisher`.
    pub fn subscriber_count(&self, publisher: SlotId) -> usize {
        self.tcpros_servers
            .iter()
            .filter(|(_, p)| p.topic == Some(publisher) && !p.is_idle())
            .count()
    }

    /// Control calls queued or in flight toward the master.
    pub fn master_backlog(&self) -> usize {
        self.xmlrpc_clients
            .get(SlotId::MASTER)
            .map(|m| m.queue().len() + usize::from(m.current().is_some()))
            .unwrap_or(0)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Queue a call on the master slot and start it if the slot is Idle.
    pub(crate) fn enqueue_master(&mut self, call: ApiCall, now: u64) {
        if let Some(master) = self.xmlrpc_clients.get_mut(SlotId::MASTER) {
            master.enqueue(call);
            master.activate(now);
        }
    }

    /// Advertise a topic.
    pub fn register_publisher(&mut self, spec: PublisherSpec) -> Result<SlotId> {
        let topic = spec.topic.clone();
        let id = self.publishers.insert(Publisher::from_spec(spec)).inspect_err(|e| {
            log::warn!("[node] can't publish {}: {}", topic, e);
        })?;
        let now = self.clock.now_ms();
        self.advertise_publisher(id, now);
        log::info!("[node] publishing {} as {}", topic, id);
        Ok(id)
    }

    /// Subscribe to a topic. The stream connects once the master reports a
    /// publisher.
    pub fn register_subscriber(&mut self, spec: SubscriberSpec) -> Result<SlotId> {
        let topic = spec.topic.clone();
        let id = self.subscribers.insert(Subscriber::from_spec(spec)).inspect_err(|e| {
            log::warn!("[node] can't subscribe to {}: {}", topic, e);
        })?;
        let now = self.clock.now_ms();
        self.advertise_subscriber(id, now);
        log::info!("[node] subscribed to {} as {}", topic, id);
        Ok(id)
    }

    /// Serve a service.
    pub fn register_service_provider(&mut self, spec: ServiceProviderSpec) -> Result<SlotId> {
        let service = spec.service.clone();
        let id = self.providers.insert(ServiceProvider::from_spec(spec)).inspect_err(|e| {
            log::warn!("[node] can't provide {}: {}", service, e);
        })?;
        let now = self.clock.now_ms();
        self.advertise_provider(id, now);
        log::info!("[node] providing {} as {}", service, id);
        Ok(id)
    }

    /// Declare a client of a remote service. The provider is looked up on
    /// the first request.
    pub fn register_service_caller(&mut self, spec: ServiceCallerSpec) -> Result<SlotId> {
        let service = spec.service.clone();
        let id = self.callers.insert(ServiceCaller::from_spec(spec)).inspect_err(|e| {
            log::warn!("[node] can't call {}: {}", service, e);
        })?;
        log::info!("[node] calling {} as {}", service, id);
        Ok(id)
    }

    pub(crate) fn advertise_publisher(&mut self, id: SlotId, now: u64) {
        let Some(publisher) = self.publishers.get(id) else {
            return;
        };
        let call = calls::register_publisher(
            &self.config.name,
            &publisher.topic,
            &publisher.type_info.name,
            &self.uri(),
            &self.master,
        )
        .with_provider(id);
        self.enqueue_master(call, now);
    }

    pub(crate) fn advertise_subscriber(&mut self, id: SlotId, now: u64) {
        let Some(subscriber) = self.subscribers.get(id) else {
            return;
        };
        let call = calls::register_subscriber(
            &self.config.name,
            &subscriber.topic,
            &subscriber.type_info.name,
            &self.uri(),
            &self.master,
        )
        .with_provider(id);
        self.enqueue_master(call, now);
    }

    pub(crate) fn advertise_provider(&mut self, id: SlotId, now: u64) {
        let Some(provider) = self.providers.get(id) else {
            return;
        };
        let call = calls::register_service(
            &self.config.name,
            &provider.service,
            &self.service_uri(),
            &self.uri(),
            &self.master,
        )
        .with_provider(id);
        self.enqueue_master(call, now);
    }

    /// Register every record again (master restarted).
    pub(crate) fn readvertise_all(&mut self, now: u64) {
        let publishers: Vec<SlotId> = self.publishers.ids().collect();
        let subscribers: Vec<SlotId> = self.subscribers.ids().collect();
        let providers: Vec<SlotId> = self.providers.ids().collect();
        for id in publishers {
            self.advertise_publisher(id, now);
        }
        for id in subscribers {
            self.advertise_subscriber(id, now);
        }
        for id in providers {
            self.advertise_provider(id, now);
        }
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Queue one message on a publisher; every connected subscriber gets it
    /// on its next cycle, which starts right away.
    pub fn publish(&mut self, id: SlotId, bytes: Vec<u8>) -> Result<()> {
        let publisher = self.publishers.get_mut(id).ok_or(Error::UnknownHandle)?;
        publisher.queue.push(bytes);
        let now = self.clock.now_ms();
        for (_, process) in self.tcpros_servers.iter_mut() {
            crate::tcpros::publisher::expedite(process, id, now);
        }
        Ok(())
    }

    /// Queue one request on a caller.
    pub fn call_service(&mut self, id: SlotId, request: Vec<u8>) -> Result<()> {
        let caller = self.callers.get_mut(id).ok_or(Error::UnknownHandle)?;
        caller.pending.push_back(request);
        let now = self.clock.now_ms();
        if let Some(process) = self.rpcros_clients.get_mut(id) {
            crate::rpcros::client::expedite(process, now);
        }
        Ok(())
    }

    /// Drain the inbox of a subscriber without a callback.
    pub fn take_messages(&mut self, id: SlotId) -> Result<Vec<Vec<u8>>> {
        let subscriber = self.subscribers.get_mut(id).ok_or(Error::UnknownHandle)?;
        Ok(subscriber.inbox.drain(..).collect())
    }

    /// Drain the responses of a caller without a response callback.
    pub fn take_responses(&mut self, id: SlotId) -> Result<Vec<ServiceResult>> {
        let caller = self.callers.get_mut(id).ok_or(Error::UnknownHandle)?;
        Ok(caller.responses.drain(..).collect())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spin until `stop` is set or a peer requests shutdown.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        let timeout = self.config.loop_timeout_ms;
        while !stop.load(Ordering::Relaxed) && !self.shutdown_requested {
            self.spin_once(timeout)?;
        }
        Ok(())
    }

    /// Unregister everything from the master (bounded by the unregistration
    /// timeout), then close every connection and listener.
    pub fn shutdown(&mut self) -> Result<()> {
        let now = self.clock.now_ms();
        self.unregistering = true;
        if let Some(master) = self.xmlrpc_clients.get_mut(SlotId::MASTER) {
            master.reset(now);
            master.discard_calls();
        }

        let uri = self.uri();
        let service_uri = self.service_uri();
        let mut pending = Vec::new();
        for (_, p) in self.publishers.iter() {
            pending.push(calls::unregister_publisher(
                &self.config.name,
                &p.topic,
                &uri,
                &self.master,
            ));
        }
        for (_, s) in self.subscribers.iter() {
            pending.push(calls::unregister_subscriber(
                &self.config.name,
                &s.topic,
                &uri,
                &self.master,
            ));
        }
        for (_, p) in self.providers.iter() {
            pending.push(calls::unregister_service(
                &self.config.name,
                &p.service,
                &service_uri,
                &self.master,
            ));
        }
        let total = pending.len();
        for call in pending {
            self.enqueue_master(call, now);
        }

        let deadline =
            Instant::now() + Duration::from_millis(self.config.unregistration_timeout_ms);
        while self.master_backlog() > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                log::warn!(
                    "[node] unregistration timed out with {} calls left",
                    self.master_backlog()
                );
                break;
            }
            let slice = (left.as_millis() as u64).clamp(1, SHUTDOWN_SPIN_MS);
            self.spin_once(slice)?;
        }

        self.close_all();
        log::info!("[node] {} shut down ({} unregistrations)", self.config.name, total);
        Ok(())
    }

    fn close_all(&mut self) {
        let now = self.clock.now_ms();
        for (_, p) in self.xmlrpc_clients.iter_mut() {
            p.reset(now);
            p.discard_calls();
        }
        for (_, p) in self.xmlrpc_servers.iter_mut() {
            p.reset(now);
        }
        for table in [
            &mut self.tcpros_clients,
            &mut self.tcpros_servers,
            &mut self.rpcros_clients,
            &mut self.rpcros_servers,
        ] {
            for (_, p) in table.iter_mut() {
                p.reset(now);
            }
        }
        self.xmlrpc_listener.close();
        self.tcpros_listener.close();
        self.rpcros_listener.close();
    }
}

impl<C: Clock> std::fmt::Debug for Node<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("uri", &self.uri())
            .field("master", &self.master)
            .field("publishers", &self.publishers.len())
            .field("subscribers", &self.subscribers.len())
            .field("providers", &self.providers.len())
            .field("callers", &self.callers.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
