// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-protocol process: one XML-RPC connection slot.
//!
//! # Client role
//!
//! ```text
//! Idle --activate--> Writing --request flushed--> Reading --response--> Idle
//!                       |                            |
//!                       +------- error / reset ------+--> Idle (+ requeue)
//! ```
//!
//! One call is in flight per slot; the rest wait in the slot's
//! [`ApiCallQueue`]. A connection carries exactly one call and is closed
//! once the response is parsed.
//!
//! # Server role
//!
//! ```text
//! (accept) --> Reading --request--> Writing --response flushed--> Reading ...
//! ```

use crate::api::{ApiCall, ApiCallQueue};
use crate::buffer::DynBuffer;
use crate::process::{is_stalled, Watch};
use crate::transport::{SocketState, StreamIo, TcpIpSocket};

use super::codec::{self, MethodCall, MethodResponse};
use super::value::XmlRpcValue;
use super::Parse;

/// Control-protocol connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XmlRpcState {
    Idle,
    Writing,
    Reading,
}

/// Result of one client step.
#[derive(Debug)]
pub enum ClientStep {
    Continue,
    Yield,
    /// Response parsed; the slot is Idle again
    Completed {
        call: ApiCall,
        response: MethodResponse,
    },
    /// Error path already taken: slot Idle, a registration call requeued,
    /// any other call handed back as `dropped`
    Failed { dropped: Option<ApiCall> },
}

/// Result of one server step.
#[derive(Debug)]
pub enum ServerStep {
    Continue,
    Yield,
    /// Complete incoming call; answer with [`XmlRpcProcess::respond`]
    Request(MethodCall),
    /// Peer closed; slot Idle
    Closed,
    /// Error path already taken; slot Idle
    Failed,
}

/// One control-protocol slot (client or server role).
#[derive(Debug)]
pub struct XmlRpcProcess<S = TcpIpSocket> {
    pub(crate) socket: S,
    state: XmlRpcState,
    message: DynBuffer,
    queue: ApiCallQueue,
    current: Option<ApiCall>,
    request_prepared: bool,
    last_change: u64,
    /// Next scheduled activation (master ping)
    pub wake_at: u64,
    max_message: usize,
}

impl<S: StreamIo> XmlRpcProcess<S> {
    pub fn new(socket: S, max_message: usize) -> Self {
        Self {
            socket,
            state: XmlRpcState::Idle,
            message: DynBuffer::new(),
            queue: ApiCallQueue::new(),
            current: None,
            request_prepared: false,
            last_change: 0,
            wake_at: 0,
            max_message,
        }
    }

    pub fn state(&self) -> XmlRpcState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == XmlRpcState::Idle
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn queue(&self) -> &ApiCallQueue {
        &self.queue
    }

    pub fn current(&self) -> Option<&ApiCall> {
        self.current.as_ref()
    }

    pub fn last_change(&self) -> u64 {
        self.last_change
    }

    pub fn enqueue(&mut self, call: ApiCall) {
        log::trace!("[xmlrpc] queued {}", call.method.name());
        self.queue.push_back(call);
    }

    /// A call is in flight or queued.
    pub fn has_pending(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    fn set_state(&mut self, state: XmlRpcState, now: u64) {
        if self.state != state {
            log::debug!("[xmlrpc] {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.last_change = now;
    }

    /// Start the next queued call if the slot is Idle.
    pub fn activate(&mut self, now: u64) -> bool {
        if !self.is_idle() {
            return false;
        }
        if self.current.is_none() {
            self.current = self.queue.pop_front();
        }
        if self.current.is_none() {
            return false;
        }
        self.message.clear();
        self.request_prepared = false;
        self.set_state(XmlRpcState::Writing, now);
        true
    }

    /// Close, clear and go Idle. Queued calls are kept.
    pub fn reset(&mut self, now: u64) {
        self.socket.close();
        self.message.clear();
        self.request_prepared = false;
        self.set_state(XmlRpcState::Idle, now);
    }

    /// Error path: requeue a registration call, drop anything else, reset.
    /// Returns the dropped call.
    pub fn abort(&mut self, now: u64) -> Option<ApiCall> {
        let mut dropped = None;
        if let Some(call) = self.current.take() {
            if call.method.is_registration() {
                log::warn!("[xmlrpc] requeue {} to {}", call.method.name(), call.target);
                self.queue.push_back(call);
            } else {
                log::debug!("[xmlrpc] dropped {} to {}", call.method.name(), call.target);
                dropped = Some(call);
            }
        }
        self.reset(now);
        dropped
    }

    fn fail(&mut self, now: u64) -> ClientStep {
        ClientStep::Failed {
            dropped: self.abort(now),
        }
    }

    /// Drop the in-flight call and every queued one.
    pub fn discard_calls(&mut self) {
        self.current = None;
        self.queue.clear();
    }

    // ========================================================================
    // Client role
    // ========================================================================

    pub fn client_step(&mut self, now: u64) -> ClientStep {
        match self.state {
            XmlRpcState::Idle => ClientStep::Yield,
            XmlRpcState::Writing => self.client_write(now),
            XmlRpcState::Reading => self.client_read(now),
        }
    }

    fn client_write(&mut self, now: u64) -> ClientStep {
        if self.current.is_none() {
            self.current = self.queue.pop_front();
        }
        let Some(call) = self.current.as_ref() else {
            self.set_state(XmlRpcState::Idle, now);
            return ClientStep::Yield;
        };

        if !self.socket.is_connected() {
            match self.socket.connect(&call.target.host, call.target.port) {
                SocketState::Done => {
                    log::trace!("[xmlrpc] connected to {}", call.target);
                }
                SocketState::InProgress => return ClientStep::Yield,
                state => {
                    log::warn!("[xmlrpc] connect to {} failed: {}", call.target, state);
                    return self.fail(now);
                }
            }
        }

        if !self.request_prepared {
            let host = format!("{}:{}", call.target.host, call.target.port);
            codec::prepare_request(call.method.name(), &call.params, &host, &mut self.message);
            self.request_prepared = true;
        }

        match self.socket.write_buffer(&mut self.message) {
            SocketState::Done => {
                self.message.clear();
                self.set_state(XmlRpcState::Reading, now);
                ClientStep::Continue
            }
            SocketState::InProgress => ClientStep::Yield,
            state => {
                log::error!("[xmlrpc] request write failed: {}", state);
                self.fail(now)
            }
        }
    }

    fn client_read(&mut self, now: u64) -> ClientStep {
        let closed = match self.socket.read_buffer(&mut self.message) {
            SocketState::Done => false,
            SocketState::InProgress => return ClientStep::Yield,
            SocketState::Disconnected => true,
            state => {
                log::error!("[xmlrpc] response read failed: {}", state);
                return self.fail(now);
            }
        };
        if self.message.len() > self.max_message {
            log::error!("[xmlrpc] response exceeds {} bytes", self.max_message);
            return self.fail(now);
        }

        match codec::parse_response(self.message.as_slice(), closed) {
            Parse::Done(response) => {
                let call = self.current.take();
                self.reset(now);
                match call {
                    Some(call) => ClientStep::Completed { call, response },
                    None => ClientStep::Yield,
                }
            }
            Parse::Incomplete => ClientStep::Continue,
            Parse::Error(e) => {
                log::error!("[xmlrpc] bad response: {}", e);
                self.fail(now)
            }
        }
    }

    // ========================================================================
    // Server role
    // ========================================================================

    /// Begin serving a freshly accepted connection.
    pub fn start_server(&mut self, now: u64) {
        self.message.clear();
        self.set_state(XmlRpcState::Reading, now);
    }

    pub fn server_step(&mut self, now: u64) -> ServerStep {
        match self.state {
            XmlRpcState::Idle => ServerStep::Yield,
            XmlRpcState::Reading => self.server_read(now),
            XmlRpcState::Writing => self.server_write(now),
        }
    }

    fn server_read(&mut self, now: u64) -> ServerStep {
        match self.socket.read_buffer(&mut self.message) {
            SocketState::Done => {}
            SocketState::InProgress => return ServerStep::Yield,
            SocketState::Disconnected => {
                if !self.message.is_empty() {
                    log::debug!("[xmlrpc] peer closed with {} unparsed bytes", self.message.len());
                }
                self.reset(now);
                return ServerStep::Closed;
            }
            state => {
                log::error!("[xmlrpc] request read failed: {}", state);
                self.reset(now);
                return ServerStep::Failed;
            }
        }
        if self.message.len() > self.max_message {
            log::error!("[xmlrpc] request exceeds {} bytes", self.max_message);
            self.reset(now);
            return ServerStep::Failed;
        }

        match codec::parse_request(self.message.as_slice(), false) {
            Parse::Done(call) => {
                self.message.clear();
                ServerStep::Request(call)
            }
            Parse::Incomplete => ServerStep::Continue,
            Parse::Error(e) => {
                log::error!("[xmlrpc] bad request: {}", e);
                self.reset(now);
                ServerStep::Failed
            }
        }
    }

    fn server_write(&mut self, now: u64) -> ServerStep {
        match self.socket.write_buffer(&mut self.message) {
            SocketState::Done => {
                self.message.clear();
                self.set_state(XmlRpcState::Reading, now);
                ServerStep::Continue
            }
            SocketState::InProgress => ServerStep::Yield,
            SocketState::Disconnected => {
                self.reset(now);
                ServerStep::Closed
            }
            state => {
                log::error!("[xmlrpc] response write failed: {}", state);
                self.reset(now);
                ServerStep::Failed
            }
        }
    }

    /// Queue the response to the last [`ServerStep::Request`].
    pub fn respond(&mut self, value: &XmlRpcValue, now: u64) {
        self.message.clear();
        codec::prepare_response(value, &mut self.message);
        self.set_state(XmlRpcState::Writing, now);
    }

    // ========================================================================
    // Dispatcher hooks
    // ========================================================================

    pub fn watch(&self) -> Watch {
        match self.state {
            XmlRpcState::Idle => Watch::None,
            XmlRpcState::Writing
                if self.socket.is_connected() || self.socket.is_connecting() =>
            {
                Watch::Write
            }
            XmlRpcState::Writing => Watch::Immediate,
            XmlRpcState::Reading => Watch::Read,
        }
    }

    pub fn is_stalled(&self, now: u64, ceiling: u64) -> bool {
        !self.is_idle() && is_stalled(now, self.last_change, ceiling)
    }
}

// ============================================================================
// Tests
// ============================================================================
