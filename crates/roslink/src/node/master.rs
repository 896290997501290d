// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Responses to the node's own control calls: master replies and
//! `requestTopic` answers from publisher nodes.

use crate::api::calls::{self, RosReply};
use crate::api::{ApiCall, ApiMethod};
use crate::clock::Clock;
use crate::slot::SlotId;
use crate::uri::Endpoint;
use crate::xmlrpc::{MethodResponse, XmlRpcValue};

use super::Node;

enum CallerAction {
    Connect(Endpoint),
    Lookup(ApiCall),
}

impl<C: Clock> Node<C> {
    /// Apply a parsed response on control slot `slot`.
    ///
    /// Returns true when the call went back to the slot's queue.
    pub(crate) fn handle_response(
        &mut self,
        slot: SlotId,
        call: ApiCall,
        response: MethodResponse,
        now: u64,
    ) -> bool {
        let reply = match RosReply::from_response(&response) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("[master] {} to {}: {}", call.method.name(), call.target, e);
                return self.call_failed(slot, call, now);
            }
        };
        if !reply.is_success() {
            log::warn!(
                "[master] {} refused by {} ({}): {}",
                call.method.name(),
                call.target,
                reply.code,
                reply.status
            );
            return self.call_failed(slot, call, now);
        }

        match call.method {
            ApiMethod::GetPid => self.on_master_pid(&reply.value, now),
            ApiMethod::RegisterSubscriber => {
                if let Some(id) = call.provider {
                    self.update_publishers(id, calls::uri_list(&reply.value), now);
                }
            }
            ApiMethod::LookupService => {
                if let Some(id) = call.provider {
                    self.on_service_lookup(id, &reply.value, now);
                }
            }
            ApiMethod::RequestTopic => {
                if let Some(id) = call.provider {
                    self.on_topic_endpoint(id, &reply.value, now);
                }
            }
            method => log::debug!("[master] {} ok: {}", method.name(), reply.status),
        }
        false
    }

    fn call_failed(&mut self, slot: SlotId, call: ApiCall, now: u64) -> bool {
        if call.method.is_registration() {
            if let Some(process) = self.xmlrpc_clients.get_mut(slot) {
                process.enqueue(call);
                return true;
            }
            return false;
        }
        self.on_call_dropped(call, now);
        false
    }

    /// A non-registration call was given up (error path or refusal).
    pub(crate) fn on_call_dropped(&mut self, call: ApiCall, now: u64) {
        let retry_at = now + self.config.ping_period_ms;
        match (call.method, call.provider) {
            (ApiMethod::LookupService, Some(id)) => {
                if let Some(caller) = self.callers.get_mut(id) {
                    caller.lookup_pending = false;
                    caller.retry_at = retry_at;
                }
            }
            (ApiMethod::RequestTopic, Some(id)) => {
                if let Some(subscriber) = self.subscribers.get_mut(id) {
                    subscriber.retry_at = retry_at;
                }
            }
            _ => {}
        }
    }

    fn on_master_pid(&mut self, value: &XmlRpcValue, now: u64) {
        let Some(pid) = value.as_int() else {
            log::warn!("[master] getPid answered without a pid");
            return;
        };
        match self.master_pid {
            Some(old) if old != pid => {
                log::warn!(
                    "[master] master restarted (pid {} -> {}), registering again",
                    old,
                    pid
                );
                self.readvertise_all(now);
            }
            None => log::info!("[master] master pid {}", pid),
            _ => {}
        }
        self.master_pid = Some(pid);
    }

    /// New publisher list for a subscriber: remember it and ask one of them
    /// for a stream.
    pub(crate) fn update_publishers(&mut self, id: SlotId, publishers: Vec<Endpoint>, now: u64) {
        let Some(subscriber) = self.subscribers.get_mut(id) else {
            return;
        };
        log::info!(
            "[master] {} has {} publisher(s)",
            subscriber.topic,
            publishers.len()
        );
        subscriber.set_publishers(publishers);
        self.request_topic(id, now);
    }

    /// Queue `requestTopic` on the subscriber's control slot, unless its
    /// stream is already up or a request is in flight.
    pub(crate) fn request_topic(&mut self, id: SlotId, now: u64) {
        if !self.tcpros_clients.get(id).is_some_and(|p| p.is_idle()) {
            return;
        }
        let control = SlotId::new(id.index() + 1);
        if self.xmlrpc_clients.get(control).map_or(true, |p| p.has_pending()) {
            return;
        }
        let Some(subscriber) = self.subscribers.get_mut(id) else {
            return;
        };
        subscriber.retry_at = now + self.config.ping_period_ms;
        let Some(publisher) = subscriber.pick_publisher() else {
            return;
        };
        log::debug!("[master] requesting {} from {}", subscriber.topic, publisher);
        let call = calls::request_topic(&self.config.name, &subscriber.topic, &publisher)
            .with_provider(id);
        if let Some(process) = self.xmlrpc_clients.get_mut(control) {
            process.enqueue(call);
            process.activate(now);
        }
    }

    fn on_topic_endpoint(&mut self, id: SlotId, value: &XmlRpcValue, now: u64) {
        let Some(endpoint) = calls::tcpros_endpoint(value) else {
            log::warn!("[tcpros] publisher offered no TCPROS endpoint: {:?}", value);
            if let Some(subscriber) = self.subscribers.get_mut(id) {
                subscriber.retry_at = now + self.config.ping_period_ms;
            }
            return;
        };
        let Some(process) = self.tcpros_clients.get_mut(id) else {
            return;
        };
        if !process.is_idle() {
            log::debug!("[tcpros] stream {} already active, ignoring {}", id, endpoint);
            return;
        }
        log::info!("[tcpros] connecting stream {} to {}", id, endpoint);
        process.start_client(endpoint, now);
    }

    fn on_service_lookup(&mut self, id: SlotId, value: &XmlRpcValue, now: u64) {
        let retry_at = now + self.config.ping_period_ms;
        let Some(caller) = self.callers.get_mut(id) else {
            return;
        };
        caller.lookup_pending = false;
        match value.as_str().map(Endpoint::parse) {
            Some(Ok(endpoint)) => {
                log::info!("[master] {} is served at {}", caller.service, endpoint);
                caller.provider = Some(endpoint);
            }
            _ => {
                log::warn!("[master] bad provider URI for {}: {:?}", caller.service, value);
                caller.retry_at = retry_at;
                return;
            }
        }
        self.arm_caller(id, now);
    }

    /// Start a caller's connection when it has work: connect if the
    /// provider is known, else look it up.
    pub(crate) fn arm_caller(&mut self, id: SlotId, now: u64) {
        let (Some(caller), Some(process)) =
            (self.callers.get_mut(id), self.rpcros_clients.get_mut(id))
        else {
            return;
        };
        if process.take_failed() {
            // Provider may have moved
            caller.provider = None;
        }
        if !process.is_idle() || !caller.wants_call(now) {
            return;
        }
        let action = match caller.provider.clone() {
            Some(endpoint) => CallerAction::Connect(endpoint),
            None if !caller.lookup_pending && now >= caller.retry_at => {
                caller.lookup_pending = true;
                CallerAction::Lookup(
                    calls::lookup_service(&self.config.name, &caller.service, &self.master)
                        .with_provider(id),
                )
            }
            None => return,
        };
        match action {
            CallerAction::Connect(endpoint) => {
                log::debug!("[rpcros] caller {} connecting to {}", id, endpoint);
                process.start_client(endpoint, now);
            }
            CallerAction::Lookup(call) => self.enqueue_master(call, now),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::NodeConfig;
    use crate::node::{ServiceCallerSpec, SubscriberSpec, TypeInfo};
    use crate::tcpros::TcprosState;

    fn node() -> Node<ManualClock> {
        let config = NodeConfig::new("/n")
            .with_host("127.0.0.1")
            .with_master_uri("http://127.0.0.1:1/");
        Node::with_clock(config, ManualClock::new(0)).unwrap()
    }

    fn ok(value: XmlRpcValue) -> MethodResponse {
        MethodResponse::Success(RosReply::success("", value).to_value())
    }

    fn take_master_call(node: &mut Node<ManualClock>) -> ApiCall {
        let master = node.xmlrpc_clients.get_mut(SlotId::MASTER).unwrap();
        let call = master.current().cloned().unwrap();
        master.reset(0);
        master.discard_calls();
        call
    }

    #[test]
    fn test_master_restart_readvertises() {
        let mut node = node();
        node.register_subscriber(SubscriberSpec::new("/chatter", TypeInfo::any()))
            .unwrap();
        take_master_call(&mut node);

        let ping = calls::get_pid("/n", &node.master);
        assert!(!node.handle_response(SlotId::MASTER, ping.clone(), ok(XmlRpcValue::Int(41)), 0));
        assert_eq!(node.master_pid(), Some(41));
        assert_eq!(node.master_backlog(), 0);

        node.handle_response(SlotId::MASTER, ping, ok(XmlRpcValue::Int(42)), 0);
        assert_eq!(node.master_pid(), Some(42));
        assert_eq!(node.master_backlog(), 1);
        assert_eq!(take_master_call(&mut node).method, ApiMethod::RegisterSubscriber);
    }

    #[test]
    fn test_refused_registration_is_requeued() {
        let mut node = node();
        let master = node.master.clone();
        let call = calls::register_publisher("/n", "/t", "T", "http://h:1/", &master);
        let refused = MethodResponse::Success(RosReply::failure("nope").to_value());
        assert!(node.handle_response(SlotId::MASTER, call, refused, 0));
        assert_eq!(node.master_backlog(), 1);
    }

    #[test]
    fn test_publishers_lead_to_request_topic_then_stream() {
        let mut node = node();
        let id = node
            .register_subscriber(SubscriberSpec::new("/chatter", TypeInfo::any()))
            .unwrap();
        let register = take_master_call(&mut node);

        let uris = XmlRpcValue::Array(vec!["http://127.0.0.1:40000/".into()]);
        node.handle_response(SlotId::MASTER, register, ok(uris), 5);
        let control = node.xmlrpc_clients.get(SlotId::new(1)).unwrap();
        let request = control.current().cloned().unwrap();
        assert_eq!(request.method, ApiMethod::RequestTopic);
        assert_eq!(request.target.port, 40000);
        assert_eq!(request.provider, Some(id));

        let endpoint = XmlRpcValue::Array(vec![
            "TCPROS".into(),
            "127.0.0.1".into(),
            XmlRpcValue::Int(40001),
        ]);
        node.xmlrpc_clients.get_mut(SlotId::new(1)).unwrap().reset(6);
        node.handle_response(SlotId::new(1), request, ok(endpoint), 6);
        assert_eq!(node.stream_state(id), Some(TcprosState::Connecting));
        let target = node.tcpros_clients.get(id).unwrap().target.clone();
        assert_eq!(target, Some(Endpoint::new("tcpros", "127.0.0.1", 40001)));
    }

    #[test]
    fn test_lookup_arms_caller() {
        let mut node = node();
        let id = node
            .register_service_caller(ServiceCallerSpec::new("/srv", TypeInfo::any()))
            .unwrap();
        node.call_service(id, b"req".to_vec()).unwrap();
        node.arm_caller(id, 0);
        let lookup = take_master_call(&mut node);
        assert_eq!(lookup.method, ApiMethod::LookupService);
        assert!(node.callers.get(id).unwrap().lookup_pending);

        let uri = XmlRpcValue::from("rosrpc://127.0.0.1:40002");
        node.handle_response(SlotId::MASTER, lookup, ok(uri), 1);
        let caller = node.callers.get(id).unwrap();
        assert!(!caller.lookup_pending);
        assert_eq!(caller.provider, Some(Endpoint::new("rosrpc", "127.0.0.1", 40002)));
        assert!(!node.rpcros_clients.get(id).unwrap().is_idle());
    }

    #[test]
    fn test_dropped_lookup_backs_off() {
        let mut node = node();
        let id = node
            .register_service_caller(ServiceCallerSpec::new("/srv", TypeInfo::any()))
            .unwrap();
        node.call_service(id, Vec::new()).unwrap();
        node.arm_caller(id, 0);
        let lookup = take_master_call(&mut node);

        node.on_call_dropped(lookup, 10);
        node.arm_caller(id, 500);
        assert_eq!(node.master_backlog(), 0);
        node.arm_caller(id, 1010);
        assert_eq!(node.master_backlog(), 1);
    }
}
