// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The node's XML-RPC API, served to the master and to peer nodes.
//!
//! Every answer is `[code, status, value]`; unknown methods and malformed
//! parameters get code -1.

use crate::api::calls::{self, RosReply};
use crate::api::ApiMethod;
use crate::clock::Clock;
use crate::xmlrpc::{MethodCall, XmlRpcValue};

use super::Node;

fn int(value: usize) -> XmlRpcValue {
    XmlRpcValue::Int(i32::try_from(value).unwrap_or(i32::MAX))
}

impl<C: Clock> Node<C> {
    /// Answer one incoming call.
    pub(crate) fn handle_slave_call(&mut self, call: &MethodCall, now: u64) -> XmlRpcValue {
        let reply = match ApiMethod::from_name(&call.method) {
            Some(method) => self.slave_reply(method, &call.params, now),
            None => {
                log::warn!("[slave] unknown method {}", call.method);
                RosReply::error(&format!("unknown method [{}]", call.method))
            }
        };
        log::debug!("[slave] {} -> {}", call.method, reply.code);
        reply.to_value()
    }

    fn slave_reply(&mut self, method: ApiMethod, params: &[XmlRpcValue], now: u64) -> RosReply {
        match method {
            ApiMethod::GetPid => RosReply::success("", int(std::process::id() as usize)),
            ApiMethod::GetMasterUri => RosReply::success("", self.master.to_string().into()),
            ApiMethod::GetPublications => RosReply::success("publications", self.publications()),
            ApiMethod::GetSubscriptions => {
                RosReply::success("subscriptions", self.subscriptions())
            }
            ApiMethod::GetBusStats => RosReply::success("bus stats", self.bus_stats()),
            ApiMethod::GetBusInfo => RosReply::success("bus info", self.bus_info()),
            ApiMethod::ParamUpdate => {
                log::debug!("[slave] ignoring paramUpdate");
                RosReply::success("", XmlRpcValue::Int(0))
            }
            ApiMethod::RequestTopic => self.answer_request_topic(params),
            ApiMethod::PublisherUpdate => self.answer_publisher_update(params, now),
            ApiMethod::Shutdown => {
                let caller = params.first().and_then(|p| p.as_str()).unwrap_or("?");
                let reason = params.get(1).and_then(|p| p.as_str()).unwrap_or("");
                log::warn!("[slave] shutdown requested by {}: {}", caller, reason);
                self.shutdown_requested = true;
                RosReply::success("shutdown", XmlRpcValue::Int(0))
            }
            other => RosReply::error(&format!("{} is a master method", other.name())),
        }
    }

    fn answer_request_topic(&mut self, params: &[XmlRpcValue]) -> RosReply {
        let [caller, topic, protocols, ..] = params else {
            return RosReply::error("requestTopic expects [caller_id, topic, protocols]");
        };
        let (Some(caller), Some(topic)) = (caller.as_str(), topic.as_str()) else {
            return RosReply::error("requestTopic: caller_id and topic must be strings");
        };
        if self.publishers.first_where(|p| p.topic == topic).is_none() {
            log::warn!("[slave] {} asked for unpublished {}", caller, topic);
            return RosReply::failure(&format!("not a publisher of [{}]", topic));
        }
        if !calls::offers_tcpros(protocols) {
            log::warn!("[slave] {} offers no supported protocol for {}", caller, topic);
            return RosReply::failure("no supported protocol implementations");
        }
        log::debug!("[slave] {} requests {}", caller, topic);
        let endpoint = XmlRpcValue::Array(vec![
            "TCPROS".into(),
            self.host.as_str().into(),
            XmlRpcValue::Int(i32::from(self.tcpros_port())),
        ]);
        RosReply::success("ready on TCPROS", endpoint)
    }

    fn answer_publisher_update(&mut self, params: &[XmlRpcValue], now: u64) -> RosReply {
        let [_, topic, publishers, ..] = params else {
            return RosReply::error("publisherUpdate expects [caller_id, topic, publishers]");
        };
        let Some(topic) = topic.as_str() else {
            return RosReply::error("publisherUpdate: topic must be a string");
        };
        let Some(id) = self.subscribers.first_where(|s| s.topic == topic) else {
            log::debug!("[slave] publisherUpdate for unsubscribed {}", topic);
            return RosReply::success("", XmlRpcValue::Int(0));
        };
        self.update_publishers(id, calls::uri_list(publishers), now);
        RosReply::success("publisher update received", XmlRpcValue::Int(0))
    }

    fn publications(&self) -> XmlRpcValue {
        XmlRpcValue::Array(
            self.publishers
                .iter()
                .map(|(_, p)| {
                    XmlRpcValue::Array(vec![
                        p.topic.as_str().into(),
                        p.type_info.name.as_str().into(),
                    ])
                })
                .collect(),
        )
    }

    fn subscriptions(&self) -> XmlRpcValue {
        XmlRpcValue::Array(
            self.subscribers
                .iter()
                .map(|(_, s)| {
                    XmlRpcValue::Array(vec![
                        s.topic.as_str().into(),
                        s.type_info.name.as_str().into(),
                    ])
                })
                .collect(),
        )
    }

    /// `[publish stats, subscribe stats, service stats]`.
    fn bus_stats(&self) -> XmlRpcValue {
        let publish = self
            .publishers
            .iter()
            .map(|(_, p)| {
                XmlRpcValue::Array(vec![
                    p.topic.as_str().into(),
                    int(p.queue.next_seq() as usize),
                    XmlRpcValue::Array(Vec::new()),
                ])
            })
            .collect();
        let subscribe = self
            .subscribers
            .iter()
            .map(|(_, s)| {
                XmlRpcValue::Array(vec![
                    s.topic.as_str().into(),
                    int(s.received() as usize),
                    XmlRpcValue::Array(Vec::new()),
                ])
            })
            .collect();
        let served: u64 = self.providers.iter().map(|(_, p)| p.calls).sum();
        let service = XmlRpcValue::Array(vec![
            int(served as usize),
            XmlRpcValue::Int(0),
            XmlRpcValue::Int(0),
        ]);
        XmlRpcValue::Array(vec![
            XmlRpcValue::Array(publish),
            XmlRpcValue::Array(subscribe),
            service,
        ])
    }

    /// One `[id, peer, direction, transport, topic, connected]` per stream.
    fn bus_info(&self) -> XmlRpcValue {
        let mut connections = Vec::new();
        for (id, process) in self.tcpros_servers.iter() {
            let Some(topic) = process.topic.and_then(|t| self.publishers.get(t)) else {
                continue;
            };
            if process.is_idle() {
                continue;
            }
            connections.push(XmlRpcValue::Array(vec![
                int(id.index()),
                process.peer_id.as_str().into(),
                "o".into(),
                "TCPROS".into(),
                topic.topic.as_str().into(),
                true.into(),
            ]));
        }
        let offset = self.tcpros_servers.len();
        for (id, process) in self.tcpros_clients.iter() {
            let (Some(subscriber), Some(target)) =
                (self.subscribers.get(id), process.target.as_ref())
            else {
                continue;
            };
            connections.push(XmlRpcValue::Array(vec![
                int(offset + id.index()),
                target.to_string().into(),
                "i".into(),
                "TCPROS".into(),
                subscriber.topic.as_str().into(),
                true.into(),
            ]));
        }
        XmlRpcValue::Array(connections)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::calls::{CODE_ERROR, CODE_FAILURE, CODE_SUCCESS};
    use crate::clock::ManualClock;
    use crate::config::NodeConfig;
    use crate::node::{PublisherSpec, SubscriberSpec, TypeInfo};
    use crate::slot::SlotId;
    use crate::xmlrpc::MethodResponse;

    fn node() -> Node<ManualClock> {
        let config = NodeConfig::new("/talker")
            .with_host("127.0.0.1")
            .with_master_uri("http://127.0.0.1:1/");
        Node::with_clock(config, ManualClock::new(0)).unwrap()
    }

    fn call(node: &mut Node<ManualClock>, method: &str, params: Vec<XmlRpcValue>) -> RosReply {
        let call = MethodCall {
            method: method.to_string(),
            params,
        };
        let value = node.handle_slave_call(&call, 0);
        RosReply::from_response(&MethodResponse::Success(value)).unwrap()
    }

    fn tcpros_offer() -> XmlRpcValue {
        XmlRpcValue::Array(vec![XmlRpcValue::Array(vec!["TCPROS".into()])])
    }

    #[test]
    fn test_request_topic_for_published_topic() {
        let mut node = node();
        node.register_publisher(PublisherSpec::new("/chatter", TypeInfo::any()))
            .unwrap();
        let reply = call(
            &mut node,
            "requestTopic",
            vec!["/listener".into(), "/chatter".into(), tcpros_offer()],
        );
        assert_eq!(reply.code, CODE_SUCCESS);
        let endpoint = calls::tcpros_endpoint(&reply.value).unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, node.tcpros_port());
    }

    #[test]
    fn test_request_topic_refusals() {
        let mut node = node();
        node.register_publisher(PublisherSpec::new("/chatter", TypeInfo::any()))
            .unwrap();

        let unknown = call(
            &mut node,
            "requestTopic",
            vec!["/l".into(), "/other".into(), tcpros_offer()],
        );
        assert_eq!(unknown.code, CODE_FAILURE);

        let udp_only = XmlRpcValue::Array(vec![XmlRpcValue::Array(vec!["UDPROS".into()])]);
        let no_protocol = call(
            &mut node,
            "requestTopic",
            vec!["/l".into(), "/chatter".into(), udp_only],
        );
        assert_eq!(no_protocol.code, CODE_FAILURE);

        let malformed = call(&mut node, "requestTopic", vec!["/l".into()]);
        assert_eq!(malformed.code, CODE_ERROR);
    }

    #[test]
    fn test_unknown_and_master_methods() {
        let mut node = node();
        assert_eq!(call(&mut node, "frobnicate", Vec::new()).code, CODE_ERROR);
        assert_eq!(call(&mut node, "registerPublisher", Vec::new()).code, CODE_ERROR);
    }

    #[test]
    fn test_introspection() {
        let mut node = node();
        node.register_publisher(PublisherSpec::new("/a", TypeInfo::new("std_msgs/String", "*", "")))
            .unwrap();
        node.register_subscriber(SubscriberSpec::new("/b", TypeInfo::any()))
            .unwrap();

        let pid = call(&mut node, "getPid", vec!["/x".into()]);
        assert_eq!(pid.value.as_int(), Some(std::process::id() as i32));

        let master = call(&mut node, "getMasterUri", vec!["/x".into()]);
        assert_eq!(master.value.as_str(), Some("http://127.0.0.1:1/"));

        let publications = call(&mut node, "getPublications", vec!["/x".into()]);
        let first = publications.value.as_array().unwrap()[0].clone();
        assert_eq!(
            first,
            XmlRpcValue::Array(vec!["/a".into(), "std_msgs/String".into()])
        );

        let subscriptions = call(&mut node, "getSubscriptions", vec!["/x".into()]);
        assert_eq!(subscriptions.value.as_array().map(|a| a.len()), Some(1));

        let stats = call(&mut node, "getBusStats", vec!["/x".into()]);
        assert_eq!(stats.value.as_array().map(|a| a.len()), Some(3));

        let info = call(&mut node, "getBusInfo", vec!["/x".into()]);
        assert_eq!(info.value.as_array().map(|a| a.len()), Some(0));
    }

    #[test]
    fn test_shutdown_sets_flag() {
        let mut node = node();
        let reply = call(&mut node, "shutdown", vec!["/master".into(), "bye".into()]);
        assert_eq!(reply.code, CODE_SUCCESS);
        assert!(node.shutdown_requested());
    }

    #[test]
    fn test_publisher_update_requests_topic() {
        let mut node = node();
        let id = node
            .register_subscriber(SubscriberSpec::new("/chatter", TypeInfo::any()))
            .unwrap();
        let publishers = XmlRpcValue::Array(vec!["http://127.0.0.1:40100/".into()]);
        let reply = call(
            &mut node,
            "publisherUpdate",
            vec!["/master".into(), "/chatter".into(), publishers],
        );
        assert_eq!(reply.code, CODE_SUCCESS);
        assert_eq!(node.subscriber(id).unwrap().publishers.len(), 1);
        let control = node.xmlrpc_clients.get(SlotId::new(1)).unwrap();
        assert_eq!(control.current().map(|c| c.method), Some(ApiMethod::RequestTopic));
    }
}
