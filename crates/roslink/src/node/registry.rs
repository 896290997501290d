// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration records: publishers, subscribers, service providers and
//! service callers.
//!
//! Records own their names and type descriptors and are destroyed with the
//! node. Connection slots refer to them by [`SlotId`](crate::slot::SlotId).
//! Message bytes are opaque: serialization is the caller's business.

use std::collections::VecDeque;
use std::fmt;

use crate::buffer::DynBuffer;
use crate::config::DEFAULT_PUBLISH_PERIOD_MS;
use crate::transport::encode_frame;
use crate::uri::Endpoint;

/// Default bound of the publisher queue and the subscriber inbox
pub const DEFAULT_QUEUE_SIZE: usize = 16;

/// Produces one message per publish cycle (`None` = nothing this cycle).
pub type PublishCallback = Box<dyn FnMut() -> Option<Vec<u8>>>;

/// Consumes one received message.
pub type MessageCallback = Box<dyn FnMut(&[u8])>;

/// Serves one request; `Err(text)` is sent back as a failed call.
pub type ServiceCallback = Box<dyn FnMut(&[u8]) -> Result<Vec<u8>, String>>;

/// Produces the next request of a periodic caller.
pub type RequestCallback = Box<dyn FnMut() -> Option<Vec<u8>>>;

/// Consumes one service response (`Err` carries the provider's error text).
pub type ResponseCallback = Box<dyn FnMut(Result<&[u8], &str>)>;

// ============================================================================
// Type descriptors
// ============================================================================

/// Message or service type descriptor exchanged in connection headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    /// e.g. `std_msgs/String`
    pub name: String,
    /// Content checksum (`*` accepts anything)
    pub md5sum: String,
    /// Full definition text
    pub definition: String,
}

impl TypeInfo {
    pub fn new(name: &str, md5sum: &str, definition: &str) -> Self {
        Self {
            name: name.to_string(),
            md5sum: md5sum.to_string(),
            definition: definition.to_string(),
        }
    }

    /// Descriptor that matches any peer.
    pub fn any() -> Self {
        Self::new("*", "*", "")
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Bounded FIFO of published messages with sequence numbers.
///
/// Each streaming connection keeps its own cursor (next sequence to send),
/// so one publish fans out to every subscriber connection.
#[derive(Clone, Debug)]
pub struct PublishQueue {
    messages: VecDeque<(u64, Vec<u8>)>,
    next_seq: u64,
    capacity: usize,
}

impl PublishQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.max(1)),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    /// Append, dropping the oldest message when full.
    pub fn push(&mut self, bytes: Vec<u8>) -> u64 {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        let seq = self.next_seq;
        self.messages.push_back((seq, bytes));
        self.next_seq += 1;
        seq
    }

    /// Sequence the next pushed message will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// First message at or after `cursor` (older ones were dropped).
    pub fn next_after(&self, cursor: u64) -> Option<(u64, &[u8])> {
        self.messages
            .iter()
            .find(|(seq, _)| *seq >= cursor)
            .map(|(seq, bytes)| (*seq, bytes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Parameters of [`Node::register_publisher`](crate::node::Node::register_publisher).
pub struct PublisherSpec {
    pub topic: String,
    pub type_info: TypeInfo,
    pub period_ms: u64,
    pub queue_size: usize,
    pub callback: Option<PublishCallback>,
}

impl PublisherSpec {
    pub fn new(topic: &str, type_info: TypeInfo) -> Self {
        Self {
            topic: topic.to_string(),
            type_info,
            period_ms: DEFAULT_PUBLISH_PERIOD_MS,
            queue_size: DEFAULT_QUEUE_SIZE,
            callback: None,
        }
    }

    pub fn with_period_ms(mut self, ms: u64) -> Self {
        self.period_ms = ms;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut() -> Option<Vec<u8>> + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Advertised topic.
pub struct Publisher {
    pub topic: String,
    pub type_info: TypeInfo,
    pub period_ms: u64,
    pub(crate) callback: Option<PublishCallback>,
    pub(crate) queue: PublishQueue,
}

impl Publisher {
    pub fn from_spec(spec: PublisherSpec) -> Self {
        Self {
            topic: spec.topic,
            type_info: spec.type_info,
            period_ms: spec.period_ms,
            callback: spec.callback,
            queue: PublishQueue::new(spec.queue_size),
        }
    }

    /// Payload for one cycle: the callback's message, else every queued
    /// message past `cursor`. Returns the frames appended.
    pub(crate) fn produce(&mut self, cursor: &mut u64, out: &mut DynBuffer) -> usize {
        if let Some(callback) = self.callback.as_mut() {
            return match callback() {
                Some(bytes) => {
                    encode_frame(&bytes, out);
                    1
                }
                None => 0,
            };
        }
        let mut frames = 0;
        while let Some((seq, bytes)) = self.queue.next_after(*cursor) {
            encode_frame(bytes, out);
            *cursor = seq + 1;
            frames += 1;
        }
        frames
    }

    /// Queued messages are waiting past `cursor`.
    pub(crate) fn has_pending(&self, cursor: u64) -> bool {
        self.callback.is_none() && self.queue.next_after(cursor).is_some()
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("type", &self.type_info.name)
            .field("period_ms", &self.period_ms)
            .field("queued", &self.queue.len())
            .finish()
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Parameters of [`Node::register_subscriber`](crate::node::Node::register_subscriber).
pub struct SubscriberSpec {
    pub topic: String,
    pub type_info: TypeInfo,
    pub tcp_nodelay: bool,
    pub inbox_size: usize,
    pub callback: Option<MessageCallback>,
}

impl SubscriberSpec {
    pub fn new(topic: &str, type_info: TypeInfo) -> Self {
        Self {
            topic: topic.to_string(),
            type_info,
            tcp_nodelay: false,
            inbox_size: DEFAULT_QUEUE_SIZE,
            callback: None,
        }
    }

    pub fn with_tcp_nodelay(mut self, enable: bool) -> Self {
        self.tcp_nodelay = enable;
        self
    }

    pub fn with_inbox_size(mut self, size: usize) -> Self {
        self.inbox_size = size;
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Subscribed topic.
pub struct Subscriber {
    pub topic: String,
    pub type_info: TypeInfo,
    pub tcp_nodelay: bool,
    pub(crate) callback: Option<MessageCallback>,
    pub(crate) inbox: VecDeque<Vec<u8>>,
    inbox_size: usize,
    /// Publisher XML-RPC URIs last reported by the master
    pub(crate) publishers: Vec<Endpoint>,
    /// Rotates through `publishers` across attempts
    pub(crate) next_publisher: usize,
    /// Next reconnect attempt while the stream slot is Idle
    pub(crate) retry_at: u64,
    pub(crate) received: u64,
}

impl Subscriber {
    pub fn from_spec(spec: SubscriberSpec) -> Self {
        Self {
            topic: spec.topic,
            type_info: spec.type_info,
            tcp_nodelay: spec.tcp_nodelay,
            callback: spec.callback,
            inbox: VecDeque::new(),
            inbox_size: spec.inbox_size.max(1),
            publishers: Vec::new(),
            next_publisher: 0,
            retry_at: 0,
            received: 0,
        }
    }

    /// Hand one message to the callback, else to the bounded inbox.
    pub(crate) fn deliver(&mut self, bytes: &[u8]) {
        self.received += 1;
        if let Some(callback) = self.callback.as_mut() {
            callback(bytes);
            return;
        }
        if self.inbox.len() == self.inbox_size {
            log::warn!("[tcpros] inbox of {} full, dropping oldest", self.topic);
            self.inbox.pop_front();
        }
        self.inbox.push_back(bytes.to_vec());
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Publisher to ask next, rotating on each call.
    pub(crate) fn pick_publisher(&mut self) -> Option<Endpoint> {
        if self.publishers.is_empty() {
            return None;
        }
        let endpoint = self.publishers[self.next_publisher % self.publishers.len()].clone();
        self.next_publisher = self.next_publisher.wrapping_add(1);
        Some(endpoint)
    }

    /// Replace the known publishers (from the master or `publisherUpdate`).
    pub(crate) fn set_publishers(&mut self, publishers: Vec<Endpoint>) {
        self.publishers = publishers;
        self.next_publisher = 0;
        self.retry_at = 0;
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("type", &self.type_info.name)
            .field("publishers", &self.publishers)
            .field("inbox", &self.inbox.len())
            .finish()
    }
}

// ============================================================================
// Service provider
// ============================================================================

/// Parameters of [`Node::register_service_provider`](crate::node::Node::register_service_provider).
pub struct ServiceProviderSpec {
    pub service: String,
    pub type_info: TypeInfo,
    pub callback: ServiceCallback,
}

impl ServiceProviderSpec {
    pub fn new<F>(service: &str, type_info: TypeInfo, callback: F) -> Self
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, String> + 'static,
    {
        Self {
            service: service.to_string(),
            type_info,
            callback: Box::new(callback),
        }
    }
}

/// Served service.
pub struct ServiceProvider {
    pub service: String,
    pub type_info: TypeInfo,
    pub(crate) callback: ServiceCallback,
    pub(crate) calls: u64,
}

impl ServiceProvider {
    pub fn from_spec(spec: ServiceProviderSpec) -> Self {
        Self {
            service: spec.service,
            type_info: spec.type_info,
            callback: spec.callback,
            calls: 0,
        }
    }

    pub(crate) fn serve(&mut self, request: &[u8]) -> Result<Vec<u8>, String> {
        self.calls += 1;
        (self.callback)(request)
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("service", &self.service)
            .field("type", &self.type_info.name)
            .field("calls", &self.calls)
            .finish()
    }
}

// ============================================================================
// Service caller
// ============================================================================

/// Parameters of [`Node::register_service_caller`](crate::node::Node::register_service_caller).
pub struct ServiceCallerSpec {
    pub service: String,
    pub type_info: TypeInfo,
    pub persistent: bool,
    /// Cycle of the request callback (ignored without one)
    pub period_ms: u64,
    pub request_callback: Option<RequestCallback>,
    pub response_callback: Option<ResponseCallback>,
}

impl ServiceCallerSpec {
    pub fn new(service: &str, type_info: TypeInfo) -> Self {
        Self {
            service: service.to_string(),
            type_info,
            persistent: false,
            period_ms: DEFAULT_PUBLISH_PERIOD_MS,
            request_callback: None,
            response_callback: None,
        }
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_period_ms(mut self, ms: u64) -> Self {
        self.period_ms = ms;
        self
    }

    pub fn with_request_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut() -> Option<Vec<u8>> + 'static,
    {
        self.request_callback = Some(Box::new(callback));
        self
    }

    pub fn with_response_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Result<&[u8], &str>) + 'static,
    {
        self.response_callback = Some(Box::new(callback));
        self
    }
}

/// Outcome of one service call, kept when no response callback is set.
pub type ServiceResult = Result<Vec<u8>, String>;

/// Client of a remote service.
pub struct ServiceCaller {
    pub service: String,
    pub type_info: TypeInfo,
    pub persistent: bool,
    pub period_ms: u64,
    pub(crate) request_callback: Option<RequestCallback>,
    pub(crate) response_callback: Option<ResponseCallback>,
    /// Requests queued by `Node::call_service`
    pub(crate) pending: VecDeque<Vec<u8>>,
    pub(crate) responses: VecDeque<ServiceResult>,
    /// Provider address from the last `lookupService`
    pub(crate) provider: Option<Endpoint>,
    pub(crate) lookup_pending: bool,
    /// Earliest next `lookupService` after a failed one
    pub(crate) retry_at: u64,
    /// Next request-callback cycle
    pub(crate) next_call_at: u64,
}

impl ServiceCaller {
    pub fn from_spec(spec: ServiceCallerSpec) -> Self {
        Self {
            service: spec.service,
            type_info: spec.type_info,
            persistent: spec.persistent,
            period_ms: spec.period_ms,
            request_callback: spec.request_callback,
            response_callback: spec.response_callback,
            pending: VecDeque::new(),
            responses: VecDeque::new(),
            provider: None,
            lookup_pending: false,
            retry_at: 0,
            next_call_at: 0,
        }
    }

    /// Next request: a queued one first, then the callback's.
    pub(crate) fn next_request(&mut self) -> Option<Vec<u8>> {
        if let Some(request) = self.pending.pop_front() {
            return Some(request);
        }
        self.request_callback.as_mut().and_then(|callback| callback())
    }

    /// A request is ready to go without waiting for the cycle.
    pub(crate) fn has_queued(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The caller wants a connection now.
    pub(crate) fn wants_call(&self, now: u64) -> bool {
        self.has_queued() || (self.request_callback.is_some() && now >= self.next_call_at)
    }

    pub(crate) fn deliver(&mut self, result: ServiceResult) {
        match self.response_callback.as_mut() {
            Some(callback) => match &result {
                Ok(bytes) => callback(Ok(bytes.as_slice())),
                Err(text) => callback(Err(text.as_str())),
            },
            None => self.responses.push_back(result),
        }
    }
}

impl fmt::Debug for ServiceCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCaller")
            .field("service", &self.service)
            .field("type", &self.type_info.name)
            .field("persistent", &self.persistent)
            .field("provider", &self.provider)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_queue_fanout_cursors() {
        let mut queue = PublishQueue::new(4);
        let mut slow = queue.next_seq();
        queue.push(b"a".to_vec());
        let mut fast = queue.next_seq();
        queue.push(b"b".to_vec());

        assert_eq!(queue.next_after(slow).map(|(s, b)| (s, b.to_vec())), Some((0, b"a".to_vec())));
        slow = 1;
        assert_eq!(queue.next_after(slow).map(|(s, _)| s), Some(1));
        assert_eq!(queue.next_after(fast).map(|(s, _)| s), Some(1));
        fast = 2;
        assert!(queue.next_after(fast).is_none());
    }

    #[test]
    fn test_publish_queue_drops_oldest() {
        let mut queue = PublishQueue::new(2);
        for i in 0..5u8 {
            queue.push(vec![i]);
        }
        assert_eq!(queue.len(), 2);
        // A lagging cursor skips to the oldest retained message
        assert_eq!(queue.next_after(0).map(|(s, b)| (s, b[0])), Some((3, 3)));
    }

    #[test]
    fn test_publisher_produce_from_queue() {
        let mut publisher = Publisher::from_spec(PublisherSpec::new("/t", TypeInfo::any()));
        let mut cursor = publisher.queue.next_seq();
        publisher.queue.push(b"one".to_vec());
        publisher.queue.push(b"two".to_vec());
        assert!(publisher.has_pending(cursor));

        let mut out = DynBuffer::new();
        assert_eq!(publisher.produce(&mut cursor, &mut out), 2);
        assert_eq!(out.as_slice(), b"\x03\0\0\0one\x03\0\0\0two");
        assert_eq!(cursor, 2);
        assert!(!publisher.has_pending(cursor));
    }

    #[test]
    fn test_publisher_produce_from_callback() {
        let mut n = 0u8;
        let spec = PublisherSpec::new("/t", TypeInfo::any()).with_callback(move || {
            n += 1;
            (n % 2 == 1).then(|| vec![n])
        });
        let mut publisher = Publisher::from_spec(spec);
        let mut cursor = 0;
        let mut out = DynBuffer::new();
        assert_eq!(publisher.produce(&mut cursor, &mut out), 1);
        assert_eq!(publisher.produce(&mut cursor, &mut out), 0);
        assert_eq!(out.as_slice(), &[1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_subscriber_inbox_bounded() {
        let spec = SubscriberSpec::new("/t", TypeInfo::any()).with_inbox_size(2);
        let mut subscriber = Subscriber::from_spec(spec);
        subscriber.deliver(b"1");
        subscriber.deliver(b"2");
        subscriber.deliver(b"3");
        assert_eq!(subscriber.inbox.len(), 2);
        assert_eq!(subscriber.inbox.front().map(|m| m.as_slice()), Some(&b"2"[..]));
        assert_eq!(subscriber.received(), 3);
    }

    #[test]
    fn test_caller_request_order() {
        let spec = ServiceCallerSpec::new("/srv", TypeInfo::any())
            .with_request_callback(|| Some(b"cb".to_vec()));
        let mut caller = ServiceCaller::from_spec(spec);
        caller.pending.push_back(b"queued".to_vec());
        assert!(caller.wants_call(0));
        assert_eq!(caller.next_request(), Some(b"queued".to_vec()));
        assert_eq!(caller.next_request(), Some(b"cb".to_vec()));
        caller.next_call_at = 100;
        assert!(!caller.wants_call(50));
    }

    #[test]
    fn test_caller_responses_without_callback() {
        let mut caller = ServiceCaller::from_spec(ServiceCallerSpec::new("/srv", TypeInfo::any()));
        caller.deliver(Ok(b"r".to_vec()));
        caller.deliver(Err("bad".to_string()));
        assert_eq!(caller.responses.len(), 2);
    }

    #[test]
    fn test_publisher_rotation() {
        let mut subscriber = Subscriber::from_spec(SubscriberSpec::new("/t", TypeInfo::any()));
        assert!(subscriber.pick_publisher().is_none());
        subscriber.set_publishers(vec![
            Endpoint::new("http", "a", 1),
            Endpoint::new("http", "b", 2),
        ]);
        let hosts: Vec<String> = (0..3)
            .filter_map(|_| subscriber.pick_publisher())
            .map(|e| e.host)
            .collect();
        assert_eq!(hosts, vec!["a", "b", "a"]);
    }
}
