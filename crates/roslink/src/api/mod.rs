// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master and slave API calls carried by the control protocol.
//!
//! # Modules
//!
//! - `calls` - Builders for outgoing calls and the `[code, status, value]` reply shape

pub mod calls;

use std::collections::VecDeque;

use crate::slot::SlotId;
use crate::uri::Endpoint;
use crate::xmlrpc::XmlRpcValue;

pub use calls::RosReply;

/// Every method name the node sends or answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    // === Master API (outgoing) ===
    RegisterPublisher,
    UnregisterPublisher,
    RegisterSubscriber,
    UnregisterSubscriber,
    RegisterService,
    UnregisterService,
    LookupService,
    /// Master ping
    GetPid,

    // === Slave API (requestTopic outgoing, all incoming) ===
    RequestTopic,
    GetMasterUri,
    GetPublications,
    GetSubscriptions,
    GetBusStats,
    GetBusInfo,
    ParamUpdate,
    PublisherUpdate,
    Shutdown,
}

impl ApiMethod {
    const ALL: [ApiMethod; 17] = [
        ApiMethod::RegisterPublisher,
        ApiMethod::UnregisterPublisher,
        ApiMethod::RegisterSubscriber,
        ApiMethod::UnregisterSubscriber,
        ApiMethod::RegisterService,
        ApiMethod::UnregisterService,
        ApiMethod::LookupService,
        ApiMethod::GetPid,
        ApiMethod::RequestTopic,
        ApiMethod::GetMasterUri,
        ApiMethod::GetPublications,
        ApiMethod::GetSubscriptions,
        ApiMethod::GetBusStats,
        ApiMethod::GetBusInfo,
        ApiMethod::ParamUpdate,
        ApiMethod::PublisherUpdate,
        ApiMethod::Shutdown,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            ApiMethod::RegisterPublisher => "registerPublisher",
            ApiMethod::UnregisterPublisher => "unregisterPublisher",
            ApiMethod::RegisterSubscriber => "registerSubscriber",
            ApiMethod::UnregisterSubscriber => "unregisterSubscriber",
            ApiMethod::RegisterService => "registerService",
            ApiMethod::UnregisterService => "unregisterService",
            ApiMethod::LookupService => "lookupService",
            ApiMethod::GetPid => "getPid",
            ApiMethod::RequestTopic => "requestTopic",
            ApiMethod::GetMasterUri => "getMasterUri",
            ApiMethod::GetPublications => "getPublications",
            ApiMethod::GetSubscriptions => "getSubscriptions",
            ApiMethod::GetBusStats => "getBusStats",
            ApiMethod::GetBusInfo => "getBusInfo",
            ApiMethod::ParamUpdate => "paramUpdate",
            ApiMethod::PublisherUpdate => "publisherUpdate",
            ApiMethod::Shutdown => "shutdown",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }

    /// register*/unregister* calls, the only ones retried after a failure.
    pub fn is_registration(self) -> bool {
        matches!(
            self,
            ApiMethod::RegisterPublisher
                | ApiMethod::UnregisterPublisher
                | ApiMethod::RegisterSubscriber
                | ApiMethod::UnregisterSubscriber
                | ApiMethod::RegisterService
                | ApiMethod::UnregisterService
        )
    }
}

/// One outgoing call waiting in (or flowing through) a control-client slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiCall {
    pub method: ApiMethod,
    pub params: Vec<XmlRpcValue>,
    /// XML-RPC endpoint the call goes to
    pub target: Endpoint,
    /// Registration the call is about (publisher, subscriber, provider or caller slot)
    pub provider: Option<SlotId>,
}

impl ApiCall {
    pub fn new(method: ApiMethod, params: Vec<XmlRpcValue>, target: Endpoint) -> Self {
        Self {
            method,
            params,
            target,
            provider: None,
        }
    }

    pub fn with_provider(mut self, id: SlotId) -> Self {
        self.provider = Some(id);
        self
    }
}

/// FIFO of calls owned by one control-client slot.
#[derive(Clone, Debug, Default)]
pub struct ApiCallQueue {
    calls: VecDeque<ApiCall>,
}

impl ApiCallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, call: ApiCall) {
        self.calls.push_back(call);
    }

    pub fn pop_front(&mut self) -> Option<ApiCall> {
        self.calls.pop_front()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApiCall> {
        self.calls.iter()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
