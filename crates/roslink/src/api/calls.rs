// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outgoing call builders and the ROS reply convention.
//!
//! Every master/slave method answers `[code, statusMessage, value]` with
//! `code == 1` on success, `0` on failure and `-1` on caller error.

use super::{ApiCall, ApiMethod};
use crate::error::{Error, Result};
use crate::uri::Endpoint;
use crate::xmlrpc::{MethodResponse, XmlRpcValue};

/// Success code of a ROS reply
pub const CODE_SUCCESS: i32 = 1;
/// Failure code of a ROS reply
pub const CODE_FAILURE: i32 = 0;
/// Caller-error code of a ROS reply
pub const CODE_ERROR: i32 = -1;

fn strings(values: &[&str]) -> Vec<XmlRpcValue> {
    values.iter().map(|v| XmlRpcValue::from(*v)).collect()
}

pub fn register_publisher(
    caller_id: &str,
    topic: &str,
    topic_type: &str,
    caller_api: &str,
    master: &Endpoint,
) -> ApiCall {
    ApiCall::new(
        ApiMethod::RegisterPublisher,
        strings(&[caller_id, topic, topic_type, caller_api]),
        master.clone(),
    )
}

pub fn unregister_publisher(
    caller_id: &str,
    topic: &str,
    caller_api: &str,
    master: &Endpoint,
) -> ApiCall {
    ApiCall::new(
        ApiMethod::UnregisterPublisher,
        strings(&[caller_id, topic, caller_api]),
        master.clone(),
    )
}

pub fn register_subscriber(
    caller_id: &str,
    topic: &str,
    topic_type: &str,
    caller_api: &str,
    master: &Endpoint,
) -> ApiCall {
    ApiCall::new(
        ApiMethod::RegisterSubscriber,
        strings(&[caller_id, topic, topic_type, caller_api]),
        master.clone(),
    )
}

pub fn unregister_subscriber(
    caller_id: &str,
    topic: &str,
    caller_api: &str,
    master: &Endpoint,
) -> ApiCall {
    ApiCall::new(
        ApiMethod::UnregisterSubscriber,
        strings(&[caller_id, topic, caller_api]),
        master.clone(),
    )
}

/// `service_api` is the `rosrpc://host:port` URI of the service listener.
pub fn register_service(
    caller_id: &str,
    service: &str,
    service_api: &str,
    caller_api: &str,
    master: &Endpoint,
) -> ApiCall {
    ApiCall::new(
        ApiMethod::RegisterService,
        strings(&[caller_id, service, service_api, caller_api]),
        master.clone(),
    )
}

pub fn unregister_service(
    caller_id: &str,
    service: &str,
    service_api: &str,
    master: &Endpoint,
) -> ApiCall {
    ApiCall::new(
        ApiMethod::UnregisterService,
        strings(&[caller_id, service, service_api]),
        master.clone(),
    )
}

pub fn lookup_service(caller_id: &str, service: &str, master: &Endpoint) -> ApiCall {
    ApiCall::new(
        ApiMethod::LookupService,
        strings(&[caller_id, service]),
        master.clone(),
    )
}

/// Master ping.
pub fn get_pid(caller_id: &str, master: &Endpoint) -> ApiCall {
    ApiCall::new(ApiMethod::GetPid, strings(&[caller_id]), master.clone())
}

/// Ask a publisher node for a TCPROS endpoint.
pub fn request_topic(caller_id: &str, topic: &str, publisher: &Endpoint) -> ApiCall {
    let protocols = XmlRpcValue::Array(vec![XmlRpcValue::Array(vec![XmlRpcValue::from(
        "TCPROS",
    )])]);
    ApiCall::new(
        ApiMethod::RequestTopic,
        vec![caller_id.into(), topic.into(), protocols],
        publisher.clone(),
    )
}

/// `[code, status, value]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RosReply {
    pub code: i32,
    pub status: String,
    pub value: XmlRpcValue,
}

impl RosReply {
    pub fn new(code: i32, status: &str, value: XmlRpcValue) -> Self {
        Self {
            code,
            status: status.to_string(),
            value,
        }
    }

    pub fn success(status: &str, value: XmlRpcValue) -> Self {
        Self::new(CODE_SUCCESS, status, value)
    }

    pub fn failure(status: &str) -> Self {
        Self::new(CODE_FAILURE, status, XmlRpcValue::Int(0))
    }

    pub fn error(status: &str) -> Self {
        Self::new(CODE_ERROR, status, XmlRpcValue::Int(0))
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Interpret a parsed response. Faults and wrong shapes are errors.
    pub fn from_response(response: &MethodResponse) -> Result<Self> {
        let value = match response {
            MethodResponse::Success(value) => value,
            MethodResponse::Fault { code, message } => {
                return Err(Error::XmlRpc(format!("fault {}: {}", code, message)));
            }
        };
        match value.as_array() {
            Some([code, status, value, ..]) => {
                let code = code
                    .as_int()
                    .ok_or_else(|| Error::XmlRpc("reply code is not an int".to_string()))?;
                Ok(Self::new(code, status.as_str().unwrap_or(""), value.clone()))
            }
            _ => Err(Error::XmlRpc("reply is not [code, status, value]".to_string())),
        }
    }

    pub fn to_value(&self) -> XmlRpcValue {
        XmlRpcValue::Array(vec![
            XmlRpcValue::Int(self.code),
            XmlRpcValue::from(self.status.as_str()),
            self.value.clone(),
        ])
    }
}

/// Publisher XML-RPC URIs from a `registerSubscriber` value or a
/// `publisherUpdate` parameter. Unparseable entries are skipped.
pub fn uri_list(value: &XmlRpcValue) -> Vec<Endpoint> {
    value
        .as_array()
        .unwrap_or(&[])
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|uri| match Endpoint::parse(uri) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                log::warn!("[master] skipping publisher URI: {}", e);
                None
            }
        })
        .collect()
}

/// `["TCPROS", host, port]` from a `requestTopic` reply.
pub fn tcpros_endpoint(value: &XmlRpcValue) -> Option<Endpoint> {
    match value.as_array()? {
        [protocol, host, port, ..] if protocol.as_str() == Some("TCPROS") => {
            let port = u16::try_from(port.as_int()?).ok()?;
            Some(Endpoint::new("tcpros", host.as_str()?, port))
        }
        _ => None,
    }
}

/// Does a `requestTopic` protocol list offer TCPROS?
pub fn offers_tcpros(protocols: &XmlRpcValue) -> bool {
    protocols
        .as_array()
        .unwrap_or(&[])
        .iter()
        .filter_map(|p| p.as_array())
        .any(|p| p.first().and_then(|name| name.as_str()) == Some("TCPROS"))
}

// ============================================================================
// Tests
// ============================================================================
