// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control protocol: XML-RPC over HTTP.
//!
//! # Modules
//!
//! - `value` - `XmlRpcValue` and its XML writer
//! - `http` - Content-Length envelope, incremental reader
//! - `codec` - Request/response/fault serialization and parsing
//! - `process` - Per-connection client/server state machine

pub mod codec;
pub mod http;
pub mod process;
pub mod value;

pub use codec::{
    parse_request, parse_response, prepare_fault, prepare_request, prepare_response, MethodCall,
    MethodResponse,
};
pub use process::{ClientStep, ServerStep, XmlRpcProcess, XmlRpcState};
pub use value::XmlRpcValue;

/// Outcome of an incremental parse over an accumulated buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Parse<T> {
    Done(T),
    /// Need more bytes
    Incomplete,
    Error(String),
}
