// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML-RPC request/response codec.
//!
//! Serialization writes straight into the process buffer. Parsing first
//! waits for a complete HTTP envelope, then hands the body to `roxmltree`.

use super::http::{self, Envelope};
use super::value::XmlRpcValue;
use super::Parse;
use crate::buffer::DynBuffer;

/// Incoming call (server role).
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<XmlRpcValue>,
}

/// Parsed response (client role).
#[derive(Clone, Debug, PartialEq)]
pub enum MethodResponse {
    Success(XmlRpcValue),
    Fault { code: i32, message: String },
}

const XML_DECL: &str = "<?xml version=\"1.0\"?>\n";

/// Serialize a `methodCall` envelope for `method` into `out`.
///
/// `host` is the `Host:` header value (`host:port`).
pub fn prepare_request(method: &str, params: &[XmlRpcValue], host: &str, out: &mut DynBuffer) {
    let mut body = String::with_capacity(256);
    body.push_str(XML_DECL);
    body.push_str("<methodCall><methodName>");
    body.push_str(method);
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param>");
        param.write_xml(&mut body);
        body.push_str("</param>");
    }
    body.push_str("</params></methodCall>\n");
    http::write_request(host, &body, out);
}

/// Serialize a successful `methodResponse` into `out`.
pub fn prepare_response(value: &XmlRpcValue, out: &mut DynBuffer) {
    let mut body = String::with_capacity(256);
    body.push_str(XML_DECL);
    body.push_str("<methodResponse><params><param>");
    value.write_xml(&mut body);
    body.push_str("</param></params></methodResponse>\n");
    http::write_response(&body, out);
}

/// Serialize a fault `methodResponse` into `out`.
pub fn prepare_fault(code: i32, message: &str, out: &mut DynBuffer) {
    let fault = XmlRpcValue::Struct(vec![
        ("faultCode".to_string(), XmlRpcValue::Int(code)),
        ("faultString".to_string(), XmlRpcValue::from(message)),
    ]);
    let mut body = String::with_capacity(256);
    body.push_str(XML_DECL);
    body.push_str("<methodResponse><fault>");
    fault.write_xml(&mut body);
    body.push_str("</fault></methodResponse>\n");
    http::write_response(&body, out);
}

/// Parse a response from the accumulated receive buffer.
pub fn parse_response(bytes: &[u8], closed: bool) -> Parse<MethodResponse> {
    let envelope = match http::read_envelope(bytes, closed) {
        Parse::Done(env) => env,
        Parse::Incomplete => return Parse::Incomplete,
        Parse::Error(e) => return Parse::Error(e),
    };
    match http::status_code(envelope.start_line) {
        Some(200) => {}
        Some(code) => return Parse::Error(format!("HTTP status {}", code)),
        None => return Parse::Error(format!("bad status line {:?}", envelope.start_line)),
    }
    with_document(&envelope, |doc| {
        let root = doc.root_element();
        if root.tag_name().name() != "methodResponse" {
            return Err(format!("unexpected root <{}>", root.tag_name().name()));
        }
        if let Some(fault) = child(root, "fault") {
            let value = parse_value(child(fault, "value").ok_or("fault without value")?)?;
            let code = value.member("faultCode").and_then(|v| v.as_int()).unwrap_or(-1);
            let message = value
                .member("faultString")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            return Ok(MethodResponse::Fault { code, message });
        }
        let value = child(root, "params")
            .and_then(|p| child(p, "param"))
            .and_then(|p| child(p, "value"))
            .ok_or("response without params/param/value")?;
        Ok(MethodResponse::Success(parse_value(value)?))
    })
}

/// Parse an incoming call from the accumulated receive buffer.
pub fn parse_request(bytes: &[u8], closed: bool) -> Parse<MethodCall> {
    let envelope = match http::read_envelope(bytes, closed) {
        Parse::Done(env) => env,
        Parse::Incomplete => return Parse::Incomplete,
        Parse::Error(e) => return Parse::Error(e),
    };
    if !envelope.start_line.starts_with("POST ") {
        return Parse::Error(format!("unexpected request line {:?}", envelope.start_line));
    }
    with_document(&envelope, |doc| {
        let root = doc.root_element();
        if root.tag_name().name() != "methodCall" {
            return Err(format!("unexpected root <{}>", root.tag_name().name()));
        }
        let method = child(root, "methodName")
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or("methodCall without methodName")?;
        let mut params = Vec::new();
        if let Some(list) = child(root, "params") {
            for param in elements(list).filter(|n| n.tag_name().name() == "param") {
                let value = child(param, "value").ok_or("param without value")?;
                params.push(parse_value(value)?);
            }
        }
        Ok(MethodCall { method, params })
    })
}

fn with_document<T, F>(envelope: &Envelope<'_>, f: F) -> Parse<T>
where
    F: FnOnce(&roxmltree::Document<'_>) -> Result<T, String>,
{
    let Ok(text) = std::str::from_utf8(envelope.body) else {
        return Parse::Error("XML body is not UTF-8".to_string());
    };
    let doc = match roxmltree::Document::parse(text) {
        Ok(doc) => doc,
        Err(e) => return Parse::Error(format!("XML: {}", e)),
    };
    match f(&doc) {
        Ok(v) => Parse::Done(v),
        Err(e) => Parse::Error(e),
    }
}

fn elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'input>(node: roxmltree::Node<'a, 'input>, name: &str) -> Option<roxmltree::Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

/// Decode one `<value>` element.
fn parse_value(node: roxmltree::Node<'_, '_>) -> Result<XmlRpcValue, String> {
    let Some(inner) = elements(node).next() else {
        // Untyped value defaults to string
        return Ok(XmlRpcValue::String(node.text().unwrap_or("").to_string()));
    };
    let text = inner.text().unwrap_or("").trim();
    match inner.tag_name().name() {
        "i4" | "int" => text
            .parse()
            .map(XmlRpcValue::Int)
            .map_err(|_| format!("bad int {:?}", text)),
        "boolean" => match text {
            "1" | "true" => Ok(XmlRpcValue::Bool(true)),
            "0" | "false" => Ok(XmlRpcValue::Bool(false)),
            _ => Err(format!("bad boolean {:?}", text)),
        },
        "double" => text
            .parse()
            .map(XmlRpcValue::Double)
            .map_err(|_| format!("bad double {:?}", text)),
        // Strings keep their whitespace
        "string" => Ok(XmlRpcValue::String(inner.text().unwrap_or("").to_string())),
        "dateTime.iso8601" | "base64" => Ok(XmlRpcValue::String(text.to_string())),
        "array" => {
            let mut items = Vec::new();
            if let Some(data) = child(inner, "data") {
                for value in elements(data).filter(|n| n.tag_name().name() == "value") {
                    items.push(parse_value(value)?);
                }
            }
            Ok(XmlRpcValue::Array(items))
        }
        "struct" => {
            let mut members = Vec::new();
            for member in elements(inner).filter(|n| n.tag_name().name() == "member") {
                let name = child(member, "name")
                    .and_then(|n| n.text())
                    .ok_or("member without name")?;
                let value = child(member, "value").ok_or("member without value")?;
                members.push((name.to_string(), parse_value(value)?));
            }
            Ok(XmlRpcValue::Struct(members))
        }
        other => Err(format!("unsupported value type <{}>", other)),
    }
}

// ============================================================================
// Tests
// ============================================================================
