// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML-RPC values.

use std::fmt::Write as _;

/// One XML-RPC value.
#[derive(Clone, Debug, PartialEq)]
pub enum XmlRpcValue {
    Int(i32),
    Bool(bool),
    Double(f64),
    String(String),
    Array(Vec<XmlRpcValue>),
    /// Members in document order
    Struct(Vec<(String, XmlRpcValue)>),
}

impl XmlRpcValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            XmlRpcValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            XmlRpcValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            XmlRpcValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[XmlRpcValue]> {
        match self {
            XmlRpcValue::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&XmlRpcValue> {
        match self {
            XmlRpcValue::Struct(members) => {
                members.iter().find(|(k, _)| k == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Serialize as a `<value>` element.
    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            XmlRpcValue::Int(v) => {
                let _ = write!(out, "<i4>{}</i4>", v);
            }
            XmlRpcValue::Bool(v) => {
                let _ = write!(out, "<boolean>{}</boolean>", u8::from(*v));
            }
            XmlRpcValue::Double(v) => {
                let _ = write!(out, "<double>{}</double>", v);
            }
            XmlRpcValue::String(v) => {
                out.push_str("<string>");
                escape_into(v, out);
                out.push_str("</string>");
            }
            XmlRpcValue::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_xml(out);
                }
                out.push_str("</data></array>");
            }
            XmlRpcValue::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    out.push_str("<member><name>");
                    escape_into(name, out);
                    out.push_str("</name>");
                    value.write_xml(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
        }
        out.push_str("</value>");
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

impl From<i32> for XmlRpcValue {
    fn from(v: i32) -> Self {
        XmlRpcValue::Int(v)
    }
}

impl From<bool> for XmlRpcValue {
    fn from(v: bool) -> Self {
        XmlRpcValue::Bool(v)
    }
}

impl From<f64> for XmlRpcValue {
    fn from(v: f64) -> Self {
        XmlRpcValue::Double(v)
    }
}

impl From<&str> for XmlRpcValue {
    fn from(v: &str) -> Self {
        XmlRpcValue::String(v.to_string())
    }
}

impl From<String> for XmlRpcValue {
    fn from(v: String) -> Self {
        XmlRpcValue::String(v)
    }
}

impl From<Vec<XmlRpcValue>> for XmlRpcValue {
    fn from(v: Vec<XmlRpcValue>) -> Self {
        XmlRpcValue::Array(v)
    }
}

// ============================================================================
// Tests
// ============================================================================
