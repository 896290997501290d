// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process stand-in for the ROS master, served from a background thread.
//!
//! Keeps topic and service registrations and answers the master API with
//! `[code, status, value]`. Registering a publisher sends `publisherUpdate`
//! to the topic's subscribers, as the real master does.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roslink::buffer::DynBuffer;
use roslink::xmlrpc::{self, MethodCall, Parse, XmlRpcValue};
use roslink::{Clock, Node};

pub const MASTER_PID: i32 = 4242;

#[derive(Debug, Default)]
pub struct MasterState {
    pub publishers: HashMap<String, Vec<String>>,
    pub subscribers: HashMap<String, Vec<String>>,
    pub services: HashMap<String, String>,
    pub calls: Vec<String>,
    pub pid: i32,
}

pub struct FakeMaster {
    pub uri: String,
    pub state: Arc<Mutex<MasterState>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeMaster {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake master");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(Mutex::new(MasterState {
            pid: MASTER_PID,
            ..Default::default()
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => serve(stream, &state),
                        Err(_) => thread::sleep(Duration::from_millis(2)),
                    }
                }
            })
        };

        Self {
            uri: format!("http://127.0.0.1:{}/", port),
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MasterState) -> R) -> R {
        f(&mut self.state.lock().expect("master state"))
    }

    pub fn saw(&self, method: &str) -> bool {
        self.with_state(|s| s.calls.iter().any(|c| c == method))
    }
}

impl Drop for FakeMaster {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_call(stream: &mut TcpStream) -> Option<MethodCall> {
    stream.set_nonblocking(false).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(2))).ok()?;
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).ok()?;
        received.extend_from_slice(&buf[..n]);
        match xmlrpc::parse_request(&received, n == 0) {
            Parse::Done(call) => return Some(call),
            Parse::Incomplete if n > 0 => continue,
            _ => return None,
        }
    }
}

fn reply(code: i32, status: &str, value: XmlRpcValue) -> XmlRpcValue {
    XmlRpcValue::Array(vec![XmlRpcValue::Int(code), status.into(), value])
}

fn strings(values: &[String]) -> XmlRpcValue {
    XmlRpcValue::Array(values.iter().map(|v| v.as_str().into()).collect())
}

fn param(call: &MethodCall, index: usize) -> String {
    call.params
        .get(index)
        .and_then(|p| p.as_str())
        .unwrap_or_default()
        .to_string()
}

fn serve(mut stream: TcpStream, state: &Mutex<MasterState>) {
    let Some(call) = read_call(&mut stream) else {
        return;
    };
    let mut updates = Vec::new();
    let value = {
        let mut state = state.lock().expect("master state");
        state.calls.push(call.method.clone());
        let topic = param(&call, 1);
        match call.method.as_str() {
            "getPid" => reply(1, "", XmlRpcValue::Int(state.pid)),
            "registerPublisher" => {
                let api = param(&call, 3);
                let list = state.publishers.entry(topic.clone()).or_default();
                if !list.contains(&api) {
                    list.push(api);
                }
                let publishers = list.clone();
                for subscriber in state.subscribers.get(&topic).cloned().unwrap_or_default() {
                    updates.push((subscriber, topic.clone(), publishers.clone()));
                }
                let subscribers = state.subscribers.get(&topic).cloned().unwrap_or_default();
                reply(1, "registered", strings(&subscribers))
            }
            "registerSubscriber" => {
                let api = param(&call, 3);
                let list = state.subscribers.entry(topic.clone()).or_default();
                if !list.contains(&api) {
                    list.push(api);
                }
                let publishers = state.publishers.get(&topic).cloned().unwrap_or_default();
                reply(1, "subscribed", strings(&publishers))
            }
            "unregisterPublisher" => {
                let api = param(&call, 2);
                if let Some(list) = state.publishers.get_mut(&topic) {
                    list.retain(|a| *a != api);
                }
                reply(1, "", XmlRpcValue::Int(1))
            }
            "unregisterSubscriber" => {
                let api = param(&call, 2);
                if let Some(list) = state.subscribers.get_mut(&topic) {
                    list.retain(|a| *a != api);
                }
                reply(1, "", XmlRpcValue::Int(1))
            }
            "registerService" => {
                let uri = param(&call, 2);
                state.services.insert(topic, uri);
                reply(1, "", XmlRpcValue::Int(1))
            }
            "unregisterService" => {
                state.services.remove(&topic);
                reply(1, "", XmlRpcValue::Int(1))
            }
            "lookupService" => match state.services.get(&topic) {
                Some(uri) => reply(1, "", uri.as_str().into()),
                None => reply(-1, "no provider", "".into()),
            },
            other => reply(-1, &format!("unknown method {}", other), XmlRpcValue::Int(0)),
        }
    };

    let mut out = DynBuffer::new();
    xmlrpc::prepare_response(&value, &mut out);
    let _ = stream.write_all(out.as_slice());

    for (subscriber, topic, publishers) in updates {
        thread::spawn(move || publisher_update(&subscriber, &topic, &publishers));
    }
}

fn publisher_update(subscriber: &str, topic: &str, publishers: &[String]) {
    let Ok(endpoint) = roslink::Endpoint::parse(subscriber) else {
        return;
    };
    let Ok(mut stream) = TcpStream::connect((endpoint.host.as_str(), endpoint.port)) else {
        return;
    };
    let mut out = DynBuffer::new();
    xmlrpc::prepare_request(
        "publisherUpdate",
        &["/master".into(), topic.into(), strings(publishers)],
        &format!("{}:{}", endpoint.host, endpoint.port),
        &mut out,
    );
    let _ = stream.write_all(out.as_slice());
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut sink = [0u8; 1024];
    let _ = stream.read(&mut sink);
}

/// Route library logs through the test harness (`RUST_LOG=debug`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Spin every node in turn until `done` holds or `max_ms` of node time passes.
pub fn spin_until<C: Clock>(
    nodes: &mut [&mut Node<C>],
    max_ms: u64,
    mut done: impl FnMut(&mut [&mut Node<C>]) -> bool,
) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < Duration::from_millis(max_ms) {
        for node in nodes.iter_mut() {
            node.spin_once(2).expect("spin_once");
        }
        if done(nodes) {
            return true;
        }
    }
    false
}
