// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loopback tests: two nodes and an in-process master on 127.0.0.1.
//!
//! Covers registration, topic streaming in both registration orders,
//! a service round trip and shutdown unregistration.

mod common;

use common::{init_logging, spin_until, FakeMaster};
use roslink::{
    Node, NodeConfig, PublisherSpec, ServiceCallerSpec, ServiceProviderSpec, SubscriberSpec,
    TypeInfo,
};

fn string_type() -> TypeInfo {
    TypeInfo::new(
        "std_msgs/String",
        "992ce8a1687cec8c8bd883ec73ca41d1",
        "string data\n",
    )
}

fn two_ints_type() -> TypeInfo {
    TypeInfo::new(
        "roslink_test/AddTwoInts",
        "6a2e34150c00229791cc89ff309fff21",
        "int64 a\nint64 b\n---\nint64 sum\n",
    )
}

fn node(name: &str, master: &FakeMaster) -> Node {
    let config = NodeConfig::new(name)
        .with_host("127.0.0.1")
        .with_master_uri(&master.uri)
        .with_ping_period_ms(200);
    Node::create(config).expect("Failed to create node")
}

fn ros_string(text: &str) -> Vec<u8> {
    let mut bytes = (text.len() as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

#[test]
fn test_publisher_then_subscriber() {
    init_logging();
    let master = FakeMaster::start();
    let mut talker = node("/talker", &master);
    let mut listener = node("/listener", &master);

    let chatter = talker
        .register_publisher(PublisherSpec::new("/chatter", string_type()))
        .expect("Failed to register publisher");
    assert!(
        spin_until(&mut [&mut talker], 3000, |_| master
            .with_state(|s| s.publishers.contains_key("/chatter"))),
        "master never saw the publisher"
    );

    let sub = listener
        .register_subscriber(SubscriberSpec::new("/chatter", string_type()))
        .expect("Failed to register subscriber");

    let mut nodes = [&mut talker, &mut listener];
    assert!(
        spin_until(&mut nodes, 5000, |n| n[1].is_subscribed(sub)
            && n[0].subscriber_count(chatter) == 1),
        "stream never reached the data phase"
    );

    let mut received = Vec::new();
    let mut round = 0u32;
    let delivered = spin_until(&mut nodes, 5000, |n| {
        if round % 25 == 0 {
            n[0].publish(chatter, ros_string("hello")).expect("publish");
        }
        round += 1;
        received.extend(n[1].take_messages(sub).expect("take_messages"));
        !received.is_empty()
    });
    assert!(delivered, "no message reached the subscriber");
    assert_eq!(received[0], ros_string("hello"));
    assert_eq!(
        listener.subscriber(sub).expect("subscriber").received(),
        received.len() as u64
    );
}

#[test]
fn test_subscriber_then_publisher() {
    init_logging();
    let master = FakeMaster::start();
    let mut talker = node("/talker", &master);
    let mut listener = node("/listener", &master);

    let sub = listener
        .register_subscriber(SubscriberSpec::new("/late", string_type()))
        .expect("Failed to register subscriber");
    assert!(
        spin_until(&mut [&mut listener], 3000, |_| master
            .with_state(|s| s.subscribers.contains_key("/late"))),
        "master never saw the subscriber"
    );
    assert!(!listener.is_subscribed(sub));

    talker
        .register_publisher(PublisherSpec::new("/late", string_type()))
        .expect("Failed to register publisher");

    // publisherUpdate from the master drives the listener's requestTopic
    let mut nodes = [&mut talker, &mut listener];
    assert!(
        spin_until(&mut nodes, 5000, |n| n[1].is_subscribed(sub)),
        "publisherUpdate did not lead to a stream"
    );
}

#[test]
fn test_service_round_trip() {
    init_logging();
    let master = FakeMaster::start();
    let mut server = node("/adder", &master);
    let mut client = node("/client", &master);

    server
        .register_service_provider(ServiceProviderSpec::new(
            "/add_two_ints",
            two_ints_type(),
            |request: &[u8]| {
                if request.len() != 16 {
                    return Err(format!("expected 16 bytes, got {}", request.len()));
                }
                let mut a = [0u8; 8];
                let mut b = [0u8; 8];
                a.copy_from_slice(&request[..8]);
                b.copy_from_slice(&request[8..]);
                let sum = i64::from_le_bytes(a) + i64::from_le_bytes(b);
                Ok(sum.to_le_bytes().to_vec())
            },
        ))
        .expect("Failed to register provider");
    assert!(
        spin_until(&mut [&mut server], 3000, |_| master
            .with_state(|s| s.services.contains_key("/add_two_ints"))),
        "master never saw the service"
    );

    let caller = client
        .register_service_caller(ServiceCallerSpec::new("/add_two_ints", two_ints_type()))
        .expect("Failed to register caller");

    let mut request = 2i64.to_le_bytes().to_vec();
    request.extend_from_slice(&40i64.to_le_bytes());
    client
        .call_service(caller, request)
        .expect("Failed to queue request");
    client
        .call_service(caller, vec![1, 2, 3])
        .expect("Failed to queue request");

    let mut results = Vec::new();
    let mut nodes = [&mut server, &mut client];
    assert!(
        spin_until(&mut nodes, 5000, |n| {
            results.extend(n[1].take_responses(caller).expect("take_responses"));
            results.len() == 2
        }),
        "service responses missing: {:?}",
        results
    );

    assert_eq!(results[0], Ok(42i64.to_le_bytes().to_vec()));
    assert_eq!(results[1], Err("expected 16 bytes, got 3".to_string()));
    assert!(master.saw("lookupService"));
}

#[test]
fn test_shutdown_unregisters() {
    init_logging();
    let master = FakeMaster::start();
    let mut talker = node("/talker", &master);

    talker
        .register_publisher(PublisherSpec::new("/status", string_type()))
        .expect("Failed to register publisher");
    assert!(spin_until(&mut [&mut talker], 3000, |n| n[0].master_backlog() == 0
        && master.saw("registerPublisher")));

    talker.shutdown().expect("Failed to shut down");

    assert!(master.saw("unregisterPublisher"));
    let remaining = master.with_state(|s| s.publishers.get("/status").map(Vec::len));
    assert_eq!(remaining, Some(0));
}

#[test]
fn test_peer_shutdown_request() {
    use roslink::buffer::DynBuffer;
    use roslink::xmlrpc::{self, MethodResponse, Parse, XmlRpcValue};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    init_logging();
    let master = FakeMaster::start();
    let mut target = node("/target", &master);
    let port = target.xmlrpc_port();

    let peer = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to node");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .expect("read timeout");
        let mut out = DynBuffer::new();
        xmlrpc::prepare_request(
            "shutdown",
            &["/peer".into(), "test over".into()],
            &format!("127.0.0.1:{}", port),
            &mut out,
        );
        stream.write_all(out.as_slice()).expect("send shutdown");

        let mut received = Vec::new();
        let mut buf = [0u8; 2048];
        loop {
            let n = stream.read(&mut buf).expect("read reply");
            received.extend_from_slice(&buf[..n]);
            match xmlrpc::parse_response(&received, n == 0) {
                Parse::Done(response) => return response,
                Parse::Incomplete if n > 0 => continue,
                other => panic!("bad reply: {:?}", other),
            }
        }
    });

    assert!(spin_until(&mut [&mut target], 3000, |n| n[0].shutdown_requested()));
    // keep serving until the reply has been written
    let _ = spin_until(&mut [&mut target], 200, |_| peer.is_finished());

    let response = peer.join().expect("peer thread");
    match response {
        MethodResponse::Success(XmlRpcValue::Array(items)) => {
            assert_eq!(items[0], XmlRpcValue::Int(1));
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}
