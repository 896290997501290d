// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher side of a topic stream (server role).
//!
//! ```text
//! (accept) -> ReadingHeaderSize -> ReadingHeader -> WritingHeader
//!                                                        |
//!          +---------------------------------------------+
//!          v
//!   WaitForWriting --timer/expedite--> StartWriting --> Writing --+
//!          ^                               | nothing to send     |
//!          +-------------------------------+---------------------+
//! ```

use super::header::{md5_matches, type_matches, ConnectionHeader};
use super::process::{TcprosProcess, TcprosState, Unit};
use crate::node::registry::Publisher;
use crate::process::Flow;
use crate::slot::{SlotId, SlotTable};
use crate::transport::StreamIo;

/// Reply header sent to an accepted subscriber.
pub fn reply_header(caller_id: &str, publisher: &Publisher) -> ConnectionHeader {
    ConnectionHeader::new()
        .with("callerid", caller_id)
        .with("md5sum", &publisher.type_info.md5sum)
        .with("type", &publisher.type_info.name)
        .with("message_definition", &publisher.type_info.definition)
        .with("latching", "0")
        .with("topic", &publisher.topic)
}

/// Find the publisher a subscriber header asks for.
pub fn match_subscriber(
    header: &ConnectionHeader,
    publishers: &SlotTable<Publisher>,
) -> Result<SlotId, String> {
    let topic = header.get("topic").ok_or("header without topic")?;
    let (id, publisher) = publishers
        .iter()
        .find(|(_, p)| p.topic == topic)
        .ok_or_else(|| format!("topic {} is not published here", topic))?;
    let md5sum = header.get("md5sum").unwrap_or("*");
    if !md5_matches(&publisher.type_info.md5sum, md5sum) {
        return Err(format!(
            "md5sum mismatch on {}: {} vs {}",
            topic, publisher.type_info.md5sum, md5sum
        ));
    }
    let msg_type = header.get("type").unwrap_or("*");
    if !type_matches(&publisher.type_info.name, msg_type) {
        return Err(format!(
            "type mismatch on {}: {} vs {}",
            topic, publisher.type_info.name, msg_type
        ));
    }
    Ok(id)
}

/// One transition of a publisher stream slot.
pub fn step<S: StreamIo>(
    process: &mut TcprosProcess<S>,
    publishers: &mut SlotTable<Publisher>,
    caller_id: &str,
    now: u64,
) -> Flow {
    match process.state() {
        TcprosState::ReadingHeaderSize => match process.read_unit(now) {
            Unit::Ready => match process.take_size(now) {
                Some(len) => {
                    process.expect(len, TcprosState::ReadingHeader, now);
                    Flow::Continue
                }
                None => Flow::Yield,
            },
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        TcprosState::ReadingHeader => {
            match process.read_unit(now) {
                Unit::Ready => {}
                Unit::Pending | Unit::Lost => return Flow::Yield,
            }
            let header = match ConnectionHeader::decode(process.packet.data()) {
                Ok(header) => header,
                Err(e) => {
                    log::error!("[tcpros] {}", e);
                    process.fail(now);
                    return Flow::Yield;
                }
            };
            let id = match match_subscriber(&header, publishers) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("[tcpros] rejecting subscriber: {}", e);
                    process.fail(now);
                    return Flow::Yield;
                }
            };
            let Some(publisher) = publishers.get(id) else {
                process.fail(now);
                return Flow::Yield;
            };

            process.topic = Some(id);
            process.peer_id = header.get("callerid").unwrap_or("").to_string();
            process.send_cursor = publisher.queue.next_seq();
            process.tcp_nodelay = header.flag("tcp_nodelay");
            if process.tcp_nodelay && !process.socket.set_no_delay(true) {
                log::warn!("[tcpros] could not set TCP_NODELAY for {}", process.peer_id);
            }
            log::info!(
                "[tcpros] subscriber {} connected to {}",
                process.peer_id,
                publisher.topic
            );

            process.packet.clear();
            reply_header(caller_id, publisher).encode(&mut process.packet);
            process.set_state(TcprosState::WritingHeader, now);
            Flow::Continue
        }

        TcprosState::WritingHeader => match process.flush(now) {
            Some(true) => {
                // First cycle right after the handshake
                process.wake_at = now;
                process.set_state(TcprosState::WaitForWriting, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::WaitForWriting => {
            if now >= process.wake_at {
                process.set_state(TcprosState::StartWriting, now);
                Flow::Continue
            } else {
                Flow::Yield
            }
        }

        TcprosState::StartWriting => {
            let Some(publisher) = process.topic.and_then(|id| publishers.get_mut(id)) else {
                process.fail(now);
                return Flow::Yield;
            };
            process.packet.clear();
            let frames = publisher.produce(&mut process.send_cursor, &mut process.packet);
            process.wake_at = now + publisher.period_ms;
            if frames == 0 {
                process.set_state(TcprosState::WaitForWriting, now);
                return Flow::Yield;
            }
            log::trace!(
                "[tcpros] {} frame(s), {} bytes on {}",
                frames,
                process.packet.len(),
                publisher.topic
            );
            process.set_state(TcprosState::Writing, now);
            Flow::Continue
        }

        TcprosState::Writing => match process.flush(now) {
            Some(true) => {
                // Messages published while this one was in flight go out now
                let pending = process
                    .topic
                    .and_then(|id| publishers.get(id))
                    .is_some_and(|p| p.has_pending(process.send_cursor));
                if pending {
                    process.wake_at = now;
                }
                process.set_state(TcprosState::WaitForWriting, now);
                Flow::Yield
            }
            Some(false) | None => Flow::Yield,
        },

        state => {
            log::error!("[tcpros] publisher slot in client state {:?}", state);
            process.fail(now);
            Flow::Yield
        }
    }
}

/// Bring forward the cycle of every waiting slot streaming `topic`.
pub fn expedite<S: StreamIo>(process: &mut TcprosProcess<S>, topic: SlotId, now: u64) {
    if process.topic == Some(topic) && process.state() == TcprosState::WaitForWriting {
        process.wake_at = now;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DynBuffer;
    use crate::node::registry::{PublisherSpec, TypeInfo};
    use crate::process::MAX_STEPS_PER_DISPATCH;
    use crate::transport::stream::mock::MockStream;
    use crate::transport::SocketState;

    fn chatter() -> TypeInfo {
        TypeInfo::new("std_msgs/String", "992ce8a1687cec8c8bd883ec73ca41d1", "string data\n")
    }

    fn subscriber_header(md5sum: &str) -> Vec<u8> {
        let mut out = DynBuffer::new();
        ConnectionHeader::new()
            .with("callerid", "/listener")
            .with("topic", "/chatter")
            .with("md5sum", md5sum)
            .with("type", "std_msgs/String")
            .with("tcp_nodelay", "1")
            .encode(&mut out);
        out.as_slice().to_vec()
    }

    fn table(spec: PublisherSpec) -> SlotTable<Publisher> {
        let mut publishers = SlotTable::with_capacity("publishers", 2);
        publishers.insert(Publisher::from_spec(spec)).unwrap();
        publishers
    }

    fn drive(
        process: &mut TcprosProcess<MockStream>,
        publishers: &mut SlotTable<Publisher>,
        now: u64,
    ) {
        for _ in 0..MAX_STEPS_PER_DISPATCH {
            if step(process, publishers, "/talker", now) == Flow::Yield {
                break;
            }
        }
    }

    /// Accept + handshake, leaving the reply header in `written`.
    fn handshaken(publishers: &mut SlotTable<Publisher>, now: u64) -> TcprosProcess<MockStream> {
        let mut process = TcprosProcess::new(MockStream::connected(), 1 << 20);
        process.start_server(now);
        process.socket.feed(&subscriber_header("*"));
        drive(&mut process, publishers, now);
        process
    }

    #[test]
    fn test_handshake_reply() {
        let mut publishers = table(PublisherSpec::new("/chatter", chatter()));
        let mut process = handshaken(&mut publishers, 0);

        assert_eq!(process.topic, Some(SlotId::new(0)));
        assert!(process.tcp_nodelay);
        assert!(process.socket.nodelay());
        assert_eq!(process.peer_id, "/listener");

        let written = process.socket.take_written();
        let reply = ConnectionHeader::decode(&written[4..]).unwrap();
        assert_eq!(reply.get("callerid"), Some("/talker"));
        assert_eq!(reply.get("type"), Some("std_msgs/String"));
        assert_eq!(reply.get("latching"), Some("0"));
        // Nothing queued: first cycle finds no data and waits a period
        assert_eq!(process.state(), TcprosState::WaitForWriting);
        assert_eq!(process.wake_at, 1000);
    }

    #[test]
    fn test_md5_mismatch_closes() {
        let mut publishers = table(PublisherSpec::new("/chatter", chatter()));
        let mut process = TcprosProcess::new(MockStream::connected(), 1 << 20);
        process.start_server(0);
        process.socket.feed(&subscriber_header("0000"));
        drive(&mut process, &mut publishers, 0);
        assert!(process.is_idle());
        assert_eq!(process.socket.closes, 1);
        assert!(process.socket.written().is_empty());
    }

    #[test]
    fn test_unknown_topic_closes() {
        let mut publishers = table(PublisherSpec::new("/other", chatter()));
        let mut process = TcprosProcess::new(MockStream::connected(), 1 << 20);
        process.start_server(0);
        process.socket.feed(&subscriber_header("*"));
        drive(&mut process, &mut publishers, 0);
        assert!(process.is_idle());
    }

    #[test]
    fn test_cycle_is_timer_gated() {
        let spec = PublisherSpec::new("/chatter", chatter())
            .with_period_ms(1000)
            .with_callback(|| Some(b"hello".to_vec()));
        let mut publishers = table(spec);
        let mut process = handshaken(&mut publishers, 0);

        // Handshake completes at t=0 and the first frame goes out at once
        let written = process.socket.take_written();
        assert!(written.ends_with(b"\x05\0\0\0hello"));
        assert_eq!(process.state(), TcprosState::WaitForWriting);

        for t in [1, 500, 999] {
            drive(&mut process, &mut publishers, t);
            assert_eq!(process.state(), TcprosState::WaitForWriting, "t={}", t);
            assert!(process.socket.written().is_empty());
        }

        drive(&mut process, &mut publishers, 1000);
        assert_eq!(process.socket.take_written(), b"\x05\0\0\0hello");
        assert_eq!(process.state(), TcprosState::WaitForWriting);
        assert_eq!(process.wake_at, 2000);
    }

    #[test]
    fn test_queue_fanout_and_expedite() {
        let mut publishers = table(PublisherSpec::new("/chatter", chatter()));
        let mut a = handshaken(&mut publishers, 0);
        let mut b = handshaken(&mut publishers, 0);
        a.socket.take_written();
        b.socket.take_written();

        if let Some(publisher) = publishers.get_mut(SlotId::new(0)) {
            publisher.queue.push(b"m1".to_vec());
        }
        expedite(&mut a, SlotId::new(0), 10);
        expedite(&mut b, SlotId::new(0), 10);
        drive(&mut a, &mut publishers, 10);
        drive(&mut b, &mut publishers, 10);

        assert_eq!(a.socket.take_written(), b"\x02\0\0\0m1");
        assert_eq!(b.socket.take_written(), b"\x02\0\0\0m1");
        assert_eq!(a.send_cursor, 1);
    }

    #[test]
    fn test_partial_write_then_reset() {
        let spec = PublisherSpec::new("/chatter", chatter()).with_callback(|| Some(vec![7; 64]));
        let mut publishers = table(spec);
        let mut process = TcprosProcess::new(MockStream::connected(), 1 << 20);
        process.start_server(0);
        process.socket.feed(&subscriber_header("*"));
        process.socket.set_write_budget(Some(300));
        drive(&mut process, &mut publishers, 0);
        process.socket.take_written();

        process.socket.set_write_budget(Some(10));
        drive(&mut process, &mut publishers, 1000);
        assert_eq!(process.state(), TcprosState::Writing);

        process.socket.inject_write_error(SocketState::Disconnected);
        drive(&mut process, &mut publishers, 1001);
        assert!(process.is_idle());
        assert!(!process.socket.is_open());
    }
}
