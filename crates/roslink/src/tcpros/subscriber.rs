// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber side of a topic stream (client role).
//!
//! ```text
//! Idle -arm-> Connecting -> WritingHeader -> ReadingHeaderSize -> ReadingHeader
//!                                                                     |
//!                         +-------------------------------------------+
//!                         v
//!                    ReadingSize <--> Reading   (one message per loop)
//! ```

use super::header::{md5_matches, ConnectionHeader};
use super::process::{TcprosProcess, TcprosState, Unit};
use crate::node::registry::Subscriber;
use crate::process::Flow;
use crate::transport::{StreamIo, FRAME_HEADER_SIZE};

/// Header a subscriber opens the stream with.
pub fn request_header(caller_id: &str, subscriber: &Subscriber) -> ConnectionHeader {
    ConnectionHeader::new()
        .with("callerid", caller_id)
        .with("topic", &subscriber.topic)
        .with("md5sum", &subscriber.type_info.md5sum)
        .with("type", &subscriber.type_info.name)
        .with("message_definition", &subscriber.type_info.definition)
        .with("tcp_nodelay", if subscriber.tcp_nodelay { "1" } else { "0" })
}

/// Check the publisher's reply header.
pub fn check_reply(header: &ConnectionHeader, subscriber: &Subscriber) -> Result<(), String> {
    if let Some(error) = header.get("error") {
        return Err(format!("publisher refused {}: {}", subscriber.topic, error));
    }
    let md5sum = header.get("md5sum").unwrap_or("*");
    if !md5_matches(&subscriber.type_info.md5sum, md5sum) {
        return Err(format!(
            "md5sum mismatch on {}: {} vs {}",
            subscriber.topic, subscriber.type_info.md5sum, md5sum
        ));
    }
    Ok(())
}

/// One transition of a subscriber stream slot.
pub fn step<S: StreamIo>(
    process: &mut TcprosProcess<S>,
    subscriber: &mut Subscriber,
    caller_id: &str,
    now: u64,
) -> Flow {
    match process.state() {
        TcprosState::Idle => Flow::Yield,

        TcprosState::Connecting => match process.connect(now) {
            Some(true) => {
                if subscriber.tcp_nodelay {
                    process.socket.set_no_delay(true);
                }
                process.packet.clear();
                request_header(caller_id, subscriber).encode(&mut process.packet);
                process.set_state(TcprosState::WritingHeader, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::WritingHeader => match process.flush(now) {
            Some(true) => {
                process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingHeaderSize, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

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
            let verdict = ConnectionHeader::decode(process.packet.data())
                .map_err(|e| e.to_string())
                .and_then(|header| {
                    check_reply(&header, subscriber)?;
                    Ok(header)
                });
            match verdict {
                Ok(header) => {
                    process.peer_id = header.get("callerid").unwrap_or("").to_string();
                    log::info!(
                        "[tcpros] subscribed to {} from {}",
                        subscriber.topic,
                        process.peer_id
                    );
                    process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingSize, now);
                    Flow::Continue
                }
                Err(e) => {
                    log::error!("[tcpros] {}", e);
                    process.fail(now);
                    Flow::Yield
                }
            }
        }

        TcprosState::ReadingSize => match process.read_unit(now) {
            Unit::Ready => match process.take_size(now) {
                Some(0) => {
                    subscriber.deliver(&[]);
                    process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingSize, now);
                    Flow::Continue
                }
                Some(len) => {
                    process.expect(len, TcprosState::Reading, now);
                    Flow::Continue
                }
                None => Flow::Yield,
            },
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        TcprosState::Reading => match process.read_unit(now) {
            Unit::Ready => {
                log::trace!(
                    "[tcpros] {} bytes on {}",
                    process.packet.len(),
                    subscriber.topic
                );
                subscriber.deliver(process.packet.data());
                process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingSize, now);
                Flow::Continue
            }
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        state => {
            log::error!("[tcpros] subscriber slot in server state {:?}", state);
            process.fail(now);
            Flow::Yield
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
