// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service provider (server role).
//!
//! ```text
//! (accept) -> ReadingHeaderSize -> ReadingHeader -> WritingHeader --probe--> Idle
//!                                                        |
//!                                                        v
//!           +----------------------------------- ReadingSize --len 0--+
//!           | persistent                             |                |
//!           |                                     Reading             |
//!           |                                        v                |
//!           +------------------------------------ Writing <-----------+
//!                                                    | one-shot
//!                                                    v
//!                                                  Idle
//! ```
//!
//! Response frame: `[ok u8][len u32 LE][body]`.

use crate::buffer::DynBuffer;
use crate::node::registry::ServiceProvider;
use crate::process::Flow;
use crate::slot::{SlotId, SlotTable};
use crate::tcpros::header::{md5_matches, ConnectionHeader};
use crate::tcpros::process::{TcprosProcess, TcprosState, Unit};
use crate::transport::{encode_frame, StreamIo, FRAME_HEADER_SIZE};

/// Reply header of a provider.
pub fn reply_header(caller_id: &str, provider: &ServiceProvider) -> ConnectionHeader {
    let name = &provider.type_info.name;
    ConnectionHeader::new()
        .with("callerid", caller_id)
        .with("md5sum", &provider.type_info.md5sum)
        .with("request_type", &format!("{}Request", name))
        .with("response_type", &format!("{}Response", name))
        .with("type", name)
}

/// Find the provider a caller header asks for.
pub fn match_caller(
    header: &ConnectionHeader,
    providers: &SlotTable<ServiceProvider>,
) -> Result<SlotId, String> {
    let service = header.get("service").ok_or("header without service")?;
    let (id, provider) = providers
        .iter()
        .find(|(_, p)| p.service == service)
        .ok_or_else(|| format!("service {} is not provided here", service))?;
    let md5sum = header.get("md5sum").unwrap_or("*");
    if !md5_matches(&provider.type_info.md5sum, md5sum) {
        return Err(format!(
            "md5sum mismatch on {}: {} vs {}",
            service, provider.type_info.md5sum, md5sum
        ));
    }
    Ok(id)
}

/// Append `[ok][len][body]` for a service outcome.
pub fn encode_response(result: &Result<Vec<u8>, String>, out: &mut DynBuffer) {
    match result {
        Ok(body) => {
            out.push_u8(1);
            encode_frame(body, out);
        }
        Err(text) => {
            out.push_u8(0);
            encode_frame(text.as_bytes(), out);
        }
    }
}

fn respond<S: StreamIo>(
    process: &mut TcprosProcess<S>,
    providers: &mut SlotTable<ServiceProvider>,
    request: &[u8],
    now: u64,
) -> Flow {
    let Some(provider) = process.topic.and_then(|id| providers.get_mut(id)) else {
        process.fail(now);
        return Flow::Yield;
    };
    let result = provider.serve(request);
    if let Err(text) = &result {
        log::warn!("[rpcros] {} failed: {}", provider.service, text);
    }
    process.packet.clear();
    encode_response(&result, &mut process.packet);
    process.set_state(TcprosState::Writing, now);
    Flow::Continue
}

/// One transition of a provider slot.
pub fn step<S: StreamIo>(
    process: &mut TcprosProcess<S>,
    providers: &mut SlotTable<ServiceProvider>,
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
                    log::error!("[rpcros] {}", e);
                    process.fail(now);
                    return Flow::Yield;
                }
            };
            let id = match match_caller(&header, providers) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("[rpcros] rejecting caller: {}", e);
                    process.fail(now);
                    return Flow::Yield;
                }
            };
            let Some(provider) = providers.get(id) else {
                process.fail(now);
                return Flow::Yield;
            };
            process.topic = Some(id);
            process.probe = header.flag("probe");
            process.persistent = header.flag("persistent");
            process.peer_id = header.get("callerid").unwrap_or("").to_string();
            log::info!(
                "[rpcros] {} connected to {}{}",
                process.peer_id,
                provider.service,
                if process.probe { " (probe)" } else { "" }
            );
            process.packet.clear();
            reply_header(caller_id, provider).encode(&mut process.packet);
            process.set_state(TcprosState::WritingHeader, now);
            Flow::Continue
        }

        TcprosState::WritingHeader => match process.flush(now) {
            Some(true) if process.probe => {
                log::debug!("[rpcros] probe from {} done", process.peer_id);
                process.reset(now);
                Flow::Yield
            }
            Some(true) => {
                process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingSize, now);
                Flow::Continue
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::ReadingSize => match process.read_unit(now) {
            Unit::Ready => match process.take_size(now) {
                // Empty request: straight to the response
                Some(0) => respond(process, providers, &[], now),
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
                let request = process.packet.data().to_vec();
                respond(process, providers, &request, now)
            }
            Unit::Pending | Unit::Lost => Flow::Yield,
        },

        TcprosState::Writing => match process.flush(now) {
            Some(true) if process.persistent => {
                process.expect(FRAME_HEADER_SIZE, TcprosState::ReadingSize, now);
                Flow::Continue
            }
            Some(true) => {
                process.reset(now);
                Flow::Yield
            }
            Some(false) | None => Flow::Yield,
        },

        TcprosState::Idle => Flow::Yield,

        state => {
            log::error!("[rpcros] provider slot in client state {:?}", state);
            process.fail(now);
            Flow::Yield
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
