// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream abstraction the protocol processes are generic over.
//!
//! [`TcpIpSocket`] is the production implementation. The test-only
//! [`mock::MockStream`] replays scripted read chunks, would-block points
//! and resets so the state machines can be driven deterministically.

use super::socket::{SocketState, TcpIpSocket};
use crate::buffer::DynBuffer;

/// Byte stream operations a process step needs.
pub trait StreamIo {
    fn is_open(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// A connect was started and has not settled yet.
    fn is_connecting(&self) -> bool;

    fn connect(&mut self, host: &str, port: u16) -> SocketState;

    fn write_buffer(&mut self, buf: &mut DynBuffer) -> SocketState;

    fn read_buffer_ex(&mut self, buf: &mut DynBuffer, max_size: usize) -> (SocketState, usize);

    fn read_buffer(&mut self, buf: &mut DynBuffer) -> SocketState;

    fn set_no_delay(&mut self, enable: bool) -> bool;

    fn close(&mut self);
}

impl StreamIo for TcpIpSocket {
    fn is_open(&self) -> bool {
        TcpIpSocket::is_open(self)
    }

    fn is_connected(&self) -> bool {
        TcpIpSocket::is_connected(self)
    }

    fn is_connecting(&self) -> bool {
        TcpIpSocket::is_connecting(self)
    }

    fn connect(&mut self, host: &str, port: u16) -> SocketState {
        TcpIpSocket::connect(self, host, port)
    }

    fn write_buffer(&mut self, buf: &mut DynBuffer) -> SocketState {
        TcpIpSocket::write_buffer(self, buf)
    }

    fn read_buffer_ex(&mut self, buf: &mut DynBuffer, max_size: usize) -> (SocketState, usize) {
        TcpIpSocket::read_buffer_ex(self, buf, max_size)
    }

    fn read_buffer(&mut self, buf: &mut DynBuffer) -> SocketState {
        TcpIpSocket::read_buffer(self, buf)
    }

    fn set_no_delay(&mut self, enable: bool) -> bool {
        TcpIpSocket::set_no_delay(self, enable)
    }

    fn close(&mut self) {
        TcpIpSocket::close(self)
    }
}

// ============================================================================
// Test mock stream
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
