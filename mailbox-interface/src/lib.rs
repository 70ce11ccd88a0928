// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Caller-visible types for the mailbox transport: the wire header, the
//! message/callback contract, async-message records, and the error
//! taxonomy. No MMIO and no unsafe code lives here; `mailbox-transport`
//! is the crate that touches hardware.

use modular_bitfield::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size in bytes of a framed [`MessageHeader`] on the wire.
pub const HEADER_SIZE: usize = 16;

/// Current wire protocol version, placed in every outgoing header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Sentinel word a producer writes at the tail when there isn't room for a
/// full header before the end of the ring; the consumer treats it as an
/// instruction to wrap back to offset 0 rather than a message.
pub const TOMBSTONE: u32 = 0xDEAD_FACE;

/// High byte every transport-issued message ID carries, so a stray or
/// corrupted ID word can be rejected cheaply.
pub const ID_MAGIC: u32 = 0x1D00_0000;
pub const ID_MAGIC_MASK: u32 = 0xFF00_0000;

/// IDs at or above this value are device-originated async messages, never
/// IDs the transport itself allocated.
pub const ID_ASYNC_BIT: u32 = 0x8000_0000;

/// Size of the pending-ID space: `[0, MAX_PENDING)`.
pub const MAX_PENDING: usize = 256;

/// Largest payload the wire header's 11-bit `size` field can carry
/// (`2^11 - 1`). `send()` must reject anything larger before framing —
/// `HeaderFlags::with_size` panics on overflow rather than truncating.
pub const MAX_PAYLOAD_SIZE: usize = 2047;

/// The second 32-bit word of the wire header: an 11-bit payload size, 5
/// reserved bits, an 8-bit protocol version, and 8 more reserved bits.
/// Mirrors the way the teacher's register words (`IntrState`, `Status`, ...)
/// are packed with `modular_bitfield`, except this one travels over the
/// wire rather than living in an MMIO register.
#[bitfield]
#[derive(Clone, Copy)]
pub struct HeaderFlags {
    pub size: B11,
    #[skip]
    __: B5,
    pub protocol_version: u8,
    #[skip]
    __: u8,
}

/// Wire format of a mailbox message header: 16 bytes, little-endian.
///
/// | Offset | Bits | Field |
/// |---|---|---|
/// | 0  | 32 | total_size |
/// | 4  | 11 | size |
/// | 4+11 | 5 | reserved |
/// | 4+16 | 8 | protocol_version |
/// | 4+24 | 8 | reserved |
/// | 8  | 32 | id |
/// | 12 | 32 | opcode |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    pub total_size: u32,
    pub size: u32,
    pub protocol_version: u8,
    pub id: u32,
    pub opcode: u32,
}

impl MessageHeader {
    pub fn new(size: u32, id: u32, opcode: u32) -> Self {
        Self { total_size: size, size, protocol_version: PROTOCOL_VERSION, id, opcode }
    }

    /// Encodes this header as 16 little-endian bytes.
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let flags = HeaderFlags::new()
            .with_size(self.size as u16)
            .with_protocol_version(self.protocol_version);
        let flags_word = u32::from_ne_bytes(flags.into_bytes());

        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.total_size.to_le_bytes());
        buf[4..8].copy_from_slice(&flags_word.to_le_bytes());
        buf[8..12].copy_from_slice(&self.id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.opcode.to_le_bytes());
        buf
    }

    /// Decodes a header from 16 little-endian bytes.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let total_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let flags_word = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let flags = HeaderFlags::from_bytes(flags_word.to_ne_bytes());
        let id = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let opcode = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Self {
            total_size,
            size: flags.size() as u32,
            protocol_version: flags.protocol_version(),
            id,
            opcode,
        }
    }

    /// True if the high byte of `id` carries the transport's magic prefix.
    pub fn has_magic(&self) -> bool { self.id & ID_MAGIC_MASK == ID_MAGIC }

    /// True if `id` denotes a device-originated async message.
    pub fn is_async(&self) -> bool { self.id & ID_ASYNC_BIT != 0 }
}

/// Callback contract: invoked at most once per `send`. `None` means the
/// channel was torn down (or the device never answered) before a response
/// arrived; `Some(payload)` carries the response bytes.
pub type Callback<H> = Box<dyn FnOnce(H, Option<&[u8]>) + Send>;

/// A caller-supplied message to transmit, paired with the handle and
/// optional callback that will be invoked on completion.
pub struct Message<H> {
    pub handle: H,
    pub callback: Option<Callback<H>>,
    pub opcode: u32,
    pub payload: Vec<u8>,
    /// Carried for compatibility with higher layers that arm their own
    /// timer over the callback; the transport itself never waits on this
    /// (see spec Open Question — `send` never blocks for a response).
    pub timeout: Duration,
}

impl<H> Message<H> {
    pub fn new(handle: H, opcode: u32, payload: Vec<u8>) -> Self {
        Self { handle, callback: None, opcode, payload, timeout: Duration::ZERO }
    }

    pub fn with_callback(mut self, callback: Callback<H>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A device-originated message not correlated to any outstanding request.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct AsyncMessage {
    pub opcode: u32,
    pub payload: Vec<u8>,
}

/// Errors the transport API returns synchronously to callers (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("resource exhausted: pending-ID map is full")]
    ResourceExhausted,
    #[error("no space: ring buffer is full")]
    NoSpace,
    #[error("try again: async queue is empty")]
    TryAgain,
    #[error("interrupted while waiting for an async message")]
    Interrupted,
    #[error("ring size {0} is not a power of two")]
    InvalidRingSize(usize),
    #[error("interrupt registration failed for irq {0}")]
    IrqRegistration(u32),
}
