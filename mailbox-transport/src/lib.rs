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

//! A bidirectional mailbox transport between a host driver and a
//! co-processor accelerator: two MMIO ring buffers per channel (X2I/I2X),
//! message-ID correlation of request/response pairs, interrupt-driven
//! reception, and a queue for unsolicited device-originated messages.
//!
//! Three layers, leaves first:
//! - [`registers`] — the MMIO accessor ("ring accessor" in the design).
//! - [`ring`], [`pending`], [`asyncqueue`], [`channel`] — the channel: ring
//!   framing, ID allocation, the worker that drains responses.
//! - [`mailbox`] — a container of channels sharing one MMIO region.

mod asyncqueue;
pub mod channel;
pub mod introspect;
pub mod irq;
pub mod mailbox;
mod pending;
pub mod registers;
pub mod ring;

pub use channel::{Channel, ChannelConfig, ChannelSnapshot, Direction};
pub use mailbox::Mailbox;
pub use ring::ResourceDescriptor;

pub use mailbox_interface::{
    AsyncMessage, Callback, MailboxError, Message, MessageHeader, HEADER_SIZE, ID_ASYNC_BIT,
    ID_MAGIC, ID_MAGIC_MASK, MAX_PAYLOAD_SIZE, MAX_PENDING, PROTOCOL_VERSION, TOMBSTONE,
};
