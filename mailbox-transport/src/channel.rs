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

//! The channel: one X2I ring, one I2X ring, the pending-ID map, the async
//! queue, and the single-consumer worker that drains inbound messages.
//! This is the ~70% of the transport the design budget calls out — see
//! spec §2.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace, warn};
use num_enum::{FromPrimitive, IntoPrimitive};

use mailbox_interface::{
    Message, MailboxError, MessageHeader, AsyncMessage, HEADER_SIZE, MAX_PAYLOAD_SIZE, TOMBSTONE,
};

use crate::irq::{IrqRegistrar, IrqToken};
use crate::pending::{PendingMap, PendingRecord};
use crate::asyncqueue::AsyncQueue;
use crate::registers::MailboxMmio;
use crate::ring::{self, ResourceDescriptor, WritePlan};

/// Static configuration for one channel, supplied by the caller (the PCIe
/// probe / MMIO discovery collaborator owns discovering these values).
#[derive(Clone, Copy)]
pub struct ChannelConfig {
    pub x2i: ResourceDescriptor,
    pub i2x: ResourceDescriptor,
    pub irq: u32,
    pub iohub_ack_offset: usize,
}

/// Which ring a direction-scoped operation (e.g. a hex dump) addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    X2I,
    I2X,
}

/// A point-in-time view of a channel's ring descriptors and live register
/// values — the introspection surface of spec §6.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ChannelSnapshot {
    pub x2i_ring_start: usize,
    pub x2i_ring_size: usize,
    pub x2i_head: u32,
    pub x2i_tail: u32,
    pub i2x_ring_start: usize,
    pub i2x_ring_size: usize,
    pub i2x_head: u32,
    pub i2x_tail: u32,
}

#[repr(u8)]
#[derive(Debug, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
enum DrainOutcome {
    Continue = 0,
    Empty = 1,
    #[default]
    InvalidHeader = 2,
}

/// Mutable state a single lock serializes: the writer's cached X2I tail and
/// the pending-ID map. Spec §5 allows either an outer lock or folding the
/// ring write into the ID-allocation lock; this is the latter, the
/// "simplest correct design" the spec names.
struct SendState<H> {
    cached_tail: usize,
    pending: PendingMap<H>,
}

struct WorkerState {
    wake: bool,
    stop: bool,
}

/// Coalescing hand-off from interrupt context to the single worker thread:
/// repeated wakes before the worker runs collapse into one drain pass.
struct WorkerSignal {
    state: Mutex<WorkerState>,
    cv: Condvar,
}

impl WorkerSignal {
    fn new() -> Self {
        Self { state: Mutex::new(WorkerState { wake: false, stop: false }), cv: Condvar::new() }
    }

    fn wake(&self) {
        let mut s = self.state.lock().unwrap();
        s.wake = true;
        self.cv.notify_one();
    }

    fn request_stop(&self) {
        let mut s = self.state.lock().unwrap();
        s.stop = true;
        self.cv.notify_one();
    }

    /// Blocks until either woken or told to stop. Returns `false` once
    /// stopped, at which point the worker thread exits.
    fn wait(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        loop {
            if s.stop {
                return false;
            }
            if s.wake {
                s.wake = false;
                return true;
            }
            s = self.cv.wait(s).unwrap();
        }
    }
}

pub struct Channel<H: Send + 'static> {
    name: String,
    mmio: Arc<dyn MailboxMmio>,
    x2i: ResourceDescriptor,
    i2x: ResourceDescriptor,
    iohub_ack_offset: usize,

    send_state: Mutex<SendState<H>>,
    async_queue: AsyncQueue,
    /// Written only by the worker thread (single consumer, per spec §5), so
    /// it needs no lock; `Relaxed` is enough since every reader that cares
    /// about ordering goes through `send_state`'s mutex or the MMIO
    /// register itself.
    cached_head: AtomicUsize,

    signal: Arc<WorkerSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
    irq_token: Mutex<Option<Box<dyn IrqToken>>>,
}

impl<H: Send + 'static> Channel<H> {
    /// Creates a channel: validates ring sizes, seeds the cached X2I tail
    /// from the current tail register, starts the worker thread, and
    /// registers the interrupt handler last — spec §4.7 requires everything
    /// else be ready before interrupts can fire.
    pub fn create(
        mmio: Arc<dyn MailboxMmio>,
        config: ChannelConfig,
        irq: &dyn IrqRegistrar,
        name: impl Into<String>,
    ) -> Result<Arc<Self>, MailboxError> {
        config.x2i.validate()?;
        config.i2x.validate()?;

        let cached_tail = mmio.read_reg(config.x2i.tail_reg_offset) as usize;
        let cached_head = mmio.read_reg(config.i2x.head_reg_offset) as usize;

        let channel = Arc::new(Self {
            name: name.into(),
            mmio,
            x2i: config.x2i,
            i2x: config.i2x,
            iohub_ack_offset: config.iohub_ack_offset,
            send_state: Mutex::new(SendState { cached_tail, pending: PendingMap::new() }),
            async_queue: AsyncQueue::new(),
            cached_head: AtomicUsize::new(cached_head),
            signal: Arc::new(WorkerSignal::new()),
            worker: Mutex::new(None),
            irq_token: Mutex::new(None),
        });

        let worker_channel = channel.clone();
        let worker_signal = channel.signal.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-worker", channel.name))
            .spawn(move || {
                while worker_signal.wait() {
                    worker_channel.drain_loop();
                }
            })
            .expect("failed to spawn mailbox worker thread");
        *channel.worker.lock().unwrap() = Some(handle);

        let channel_for_irq = channel.clone();
        match irq.register(config.irq, Arc::new(move || channel_for_irq.on_interrupt())) {
            Ok(token) => {
                *channel.irq_token.lock().unwrap() = Some(token);
                Ok(channel)
            }
            Err(err) => {
                // Unwind in reverse: the worker thread is the only other
                // step that already happened, so stop and join it before
                // surfacing the registration failure.
                channel.signal.request_stop();
                if let Some(handle) = channel.worker.lock().unwrap().take() {
                    let _ = handle.join();
                }
                Err(err)
            }
        }
    }

    /// Deregisters the interrupt, stops and flushes the worker, cancels
    /// every outstanding pending record with a null completion, and drains
    /// the async queue. Spec §4.7.
    pub fn destroy(&self) {
        if let Some(token) = self.irq_token.lock().unwrap().take() {
            token.unregister();
        }
        self.signal.request_stop();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }

        let drained = {
            let mut state = self.send_state.lock().unwrap();
            state.pending.drain_all()
        };
        for rec in drained {
            if let Some(cb) = rec.callback {
                cb(rec.handle, None);
            }
        }

        let _ = self.async_queue.drain_all();
    }

    /// Called from interrupt context: schedules the worker (coalesced) and
    /// clears the device-side interrupt line. Must be short and
    /// non-blocking (spec §5).
    pub fn on_interrupt(&self) {
        self.signal.wake();
        self.mmio.write_reg(self.iohub_ack_offset, 0);
    }

    /// Frames `msg`, allocates an ID, and writes it into the X2I ring.
    /// Never blocks for a response — the device answers asynchronously and
    /// the response is delivered to `msg.callback` from the worker thread.
    pub fn send(&self, msg: Message<H>) -> Result<(), MailboxError> {
        if msg.payload.len() % 4 != 0 {
            return Err(MailboxError::InvalidArgument);
        }
        if msg.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MailboxError::InvalidArgument);
        }
        if msg.payload.len() >= 4 {
            let first_word = u32::from_le_bytes(msg.payload[0..4].try_into().unwrap());
            if first_word == TOMBSTONE {
                return Err(MailboxError::InvalidArgument);
            }
        }
        let framed_size = HEADER_SIZE + msg.payload.len();
        if framed_size > self.x2i.ring_size {
            return Err(MailboxError::InvalidArgument);
        }

        let mut state = self.send_state.lock().unwrap();

        let record = PendingRecord { handle: msg.handle, callback: msg.callback, packaged_len: framed_size };
        let id = match state.pending.insert(record) {
            Some(id) => id,
            None => return Err(MailboxError::ResourceExhausted),
        };

        let mut packaged = Vec::with_capacity(framed_size);
        packaged.extend_from_slice(&MessageHeader::new(msg.payload.len() as u32, id, msg.opcode).to_bytes());
        packaged.extend_from_slice(&msg.payload);

        let head = self.mmio.read_reg(self.x2i.head_reg_offset) as usize;
        match ring::plan_write(head, state.cached_tail, self.x2i.ring_size, framed_size) {
            WritePlan::Full => {
                state.pending.remove(id);
                Err(MailboxError::NoSpace)
            }
            WritePlan::Direct { offset } => {
                self.mmio.write_ring(self.x2i.ring_start + offset, &packaged);
                let new_tail = offset + framed_size;
                state.cached_tail = new_tail;
                self.mmio.write_reg(self.x2i.tail_reg_offset, new_tail as u32);
                Ok(())
            }
            WritePlan::WrapAndWrite { tombstone_offset } => {
                self.mmio.write_ring(self.x2i.ring_start + tombstone_offset, &TOMBSTONE.to_le_bytes());
                self.mmio.write_ring(self.x2i.ring_start, &packaged);
                state.cached_tail = framed_size;
                self.mmio.write_reg(self.x2i.tail_reg_offset, framed_size as u32);
                trace!("{}: X2I wrapped at {tombstone_offset}, resumed at 0", self.name);
                Ok(())
            }
        }
    }

    /// Pops one async message. Blocks on the completion signal if
    /// `blocking` is true; otherwise returns `TryAgain` immediately when
    /// the queue is empty.
    pub fn wait_async(&self, blocking: bool) -> Result<AsyncMessage, MailboxError> {
        if blocking {
            self.async_queue.wait_and_pop()
        } else {
            self.async_queue.try_pop()
        }
    }

    /// Wakes a blocking `wait_async` without delivering a message, as if
    /// the host scheduler interrupted it.
    pub fn interrupt_wait(&self) { self.async_queue.interrupt(); }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            x2i_ring_start: self.x2i.ring_start,
            x2i_ring_size: self.x2i.ring_size,
            x2i_head: self.mmio.read_reg(self.x2i.head_reg_offset),
            x2i_tail: self.mmio.read_reg(self.x2i.tail_reg_offset),
            i2x_ring_start: self.i2x.ring_start,
            i2x_ring_size: self.i2x.ring_size,
            i2x_head: self.mmio.read_reg(self.i2x.head_reg_offset),
            i2x_tail: self.mmio.read_reg(self.i2x.tail_reg_offset),
        }
    }

    /// A hex dump of the first 4 KiB (or the whole ring, if smaller) of the
    /// requested direction, for the debug-filesystem collaborator.
    pub fn hex_dump(&self, direction: Direction) -> String {
        let desc = match direction {
            Direction::X2I => &self.x2i,
            Direction::I2X => &self.i2x,
        };
        let len = desc.ring_size.min(4096);
        let mut buf = vec![0u8; len];
        self.mmio.read_ring(desc.ring_start, &mut buf);
        crate::introspect::hex_dump(&buf)
    }

    fn drain_loop(&self) {
        trace!("{}: worker draining", self.name);
        loop {
            match self.drain_once() {
                DrainOutcome::Continue => continue,
                DrainOutcome::Empty => break,
                DrainOutcome::InvalidHeader => {
                    warn!("{}: invalid inbound header, stopping this drain pass", self.name);
                    break;
                }
            }
        }
    }

    fn drain_once(&self) -> DrainOutcome {
        let cached_head = self.cached_head.load(Ordering::Relaxed);
        let tail = self.mmio.read_reg(self.i2x.tail_reg_offset) as usize;
        if ring::is_empty(cached_head, tail, self.i2x.ring_size) {
            return DrainOutcome::Empty;
        }

        let h = ring::normalize_head(cached_head, self.i2x.ring_size);

        let mut first_word = [0u8; 4];
        self.mmio.read_ring(self.i2x.ring_start + h, &mut first_word);
        if u32::from_le_bytes(first_word) == TOMBSTONE {
            self.publish_head(0);
            return DrainOutcome::Continue;
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.mmio.read_ring(self.i2x.ring_start + h, &mut header_bytes);
        let header = MessageHeader::from_bytes(&header_bytes);

        if header.protocol_version != mailbox_interface::PROTOCOL_VERSION {
            warn!(
                "{}: inbound header at offset {h} carries protocol version {}, expected {}",
                self.name, header.protocol_version, mailbox_interface::PROTOCOL_VERSION
            );
            return DrainOutcome::InvalidHeader;
        }

        if !ring::validate_segment(h, tail, header.total_size as usize) {
            return DrainOutcome::InvalidHeader;
        }

        let mut payload = vec![0u8; header.size as usize];
        self.mmio.read_ring(self.i2x.ring_start + h + HEADER_SIZE, &mut payload);

        if header.is_async() {
            self.async_queue.push(AsyncMessage { opcode: header.opcode, payload });
        } else if !header.has_magic() {
            debug!("{}: bad magic in inbound id {:#x}", self.name, header.id);
        } else {
            let rec = {
                let mut state = self.send_state.lock().unwrap();
                state.pending.remove(header.id)
            };
            match rec {
                Some(rec) => {
                    if let Some(cb) = rec.callback {
                        cb(rec.handle, Some(&payload));
                    }
                }
                None => warn!("{}: orphan response for id {:#x}", self.name, header.id),
            }
        }

        let new_head = h + HEADER_SIZE + header.size as usize;
        self.publish_head(new_head);
        DrainOutcome::Continue
    }

    fn publish_head(&self, new_head: usize) {
        self.cached_head.store(new_head, Ordering::Relaxed);
        self.mmio.write_reg(self.i2x.head_reg_offset, new_head as u32);
    }
}
