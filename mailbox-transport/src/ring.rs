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

//! Ring-buffer pointer arithmetic, kept separate from MMIO and from
//! [`crate::channel`]'s locking so the tricky offset math (§4.3/§4.4 of the
//! design) can be unit tested without spinning up a worker thread.

use mailbox_interface::{MailboxError, HEADER_SIZE};

/// One direction's ring: its offset and size within the ring region, and
/// the register offsets the device and host use to publish their
/// positions. Both offsets and `ring_size` must be 4-byte aligned;
/// `ring_size` must additionally be a power of two.
#[derive(Clone, Copy, Debug)]
pub struct ResourceDescriptor {
    pub ring_start: usize,
    pub ring_size: usize,
    pub head_reg_offset: usize,
    pub tail_reg_offset: usize,
}

impl ResourceDescriptor {
    pub fn validate(&self) -> Result<(), MailboxError> {
        if !self.ring_size.is_power_of_two() || self.ring_size % 4 != 0 {
            return Err(MailboxError::InvalidRingSize(self.ring_size));
        }
        Ok(())
    }
}

/// What a producer must do to land `framed_size` bytes at the current tail.
#[derive(Debug, Eq, PartialEq)]
pub enum WritePlan {
    /// Not enough room anywhere in the ring right now.
    Full,
    /// Write `framed_size` bytes at `offset`, then advance the tail by
    /// `framed_size`.
    Direct { offset: usize },
    /// Write the tombstone word at `tombstone_offset`, then write
    /// `framed_size` bytes at offset 0, then set the tail to `framed_size`.
    WrapAndWrite { tombstone_offset: usize },
}

/// Computes the X2I write plan (spec §4.3). `head` is the consumer's
/// published position; `tail` is the producer's cached position; both are
/// raw byte offsets in `[0, ring_size)`.
pub fn plan_write(head: usize, tail: usize, ring_size: usize, framed_size: usize) -> WritePlan {
    if tail < head {
        if tail + framed_size >= head {
            return WritePlan::Full;
        }
        return WritePlan::Direct { offset: tail };
    }
    // tail >= head
    if tail + framed_size > ring_size - 4 {
        if framed_size >= head {
            return WritePlan::Full;
        }
        return WritePlan::WrapAndWrite { tombstone_offset: tail };
    }
    WritePlan::Direct { offset: tail }
}

/// True when the I2X ring has nothing left to drain.
pub fn is_empty(cached_head: usize, tail_reg: usize, ring_size: usize) -> bool {
    (cached_head % ring_size) == (tail_reg % ring_size)
}

/// Applies the "if `h == ring_size`, wrap to 0" rule from spec §4.4 before
/// peeking the word at the head.
pub fn normalize_head(cached_head: usize, ring_size: usize) -> usize {
    if cached_head == ring_size {
        0
    } else {
        cached_head
    }
}

/// Validates a parsed header's framed size against ring occupancy. Spec's
/// Open Question: this check is only meaningful when `head < tail` in the
/// *current* segment — the tombstone path is handled as a separate case by
/// the caller before this is ever invoked, so the subtraction here never
/// needs to be wrapping.
pub fn validate_segment(head: usize, tail: usize, total_size: usize) -> bool {
    head < tail && total_size + HEADER_SIZE <= tail - head
}
