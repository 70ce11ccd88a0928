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

//! The pending-ID map: a sparse `[0, 256)` key space allocated cyclically,
//! O(1) insert/lookup/remove. An array of slots with a rotating cursor
//! implements this directly, without a general-purpose identifier registry.

use mailbox_interface::{Callback, ID_MAGIC, MAX_PENDING};

/// Owns a caller's completion callback and the bytes already packaged
/// (header + payload) for retransmission bookkeeping, from ID allocation
/// until exactly one of: response dispatch, teardown, or send failure.
pub(crate) struct PendingRecord<H> {
    pub handle: H,
    pub callback: Option<Callback<H>>,
    pub packaged_len: usize,
}

pub(crate) struct PendingMap<H> {
    slots: Vec<Option<PendingRecord<H>>>,
    cursor: usize,
    count: usize,
}

impl<H> PendingMap<H> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PENDING);
        slots.resize_with(MAX_PENDING, || None);
        Self { slots, cursor: 0, count: 0 }
    }

    pub fn len(&self) -> usize { self.count }

    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// Allocates the next free key starting from the rotating cursor and
    /// stores `record` there. Returns the full transport ID (magic prefix
    /// OR'd in), or `None` if the map is full.
    pub fn insert(&mut self, record: PendingRecord<H>) -> Option<u32> {
        if self.count == MAX_PENDING {
            return None;
        }
        let start = self.cursor;
        loop {
            if self.slots[self.cursor].is_none() {
                let key = self.cursor;
                self.slots[key] = Some(record);
                self.cursor = (self.cursor + 1) % MAX_PENDING;
                self.count += 1;
                return Some(ID_MAGIC | key as u32);
            }
            self.cursor = (self.cursor + 1) % MAX_PENDING;
            if self.cursor == start {
                return None;
            }
        }
    }

    /// Removes and returns the record for `id`, if any. `id` is expected to
    /// already have passed magic validation; the low 24 bits index the map.
    pub fn remove(&mut self, id: u32) -> Option<PendingRecord<H>> {
        let key = (id & 0x00FF_FFFF) as usize;
        let slot = self.slots.get_mut(key)?;
        let rec = slot.take();
        if rec.is_some() {
            self.count -= 1;
        }
        rec
    }

    /// Removes every outstanding record, in key order, for teardown.
    pub fn drain_all(&mut self) -> Vec<PendingRecord<H>> {
        let mut out = Vec::with_capacity(self.count);
        for slot in self.slots.iter_mut() {
            if let Some(rec) = slot.take() {
                out.push(rec);
            }
        }
        self.count = 0;
        out
    }
}
