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

//! The ring accessor: a narrow interface over the two MMIO regions a
//! mailbox owns (the register region and the ring-buffer region). No
//! framing, no pointer arithmetic beyond a byte offset — that belongs to
//! [`crate::ring`] and [`crate::channel`].

/// A mailbox's MMIO surface: 32-bit registers at `mbox_base + offset`, and
/// raw bytes at `ringbuf_base + offset`. All accesses must behave like
/// memory-mapped I/O — no caching, no reordering across the boundary —
/// which is why every method here takes `&self` rather than `&mut self`:
/// synchronization is the caller's job (see `Channel`'s locking discipline),
/// not this trait's.
///
/// # Safety
///
/// Implementors must ensure `offset` arguments that are in-bounds for the
/// region they were constructed over are valid to dereference as MMIO.
pub trait MailboxMmio: Send + Sync {
    /// Reads the 32-bit register at `mbox_base + offset`.
    fn read_reg(&self, offset: usize) -> u32;

    /// Writes the 32-bit register at `mbox_base + offset`.
    fn write_reg(&self, offset: usize, value: u32);

    /// Copies `buf.len()` bytes from `ringbuf_base + offset` into `buf`.
    fn read_ring(&self, offset: usize, buf: &mut [u8]);

    /// Copies `buf` into `ringbuf_base + offset`.
    fn write_ring(&self, offset: usize, buf: &[u8]);
}

/// Production [`MailboxMmio`]: two raw, volatile-accessed memory windows
/// supplied by the PCIe probe / MMIO discovery collaborator (out of scope
/// for this transport — see spec §1).
pub struct RawMmio {
    mbox_base: *mut u8,
    mbox_len: usize,
    ring_base: *mut u8,
    ring_len: usize,
}

// SAFETY: the raw pointers name MMIO windows the caller guarantees are
// valid for the lifetime of this object and safe to touch from any thread;
// `RawMmio` does not alias them with ordinary memory.
unsafe impl Send for RawMmio {}
unsafe impl Sync for RawMmio {}

impl RawMmio {
    /// # Safety
    ///
    /// `mbox_base` must be valid for volatile reads/writes of `mbox_len`
    /// bytes, and `ring_base` likewise for `ring_len` bytes, for as long as
    /// the returned `RawMmio` is alive.
    pub unsafe fn new(mbox_base: *mut u8, mbox_len: usize, ring_base: *mut u8, ring_len: usize) -> Self {
        Self { mbox_base, mbox_len, ring_base, ring_len }
    }

    fn check(offset: usize, len: usize, region_len: usize) {
        assert!(offset % 4 == 0, "MMIO offset {offset} is not 4-byte aligned");
        assert!(offset + len <= region_len, "MMIO access out of bounds");
    }
}

impl MailboxMmio for RawMmio {
    fn read_reg(&self, offset: usize) -> u32 {
        Self::check(offset, 4, self.mbox_len);
        unsafe { self.mbox_base.add(offset).cast::<u32>().read_volatile() }
    }

    fn write_reg(&self, offset: usize, value: u32) {
        Self::check(offset, 4, self.mbox_len);
        unsafe { self.mbox_base.add(offset).cast::<u32>().write_volatile(value) }
    }

    fn read_ring(&self, offset: usize, buf: &mut [u8]) {
        Self::check(offset, buf.len(), self.ring_len);
        unsafe {
            let src = self.ring_base.add(offset);
            for (i, b) in buf.iter_mut().enumerate() {
                *b = src.add(i).read_volatile();
            }
        }
    }

    fn write_ring(&self, offset: usize, buf: &[u8]) {
        Self::check(offset, buf.len(), self.ring_len);
        unsafe {
            let dst = self.ring_base.add(offset);
            for (i, b) in buf.iter().enumerate() {
                dst.add(i).write_volatile(*b);
            }
        }
    }
}

pub mod fake {
    //! A plain-memory stand-in for device MMIO, playing the role the
    //! teacher's `tests/mod.rs` static `MAILBOX_MMIO` byte array plays for
    //! its register-bitfield tests, generalized here to also simulate the
    //! ring-buffer region a device would read and write.
    use super::MailboxMmio;
    use std::sync::Mutex;

    pub struct FakeMmio {
        regs: Mutex<Vec<u8>>,
        ring: Mutex<Vec<u8>>,
    }

    impl FakeMmio {
        pub fn new(regs_len: usize, ring_len: usize) -> Self {
            Self { regs: Mutex::new(vec![0u8; regs_len]), ring: Mutex::new(vec![0u8; ring_len]) }
        }

        /// Lets a test play "device" by writing directly into the ring.
        pub fn poke_ring(&self, offset: usize, buf: &[u8]) {
            self.ring.lock().unwrap()[offset..offset + buf.len()].copy_from_slice(buf);
        }

        pub fn peek_ring(&self, offset: usize, len: usize) -> Vec<u8> {
            self.ring.lock().unwrap()[offset..offset + len].to_vec()
        }
    }

    impl MailboxMmio for FakeMmio {
        fn read_reg(&self, offset: usize) -> u32 {
            let regs = self.regs.lock().unwrap();
            u32::from_ne_bytes(regs[offset..offset + 4].try_into().unwrap())
        }

        fn write_reg(&self, offset: usize, value: u32) {
            let mut regs = self.regs.lock().unwrap();
            regs[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
        }

        fn read_ring(&self, offset: usize, buf: &mut [u8]) {
            let ring = self.ring.lock().unwrap();
            buf.copy_from_slice(&ring[offset..offset + buf.len()]);
        }

        fn write_ring(&self, offset: usize, buf: &[u8]) {
            let mut ring = self.ring.lock().unwrap();
            ring[offset..offset + buf.len()].copy_from_slice(buf);
        }
    }
}
