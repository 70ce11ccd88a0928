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

//! The mailbox: a container owning a set of channels that share one MMIO
//! region, with a lock protecting channel registration and teardown
//! ordering. Spec §4.8.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::channel::{Channel, ChannelConfig};
use crate::irq::IrqRegistrar;
use crate::registers::MailboxMmio;
use mailbox_interface::MailboxError;

pub struct Mailbox<H: Send + 'static> {
    name: String,
    mmio: Arc<dyn MailboxMmio>,
    channels: Mutex<Vec<Arc<Channel<H>>>>,
    /// Set by [`Self::destroy`] so `Drop` doesn't log the same
    /// remaining-channels warning a second time when the last `Arc` drops.
    destroyed: AtomicBool,
}

impl<H: Send + 'static> Mailbox<H> {
    pub fn create(mmio: Arc<dyn MailboxMmio>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            mmio,
            channels: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Creates a channel on this mailbox's MMIO region and registers it in
    /// the channel list. The list lock is held only across the list
    /// mutation, never across interrupt registration (spec §5).
    pub fn channel_create(
        self: &Arc<Self>,
        config: ChannelConfig,
        irq: &dyn IrqRegistrar,
        name: impl Into<String>,
    ) -> Result<Arc<Channel<H>>, MailboxError> {
        let channel = Channel::create(self.mmio.clone(), config, irq, name)?;
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    /// Unlinks `channel` from this mailbox and tears it down.
    pub fn channel_destroy(&self, channel: &Arc<Channel<H>>) {
        self.channels.lock().unwrap().retain(|c| !Arc::ptr_eq(c, channel));
        channel.destroy();
    }

    pub fn channel_count(&self) -> usize { self.channels.lock().unwrap().len() }

    /// Explicit counterpart to `channel_destroy`, matching spec §6's
    /// `mailbox_destroy(mb)` entry: warns if any channel is still registered
    /// (a programming error — every channel should be `channel_destroy`'d
    /// first) but proceeds regardless. Does not forcibly tear down any
    /// remaining channel; spec §4.8/§3 only calls for a warning here, not a
    /// cascade. Safe to call more than once or not at all — `Drop` covers
    /// callers who let the last `Arc<Mailbox<H>>` go out of scope instead.
    pub fn destroy(&self) {
        self.warn_if_channels_remain();
        self.destroyed.store(true, Ordering::Relaxed);
    }

    fn warn_if_channels_remain(&self) {
        let remaining = self.channels.lock().unwrap().len();
        if remaining != 0 {
            warn!("{}: mailbox destroyed with {} channel(s) still registered", self.name, remaining);
        }
    }
}

impl<H: Send + 'static> Drop for Mailbox<H> {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Relaxed) {
            self.warn_if_channels_remain();
        }
    }
}
