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

//! Hook for the interrupt-controller collaborator (out of scope for this
//! transport per spec §1 — it only delivers notification of device
//! writes). `Channel::create`/`destroy` register and deregister through
//! this trait; production code backs it with the real interrupt
//! controller, tests back it with [`NullIrqRegistrar`].

use std::sync::Arc;

use mailbox_interface::MailboxError;

/// A registered interrupt's teardown handle.
pub trait IrqToken: Send + Sync {
    fn unregister(&self);
}

/// Registers a callback to run (from interrupt context — must be short and
/// non-blocking, per spec §5) whenever `irq` fires.
pub trait IrqRegistrar: Send + Sync {
    fn register(
        &self,
        irq: u32,
        handler: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Box<dyn IrqToken>, MailboxError>;
}

/// An [`IrqRegistrar`] that always succeeds and never actually fires —
/// useful for tests that drive the worker directly instead of through
/// interrupts.
pub struct NullIrqRegistrar;

struct NullToken;
impl IrqToken for NullToken {
    fn unregister(&self) {}
}

impl IrqRegistrar for NullIrqRegistrar {
    fn register(
        &self,
        _irq: u32,
        _handler: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Box<dyn IrqToken>, MailboxError> {
        Ok(Box::new(NullToken))
    }
}

/// An [`IrqRegistrar`] that fails every registration, for exercising
/// `channel_create`'s unwind-on-failure path.
pub struct FailingIrqRegistrar;

impl IrqRegistrar for FailingIrqRegistrar {
    fn register(
        &self,
        irq: u32,
        _handler: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Box<dyn IrqToken>, MailboxError> {
        Err(MailboxError::IrqRegistration(irq))
    }
}
