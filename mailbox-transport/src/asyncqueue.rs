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

//! The async-message queue, paired with a completion signal a blocking
//! `wait_async` call waits on. Device-originated messages with no
//! correlated request land here instead of a pending-record callback.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use mailbox_interface::{AsyncMessage, MailboxError};

struct State {
    queue: VecDeque<AsyncMessage>,
    /// Set by [`AsyncQueue::interrupt`] to wake a blocked waiter without a
    /// message having arrived — the host-scheduler-interruption case in
    /// spec §4.6/§5.
    interrupted: bool,
}

pub(crate) struct AsyncQueue {
    state: Mutex<State>,
    signal: Condvar,
}

impl AsyncQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { queue: VecDeque::new(), interrupted: false }),
            signal: Condvar::new(),
        }
    }

    pub fn push(&self, msg: AsyncMessage) {
        let mut s = self.state.lock().unwrap();
        s.queue.push_back(msg);
        self.signal.notify_all();
    }

    /// Simulates a host-level signal interrupting anyone blocked in
    /// [`Self::wait_and_pop`].
    pub fn interrupt(&self) {
        let mut s = self.state.lock().unwrap();
        s.interrupted = true;
        self.signal.notify_all();
    }

    pub fn try_pop(&self) -> Result<AsyncMessage, MailboxError> {
        self.state.lock().unwrap().queue.pop_front().ok_or(MailboxError::TryAgain)
    }

    pub fn wait_and_pop(&self) -> Result<AsyncMessage, MailboxError> {
        let mut s = self.state.lock().unwrap();
        loop {
            if let Some(msg) = s.queue.pop_front() {
                return Ok(msg);
            }
            if s.interrupted {
                s.interrupted = false;
                return Err(MailboxError::Interrupted);
            }
            s = self.signal.wait(s).unwrap();
        }
    }

    pub fn drain_all(&self) -> Vec<AsyncMessage> { self.state.lock().unwrap().queue.drain(..).collect() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_pop_empty_is_try_again() {
        let q = AsyncQueue::new();
        assert!(matches!(q.try_pop(), Err(MailboxError::TryAgain)));
    }

    #[test]
    fn push_then_pop_preserves_order() {
        let q = AsyncQueue::new();
        q.push(AsyncMessage { opcode: 1, payload: vec![1] });
        q.push(AsyncMessage { opcode: 2, payload: vec![2] });
        assert_eq!(q.try_pop().unwrap().opcode, 1);
        assert_eq!(q.try_pop().unwrap().opcode, 2);
    }

    #[test]
    fn blocking_wait_wakes_on_push() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let q = Arc::new(AsyncQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.wait_and_pop());
        thread::sleep(Duration::from_millis(20));
        q.push(AsyncMessage { opcode: 7, payload: vec![] });
        let msg = handle.join().unwrap().unwrap();
        assert_eq!(msg.opcode, 7);
    }

    #[test]
    fn blocking_wait_returns_interrupted() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let q = Arc::new(AsyncQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.wait_and_pop());
        thread::sleep(Duration::from_millis(20));
        q.interrupt();
        assert!(matches!(handle.join().unwrap(), Err(MailboxError::Interrupted)));
    }
}
