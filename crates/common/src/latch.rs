// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Simulator pacing latch.
//!
//! The simulator thread blocks in [`WaitLatch::wait`] whenever a breakpoint
//! fires; the server thread calls [`WaitLatch::ready`] when the client sends
//! `continue`, `step_over`, or `stop`. The latch is edge-sticky: a `ready`
//! delivered before the matching `wait` is remembered, so the pair is
//! race-free regardless of which thread gets there first. Each `wait`
//! consumes one pending `ready`, re-arming the latch.

use std::sync::{Condvar, Mutex};

/// One-shot, re-armable wait/ready latch.
#[derive(Debug, Default)]
pub struct WaitLatch {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl WaitLatch {
    /// Create a latch with no pending `ready`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a `ready` is (or already was) delivered, then re-arm.
    pub fn wait(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        while !*ready {
            ready = self.cond.wait(ready).unwrap_or_else(|e| e.into_inner());
        }
        *ready = false;
    }

    /// Release the waiter, or remember the release if no one waits yet.
    pub fn ready(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        *ready = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_ready_before_wait() {
        // the sticky edge: ready() first must not lose the wakeup
        let latch = WaitLatch::new();
        latch.ready();
        latch.wait();
    }

    #[test]
    fn test_wait_consumes_ready() {
        let latch = Arc::new(WaitLatch::new());
        latch.ready();
        latch.wait();

        // latch is re-armed now; a second wait must block until ready again
        let woke = Arc::new(AtomicBool::new(false));
        let handle = {
            let latch = latch.clone();
            let woke = woke.clone();
            std::thread::spawn(move || {
                latch.wait();
                woke.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!woke.load(Ordering::SeqCst));
        latch.ready();
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_then_ready_across_threads() {
        let latch = Arc::new(WaitLatch::new());
        let handle = {
            let latch = latch.clone();
            std::thread::spawn(move || latch.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        latch.ready();
        handle.join().unwrap();
    }
}
