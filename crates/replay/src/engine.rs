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

//! The replay emulation engine.
//!
//! Single-threaded cooperative scheduling: the engine walks the merged,
//! ascending list of timestamps at which any tracked signal changes and
//! fires value-change callbacks synchronously. A callback may request a
//! rewind; the engine then seeks back to the last rising clock edge at or
//! before the target time, forgets all last-observed values, and replays
//! forward from there.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::provider::ReplayProvider;

/// Drives callbacks registered on a [`ReplayProvider`] in simulation-time
/// order.
pub struct EmulationEngine {
    provider: Arc<ReplayProvider>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EmulationEngine {
    /// Create an engine over a provider. Callbacks registered after `run`
    /// starts are not picked up.
    pub fn new(provider: Arc<ReplayProvider>) -> Self {
        Self { provider, worker: Mutex::new(None) }
    }

    /// Run the replay to completion on the calling thread.
    pub fn run(&self) {
        run_loop(&self.provider);
    }

    /// Run the replay on a background thread; pair with
    /// [`finish`](Self::finish).
    pub fn run_detached(&self) {
        let provider = self.provider.clone();
        *self.worker.lock() = Some(std::thread::spawn(move || run_loop(&provider)));
    }

    /// Wait for a detached replay to complete.
    pub fn finish(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn run_loop(provider: &ReplayProvider) {
    let signals = provider.tracked_signals();
    let mut times: Vec<u64> = Vec::new();
    for signal in signals {
        times.extend(provider.database().signal_changes(signal).iter().map(|(t, _)| *t));
    }
    times.sort_unstable();
    times.dedup();
    info!(events = times.len(), "replay started");

    let mut cursor = 0usize;
    while cursor < times.len() {
        if provider.is_finished() {
            break;
        }
        let time = times[cursor];
        provider.fire_callbacks_at(time);

        if let Some(request) = provider.take_rewind() {
            match provider.rewind_target(&request) {
                Some(target) => {
                    debug!(requested = request.time, target, "rewinding");
                    provider.reset_observed();
                    provider.set_timestamp(target);
                    cursor = times.partition_point(|&t| t < target);
                    continue;
                }
                None => {
                    debug!(requested = request.time, "rewind target not found; ignoring");
                }
            }
        }
        cursor += 1;
    }
    info!("replay finished");
}
