// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel online profiling support.
//!
//! This is intended to help measure the timing of kernel events (task
//! switches, blocking, ticks) as an aid to debugging or optimization work.
//!
//! The kernel does not assume any particular way of getting profiling
//! information out. A board that wants it fills in an `EventsTable` and puts
//! it in `KernelConfig::profiling`. A typical implementation toggles GPIOs
//! that a logic analyzer watches; keep the handlers fast, since they run
//! inside the dispatcher.

use abi::{ErrorId, TaskId};

use crate::platform::Platform;
use crate::Kernel;

/// Hooks that must be provided by the board setup code if it wants to enable
/// kernel profiling.
///
/// If you provide an `EventsTable`, you have to provide every hook. This
/// eliminates one null pointer check / conditional branch from each
/// _implemented_ profiling event. If you would like to omit (say) the `tick`
/// event, the simplest method is:
///
/// ```ignore
///   tick: || (),
/// ```
pub struct EventsTable {
    /// Called before every task switch with the outgoing and incoming task.
    /// The two are equal when the running task yields and is picked again.
    pub task_switch: fn(TaskId, TaskId),
    /// Called when a task is about to block.
    pub block: fn(TaskId),
    /// Called for each tick as the kernel processes it.
    pub tick: fn(),
    /// Called on the way into the fatal error handler.
    pub fatal: fn(ErrorId),
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    fn events(&self) -> Option<&'static EventsTable> {
        self.config.profiling
    }

    pub(crate) fn event_task_switch(&self, from: TaskId, to: TaskId) {
        if let Some(t) = self.events() {
            (t.task_switch)(from, to)
        }
    }

    pub(crate) fn event_block(&self, task: TaskId) {
        if let Some(t) = self.events() {
            (t.block)(task)
        }
    }

    pub(crate) fn event_tick(&self) {
        if let Some(t) = self.events() {
            (t.tick)()
        }
    }

    pub(crate) fn event_fatal(&self, error: ErrorId) {
        if let Some(t) = self.events() {
            (t.fatal)(error)
        }
    }
}
