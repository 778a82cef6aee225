// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor types, used to statically define application resources.
//!
//! A `KernelConfig` is the whole shape of one system: its tasks, and the
//! timers, interrupt events, mutexes, message queues and semaphores they
//! share. Object identifiers are indices into these tables.

use abi::{Priority, SignalSet, TaskId};

use crate::cell::KernelCell;
use crate::message_queue::MessageQueue;
use crate::mutex::Mutex;
use crate::platform::Platform;
use crate::profiling::EventsTable;
use crate::sem::Semaphore;
use crate::timer::Timer;
use crate::Kernel;

/// Body of a task. Task bodies are contractually non-returning; if one does
/// return, the kernel raises `TaskFunctionReturns`.
pub type TaskBody<P, const N: usize> =
    &'static (dyn Fn(&'static Kernel<P, N>) + Sync);

/// Record describing a single task.
pub struct TaskDesc<P: Platform, const N: usize> {
    pub name: &'static str,
    pub body: TaskBody<P, N>,
    /// The task's stack. Handed to the architecture code as-is.
    pub stack: &'static KernelCell<[u8]>,
    /// Base priority, as given to the scheduler.
    pub priority: Priority,
    pub flags: TaskFlags,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct TaskFlags: u8 {
        /// Run the body as soon as the kernel starts, rather than waiting for
        /// `task_start`.
        const START_IMMEDIATELY = 1 << 0;
    }
}

/// Routes an interrupt event to a task.
#[derive(Copy, Clone, Debug)]
pub struct InterruptEventDesc {
    pub task: TaskId,
    pub signals: SignalSet,
}

/// Most interrupt events a kernel supports; pending events are a bitmask.
pub const MAX_INTERRUPT_EVENTS: usize = 32;

/// Static configuration of one kernel.
pub struct KernelConfig<P: Platform, const N: usize> {
    pub tasks: [TaskDesc<P, N>; N],
    /// Application timers. These get the low `TimerId`s; each task's own
    /// timer follows.
    pub timers: &'static [Timer],
    pub interrupt_events: &'static [InterruptEventDesc],
    pub mutexes: &'static [Mutex],
    pub message_queues: &'static [MessageQueue],
    pub semaphores: &'static [Semaphore],
    pub profiling: Option<&'static EventsTable>,
}

impl<P: Platform, const N: usize> KernelConfig<P, N> {
    /// A configuration with tasks and nothing else.
    pub const fn new(tasks: [TaskDesc<P, N>; N]) -> Self {
        Self {
            tasks,
            timers: &[],
            interrupt_events: &[],
            mutexes: &[],
            message_queues: &[],
            semaphores: &[],
            profiling: None,
        }
    }
}
