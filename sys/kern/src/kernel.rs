// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel object.
//!
//! A `Kernel` owns the task table and the current-task index. Everything the
//! kernel does is a method on it, split across the modules of this crate by
//! concern. Applications get a `&'static Kernel` passed to each task body and
//! make kernel calls through it.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};

use abi::{ErrorId, MutexId, TaskId, TaskState};
use ringbuf::Ringbuf;

use crate::cell::KernelCell;
use crate::descs::KernelConfig;
use crate::platform::Platform;
use crate::sched::Scheduler;
use crate::task::Task;
use crate::time::Timestamp;

/// Events recorded in the kernel's trace ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Start,
    Switch { from: TaskId, to: TaskId },
    Block(TaskId),
    TaskStarted(TaskId),
    TimedOut(TaskId),
    MutexContended { mutex: MutexId, holder: TaskId },
    Fatal(ErrorId),
}

/// Entries kept in the trace ring.
pub const TRACE_DEPTH: usize = 64;

/// Appends to the kernel's trace ring unless someone else has it borrowed.
macro_rules! trace {
    ($kernel:expr, $event:expr) => {
        if let Some(mut buf) = $kernel.trace.try_borrow_mut() {
            ringbuf::ringbuf_entry!(buf, $event);
        }
    };
}
pub(crate) use trace;

pub struct Kernel<P: Platform, const N: usize> {
    pub(crate) platform: P,
    pub(crate) sched: P::Scheduler,
    pub(crate) config: &'static KernelConfig<P, N>,
    pub(crate) tasks: [Task<P::Context>; N],
    pub(crate) current: AtomicUsize,
    pub(crate) now: KernelCell<Timestamp>,
    /// Ticks counted by the tick interrupt and not yet processed.
    pub(crate) pending_ticks: AtomicU16,
    /// Bitmask of raised interrupt events.
    pub(crate) pending_events: AtomicU32,
    pub(crate) trace: KernelCell<Ringbuf<Trace, TRACE_DEPTH>>,
    pub(crate) started: AtomicBool,
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Builds a kernel for `config`. Nothing runs until `start`.
    pub fn new(
        platform: P,
        sched: P::Scheduler,
        config: &'static KernelConfig<P, N>,
    ) -> Self {
        const {
            assert!(N > 0, "a kernel needs at least one task");
            assert!(N < TaskId::NONE.0 as usize, "too many tasks");
        }
        Self {
            platform,
            sched,
            config,
            tasks: core::array::from_fn(|_| Task::default()),
            current: AtomicUsize::new(0),
            now: KernelCell::new(Timestamp::ZERO),
            pending_ticks: AtomicU16::new(0),
            pending_events: AtomicU32::new(0),
            trace: KernelCell::new(Ringbuf::new(Trace::None)),
            started: AtomicBool::new(false),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn scheduler(&self) -> &P::Scheduler {
        &self.sched
    }

    pub fn config(&self) -> &'static KernelConfig<P, N> {
        self.config
    }

    /// Snapshot of the trace ring, or `None` if it is being written right
    /// now.
    pub fn trace(&self) -> Option<Ringbuf<Trace, TRACE_DEPTH>> {
        self.trace.try_borrow_mut().map(|buf| *buf)
    }

    /// Lifecycle state of `task` as of this instant.
    pub fn task_state(&self, task: TaskId) -> TaskState {
        if task.index() == self.current.load(Ordering::SeqCst) {
            TaskState::Running
        } else if self.sched.is_runnable(task) {
            TaskState::Runnable
        } else {
            TaskState::Blocked
        }
    }

    pub(crate) fn is_valid(&self, task: TaskId) -> bool {
        task.index() < N
    }

    pub(crate) fn now(&self) -> Timestamp {
        *self.now.borrow_mut()
    }
}
