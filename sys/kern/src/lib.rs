// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rigel kernel.
//!
//! This is the task-dispatch and blocking-synchronization core of a small
//! cooperative RTOS: a fixed set of tasks, the dispatcher that hands the
//! processor between them, the signal primitive everything else blocks on,
//! and the mutexes, message queues, semaphores and timers built from it.
//!
//! Board-specific pieces (saving and restoring registers, interrupt
//! controllers, privilege switching) come in through the `Platform` trait.
//! The `arch::sim` module provides a host implementation that runs each task
//! on a thread, which is what the tests use.
//!
//! # Design principles
//!
//! 1. Static configuration. The system takes a single shape, given by a
//!    `KernelConfig`, and nothing is allocated after `start`.
//! 2. Every kernel call runs to completion unless it blocks; a task only
//!    loses the processor at `yield`, `yield_to` or a block.
//! 3. Misuse is loud. Argument errors and broken internal invariants stop
//!    the system with an `ErrorId` rather than limping on; each class of
//!    check can be compiled out.
//! 4. A strong preference for safe code where reasonable. Interrupt
//!    handlers may only touch atomics.

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;
pub mod cell;
pub mod descs;
mod dispatch;
pub mod err;
mod events;
pub mod fail;
mod kernel;
pub mod message_queue;
pub mod mutex;
pub mod platform;
mod privilege;
pub mod profiling;
pub mod sched;
pub mod sem;
mod signal;
mod startup;
mod task;
pub mod time;
pub mod timer;

#[cfg(test)]
mod testutil;

pub use abi;

pub use crate::cell::KernelCell;
pub use crate::descs::{
    InterruptEventDesc, KernelConfig, TaskBody, TaskDesc, TaskFlags,
};
pub use crate::err::{TimedOut, WouldBlock};
pub use crate::kernel::{Kernel, Trace, TRACE_DEPTH};
pub use crate::message_queue::MessageQueue;
pub use crate::mutex::Mutex;
pub use crate::platform::Platform;
pub use crate::profiling::EventsTable;
pub use crate::sched::{PriorityScheduler, Scheduler};
pub use crate::sem::Semaphore;
pub use crate::time::{Ticks, Timestamp};
pub use crate::timer::{Timer, TimerAction};
