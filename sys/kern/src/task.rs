// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use abi::{MessageQueueId, MutexId, SemaphoreId, SignalSet};

use crate::cell::KernelCell;
use crate::timer::TimerState;

/// What derived object, if any, a task is registered as waiting on.
///
/// Waking a task clears this; the woken task re-checks the object and
/// registers again if it still can't proceed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Wait {
    None,
    /// A timed mutex wait ends on its own, so it can't be part of a
    /// deadlock.
    Mutex { id: MutexId, timed: bool },
    MessageQueue(MessageQueueId),
    Semaphore(SemaphoreId),
}

/// Internal representation of a task.
///
/// Signal state is atomic because interrupt handlers send signals. Everything
/// else is only touched from kernel context.
pub(crate) struct Task<C> {
    /// Saved machine state. Only the dispatcher touches this, and only while
    /// switching into or out of this task.
    pub(crate) save: UnsafeCell<C>,
    /// Signals sent to the task and not yet taken.
    pending: AtomicU32,
    /// Signals the task is blocked waiting for, zero if it isn't.
    waiting_for: AtomicU32,
    /// The task's own timer, which delivers `SignalSet::TASK_TIMER`.
    pub(crate) timer: KernelCell<TimerState>,
    /// Nesting depth of kernel calls, for the privilege bracket.
    pub(crate) api_depth: AtomicU8,
    /// Whether the task has been released from its entry wait.
    pub(crate) started: AtomicBool,
    wait: KernelCell<Wait>,
}

// Safety: `save` is only accessed by whichever thread of control holds the
// processor, during a switch.
unsafe impl<C: Send> Sync for Task<C> {}

impl<C: Default> Default for Task<C> {
    fn default() -> Self {
        Self {
            save: UnsafeCell::new(C::default()),
            pending: AtomicU32::new(0),
            waiting_for: AtomicU32::new(0),
            timer: KernelCell::new(TimerState::default()),
            api_depth: AtomicU8::new(0),
            started: AtomicBool::new(false),
            wait: KernelCell::new(Wait::None),
        }
    }
}

impl<C> Task<C> {
    pub(crate) fn pending(&self) -> SignalSet {
        SignalSet::from_bits_retain(self.pending.load(Ordering::SeqCst))
    }

    /// Latches `signals`, returning true if the task is waiting for any of
    /// them.
    pub(crate) fn post(&self, signals: SignalSet) -> bool {
        self.pending.fetch_or(signals.bits(), Ordering::SeqCst);
        self.waiting_for.load(Ordering::SeqCst) & signals.bits() != 0
    }

    /// Clears and returns whichever of `signals` are pending.
    pub(crate) fn take(&self, signals: SignalSet) -> SignalSet {
        let prev = self.pending.fetch_and(!signals.bits(), Ordering::SeqCst);
        SignalSet::from_bits_retain(prev) & signals
    }

    pub(crate) fn set_waiting_for(&self, signals: SignalSet) {
        self.waiting_for.store(signals.bits(), Ordering::SeqCst);
    }

    pub(crate) fn wait(&self) -> Wait {
        *self.wait.borrow_mut()
    }

    pub(crate) fn set_wait(&self, wait: Wait) {
        *self.wait.borrow_mut() = wait;
    }

    /// Clears the registration if it is `wait`, returning whether it was.
    pub(crate) fn clear_wait_if(&self, wait: Wait) -> bool {
        let mut w = self.wait.borrow_mut();
        if *w == wait {
            *w = Wait::None;
            true
        } else {
            false
        }
    }
}
