// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mutexes, with optional priority ceiling.
//!
//! A contended lock registers the caller as a waiter and waits for
//! `TASK_TIMER`. Unlocking wakes the single most important waiter, which then
//! tries again; it can lose the race to a task that gets there first, in
//! which case it simply waits again.
//!
//! A mutex with a ceiling raises its holder's effective priority to the
//! ceiling for as long as it is held. Tasks more important than the ceiling
//! may not lock it.

use abi::{ErrorId, MutexId, Priority, SignalSet, TaskId};

use crate::cell::KernelCell;
use crate::err::{TimedOut, WouldBlock};
use crate::kernel::{trace, Trace};
use crate::platform::Platform;
use crate::sched::{priority_scan, Scheduler};
use crate::task::Wait;
use crate::time::{Ticks, Timestamp};
use crate::Kernel;

#[derive(Copy, Clone, Debug)]
struct MutexState {
    holder: TaskId,
    /// Holder's effective priority from before a ceiling raised it.
    saved_priority: Option<Priority>,
}

pub struct Mutex {
    ceiling: Option<Priority>,
    state: KernelCell<MutexState>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self::make(None)
    }

    pub const fn with_ceiling(ceiling: Priority) -> Self {
        Self::make(Some(ceiling))
    }

    const fn make(ceiling: Option<Priority>) -> Self {
        Self {
            ceiling,
            state: KernelCell::new(MutexState {
                holder: TaskId::NONE,
                saved_priority: None,
            }),
        }
    }

    pub fn ceiling(&self) -> Option<Priority> {
        self.ceiling
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Locks `mutex`, blocking for as long as it takes.
    pub fn mutex_lock(&self, mutex: MutexId) {
        let _scope = self.api_scope();
        let Some(m) = self.checked_mutex(mutex) else {
            return;
        };
        let cur = self.mutex_caller(m);
        while !self.mutex_acquire(m, cur) {
            self.mutex_contend(mutex, m, cur, false);
            self.block_on(
                Wait::Mutex {
                    id: mutex,
                    timed: false,
                },
                None,
            );
        }
    }

    /// Locks `mutex` if nobody holds it.
    pub fn mutex_try_lock(&self, mutex: MutexId) -> Result<(), WouldBlock> {
        let _scope = self.api_scope();
        let Some(m) = self.checked_mutex(mutex) else {
            return Err(WouldBlock);
        };
        let cur = self.mutex_caller(m);
        if self.mutex_acquire(m, cur) {
            Ok(())
        } else {
            Err(WouldBlock)
        }
    }

    /// Locks `mutex`, giving up after `timeout` ticks, which must be
    /// nonzero.
    pub fn mutex_lock_timeout(
        &self,
        mutex: MutexId,
        timeout: Ticks,
    ) -> Result<(), TimedOut> {
        let _scope = self.api_scope();
        let Some(m) = self.checked_mutex(mutex) else {
            return Err(TimedOut);
        };
        self.api_assert(timeout != 0, ErrorId::MutexZeroTimeout);
        let cur = self.mutex_caller(m);
        let deadline = self
            .now()
            .checked_add(timeout)
            .unwrap_or(Timestamp::from(u64::MAX));
        loop {
            if self.mutex_acquire(m, cur) {
                return Ok(());
            }
            let left = self.now().ticks_until(deadline);
            if left == 0 {
                trace!(self, Trace::TimedOut(cur));
                return Err(TimedOut);
            }
            self.mutex_contend(mutex, m, cur, true);
            self.block_on(
                Wait::Mutex {
                    id: mutex,
                    timed: true,
                },
                Some(left),
            );
        }
    }

    /// Releases `mutex`, which the caller must hold, and wakes the most
    /// important task waiting for it.
    pub fn mutex_unlock(&self, mutex: MutexId) {
        let _scope = self.api_scope();
        let Some(m) = self.checked_mutex(mutex) else {
            return;
        };
        let cur = TaskId::for_index(self.current_index());
        let holder = m.state.borrow_mut().holder;
        self.api_assert(holder == cur, ErrorId::NotHoldingMutex);

        let saved = {
            let mut s = m.state.borrow_mut();
            s.holder = TaskId::NONE;
            s.saved_priority.take()
        };
        if let Some(p) = saved {
            self.sched.set_priority(cur, p);
        }

        let waiter = priority_scan(cur.index(), N, |i| {
            matches!(self.tasks[i].wait(), Wait::Mutex { id, .. } if id == mutex)
                .then(|| self.sched.priority(TaskId::for_index(i)))
        });
        if let Some(w) = waiter {
            self.tasks[w].set_wait(Wait::None);
            self.send(TaskId::for_index(w), SignalSet::TASK_TIMER);
        }
    }

    /// Whether the caller holds `mutex`.
    pub fn mutex_holder_is_current(&self, mutex: MutexId) -> bool {
        let _scope = self.api_scope();
        let Some(m) = self.checked_mutex(mutex) else {
            return false;
        };
        let holder = m.state.borrow_mut().holder;
        holder.index() == self.current_index()
    }

    fn checked_mutex(&self, mutex: MutexId) -> Option<&'static Mutex> {
        let mutexes = self.config.mutexes;
        self.api_assert(mutex.index() < mutexes.len(), ErrorId::InvalidId);
        mutexes.get(mutex.index())
    }

    /// Identifies the caller and checks that it may lock `m` at all.
    fn mutex_caller(&self, m: &Mutex) -> TaskId {
        let cur = self.current_index();
        if let Some(ceiling) = m.ceiling {
            let base = self.config.tasks[cur].priority;
            self.api_assert(
                !base.is_more_important_than(ceiling),
                ErrorId::SchedPrioCeilingTaskLockingLowerPriorityMutex,
            );
        }
        TaskId::for_index(cur)
    }

    fn mutex_acquire(&self, m: &Mutex, cur: TaskId) -> bool {
        let mut s = m.state.borrow_mut();
        if !s.holder.is_none() {
            return false;
        }
        s.holder = cur;
        if let Some(ceiling) = m.ceiling {
            let p = self.sched.priority(cur);
            s.saved_priority = Some(p);
            if ceiling.is_more_important_than(p) {
                self.sched.set_priority(cur, ceiling);
            }
        }
        true
    }

    /// Checks that waiting for `m` can't deadlock. A timed wait always
    /// ends, so only untimed ones are checked.
    fn mutex_contend(
        &self,
        mutex: MutexId,
        m: &Mutex,
        cur: TaskId,
        timed: bool,
    ) {
        let holder = m.state.borrow_mut().holder;
        if P::API_ASSERTS && !timed && self.mutex_chain_reaches(holder, cur) {
            self.fatal(ErrorId::Deadlock);
        }
        trace!(self, Trace::MutexContended { mutex, holder });
    }

    /// Follows "holds the mutex that ... is waiting for" links from
    /// `holder`, looking for `cur`. Timed waits end the chain.
    fn mutex_chain_reaches(&self, mut holder: TaskId, cur: TaskId) -> bool {
        for _ in 0..N {
            if holder == cur {
                return true;
            }
            let Some(t) = self.tasks.get(holder.index()) else {
                return false;
            };
            let Wait::Mutex { id: next, timed: false } = t.wait() else {
                return false;
            };
            let Some(m) = self.config.mutexes.get(next.index()) else {
                return false;
            };
            holder = m.state.borrow_mut().holder;
        }
        false
    }
}
