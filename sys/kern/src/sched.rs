// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run-queue policy.
//!
//! The kernel only tells a `Scheduler` which tasks may run and asks it to
//! pick one. How it picks is up to the implementation; `PriorityScheduler`
//! is the stock one.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use abi::{Priority, TaskId};

/// Run-queue interface.
///
/// `mark_runnable` and `mark_blocked` can race with interrupt handlers and
/// must be implemented with atomics (or with interrupts masked).
pub trait Scheduler: Sync {
    fn mark_runnable(&self, task: TaskId);

    fn mark_blocked(&self, task: TaskId);

    fn is_runnable(&self, task: TaskId) -> bool;

    /// Picks the next task to run among the runnable ones, given the one
    /// that ran last. `None` means nothing is runnable.
    fn select(&self, previous: TaskId) -> Option<TaskId>;

    /// Effective priority of `task`.
    fn priority(&self, task: TaskId) -> Priority;

    /// Changes the effective priority of `task`. Used by priority-ceiling
    /// mutexes.
    fn set_priority(&self, task: TaskId, priority: Priority);
}

/// Most tasks a `PriorityScheduler` can manage.
pub const MAX_TASKS: usize = 32;

/// Fixed-priority scheduling: the most important runnable task wins, and
/// tasks of equal priority take turns.
pub struct PriorityScheduler {
    runnable: AtomicU32,
    priorities: [AtomicU8; MAX_TASKS],
    count: usize,
}

impl PriorityScheduler {
    /// Makes a scheduler for tasks with the given base priorities, in task
    /// index order. Every task starts out blocked.
    pub fn new(priorities: impl IntoIterator<Item = Priority>) -> Self {
        let slots: [AtomicU8; MAX_TASKS] =
            core::array::from_fn(|_| AtomicU8::new(u8::MAX));
        let mut count = 0;
        for p in priorities {
            assert!(count < MAX_TASKS, "too many tasks for PriorityScheduler");
            slots[count].store(p.0, Ordering::Relaxed);
            count += 1;
        }
        Self {
            runnable: AtomicU32::new(0),
            priorities: slots,
            count,
        }
    }

    fn bit(&self, task: TaskId) -> u32 {
        let i = task.index();
        if i < self.count {
            1 << i
        } else {
            0
        }
    }
}

impl Scheduler for PriorityScheduler {
    fn mark_runnable(&self, task: TaskId) {
        self.runnable.fetch_or(self.bit(task), Ordering::SeqCst);
    }

    fn mark_blocked(&self, task: TaskId) {
        self.runnable.fetch_and(!self.bit(task), Ordering::SeqCst);
    }

    fn is_runnable(&self, task: TaskId) -> bool {
        self.runnable.load(Ordering::SeqCst) & self.bit(task) != 0
    }

    fn select(&self, previous: TaskId) -> Option<TaskId> {
        let runnable = self.runnable.load(Ordering::SeqCst);
        priority_scan(previous.index(), self.count, |i| {
            (runnable & (1 << i) != 0).then(|| self.priority(TaskId::for_index(i)))
        })
        .map(TaskId::for_index)
    }

    fn priority(&self, task: TaskId) -> Priority {
        match self.priorities.get(task.index()) {
            Some(p) => Priority(p.load(Ordering::Relaxed)),
            None => Priority(u8::MAX),
        }
    }

    fn set_priority(&self, task: TaskId, priority: Priority) {
        if let Some(p) = self.priorities.get(task.index()) {
            p.store(priority.0, Ordering::Relaxed);
        }
    }
}

/// Scans `count` task indices for the most important one that `candidate`
/// accepts, starting just after `previous` and wrapping. `candidate` returns
/// the priority of an eligible task, or `None` to skip it.
///
/// Among equally important candidates, the first one after `previous` wins,
/// which gives round-robin behavior among peers.
pub fn priority_scan(
    previous: usize,
    count: usize,
    candidate: impl Fn(usize) -> Option<Priority>,
) -> Option<usize> {
    let mut pos = previous;
    let mut choice: Option<(usize, Priority)> = None;
    for _step_no in 0..count {
        pos = pos.wrapping_add(1);
        if pos >= count {
            pos = 0;
        }
        let Some(prio) = candidate(pos) else {
            continue;
        };

        if let Some((_, best)) = choice {
            if !prio.is_more_important_than(best) {
                continue;
            }
        }

        choice = Some((pos, prio));
    }

    choice.map(|(pos, _)| pos)
}
