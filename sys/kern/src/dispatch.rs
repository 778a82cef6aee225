// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handing the processor between tasks.
//!
//! The only places a task can lose the processor are `yield_now`, `yield_to`
//! and `block`. Everything else runs to completion.

use core::sync::atomic::Ordering;

use abi::{ErrorId, SignalSet, TaskId};

use crate::arch::ArchContext;
use crate::kernel::{trace, Trace};
use crate::platform::Platform;
use crate::sched::Scheduler;
use crate::Kernel;

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Returns the identity of the calling task.
    pub fn task_current(&self) -> TaskId {
        let _scope = self.api_scope();
        TaskId::for_index(self.current_index())
    }

    /// Gives other runnable tasks a chance to run. Returns once the
    /// scheduler picks the caller again.
    pub fn yield_now(&self) {
        let _scope = self.api_scope();
        self.reschedule();
    }

    /// Releases `task` from its entry wait. Each task can be started once;
    /// tasks flagged `START_IMMEDIATELY` count as already started.
    pub fn task_start(&self, task: TaskId) {
        let _scope = self.api_scope();
        self.api_assert(self.is_valid(task), ErrorId::InvalidId);
        let Some(t) = self.tasks.get(task.index()) else {
            return;
        };
        if t.started.swap(true, Ordering::SeqCst) {
            self.api_error(ErrorId::TaskAlreadyStarted);
        }
        trace!(self, Trace::TaskStarted(task));
        self.send(task, SignalSet::RTOS_UTIL);
    }

    /// Asks the event layer for the next task and switches to it.
    pub(crate) fn reschedule(&self) {
        let next = self.next_task();
        self.yield_to(next);
    }

    /// Decides which task runs next: brings timers and interrupt events up
    /// to date, then asks the scheduler. When nothing is runnable, waits for
    /// an interrupt to change that.
    pub(crate) fn next_task(&self) -> TaskId {
        let previous = TaskId::for_index(self.current_index());
        loop {
            if self.platform.halted() {
                self.platform.wait_for_interrupt();
                continue;
            }
            self.process_ticks();
            self.process_events();
            if let Some(next) = self.sched.select(previous) {
                return next;
            }
            self.platform.wait_for_interrupt();
        }
    }

    /// Makes `to` the running task. The caller resumes from here when it is
    /// switched back in.
    pub(crate) fn yield_to(&self, to: TaskId) {
        self.internal_assert(self.is_valid(to), ErrorId::InternalInvalidId);
        let Some(next) = self.tasks.get(to.index()) else {
            return;
        };
        let from = self.current_index();

        self.event_task_switch(TaskId::for_index(from), to);
        trace!(
            self,
            Trace::Switch {
                from: TaskId::for_index(from),
                to,
            }
        );
        self.current.store(to.index(), Ordering::SeqCst);

        if from != to.index() {
            // Safety: `from` is the task running this code, `next` was
            // initialized by `start`, and nobody else touches saved state.
            unsafe {
                P::Context::switch(self.tasks[from].save.get(), next.save.get());
            }
        }
    }

    /// Blocks the running task until someone calls `unblock` on it.
    pub(crate) fn block(&self) {
        let cur = TaskId::for_index(self.current_index());
        self.sched.mark_blocked(cur);
        self.suspend(cur);
    }

    /// Gives up the processor after `cur` has been marked blocked.
    pub(crate) fn suspend(&self, cur: TaskId) {
        self.event_block(cur);
        trace!(self, Trace::Block(cur));
        self.reschedule();
    }

    /// Makes `task` runnable. Does not switch, and is safe to call from an
    /// interrupt handler.
    pub(crate) fn unblock(&self, task: TaskId) {
        self.sched.mark_runnable(task);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use abi::{ErrorId, TaskId, TaskState};

    use crate::descs::{KernelConfig, TaskFlags};
    use crate::platform::Platform;
    use crate::testutil::{boot, idle_forever, task, Log, SimKernel, WAIT};

    type K2 = SimKernel<2>;

    #[test]
    fn one_task_runs_at_startup() {
        type K3 = SimKernel<3>;
        let log = Log::default();
        let l = log.clone();
        let k: &K3 = boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, move |k: &'static K3| {
                let states: Vec<_> =
                    (0..3).map(|i| k.task_state(TaskId(i))).collect();
                l.push(format!("{states:?}"));
                let count = |want: TaskState| {
                    states.iter().filter(|&&s| s == want).count()
                };
                let (running, runnable, blocked) = (
                    count(TaskState::Running),
                    count(TaskState::Runnable),
                    count(TaskState::Blocked),
                );
                l.push(format!("{running} {runnable} {blocked}"));
                l.push(format!("{}", running + runnable + blocked));
                idle_forever(k)
            }),
            task("waiter", TaskFlags::empty(), |k: &'static K3| {
                idle_forever(k)
            }),
            task("other", TaskFlags::START_IMMEDIATELY, |k: &'static K3| {
                idle_forever(k)
            }),
        ]));
        assert_eq!(
            log.wait_for(3, WAIT),
            ["[Running, Blocked, Runnable]", "1 1 1", "3"]
        );
        assert!(!k.platform().halted());
    }

    #[test]
    fn task_start_releases_waiter() {
        let log = Log::default();
        let (l0, l1) = (log.clone(), log.clone());
        boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                l0.push("main");
                k.task_start(TaskId(1));
                k.yield_now();
                l0.push("main again");
                idle_forever(k)
            }),
            task("worker", TaskFlags::empty(), move |k: &'static K2| {
                l1.push(format!("worker is {}", k.task_current().0));
                idle_forever(k)
            }),
        ]));
        assert_eq!(
            log.wait_for(3, WAIT),
            ["main", "worker is 1", "main again"]
        );
    }

    #[test]
    fn starting_twice_is_an_error() {
        let k: &K2 = boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, |k: &'static K2| {
                k.task_start(TaskId(1));
                k.task_start(TaskId(1));
                idle_forever(k)
            }),
            task("worker", TaskFlags::empty(), |k: &'static K2| {
                idle_forever(k)
            }),
        ]));
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::TaskAlreadyStarted)
        );
    }

    #[test]
    fn starting_an_immediate_task_is_an_error() {
        let k: &K2 = boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, |k: &'static K2| {
                k.task_start(TaskId(1));
                idle_forever(k)
            }),
            task("other", TaskFlags::START_IMMEDIATELY, |k: &'static K2| {
                idle_forever(k)
            }),
        ]));
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::TaskAlreadyStarted)
        );
    }

    #[test]
    fn starting_a_bogus_task_is_an_error() {
        for bogus in [TaskId(2), TaskId::NONE] {
            let k: &K2 = boot(KernelConfig::new([
                task("main", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                    k.task_start(bogus);
                    idle_forever(k)
                }),
                task("worker", TaskFlags::empty(), |k: &'static K2| {
                    idle_forever(k)
                }),
            ]));
            assert_eq!(
                k.platform().wait_for_fatal(WAIT),
                Some(ErrorId::InvalidId)
            );
        }
    }

    #[test]
    fn yield_to_self_reports_self() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                k.yield_to(TaskId(0));
                l.push(format!("{}", k.task_current().0));
                idle_forever(k)
            }),
            task("worker", TaskFlags::empty(), |k: &'static K2| {
                idle_forever(k)
            }),
        ]));
        assert_eq!(log.wait_for(1, WAIT), ["0"]);
    }

    #[test]
    fn yield_to_other_task_makes_it_current() {
        let log = Log::default();
        let (l0, l1) = (log.clone(), log.clone());
        boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                // Worker is parked in its entry wait; hand it the processor
                // directly anyway. It sees itself as current, finds no start
                // signal, and blocks again, which brings us back.
                k.yield_to(TaskId(1));
                l0.push(format!("back in {}", k.task_current().0));
                idle_forever(k)
            }),
            task("worker", TaskFlags::empty(), move |k: &'static K2| {
                l1.push("worker body");
                idle_forever(k)
            }),
        ]));
        assert_eq!(log.wait_for(1, WAIT), ["back in 0"]);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(log.snapshot(), ["back in 0"]);
    }

    #[test]
    fn yield_to_bogus_task_never_switches() {
        let k: &K2 = boot(KernelConfig::new([
            task("main", TaskFlags::START_IMMEDIATELY, |k: &'static K2| {
                k.yield_to(TaskId(7));
                idle_forever(k)
            }),
            task("worker", TaskFlags::empty(), |k: &'static K2| {
                idle_forever(k)
            }),
        ]));
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::InternalInvalidId)
        );
        let trace = k.trace().unwrap();
        assert!(!trace.payloads().any(|t| matches!(
            t,
            crate::Trace::Switch { to: TaskId(7), .. }
        )));
    }

    #[test]
    fn block_waits_for_unblock() {
        let log = Log::default();
        let (l0, l1) = (log.clone(), log.clone());
        boot(KernelConfig::new([
            task("a", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                l0.push("A1");
                k.block();
                l0.push("A2");
                idle_forever(k)
            }),
            task("b", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                l1.push("B1");
                k.yield_now();
                l1.push("B2");
                k.unblock(TaskId(0));
                idle_forever(k)
            }),
        ]));
        assert_eq!(log.wait_for(4, WAIT), ["A1", "B1", "B2", "A2"]);
    }

    #[test]
    fn unblocking_a_runnable_task_changes_nothing() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig::new([
            task("a", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                let before = k.task_state(TaskId(1));
                k.unblock(TaskId(1));
                k.unblock(TaskId(1));
                l.push(format!("{before:?} {:?}", k.task_state(TaskId(1))));
                idle_forever(k)
            }),
            task("b", TaskFlags::START_IMMEDIATELY, |k: &'static K2| {
                idle_forever(k)
            }),
        ]));
        assert_eq!(log.wait_for(1, WAIT), ["Runnable Runnable"]);
    }
}
