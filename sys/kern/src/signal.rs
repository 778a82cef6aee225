// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signals: the one blocking mechanism.
//!
//! Each task has a set of pending signals. Sending latches bits into the
//! target's set and, if the target is blocked waiting for any of them, makes
//! it runnable. Waiting blocks until one of the requested bits is pending,
//! then takes (clears) and returns the requested bits.
//!
//! Mutexes, queues, semaphores and timers all wake tasks by sending
//! `SignalSet::TASK_TIMER`, so a task woken that way must look again at
//! whatever it was waiting for.

use abi::{ErrorId, SignalSet, TaskId};

use crate::err::TimedOut;
use crate::kernel::{trace, Trace};
use crate::platform::Platform;
use crate::sched::Scheduler;
use crate::task::Wait;
use crate::time::{Ticks, Timestamp};
use crate::Kernel;

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Sends `signals` to `task`. Never blocks or switches.
    pub fn signal_send(&self, task: TaskId, signals: SignalSet) {
        let _scope = self.api_scope();
        self.api_assert(self.is_valid(task), ErrorId::InvalidId);
        self.send(task, signals);
    }

    /// Waits for a single signal (or set) and returns once it has been
    /// received.
    pub fn signal_wait(&self, signals: SignalSet) {
        let _scope = self.api_scope();
        self.wait_set(signals);
    }

    /// Waits for any of `signals`, returning the ones received.
    pub fn signal_wait_set(&self, signals: SignalSet) -> SignalSet {
        let _scope = self.api_scope();
        self.wait_set(signals)
    }

    /// Takes whichever of `signals` are pending, without blocking.
    pub fn signal_poll_set(&self, signals: SignalSet) -> SignalSet {
        let _scope = self.api_scope();
        self.tasks[self.current_index()].take(signals)
    }

    /// Takes `signals` if any are pending; reports whether any were.
    pub fn signal_poll(&self, signals: SignalSet) -> bool {
        !self.signal_poll_set(signals).is_empty()
    }

    /// Checks for pending `signals` without taking them.
    pub fn signal_peek_set(&self, signals: SignalSet) -> SignalSet {
        let _scope = self.api_scope();
        self.tasks[self.current_index()].pending() & signals
    }

    pub fn signal_peek(&self, signals: SignalSet) -> bool {
        !self.signal_peek_set(signals).is_empty()
    }

    /// Latches `signals` for `task` and wakes it if it is waiting for any of
    /// them. Atomic-only, so interrupt handlers may use it.
    pub(crate) fn send(&self, task: TaskId, signals: SignalSet) {
        if let Some(t) = self.tasks.get(task.index()) {
            if t.post(signals) {
                self.unblock(task);
            }
        }
    }

    pub(crate) fn wait_set(&self, signals: SignalSet) -> SignalSet {
        let cur = self.current_index();
        let task = &self.tasks[cur];

        if task.pending().intersects(signals) {
            // Already here; still give others a turn, since callers treat a
            // wait as a scheduling point.
            self.reschedule();
        } else {
            let me = TaskId::for_index(cur);
            task.set_waiting_for(signals);
            loop {
                self.sched.mark_blocked(me);
                // A sender that ran between setting `waiting_for` and marking
                // ourselves blocked may have marked us runnable already; its
                // signal is latched, so look before sleeping.
                if task.pending().intersects(signals) {
                    self.sched.mark_runnable(me);
                    break;
                }
                self.suspend(me);
                if task.pending().intersects(signals) {
                    break;
                }
            }
            task.set_waiting_for(SignalSet::empty());
        }

        task.take(signals)
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Registers the caller as waiting on `wait` and blocks until something
    /// wakes it or, with a timeout, until the timeout runs out.
    pub(crate) fn block_on(&self, wait: Wait, timeout: Option<Ticks>) {
        let task = &self.tasks[self.current_index()];
        task.set_wait(wait);
        match timeout {
            Some(ticks) => self.block_timeout(ticks),
            None => {
                self.wait_set(SignalSet::TASK_TIMER);
            }
        }
        task.set_wait(Wait::None);
    }

    /// Wakes every task registered as waiting on `wait`.
    pub(crate) fn wake_all(&self, wait: Wait) {
        for (i, t) in self.tasks.iter().enumerate() {
            if t.clear_wait_if(wait) {
                self.send(TaskId::for_index(i), SignalSet::TASK_TIMER);
            }
        }
    }

    /// Runs `attempt` until it succeeds, blocking on `wait` in between.
    /// Every wakeup is treated as a hint only; `attempt` decides.
    pub(crate) fn retry_until(
        &self,
        wait: Wait,
        deadline: Option<Timestamp>,
        mut attempt: impl FnMut() -> bool,
    ) -> Result<(), TimedOut> {
        loop {
            if attempt() {
                return Ok(());
            }
            let timeout = match deadline {
                None => None,
                Some(d) => match self.now().ticks_until(d) {
                    0 => {
                        trace!(
                            self,
                            Trace::TimedOut(TaskId::for_index(
                                self.current_index()
                            ))
                        );
                        return Err(TimedOut);
                    }
                    left => Some(left),
                },
            };
            self.block_on(wait, timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use abi::{SignalSet, TaskId};

    use crate::descs::{KernelConfig, TaskFlags};
    use crate::testutil::{boot, idle_forever, task, Log, SimKernel, WAIT};

    type K2 = SimKernel<2>;

    const PING: SignalSet = SignalSet::from_bits_retain(1 << 0);
    const PONG: SignalSet = SignalSet::from_bits_retain(1 << 1);

    #[test]
    fn ping_pong() {
        let log = Log::default();
        let (l0, l1) = (log.clone(), log.clone());
        boot(KernelConfig::new([
            task("ping", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                for _ in 0..3 {
                    k.signal_send(TaskId(1), PING);
                    k.signal_wait(PONG);
                    l0.push("pong");
                }
                idle_forever(k)
            }),
            task("pong", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                loop {
                    k.signal_wait(PING);
                    l1.push("ping");
                    k.signal_send(TaskId(0), PONG);
                }
            }),
        ]));
        assert_eq!(
            log.wait_for(6, WAIT),
            ["ping", "pong", "ping", "pong", "ping", "pong"]
        );
    }

    #[test]
    fn signals_sent_early_are_latched() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig::new([
            task("sender", TaskFlags::START_IMMEDIATELY, |k: &'static K2| {
                k.signal_send(TaskId(1), PING | PONG);
                k.task_start(TaskId(1));
                idle_forever(k)
            }),
            task("receiver", TaskFlags::empty(), move |k: &'static K2| {
                l.push(format!("{}", k.signal_peek(PONG)));
                let got = k.signal_wait_set(PING | PONG);
                l.push(format!("{}", got == PING | PONG));
                l.push(format!("{}", k.signal_poll(PING)));
                idle_forever(k)
            }),
        ]));
        assert_eq!(log.wait_for(3, WAIT), ["true", "true", "false"]);
    }

    #[test]
    fn sending_unwanted_signal_does_not_wake() {
        let log = Log::default();
        let (l0, l1) = (log.clone(), log.clone());
        boot(KernelConfig::new([
            task("waiter", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                k.signal_wait(PING);
                l0.push("woke");
                idle_forever(k)
            }),
            task("sender", TaskFlags::START_IMMEDIATELY, move |k: &'static K2| {
                k.signal_send(TaskId(0), PONG);
                k.yield_now();
                l1.push("sent pong");
                k.signal_send(TaskId(0), PING);
                idle_forever(k)
            }),
        ]));
        assert_eq!(log.wait_for(2, WAIT), ["sent pong", "woke"]);
    }
}
