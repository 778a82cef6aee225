// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timers and the tick.
//!
//! The tick interrupt only counts; the counted ticks are applied to the
//! timers the next time the dispatcher runs (`process_ticks`), so timer
//! expiry always happens in kernel context.
//!
//! Application timers come from the configuration. Every task also has a
//! timer of its own that delivers `SignalSet::TASK_TIMER`; that is what
//! `sleep` and the timed variants of blocking operations use.

use core::sync::atomic::Ordering;

use abi::{ErrorId, SignalSet, TaskId, TimerId};

use crate::cell::KernelCell;
use crate::platform::Platform;
use crate::time::{Ticks, Timestamp};
use crate::Kernel;

/// What happens when a timer expires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerAction {
    /// Send `signals` to `task`.
    Signal { task: TaskId, signals: SignalSet },
    /// Die with this error. For watchdog-style deadlines.
    Fatal(ErrorId),
}

/// State for tracking a timer.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct TimerState {
    pub(crate) enabled: bool,
    /// Ticks until expiry, while enabled.
    remaining: Ticks,
    /// Period to rearm with on expiry; zero for one-shot.
    reload: Ticks,
}

impl TimerState {
    fn enable(&mut self) {
        self.enabled = true;
        self.remaining = self.reload.max(1);
    }

    pub(crate) fn oneshot(&mut self, ticks: Ticks) {
        self.reload = 0;
        self.remaining = ticks.max(1);
        self.enabled = true;
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }

    /// Advances by one tick, returning true if the timer fired.
    fn tick(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining != 0 {
            return false;
        }
        if self.reload == 0 {
            self.enabled = false;
        } else {
            self.remaining = self.reload;
        }
        true
    }
}

/// An application timer.
pub struct Timer {
    action: TimerAction,
    state: KernelCell<TimerState>,
}

impl Timer {
    /// A timer, initially stopped, that sends `signals` to `task`.
    pub const fn signal(task: TaskId, signals: SignalSet) -> Self {
        Self::new(TimerAction::Signal { task, signals })
    }

    /// A timer, initially stopped, that kills the system with `error`.
    pub const fn error(error: ErrorId) -> Self {
        Self::new(TimerAction::Fatal(error))
    }

    const fn new(action: TimerAction) -> Self {
        Self {
            action,
            state: KernelCell::new(TimerState {
                enabled: false,
                remaining: 0,
                reload: 0,
            }),
        }
    }

    /// The same timer, but running from startup and rearming every
    /// `period` ticks.
    pub const fn periodic(self, period: Ticks) -> Self {
        Self {
            action: self.action,
            state: KernelCell::new(TimerState {
                enabled: period != 0,
                remaining: period,
                reload: period,
            }),
        }
    }

    pub fn action(&self) -> TimerAction {
        self.action
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Counts one tick. Called from the tick interrupt; does no other work.
    pub fn tick(&self) {
        let counted = self.pending_ticks.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |t| t.checked_add(1),
        );
        if counted.is_err() {
            self.fatal(ErrorId::TickOverflow);
        }
    }

    /// Ticks processed since startup.
    pub fn timer_current_ticks(&self) -> Timestamp {
        let _scope = self.api_scope();
        self.now()
    }

    /// The timer belonging to `task`.
    pub fn task_timer(&self, task: TaskId) -> TimerId {
        let _scope = self.api_scope();
        self.api_assert(self.is_valid(task), ErrorId::InvalidId);
        // Only reachable with more timers than ids, which startup rejects
        // unless internal asserts are off.
        match u8::try_from(self.config.timers.len() + task.index()) {
            Ok(id) => TimerId(id),
            Err(_) => self.fatal(ErrorId::InternalInvalidId),
        }
    }

    /// Starts `timer`, expiring after its reload period (or on the next
    /// tick if it has none).
    pub fn timer_enable(&self, timer: TimerId) {
        let _scope = self.api_scope();
        if let Some((_, state)) = self.checked_timer(timer) {
            state.borrow_mut().enable();
        }
    }

    pub fn timer_disable(&self, timer: TimerId) {
        let _scope = self.api_scope();
        if let Some((_, state)) = self.checked_timer(timer) {
            state.borrow_mut().disable();
        }
    }

    /// Starts `timer` to expire once, `ticks` from now.
    pub fn timer_oneshot(&self, timer: TimerId, ticks: Ticks) {
        let _scope = self.api_scope();
        if let Some((_, state)) = self.checked_timer(timer) {
            state.borrow_mut().oneshot(ticks);
        }
    }

    /// Sets the period `timer` rearms with. Takes effect at the next
    /// expiry or enable.
    pub fn timer_reload_set(&self, timer: TimerId, ticks: Ticks) {
        let _scope = self.api_scope();
        if let Some((_, state)) = self.checked_timer(timer) {
            state.borrow_mut().reload = ticks;
        }
    }

    /// Ticks until `timer` expires; zero if it is stopped.
    pub fn timer_remaining(&self, timer: TimerId) -> Ticks {
        let _scope = self.api_scope();
        match self.checked_timer(timer) {
            Some((_, state)) => {
                let s = state.borrow_mut();
                if s.enabled {
                    s.remaining
                } else {
                    0
                }
            }
            None => 0,
        }
    }

    /// Blocks the caller for `ticks`. Zero just yields.
    pub fn sleep(&self, ticks: Ticks) {
        let _scope = self.api_scope();
        if ticks == 0 {
            self.reschedule();
            return;
        }
        let timer = &self.tasks[self.current_index()].timer;
        timer.borrow_mut().oneshot(ticks);
        // TASK_TIMER also means "go look again" to derived objects, so a
        // stray one can show up early.
        loop {
            self.wait_set(SignalSet::TASK_TIMER);
            if !timer.borrow_mut().enabled {
                break;
            }
        }
    }

    /// Blocks until the caller's timer fires after `ticks`, or until anyone
    /// else sends it `TASK_TIMER`, whichever comes first.
    ///
    /// The caller's timer must be idle; this borrows it.
    pub(crate) fn block_timeout(&self, ticks: Ticks) {
        self.internal_assert(
            ticks != 0,
            ErrorId::MessageQueueInternalZeroTimeout,
        );
        let timer = &self.tasks[self.current_index()].timer;
        let running = timer.borrow_mut().enabled;
        self.internal_assert(
            !running,
            ErrorId::MessageQueueInternalViolatedInvariantTimerIsEnabled,
        );
        timer.borrow_mut().oneshot(ticks);
        self.wait_set(SignalSet::TASK_TIMER);
        timer.borrow_mut().disable();
    }

    /// Applies ticks counted since the last call, firing timers as they
    /// expire.
    pub(crate) fn process_ticks(&self) {
        let ticks = self.pending_ticks.swap(0, Ordering::SeqCst);
        for _ in 0..ticks {
            self.now.borrow_mut().advance();
            self.event_tick();
            for id in 0..self.timer_count() {
                let Some((action, state)) = self.timer(id) else {
                    continue;
                };
                let fired = state.borrow_mut().tick();
                if fired {
                    self.timer_fire(action);
                }
            }
        }
    }

    fn timer_fire(&self, action: TimerAction) {
        match action {
            TimerAction::Fatal(error) => self.fatal(error),
            TimerAction::Signal { task, signals } => {
                self.internal_assert(
                    !signals.is_empty(),
                    ErrorId::TimerSignalSetIsEmpty,
                );
                self.send(task, signals);
            }
        }
    }

    pub(crate) fn timer_count(&self) -> usize {
        self.config.timers.len() + N
    }

    fn timer(&self, id: usize) -> Option<(TimerAction, &KernelCell<TimerState>)> {
        let app = self.config.timers;
        if let Some(t) = app.get(id) {
            return Some((t.action, &t.state));
        }
        let task = id - app.len();
        self.tasks.get(task).map(|t| {
            (
                TimerAction::Signal {
                    task: TaskId::for_index(task),
                    signals: SignalSet::TASK_TIMER,
                },
                &t.timer,
            )
        })
    }

    fn checked_timer(
        &self,
        timer: TimerId,
    ) -> Option<(TimerAction, &KernelCell<TimerState>)> {
        self.api_assert(timer.index() < self.timer_count(), ErrorId::InvalidId);
        self.timer(timer.index())
    }
}

#[cfg(test)]
mod tests {
    use abi::{ErrorId, SignalSet, TaskId, TimerId};

    use crate::descs::{KernelConfig, TaskFlags};
    use crate::testutil::{
        boot, idle_forever, leak, spawn_ticker, task, Log, SimKernel, WAIT,
    };

    use super::*;

    type K1 = SimKernel<1>;

    const ALARM: SignalSet = SignalSet::from_bits_retain(1 << 4);

    #[test]
    fn one_shot_and_periodic_state() {
        let mut t = TimerState::default();
        t.oneshot(2);
        assert!(!t.tick());
        assert!(t.tick());
        assert!(!t.enabled);

        t.reload = 3;
        t.enable();
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
        assert!(t.enabled);
        assert_eq!(t.remaining, 3);
    }

    #[test]
    fn sleep_waits_for_ticks() {
        let log = Log::default();
        let l = log.clone();
        let k: &K1 = boot(KernelConfig::new([task(
            "sleeper",
            TaskFlags::START_IMMEDIATELY,
            move |k: &'static K1| {
                let before = u64::from(k.timer_current_ticks());
                k.sleep(5);
                let after = u64::from(k.timer_current_ticks());
                l.push(format!("{}", after - before >= 5));
                l.push(format!("{}", k.timer_remaining(k.task_timer(TaskId(0)))));
                idle_forever(k)
            },
        )]));
        spawn_ticker(k);
        assert_eq!(log.wait_for(2, WAIT), ["true", "0"]);
    }

    #[test]
    fn periodic_timer_signals_task() {
        let log = Log::default();
        let l = log.clone();
        let k: &K1 = boot(KernelConfig {
            timers: leak([Timer::signal(TaskId(0), ALARM).periodic(2)]),
            ..KernelConfig::new([task(
                "main",
                TaskFlags::START_IMMEDIATELY,
                move |k: &'static K1| {
                    l.push(format!("{:?}", k.task_timer(TaskId(0))));
                    for _ in 0..3 {
                        k.signal_wait(ALARM);
                        l.push("alarm");
                    }
                    idle_forever(k)
                },
            )])
        });
        spawn_ticker(k);
        assert_eq!(
            log.wait_for(4, WAIT),
            ["TimerId(1)", "alarm", "alarm", "alarm"]
        );
    }

    #[test]
    fn oneshot_reports_remaining() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig {
            timers: leak([Timer::signal(TaskId(0), ALARM)]),
            ..KernelConfig::new([task(
                "main",
                TaskFlags::START_IMMEDIATELY,
                move |k: &'static K1| {
                    k.timer_oneshot(TimerId(0), 10);
                    l.push(format!("{}", k.timer_remaining(TimerId(0))));
                    k.timer_disable(TimerId(0));
                    l.push(format!("{}", k.timer_remaining(TimerId(0))));
                    k.timer_reload_set(TimerId(0), 4);
                    k.timer_enable(TimerId(0));
                    l.push(format!("{}", k.timer_remaining(TimerId(0))));
                    idle_forever(k)
                },
            )])
        });
        assert_eq!(log.wait_for(3, WAIT), ["10", "0", "4"]);
    }

    #[test]
    fn error_timer_is_fatal() {
        let k: &K1 = boot(KernelConfig {
            timers: leak([Timer::error(ErrorId::MpuViolation)]),
            ..KernelConfig::new([task(
                "main",
                TaskFlags::START_IMMEDIATELY,
                |k: &'static K1| {
                    k.timer_oneshot(TimerId(0), 3);
                    idle_forever(k)
                },
            )])
        });
        spawn_ticker(k);
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::MpuViolation)
        );
    }

    #[test]
    fn timer_with_no_signals_is_fatal() {
        let k: &K1 = boot(KernelConfig {
            timers: leak([Timer::signal(TaskId(0), SignalSet::empty())]),
            ..KernelConfig::new([task(
                "main",
                TaskFlags::START_IMMEDIATELY,
                |k: &'static K1| {
                    k.timer_oneshot(TimerId(0), 1);
                    idle_forever(k)
                },
            )])
        });
        spawn_ticker(k);
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::TimerSignalSetIsEmpty)
        );
    }

    #[test]
    fn bogus_timer_is_an_error() {
        let k: &K1 = boot(KernelConfig::new([task(
            "main",
            TaskFlags::START_IMMEDIATELY,
            |k: &'static K1| {
                // One task, no app timers: only TimerId(0) exists.
                k.timer_enable(TimerId(1));
                idle_forever(k)
            },
        )]));
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::InvalidId)
        );
    }

    #[test]
    fn task_timer_past_id_range_is_fatal() {
        type K = SimKernel<1, crate::arch::sim::SimPlatform<true, false>>;
        let k: &K = boot(KernelConfig {
            timers: leak(core::array::from_fn::<_, 256, _>(|_| {
                Timer::signal(TaskId(0), ALARM)
            })),
            ..KernelConfig::new([task(
                "main",
                TaskFlags::START_IMMEDIATELY,
                |k: &'static K| {
                    let _ = k.task_timer(TaskId(0));
                    idle_forever(k)
                },
            )])
        });
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::InternalInvalidId)
        );
    }

    #[test]
    fn unprocessed_ticks_overflow() {
        let k: &K1 = boot(KernelConfig::new([task(
            "busy",
            TaskFlags::START_IMMEDIATELY,
            |_k: &'static K1| loop {
                // Never enters the kernel, so ticks pile up.
                std::thread::park();
            },
        )]));
        std::thread::spawn(move || {
            while !k.platform().halted() {
                k.tick();
            }
        });
        assert_eq!(
            k.platform().wait_for_fatal(WAIT),
            Some(ErrorId::TickOverflow)
        );
    }
}
