// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores.
//!
//! Posting wakes every task waiting on the semaphore; whichever runs first
//! takes the count and the rest go back to waiting.

use abi::{ErrorId, SemaphoreId};

use crate::cell::KernelCell;
use crate::err::{TimedOut, WouldBlock};
use crate::platform::Platform;
use crate::task::Wait;
use crate::time::{Ticks, Timestamp};
use crate::Kernel;

#[derive(Copy, Clone, Debug, Default)]
struct SemState {
    value: u32,
    max: Option<u32>,
}

pub struct Semaphore {
    /// Whether a maximum must be set with `sem_max_init` before posting.
    bounded: bool,
    state: KernelCell<SemState>,
}

impl Semaphore {
    /// An unbounded semaphore, initially zero.
    pub const fn new() -> Self {
        Self {
            bounded: false,
            state: KernelCell::new(SemState {
                value: 0,
                max: None,
            }),
        }
    }

    /// A semaphore that needs a maximum set before the first post.
    pub const fn bounded() -> Self {
        Self {
            bounded: true,
            ..Self::new()
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Increments `sem` and wakes its waiters.
    pub fn sem_post(&self, sem: SemaphoreId) {
        let _scope = self.api_scope();
        let Some(s) = self.checked_sem(sem) else {
            return;
        };
        let posted = {
            let mut st = s.state.borrow_mut();
            match (s.bounded, st.max) {
                (true, None) => Err(ErrorId::SemaphoreMaxUseBeforeInit),
                (_, Some(max)) if st.value >= max => {
                    Err(ErrorId::SemaphoreMaxExceeded)
                }
                _ => {
                    st.value = st.value.saturating_add(1);
                    Ok(())
                }
            }
        };
        match posted {
            Ok(()) => self.wake_all(Wait::Semaphore(sem)),
            Err(e) => self.api_error(e),
        }
    }

    /// Decrements `sem`, waiting as long as it takes for it to be nonzero.
    pub fn sem_wait(&self, sem: SemaphoreId) {
        let _scope = self.api_scope();
        let Some(s) = self.checked_sem(sem) else {
            return;
        };
        let _ = self.retry_until(Wait::Semaphore(sem), None, || {
            Self::sem_take(s)
        });
    }

    /// Decrements `sem` if it is nonzero.
    pub fn sem_try_wait(&self, sem: SemaphoreId) -> Result<(), WouldBlock> {
        let _scope = self.api_scope();
        match self.checked_sem(sem) {
            Some(s) if Self::sem_take(s) => Ok(()),
            _ => Err(WouldBlock),
        }
    }

    /// Decrements `sem`, giving up after `timeout` ticks, which must be
    /// nonzero.
    pub fn sem_wait_timeout(
        &self,
        sem: SemaphoreId,
        timeout: Ticks,
    ) -> Result<(), TimedOut> {
        let _scope = self.api_scope();
        let Some(s) = self.checked_sem(sem) else {
            return Err(TimedOut);
        };
        self.api_assert(timeout != 0, ErrorId::SemaphoreZeroTimeout);
        let deadline = self
            .now()
            .checked_add(timeout)
            .unwrap_or(Timestamp::from(u64::MAX));
        self.retry_until(Wait::Semaphore(sem), Some(deadline), || {
            Self::sem_take(s)
        })
    }

    /// Sets the most `sem` may count up to. Once only.
    pub fn sem_max_init(&self, sem: SemaphoreId, max: u32) {
        let _scope = self.api_scope();
        let Some(s) = self.checked_sem(sem) else {
            return;
        };
        self.api_assert(max != 0, ErrorId::SemaphoreMaxInvalid);
        let already = s.state.borrow_mut().max.is_some();
        self.api_assert(!already, ErrorId::SemaphoreMaxAlreadyInit);
        s.state.borrow_mut().max = Some(max);
    }

    pub fn sem_value(&self, sem: SemaphoreId) -> u32 {
        let _scope = self.api_scope();
        self.checked_sem(sem)
            .map_or(0, |s| s.state.borrow_mut().value)
    }

    fn checked_sem(&self, sem: SemaphoreId) -> Option<&'static Semaphore> {
        let sems = self.config.semaphores;
        self.api_assert(sem.index() < sems.len(), ErrorId::InvalidId);
        sems.get(sem.index())
    }

    fn sem_take(s: &Semaphore) -> bool {
        let mut st = s.state.borrow_mut();
        if st.value == 0 {
            return false;
        }
        st.value -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use abi::{ErrorId, SemaphoreId, TaskId};

    use crate::descs::{KernelConfig, TaskDesc, TaskFlags};
    use crate::testutil::{
        boot, idle_forever, leak, spawn_ticker, task, Log, SimKernel, WAIT,
    };

    use super::Semaphore;

    type K1 = SimKernel<1>;
    type K3 = SimKernel<3>;

    const S: SemaphoreId = SemaphoreId(0);

    fn one_task(
        sem: Semaphore,
        body: impl Fn(&'static K1) + Sync + 'static,
    ) -> &'static K1 {
        boot(KernelConfig {
            semaphores: leak([sem]),
            ..KernelConfig::new([task("main", TaskFlags::START_IMMEDIATELY, body)])
        })
    }

    fn fault_of(
        sem: Semaphore,
        body: impl Fn(&'static K1) + Sync + 'static,
    ) -> Option<ErrorId> {
        one_task(sem, body).platform().wait_for_fatal(WAIT)
    }

    #[test]
    fn posts_are_counted() {
        let log = Log::default();
        let l = log.clone();
        one_task(Semaphore::new(), move |k| {
            k.sem_post(S);
            k.sem_post(S);
            l.push(format!("{}", k.sem_value(S)));
            k.sem_wait(S);
            l.push(format!("{:?}", k.sem_try_wait(S)));
            l.push(format!("{:?}", k.sem_try_wait(S)));
            idle_forever(k)
        });
        assert_eq!(log.wait_for(3, WAIT), ["2", "Ok(())", "Err(WouldBlock)"]);
    }

    #[test]
    fn post_wakes_every_waiter() {
        let log = Log::default();
        let (l0, l1, l2) = (log.clone(), log.clone(), log.clone());
        let waiter = |name: &'static str, l: Log| {
            task(name, TaskFlags::START_IMMEDIATELY, move |k: &'static K3| {
                k.sem_wait(S);
                l.push(name);
                idle_forever(k)
            })
        };
        let poster: TaskDesc<_, 3> = task(
            "poster",
            TaskFlags::START_IMMEDIATELY,
            move |k: &'static K3| {
                k.sem_post(S);
                k.yield_now();
                // t0 got there first; t1 looked again and went back to
                // waiting.
                l2.push(format!("{:?}", k.task_state(TaskId(1))));
                k.sem_post(S);
                idle_forever(k)
            },
        );
        boot(KernelConfig {
            semaphores: leak([Semaphore::new()]),
            ..KernelConfig::new([waiter("t0", l0), waiter("t1", l1), poster])
        });
        assert_eq!(
            log.wait_for(3, WAIT),
            ["t0", "Blocked", "t1"]
        );
    }

    #[test]
    fn wait_timeout_gives_up() {
        let log = Log::default();
        let l = log.clone();
        let k = one_task(Semaphore::new(), move |k| {
            l.push(format!("{:?}", k.sem_wait_timeout(S, 5)));
            k.sem_post(S);
            l.push(format!("{:?}", k.sem_wait_timeout(S, 5)));
            idle_forever(k)
        });
        spawn_ticker(k);
        assert_eq!(log.wait_for(2, WAIT), ["Err(TimedOut)", "Ok(())"]);
    }

    #[test]
    fn zero_wait_timeout_is_an_error() {
        assert_eq!(
            fault_of(Semaphore::new(), |k| {
                k.sem_post(S);
                let _ = k.sem_wait_timeout(S, 0);
                idle_forever(k)
            }),
            Some(ErrorId::SemaphoreZeroTimeout)
        );
    }

    #[test]
    fn bounded_post_before_init_is_an_error() {
        assert_eq!(
            fault_of(Semaphore::bounded(), |k| {
                k.sem_post(S);
                idle_forever(k)
            }),
            Some(ErrorId::SemaphoreMaxUseBeforeInit)
        );
    }

    #[test]
    fn posting_past_max_is_an_error() {
        let log = Log::default();
        let l = log.clone();
        let fault = fault_of(Semaphore::bounded(), move |k| {
            k.sem_max_init(S, 1);
            k.sem_post(S);
            l.push("posted once");
            k.sem_post(S);
            idle_forever(k)
        });
        assert_eq!(fault, Some(ErrorId::SemaphoreMaxExceeded));
        assert_eq!(log.snapshot(), ["posted once"]);
    }

    #[test]
    fn zero_max_is_an_error() {
        assert_eq!(
            fault_of(Semaphore::bounded(), |k| {
                k.sem_max_init(S, 0);
                idle_forever(k)
            }),
            Some(ErrorId::SemaphoreMaxInvalid)
        );
    }

    #[test]
    fn max_is_set_once() {
        assert_eq!(
            fault_of(Semaphore::new(), |k| {
                k.sem_max_init(S, 3);
                k.sem_max_init(S, 4);
                idle_forever(k)
            }),
            Some(ErrorId::SemaphoreMaxAlreadyInit)
        );
    }

    #[test]
    fn bogus_semaphore_is_an_error() {
        assert_eq!(
            fault_of(Semaphore::new(), |k| {
                k.sem_post(SemaphoreId(1));
                idle_forever(k)
            }),
            Some(ErrorId::InvalidId)
        );
    }
}
