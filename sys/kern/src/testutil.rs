// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for running whole kernels on the host simulator.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use abi::Priority;

use crate::arch::sim::SimPlatform;
use crate::cell::KernelCell;
use crate::descs::{KernelConfig, TaskDesc, TaskFlags};
use crate::platform::Platform;
use crate::sched::PriorityScheduler;
use crate::Kernel;

pub(crate) type SimKernel<const N: usize, P = SimPlatform> = Kernel<P, N>;

/// How long a test waits for the simulated system to get somewhere.
pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Ordered record of what tasks did, shared between them and the test.
#[derive(Clone, Default)]
pub(crate) struct Log(Arc<(Mutex<Vec<String>>, Condvar)>);

impl Log {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        let (entries, cv) = &*self.0;
        entries.lock().unwrap().push(entry.into());
        cv.notify_all();
    }

    /// Waits until at least `n` entries are in, then returns all of them.
    /// Returns what there is if that takes longer than `timeout`.
    pub(crate) fn wait_for(&self, n: usize, timeout: Duration) -> Vec<String> {
        let (entries, cv) = &*self.0;
        let guard = entries.lock().unwrap();
        let (guard, _) = cv
            .wait_timeout_while(guard, timeout, |e| e.len() < n)
            .unwrap();
        guard.clone()
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.0 .0.lock().unwrap().clone()
    }
}

pub(crate) fn leak<T: 'static>(t: T) -> &'static T {
    Box::leak(Box::new(t))
}

/// A priority-0 task with no stack (simulated tasks run on their threads'
/// stacks).
pub(crate) fn task<P: Platform, const N: usize>(
    name: &'static str,
    flags: TaskFlags,
    body: impl Fn(&'static Kernel<P, N>) + Sync + 'static,
) -> TaskDesc<P, N> {
    static NO_STACK: KernelCell<[u8; 0]> = KernelCell::new([]);
    TaskDesc {
        name,
        body: leak(body),
        stack: &NO_STACK,
        priority: Priority(0),
        flags,
    }
}

/// Builds a kernel for `config` and starts it on a thread of its own.
pub(crate) fn boot<P, const N: usize>(
    config: KernelConfig<P, N>,
) -> &'static Kernel<P, N>
where
    P: Platform<Scheduler = PriorityScheduler> + Default,
{
    let config = leak(config);
    let sched =
        PriorityScheduler::new(config.tasks.iter().map(|t| t.priority));
    let kernel = leak(Kernel::new(P::default(), sched, config));
    thread::Builder::new()
        .name("boot".into())
        .spawn(move || {
            kernel.start();
        })
        .expect("spawning boot thread");
    kernel
}

/// Ticks `k` every millisecond until it dies.
pub(crate) fn spawn_ticker<
    const API: bool,
    const INTERNAL: bool,
    const MPU: bool,
    const N: usize,
>(
    k: &'static Kernel<SimPlatform<API, INTERNAL, MPU>, N>,
) {
    thread::spawn(move || {
        while !k.platform().halted() {
            k.tick();
            thread::sleep(Duration::from_millis(1));
        }
    });
}

/// Blocks the calling task for good.
pub(crate) fn idle_forever<P: Platform, const N: usize>(
    k: &Kernel<P, N>,
) -> ! {
    loop {
        k.block();
    }
}
