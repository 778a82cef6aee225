// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host simulation of a single-core target.
//!
//! Every task gets a thread. A thread only runs while it holds its task's
//! baton, and a context switch is "give the baton to `to`, then wait for
//! ours back", so the kernel sees exactly one running task, same as on
//! hardware. Threads standing in for interrupt handlers may run alongside;
//! they are limited to the kernel's ISR-safe entry points.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use abi::ErrorId;

use super::{ArchContext, TaskEntry};
use crate::platform::Platform;
use crate::sched::PriorityScheduler;

#[derive(Default)]
struct Baton {
    held: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    fn pass(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while !*held {
            held = self
                .cv
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = false;
    }
}

/// Saved state of a simulated task: just the baton its thread waits on.
#[derive(Default)]
pub struct SimContext {
    baton: Arc<Baton>,
}

impl ArchContext for SimContext {
    fn init(
        &mut self,
        entry: TaskEntry,
        kernel: *const (),
        task: usize,
        _stack: *mut [u8],
    ) {
        let baton = self.baton.clone();
        // Raw pointers aren't Send; the kernel is 'static and Sync, so
        // smuggling the address is fine.
        let kernel = kernel as usize;
        let spawned = thread::Builder::new()
            .name(format!("task{task}"))
            .spawn(move || {
                baton.wait();
                entry(kernel as *const (), task);
            });
        if let Err(e) = spawned {
            panic!("can't spawn thread for task {task}: {e}");
        }
    }

    unsafe fn switch(from: *mut Self, to: *const Self) {
        let (from, to) = unsafe { (&*from, &*to) };
        to.baton.pass();
        from.baton.wait();
    }

    unsafe fn switch_first(to: *const Self) -> ! {
        unsafe { &*to }.baton.pass();
        loop {
            thread::park();
        }
    }
}

/// A board that records what the kernel asks of it.
///
/// The const parameters select the kernel's build options: API assertions,
/// internal assertions, and the privilege bracket.
pub struct SimPlatform<
    const API: bool = true,
    const INTERNAL: bool = true,
    const MPU: bool = false,
> {
    faults: Mutex<Vec<ErrorId>>,
    faulted: Condvar,
    user_mode: AtomicBool,
    elevations: AtomicUsize,
    drops: AtomicUsize,
}

impl<const API: bool, const INTERNAL: bool, const MPU: bool> Default
    for SimPlatform<API, INTERNAL, MPU>
{
    fn default() -> Self {
        Self {
            faults: Mutex::new(Vec::new()),
            faulted: Condvar::new(),
            // The kernel boots privileged.
            user_mode: AtomicBool::new(false),
            elevations: AtomicUsize::new(0),
            drops: AtomicUsize::new(0),
        }
    }
}

impl<const API: bool, const INTERNAL: bool, const MPU: bool>
    SimPlatform<API, INTERNAL, MPU>
{
    /// Fatal errors reported so far, in order.
    pub fn faults(&self) -> Vec<ErrorId> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits up to `timeout` for the kernel to die, returning the first
    /// error it died with.
    pub fn wait_for_fatal(&self, timeout: Duration) -> Option<ErrorId> {
        let deadline = Instant::now() + timeout;
        let mut faults =
            self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        while faults.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            faults = self
                .faulted
                .wait_timeout(faults, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        faults.first().copied()
    }

    /// How many times privileges were (elevated, dropped).
    pub fn privilege_counts(&self) -> (usize, usize) {
        (
            self.elevations.load(Ordering::SeqCst),
            self.drops.load(Ordering::SeqCst),
        )
    }
}

impl<const API: bool, const INTERNAL: bool, const MPU: bool> Platform
    for SimPlatform<API, INTERNAL, MPU>
{
    type Context = SimContext;
    type Scheduler = PriorityScheduler;

    const API_ASSERTS: bool = API;
    const INTERNAL_ASSERTS: bool = INTERNAL;
    const MEMORY_PROTECTION: bool = MPU;

    fn fatal_error(&self, error: ErrorId) -> ! {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
        self.faulted.notify_all();
        // Keep the baton: nothing else gets to run on a dead system.
        loop {
            thread::park();
        }
    }

    fn wait_for_interrupt(&self) {
        thread::sleep(Duration::from_millis(1));
    }

    fn elevate_privileges(&self) {
        self.user_mode.store(false, Ordering::SeqCst);
        self.elevations.fetch_add(1, Ordering::SeqCst);
    }

    fn drop_privileges(&self) {
        self.user_mode.store(true, Ordering::SeqCst);
        self.drops.fetch_add(1, Ordering::SeqCst);
    }

    fn in_user_mode(&self) -> bool {
        self.user_mode.load(Ordering::SeqCst)
    }

    fn halted(&self) -> bool {
        !self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
