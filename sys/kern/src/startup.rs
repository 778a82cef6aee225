// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.

use core::sync::atomic::Ordering;

use abi::{ErrorId, SignalSet, TaskId};

use crate::arch::ArchContext;
use crate::descs::{TaskFlags, MAX_INTERRUPT_EVENTS};
use crate::kernel::{trace, Trace};
use crate::platform::Platform;
use crate::sched::Scheduler;
use crate::Kernel;

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// The main kernel entry point.
    ///
    /// Checks the configuration, sets up every task's initial context, marks
    /// every task runnable, and switches into task 0. Tasks without
    /// `START_IMMEDIATELY` go straight back to sleep until someone calls
    /// `task_start` on them.
    ///
    /// May only be called once per kernel.
    pub fn start(&'static self) -> ! {
        if self.started.swap(true, Ordering::SeqCst) {
            self.fatal(ErrorId::InternalPreconditionViolated);
        }
        self.check_config();
        self.message_queue_init();

        let kernel = self as *const Self as *const ();
        for (i, (task, desc)) in
            self.tasks.iter().zip(&self.config.tasks).enumerate()
        {
            // Safety: no task is running yet, so nothing else can be looking
            // at saved state.
            let save = unsafe { &mut *task.save.get() };
            save.init(task_entry::<P, N>, kernel, i, desc.stack.as_ptr());
            if desc.flags.contains(TaskFlags::START_IMMEDIATELY) {
                task.started.store(true, Ordering::SeqCst);
            }
            self.sched.mark_runnable(TaskId::for_index(i));
        }

        self.current.store(0, Ordering::SeqCst);
        trace!(self, Trace::Start);

        // Safety: task 0's context was initialized above.
        unsafe { P::Context::switch_first(self.tasks[0].save.get()) }
    }

    fn check_config(&self) {
        if !P::INTERNAL_ASSERTS {
            return;
        }
        let config = self.config;

        // Otherwise nobody would ever be around to start anyone.
        let any_immediate = config
            .tasks
            .iter()
            .any(|t| t.flags.contains(TaskFlags::START_IMMEDIATELY));
        self.internal_assert(
            any_immediate,
            ErrorId::InternalPreconditionViolated,
        );

        // Object ids are a byte wide.
        let id_space = usize::from(u8::MAX);
        for count in [
            self.timer_count(),
            config.mutexes.len(),
            config.message_queues.len(),
            config.semaphores.len(),
        ] {
            self.internal_assert(
                count <= id_space,
                ErrorId::InternalPreconditionViolated,
            );
        }

        self.internal_assert(
            config.interrupt_events.len() <= MAX_INTERRUPT_EVENTS,
            ErrorId::InternalPreconditionViolated,
        );
        for ev in config.interrupt_events {
            self.internal_assert(
                self.is_valid(ev.task),
                ErrorId::InternalInvalidId,
            );
        }
    }

    /// What every task runs: wait to be started, run the body, and never
    /// come back.
    fn run_task(&'static self, index: usize) -> ! {
        let desc = &self.config.tasks[index];
        if desc.flags.contains(TaskFlags::START_IMMEDIATELY) {
            // Let everyone else get to their start point first.
            self.yield_now();
        } else {
            self.signal_wait(SignalSet::RTOS_UTIL);
        }

        (desc.body)(self);

        self.api_error(ErrorId::TaskFunctionReturns);
        loop {
            self.block();
        }
    }
}

fn task_entry<P: Platform, const N: usize>(kernel: *const (), index: usize) -> ! {
    // Safety: `start` hands the architecture its own address.
    let kernel = unsafe { &*(kernel as *const Kernel<P, N>) };
    kernel.run_task(index)
}
