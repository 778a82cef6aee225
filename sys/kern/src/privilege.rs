// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Privilege bracketing of kernel entry points.
//!
//! With memory protection on, tasks run unprivileged and every public kernel
//! operation holds an `ApiScope` for its duration. The outermost scope
//! elevates (if the caller was in user mode) and the matching drop lowers
//! privileges again; scopes opened from inside the kernel only move the
//! per-task depth counter. Without memory protection the scope does nothing.

use core::sync::atomic::Ordering;

use crate::platform::Platform;
use crate::Kernel;

pub(crate) struct ApiScope<'a, P: Platform, const N: usize> {
    kernel: &'a Kernel<P, N>,
    task: usize,
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    pub(crate) fn api_scope(&self) -> ApiScope<'_, P, N> {
        let task = if P::MEMORY_PROTECTION {
            let task = self.current_index();
            if self.platform.in_user_mode() {
                self.platform.elevate_privileges();
            }
            let _ = self.tasks[task].api_depth.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |d| Some(d.saturating_add(1)),
            );
            task
        } else {
            0
        };
        ApiScope { kernel: self, task }
    }
}

impl<P: Platform, const N: usize> Drop for ApiScope<'_, P, N> {
    fn drop(&mut self) {
        if !P::MEMORY_PROTECTION {
            return;
        }
        let depth = &self.kernel.tasks[self.task].api_depth;
        let prev = depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        if prev <= 1 {
            self.kernel.platform.drop_privileges();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::arch::sim::SimPlatform;
    use crate::descs::{KernelConfig, TaskFlags};
    use crate::platform::Platform;
    use crate::testutil::{boot, idle_forever, task, Log, SimKernel, WAIT};

    type Mpu = SimKernel<1, SimPlatform<true, true, true>>;
    type NoMpu = SimKernel<1>;

    #[test]
    fn each_call_elevates_then_drops() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig::new([task(
            "main",
            TaskFlags::START_IMMEDIATELY,
            move |k: &'static Mpu| {
                let p = k.platform();
                l.push(format!("user {}", p.in_user_mode()));

                let (e0, d0) = p.privilege_counts();
                k.task_current();
                let (e1, d1) = p.privilege_counts();
                l.push(format!("{} {}", e1 - e0, d1 - d0));

                // Same again for a call that goes through the dispatcher.
                k.yield_now();
                let (e2, d2) = p.privilege_counts();
                l.push(format!("{} {}", e2 - e1, d2 - d1));
                l.push(format!("user {}", p.in_user_mode()));
                idle_forever(k)
            },
        )]));
        assert_eq!(
            log.wait_for(4, WAIT),
            ["user true", "1 1", "1 1", "user true"]
        );
    }

    #[test]
    fn nested_calls_keep_privilege() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig::new([task(
            "main",
            TaskFlags::START_IMMEDIATELY,
            move |k: &'static Mpu| {
                let p = k.platform();
                let (e0, d0) = p.privilege_counts();
                {
                    let _outer = k.api_scope();
                    k.task_current();
                    l.push(format!("inner user {}", p.in_user_mode()));
                }
                let (e1, d1) = p.privilege_counts();
                l.push(format!(
                    "{} {} user {}",
                    e1 - e0,
                    d1 - d0,
                    p.in_user_mode()
                ));
                idle_forever(k)
            },
        )]));
        assert_eq!(
            log.wait_for(2, WAIT),
            ["inner user false", "1 1 user true"]
        );
    }

    #[test]
    fn no_bracket_without_mpu() {
        let log = Log::default();
        let l = log.clone();
        boot(KernelConfig::new([task(
            "main",
            TaskFlags::START_IMMEDIATELY,
            move |k: &'static NoMpu| {
                k.task_current();
                k.yield_now();
                l.push(format!("{:?}", k.platform().privilege_counts()));
                idle_forever(k)
            },
        )]));
        assert_eq!(log.wait_for(1, WAIT), ["(0, 0)"]);
    }
}
