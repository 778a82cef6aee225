// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the kernel needs from the board it runs on.

use abi::ErrorId;

use crate::arch::ArchContext;
use crate::sched::Scheduler;

/// Board support for one kernel instance.
///
/// The associated consts are the kernel's build options. They default to the
/// `kern` crate's cargo features, and a platform may pin them either way.
pub trait Platform: Sync + Sized + 'static {
    /// Saved machine state for one task.
    type Context: ArchContext;
    /// Run-queue policy.
    type Scheduler: Scheduler;

    /// Check arguments supplied by applications.
    const API_ASSERTS: bool = cfg!(feature = "api-asserts");
    /// Check the kernel's own bookkeeping.
    const INTERNAL_ASSERTS: bool = cfg!(feature = "internal-asserts");
    /// Elevate privileges for the duration of every kernel call.
    const MEMORY_PROTECTION: bool = cfg!(feature = "mpu");

    /// Reports an unrecoverable error. Must not return.
    ///
    /// The default records the error where a debugger can find it and
    /// spins.
    fn fatal_error(&self, error: ErrorId) -> ! {
        crate::fail::die(error)
    }

    /// Called when no task is runnable. Should sleep until an interrupt has
    /// had a chance to run.
    fn wait_for_interrupt(&self) {
        core::hint::spin_loop();
    }

    fn elevate_privileges(&self) {}

    fn drop_privileges(&self) {}

    fn in_user_mode(&self) -> bool {
        false
    }

    /// Whether `fatal_error` has already been called from somewhere that
    /// couldn't stop the running task, such as an interrupt handler on a
    /// host simulation. The dispatcher picks nothing once this is true.
    fn halted(&self) -> bool {
        false
    }
}
