// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! The kernel never looks inside a task's saved machine state. All it needs
//! is the `ArchContext` trait below, which a port implements for whatever
//! register-save layout its context switch uses.
//!
//! Hosted builds get the `sim` module, which runs each task on its own OS
//! thread and hands a baton between them so that exactly one runs at a time.
//! That is what the kernel's tests run on. Bare-metal ports bring their own
//! context type through `Platform::Context`.

/// Where a task starts executing. The kernel passes itself (type-erased) and
/// the task's index.
pub type TaskEntry = fn(*const (), usize) -> !;

/// Saved execution state of one task.
pub trait ArchContext: Default + Send {
    /// Prepares a fresh context that will begin at `entry(kernel, task)` on
    /// `stack` the first time it is switched to.
    fn init(
        &mut self,
        entry: TaskEntry,
        kernel: *const (),
        task: usize,
        stack: *mut [u8],
    );

    /// Saves the running state into `from` and resumes `to`. Returns when
    /// something switches back to `from`.
    ///
    /// # Safety
    ///
    /// Both pointers must refer to live contexts, `from` must belong to the
    /// task that is actually running, and `to` must have been `init`ed.
    unsafe fn switch(from: *mut Self, to: *const Self);

    /// Resumes `to` without saving anything. Used once, at startup.
    ///
    /// # Safety
    ///
    /// `to` must have been `init`ed.
    unsafe fn switch_first(to: *const Self) -> !;
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        pub mod sim;
    }
}
