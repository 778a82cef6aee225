// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Kernel errors are not recoverable. Anything the kernel detects, whether a
//! caller passing a bad argument or the kernel's own books not balancing,
//! ends in `Kernel::fatal` and from there in `Platform::fatal_error`, which
//! never returns.
//!
//! Checks come in two channels that can be compiled out independently:
//!
//! - API assertions check what applications hand the kernel
//!   (`Platform::API_ASSERTS`).
//! - Internal assertions check the kernel's own invariants
//!   (`Platform::INTERNAL_ASSERTS`).
//!
//! The only non-fatal outcomes are the unit errors below, returned from the
//! try/timeout variants of blocking operations.

use core::sync::atomic::Ordering;

use abi::ErrorId;

use crate::kernel::{trace, Trace};
use crate::platform::Platform;
use crate::Kernel;

/// A non-blocking operation couldn't complete right now.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WouldBlock;

/// A blocking operation ran out of time before it could complete.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimedOut;

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Records `error` and hands it to the platform. Never returns.
    pub fn fatal(&self, error: ErrorId) -> ! {
        trace!(self, Trace::Fatal(error));
        self.event_fatal(error);
        self.platform.fatal_error(error)
    }

    #[inline(always)]
    pub(crate) fn api_assert(&self, cond: bool, error: ErrorId) {
        if P::API_ASSERTS && !cond {
            self.fatal(error)
        }
    }

    #[inline(always)]
    pub(crate) fn api_error(&self, error: ErrorId) {
        if P::API_ASSERTS {
            self.fatal(error)
        }
    }

    #[inline(always)]
    pub(crate) fn internal_assert(&self, cond: bool, error: ErrorId) {
        if P::INTERNAL_ASSERTS && !cond {
            self.fatal(error)
        }
    }

    #[inline(always)]
    pub(crate) fn internal_error(&self, error: ErrorId) {
        if P::INTERNAL_ASSERTS {
            self.fatal(error)
        }
    }

    /// Index of the running task.
    pub(crate) fn current_index(&self) -> usize {
        let i = self.current.load(Ordering::SeqCst);
        self.internal_assert(i < N, ErrorId::InternalCurrentTaskInvalid);
        i
    }
}
