// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt events.
//!
//! An interrupt handler raises an event; the dispatcher turns raised events
//! into signals for the tasks configured to receive them, then picks the
//! next task. This keeps interrupt handlers down to a single atomic OR.

use core::sync::atomic::Ordering;

use abi::{ErrorId, InterruptEventId};

use crate::descs::MAX_INTERRUPT_EVENTS;
use crate::platform::Platform;
use crate::Kernel;

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Marks `event` as raised. Safe to call from an interrupt handler.
    pub fn interrupt_event_raise(&self, event: InterruptEventId) {
        self.api_assert(
            event.index() < self.config.interrupt_events.len(),
            ErrorId::InvalidId,
        );
        if event.index() < MAX_INTERRUPT_EVENTS {
            self.pending_events
                .fetch_or(1 << event.index(), Ordering::SeqCst);
        }
    }

    /// Delivers the signals for every event raised since the last call.
    pub(crate) fn process_events(&self) {
        let mut pending = self.pending_events.swap(0, Ordering::SeqCst);
        while pending != 0 {
            let i = pending.trailing_zeros() as usize;
            pending &= pending - 1;
            if let Some(ev) = self.config.interrupt_events.get(i) {
                self.send(ev.task, ev.signals);
            }
        }
    }
}
