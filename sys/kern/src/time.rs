// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// A duration, in ticks.
pub type Ticks = u32;

/// In-kernel timestamp representation.
///
/// This counts ticks the kernel has processed since `start`. It only moves
/// forward while some task is inside the dispatcher, so it can lag the tick
/// interrupt by the ticks still pending.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn checked_add(self, ticks: Ticks) -> Option<Self> {
        self.0.checked_add(u64::from(ticks)).map(Self)
    }

    /// Ticks from `self` until `later`, zero if `later` has passed, and
    /// saturating if it is absurdly far out.
    pub fn ticks_until(self, later: Self) -> Ticks {
        Ticks::try_from(later.0.saturating_sub(self.0)).unwrap_or(Ticks::MAX)
    }

    pub(crate) fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}
