// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Where the kernel leaves word of how it died.
//!
//! `die` is the end of the default `Platform::fatal_error`, and of a panic
//! on bare metal. It sets `KERNEL_HAS_FAILED`, writes the reason into
//! `KERNEL_EPITAPH` (an `ErrorId` renders as its number and description;
//! whatever doesn't fit is cut off, the rest is NUL) and spins. Both are
//! plain statics, so a debugger attached to a stopped board can read them
//! by symbol.

use core::{
    fmt::{Display, Write},
    sync::atomic::Ordering,
};

/// Set once the kernel has died.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

/// Reason for the failure, NUL padded.
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: only one caller ever gets past the flag swap, and the kernel is
    // single-core with the dying task holding the processor.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        // Died while dying; leave the first epitaph alone.
        spin();
    }

    // Safety: only the caller that set the flag gets here.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Epitaph { dest: buf };
    write!(writer, "{msg}").ok();
    spin()
}

fn spin() -> ! {
    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Fills a fixed buffer front to back, dropping what doesn't fit.
struct Epitaph<'a> {
    dest: &'a mut [u8],
}

impl Write for Epitaph<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let n = s.len().min(self.dest.len());
        let (head, rest) = core::mem::take(&mut self.dest).split_at_mut(n);
        head.copy_from_slice(&s.as_bytes()[..n]);
        self.dest = rest;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
