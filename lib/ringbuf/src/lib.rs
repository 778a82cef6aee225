// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing kernel events.
//!
//! A `Ringbuf` is a fixed-size circular log of recent events, designed to be
//! read after the fact by a debugger or by tests. The owner embeds it in
//! whatever structure holds its state (the kernel keeps one per `Kernel`) and
//! appends to it with [`ringbuf_entry!`], which records the source line of the
//! call site along with the payload.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`. Repeating the
//! most recent entry (same line, same payload) does not use a new slot;
//! instead the entry's `count` goes up. This keeps a tight polling loop from
//! flushing out everything interesting.
//!
//! ## Inspecting a ring buffer via GDB
//!
//! Each slot carries a `generation` that is bumped every time the slot is
//! overwritten, so the oldest entry is the one after `last`. With symbols
//! loaded, `print` on the owning structure shows the raw buffer:
//!
//! ```console
//! (gdb) set print pretty on
//! (gdb) print KERNEL.trace
//! ```

#![cfg_attr(not(test), no_std)]

/// Inserts data into a ringbuffer.
///
/// `ringbuf_entry!(buf, expr)` will insert `expr` into `buf`, which must be
/// something that dereferences mutably to a [`Ringbuf`] (a `&mut Ringbuf` or a
/// borrow guard around one).
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload first so that it can't observe the borrow.
        let p = $payload;
        $crate::Ringbuf::entry(&mut *$buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Copy, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Makes an empty ring buffer. Every slot is filled with `init`, which is
    /// never reported by [`Ringbuf::iter`].
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // None is treated as an out-of-range index, so the first entry lands
        // in slot 0 and never merges with a stale one.
        let last = self.last.unwrap_or(usize::MAX);

        // get_mut also covers `last` being corrupted out of range; in that
        // case we just start over at 0.
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the
                // count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // Not a remainder operation: most of our targets lack hardware
        // divide, and this form turns usize::MAX into 0 for free.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Iterates over the recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) if last < N => last + 1,
            _ => N,
        };
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }

    /// Iterates over the payloads of the recorded entries, oldest first,
    /// ignoring repeat counts.
    pub fn payloads(&self) -> impl Iterator<Item = T> + '_ {
        self.iter().map(|ent| ent.payload)
    }
}
