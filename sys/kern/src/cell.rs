// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interior mutability for statically allocated kernel objects.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A RefCell-style container that can be used in a static for cases where only
/// a single borrow needs to happen at any given time.
///
/// Kernel object state (mutex holders, queue counters, message storage) lives
/// in these so that configuration tables can be plain `&'static` data. Only
/// the one-writer part of `RefCell` is provided. Borrows must never be held
/// across a context switch.
pub struct KernelCell<T: ?Sized> {
    borrowed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> KernelCell<T> {
    /// Creates a `KernelCell` containing `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }
}

impl<T: ?Sized> KernelCell<T> {
    /// Gets mutable access to the contents of `self`.
    ///
    /// If a `KernelRef` for `self` still exists anywhere in the program, this
    /// will panic.
    #[track_caller]
    pub fn borrow_mut(&self) -> KernelRef<'_, T> {
        match self.try_borrow_mut() {
            Some(r) => r,
            None => panic!("kernel cell already borrowed"),
        }
    }

    /// Gets mutable access to the contents of `self`, unless someone else
    /// already has it.
    pub fn try_borrow_mut(&self) -> Option<KernelRef<'_, T>> {
        if self.borrowed.swap(true, Ordering::Acquire) {
            return None;
        }
        // Safety: the flag above ensures that we are not producing an
        // aliasing &mut to our contents.
        unsafe {
            Some(KernelRef {
                contents: &mut *self.cell.get(),
                borrow: &self.borrowed,
            })
        }
    }

    /// Raw pointer to the contents, for address comparisons and for handing
    /// regions (like stacks) to architecture code.
    pub fn as_ptr(&self) -> *mut T {
        self.cell.get()
    }
}

unsafe impl<T: ?Sized + Send> Sync for KernelCell<T> {}

pub struct KernelRef<'a, T: ?Sized> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<T: ?Sized> Drop for KernelRef<'_, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<T: ?Sized> core::ops::Deref for KernelRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.contents
    }
}

impl<T: ?Sized> core::ops::DerefMut for KernelRef<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.contents
    }
}
