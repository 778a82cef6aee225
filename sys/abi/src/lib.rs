// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between kernel and applications.
//!
//! Everything in here is plain data: identifiers for the statically
//! configured kernel objects, the signal set type used for blocking, and the
//! closed set of error codes the kernel can die with.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Names a task by its index in the kernel's task table.
///
/// Task indices are assigned at build time and never change; there is no
/// generation number because tasks are never restarted.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// Sentinel meaning "no task". This is never a valid index into the task
    /// table, so kernels are limited to `u8::MAX` tasks.
    pub const NONE: Self = Self(u8::MAX);

    /// The first task, which is also the one the kernel switches into at
    /// startup.
    pub const ZERO: Self = Self(0);

    /// Fabricates a `TaskId` for a known index.
    pub const fn for_index(index: usize) -> Self {
        TaskId(index as u8)
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0)
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

macro_rules! object_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Copy,
            Clone,
            Debug,
            Eq,
            PartialEq,
            Hash,
            Serialize,
            Deserialize,
            FromBytes,
            IntoBytes,
            Immutable,
            KnownLayout,
            Unaligned,
        )]
        #[repr(transparent)]
        pub struct $name(pub u8);

        impl $name {
            pub fn index(&self) -> usize {
                usize::from(self.0)
            }
        }
    };
}

object_id! {
    /// Index of a mutex in the kernel configuration.
    MutexId
}
object_id! {
    /// Index of a message queue in the kernel configuration.
    MessageQueueId
}
object_id! {
    /// Index of a counting semaphore in the kernel configuration.
    SemaphoreId
}
object_id! {
    /// Index of a timer. Application timers come first, followed by one
    /// timer per task.
    TimerId
}
object_id! {
    /// Index of an interrupt event in the kernel configuration.
    InterruptEventId
}

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater /
/// less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

bitflags::bitflags! {
    /// A set of signals a task can wait for or be sent.
    ///
    /// The top two bits belong to the kernel. Applications are free to use
    /// the rest, typically via `SignalSet::from_bits_retain`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
    #[repr(transparent)]
    pub struct SignalSet: u32 {
        /// Sent by a task's own timer, and by mutexes, queues and
        /// semaphores when they change state.
        const TASK_TIMER = 1 << 30;
        /// Sent by `task_start` to release a task from its entry wait.
        const RTOS_UTIL = 1 << 31;

        const _ = !0;
    }
}

impl SignalSet {
    /// Bits available to applications.
    pub const APP_MASK: u32 =
        !(Self::TASK_TIMER.bits() | Self::RTOS_UTIL.bits());
}

/// Lifecycle state of a task, as observed from outside it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// The single task that owns the processor.
    Running,
    /// Eligible for dispatch.
    Runnable,
    /// Waiting for a signal; the scheduler will not pick it.
    Blocked,
}

/// Which assertion channel an error belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The caller broke a usage contract.
    Api,
    /// The kernel's own bookkeeping is inconsistent.
    Internal,
}

/// Every reason the kernel can fail with.
///
/// The numbering is part of the ABI: it is what ends up in the epitaph and
/// what debug tooling decodes.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    FromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum ErrorId {
    None = 0,
    TickOverflow = 1,
    InvalidId = 2,
    NotHoldingMutex = 3,
    Deadlock = 4,
    TaskFunctionReturns = 5,
    InternalCurrentTaskInvalid = 6,
    InternalInvalidId = 7,
    MessageQueueBufferOverlap = 8,
    MessageQueueZeroTimeout = 9,
    MessageQueueInternalZeroTimeout = 10,
    MessageQueueInvalidPointer = 11,
    MessageQueueInternalTickOverflow = 12,
    MessageQueueInternalIncorrectInitialization = 13,
    MessageQueueInternalViolatedInvariantConfiguration = 14,
    MessageQueueInternalViolatedInvariantInvalidHead = 15,
    MessageQueueInternalViolatedInvariantInvalidAvailable = 16,
    MessageQueueInternalViolatedInvariantInvalidIdInWaiters = 17,
    MessageQueueInternalViolatedInvariantTasksBlockedDespiteAvailableMessages = 18,
    MessageQueueInternalViolatedInvariantWaitingTaskIsNotBlocked = 19,
    MessageQueueInternalViolatedInvariantInvalidMessagesPointer = 20,
    MessageQueueInternalViolatedInvariantInvalidMessageSize = 21,
    MessageQueueInternalViolatedInvariantInvalidQueueLength = 22,
    InternalPreconditionViolated = 23,
    InternalPostconditionViolated = 24,
    SemaphoreMaxInvalid = 25,
    SemaphoreMaxUseBeforeInit = 26,
    SemaphoreMaxAlreadyInit = 27,
    SemaphoreMaxExceeded = 28,
    MessageQueueInternalViolatedInvariantTimerIsEnabled = 29,
    SchedPrioCeilingTaskLockingLowerPriorityMutex = 30,
    /// Reserved; the kernel never raises this.
    SchedPrioCeilingMutexAlreadyLocked = 31,
    TimerSignalSetIsEmpty = 32,
    MpuInternalMisalignedAddr = 33,
    MpuInternalInvalidPtr = 34,
    MpuViolation = 35,
    MpuAlreadyEnabled = 36,
    MpuAlreadyDisabled = 37,
    MpuInvalidRegionSize = 38,
    MpuNonStandard = 39,
    MpuSanitationFailure = 40,
    MpuInternalInvalidRegionIndex = 41,
    TaskAlreadyStarted = 42,
    MutexZeroTimeout = 43,
    SemaphoreZeroTimeout = 44,
}

impl ErrorId {
    pub fn class(self) -> ErrorClass {
        use ErrorId::*;
        match self {
            InternalCurrentTaskInvalid
            | InternalInvalidId
            | MessageQueueInternalZeroTimeout
            | MessageQueueInternalTickOverflow
            | MessageQueueInternalIncorrectInitialization
            | MessageQueueInternalViolatedInvariantConfiguration
            | MessageQueueInternalViolatedInvariantInvalidHead
            | MessageQueueInternalViolatedInvariantInvalidAvailable
            | MessageQueueInternalViolatedInvariantInvalidIdInWaiters
            | MessageQueueInternalViolatedInvariantTasksBlockedDespiteAvailableMessages
            | MessageQueueInternalViolatedInvariantWaitingTaskIsNotBlocked
            | MessageQueueInternalViolatedInvariantInvalidMessagesPointer
            | MessageQueueInternalViolatedInvariantInvalidMessageSize
            | MessageQueueInternalViolatedInvariantInvalidQueueLength
            | MessageQueueInternalViolatedInvariantTimerIsEnabled
            | InternalPreconditionViolated
            | InternalPostconditionViolated
            | TimerSignalSetIsEmpty
            | MpuInternalMisalignedAddr
            | MpuInternalInvalidPtr
            | MpuInternalInvalidRegionIndex => ErrorClass::Internal,
            _ => ErrorClass::Api,
        }
    }

    fn describe(self) -> &'static str {
        use ErrorId::*;
        match self {
            None => "no error",
            TickOverflow => "tick overflow",
            InvalidId => "invalid id",
            NotHoldingMutex => "unlocking a mutex that is not held",
            Deadlock => "mutex deadlock",
            TaskFunctionReturns => "task function returned",
            InternalCurrentTaskInvalid => "current task invalid",
            InternalInvalidId => "internal invalid id",
            MessageQueueBufferOverlap => "message buffer overlaps queue",
            MessageQueueZeroTimeout => "message queue zero timeout",
            MessageQueueInternalZeroTimeout => {
                "message queue internal zero timeout"
            }
            MessageQueueInvalidPointer => "invalid message buffer",
            MessageQueueInternalTickOverflow => "message queue tick overflow",
            MessageQueueInternalIncorrectInitialization => {
                "message queue not empty at start"
            }
            MessageQueueInternalViolatedInvariantConfiguration => {
                "message queue configuration inconsistent"
            }
            MessageQueueInternalViolatedInvariantInvalidHead => {
                "message queue head out of range"
            }
            MessageQueueInternalViolatedInvariantInvalidAvailable => {
                "message queue available count out of range"
            }
            MessageQueueInternalViolatedInvariantInvalidIdInWaiters => {
                "message queue waiter id invalid"
            }
            MessageQueueInternalViolatedInvariantTasksBlockedDespiteAvailableMessages => {
                "message queue waiters blocked despite available messages"
            }
            MessageQueueInternalViolatedInvariantWaitingTaskIsNotBlocked => {
                "message queue waiter is not blocked"
            }
            MessageQueueInternalViolatedInvariantInvalidMessagesPointer => {
                "message queue storage missing"
            }
            MessageQueueInternalViolatedInvariantInvalidMessageSize => {
                "message queue message size invalid"
            }
            MessageQueueInternalViolatedInvariantInvalidQueueLength => {
                "message queue length invalid"
            }
            MessageQueueInternalViolatedInvariantTimerIsEnabled => {
                "task timer running at timed wait"
            }
            InternalPreconditionViolated => "precondition violated",
            InternalPostconditionViolated => "postcondition violated",
            SemaphoreMaxInvalid => "semaphore max invalid",
            SemaphoreMaxUseBeforeInit => "semaphore used before max init",
            SemaphoreMaxAlreadyInit => "semaphore max already initialized",
            SemaphoreMaxExceeded => "semaphore max exceeded",
            SchedPrioCeilingTaskLockingLowerPriorityMutex => {
                "task locking lower priority mutex"
            }
            SchedPrioCeilingMutexAlreadyLocked => "mutex already locked",
            TimerSignalSetIsEmpty => "timer signal set is empty",
            MpuInternalMisalignedAddr => "mpu misaligned address",
            MpuInternalInvalidPtr => "mpu invalid pointer",
            MpuViolation => "mpu violation",
            MpuAlreadyEnabled => "mpu already enabled",
            MpuAlreadyDisabled => "mpu already disabled",
            MpuInvalidRegionSize => "mpu invalid region size",
            MpuNonStandard => "mpu non standard",
            MpuSanitationFailure => "mpu sanitation failure",
            MpuInternalInvalidRegionIndex => "mpu invalid region index",
            TaskAlreadyStarted => "task already started",
            MutexZeroTimeout => "mutex zero timeout",
            SemaphoreZeroTimeout => "semaphore zero timeout",
        }
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", *self as u8, self.describe())
    }
}

/// Unknown error numbers come back as themselves.
impl TryFrom<u8> for ErrorId {
    type Error = u8;

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        <Self as num_traits::FromPrimitive>::from_u8(x).ok_or(x)
    }
}

static_assertions::const_assert_eq!(
    SignalSet::APP_MASK & SignalSet::TASK_TIMER.bits(),
    0
);
static_assertions::const_assert_eq!(
    SignalSet::APP_MASK & SignalSet::RTOS_UTIL.bits(),
    0
);
static_assertions::assert_eq_size!(TaskId, u8);
static_assertions::assert_eq_size!(ErrorId, u8);
