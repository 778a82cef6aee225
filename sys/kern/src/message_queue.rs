// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded message queues.
//!
//! A queue is a ring of `queue_length` fixed-size messages in storage the
//! application provides. Messages are copied in and out, so the caller's
//! buffer must be exactly one message long and may not alias the storage.
//!
//! Every change to a queue wakes every task waiting on it; each one re-checks
//! and registers again if it still can't proceed. Timer expiry uses the same
//! wakeup, which is how timed operations notice their deadline.
//!
//! With internal assertions on, the queue's invariants are checked before and
//! after every operation.

use abi::{ErrorId, MessageQueueId, SignalSet, TaskId};

use crate::cell::KernelCell;
use crate::err::{TimedOut, WouldBlock};
use crate::platform::Platform;
use crate::sched::Scheduler;
use crate::task::Wait;
use crate::time::{Ticks, Timestamp};
use crate::Kernel;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct QueueState {
    /// Slot holding the oldest message.
    head: usize,
    /// Number of messages queued.
    available: usize,
}

pub struct MessageQueue {
    message_size: usize,
    queue_length: usize,
    storage: &'static KernelCell<[u8]>,
    state: KernelCell<QueueState>,
}

impl MessageQueue {
    /// Makes an empty queue of `queue_length` messages of `message_size`
    /// bytes each. `storage` must hold exactly that many bytes; `start`
    /// checks.
    pub const fn new(
        message_size: usize,
        queue_length: usize,
        storage: &'static KernelCell<[u8]>,
    ) -> Self {
        Self {
            message_size,
            queue_length,
            storage,
            state: KernelCell::new(QueueState {
                head: 0,
                available: 0,
            }),
        }
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    pub fn queue_length(&self) -> usize {
        self.queue_length
    }

    fn overlaps(&self, buf: &[u8]) -> bool {
        let storage = self.storage.as_ptr();
        let start = storage.cast::<u8>() as usize;
        let end = start.wrapping_add(storage.len());
        let b = buf.as_ptr() as usize;
        b < end && start < b.wrapping_add(buf.len())
    }

    #[cfg(test)]
    fn preloaded(self, available: usize) -> Self {
        Self {
            state: KernelCell::new(QueueState { head: 0, available }),
            ..self
        }
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Appends `message` to `queue`, waiting for room as long as it takes.
    pub fn message_queue_put(&self, queue: MessageQueueId, message: &[u8]) {
        let _scope = self.api_scope();
        let Some(q) = self.checked_queue(queue, message) else {
            return;
        };
        // Without a deadline this only returns once the put succeeds.
        let _ = self.retry_until(Wait::MessageQueue(queue), None, || {
            self.queue_push(queue, q, message)
        });
    }

    /// Appends `message` to `queue` if there is room.
    pub fn message_queue_try_put(
        &self,
        queue: MessageQueueId,
        message: &[u8],
    ) -> Result<(), WouldBlock> {
        let _scope = self.api_scope();
        let Some(q) = self.checked_queue(queue, message) else {
            return Err(WouldBlock);
        };
        if self.queue_push(queue, q, message) {
            Ok(())
        } else {
            Err(WouldBlock)
        }
    }

    /// Appends `message` to `queue`, giving up after `timeout` ticks.
    pub fn message_queue_put_timeout(
        &self,
        queue: MessageQueueId,
        message: &[u8],
        timeout: Ticks,
    ) -> Result<(), TimedOut> {
        let _scope = self.api_scope();
        let Some(q) = self.checked_queue(queue, message) else {
            return Err(TimedOut);
        };
        let deadline = self.queue_deadline(timeout);
        self.retry_until(Wait::MessageQueue(queue), Some(deadline), || {
            self.queue_push(queue, q, message)
        })
    }

    /// Removes the oldest message from `queue` into `message`, waiting for
    /// one as long as it takes.
    pub fn message_queue_get(&self, queue: MessageQueueId, message: &mut [u8]) {
        let _scope = self.api_scope();
        let Some(q) = self.checked_queue(queue, message) else {
            return;
        };
        let _ = self.retry_until(Wait::MessageQueue(queue), None, || {
            self.queue_pop(queue, q, message)
        });
    }

    /// Removes the oldest message from `queue` into `message`, if there is
    /// one.
    pub fn message_queue_try_get(
        &self,
        queue: MessageQueueId,
        message: &mut [u8],
    ) -> Result<(), WouldBlock> {
        let _scope = self.api_scope();
        let Some(q) = self.checked_queue(queue, message) else {
            return Err(WouldBlock);
        };
        if self.queue_pop(queue, q, message) {
            Ok(())
        } else {
            Err(WouldBlock)
        }
    }

    /// Removes the oldest message from `queue` into `message`, giving up
    /// after `timeout` ticks. On timeout `message` is left alone.
    pub fn message_queue_get_timeout(
        &self,
        queue: MessageQueueId,
        message: &mut [u8],
        timeout: Ticks,
    ) -> Result<(), TimedOut> {
        let _scope = self.api_scope();
        let Some(q) = self.checked_queue(queue, message) else {
            return Err(TimedOut);
        };
        let deadline = self.queue_deadline(timeout);
        self.retry_until(Wait::MessageQueue(queue), Some(deadline), || {
            self.queue_pop(queue, q, message)
        })
    }

    /// Checks every configured queue before the first task runs.
    pub(crate) fn message_queue_init(&self) {
        for q in self.config.message_queues {
            self.queue_check_config(q);
            let s = *q.state.borrow_mut();
            self.internal_assert(
                s == QueueState::default(),
                ErrorId::MessageQueueInternalIncorrectInitialization,
            );
        }
    }

    fn checked_queue(
        &self,
        queue: MessageQueueId,
        message: &[u8],
    ) -> Option<&'static MessageQueue> {
        let queues = self.config.message_queues;
        self.api_assert(queue.index() < queues.len(), ErrorId::InvalidId);
        let q = queues.get(queue.index())?;
        self.api_assert(
            message.len() == q.message_size,
            ErrorId::MessageQueueInvalidPointer,
        );
        self.api_assert(
            !q.overlaps(message),
            ErrorId::MessageQueueBufferOverlap,
        );
        Some(q)
    }

    fn queue_deadline(&self, timeout: Ticks) -> Timestamp {
        self.api_assert(timeout != 0, ErrorId::MessageQueueZeroTimeout);
        match self.now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                self.internal_error(ErrorId::MessageQueueInternalTickOverflow);
                Timestamp::from(u64::MAX)
            }
        }
    }

    fn queue_push(&self, id: MessageQueueId, q: &MessageQueue, message: &[u8]) -> bool {
        self.queue_check(id, q);
        let slot = {
            let mut s = q.state.borrow_mut();
            if s.available >= q.queue_length {
                return false;
            }
            let slot = (s.head + s.available) % q.queue_length;
            s.available += 1;
            slot
        };

        let start = slot * q.message_size;
        let n = message.len().min(q.message_size);
        if let Some(dst) = q.storage.borrow_mut().get_mut(start..start + n) {
            dst.copy_from_slice(&message[..n]);
        }

        self.wake_all(Wait::MessageQueue(id));
        self.queue_check(id, q);
        true
    }

    fn queue_pop(&self, id: MessageQueueId, q: &MessageQueue, message: &mut [u8]) -> bool {
        self.queue_check(id, q);
        let slot = {
            let mut s = q.state.borrow_mut();
            if s.available == 0 {
                return false;
            }
            let slot = s.head;
            s.head = (s.head + 1) % q.queue_length;
            s.available -= 1;
            slot
        };

        let start = slot * q.message_size;
        let n = message.len().min(q.message_size);
        if let Some(src) = q.storage.borrow_mut().get(start..start + n) {
            message[..n].copy_from_slice(src);
        }

        self.wake_all(Wait::MessageQueue(id));
        self.queue_check(id, q);
        true
    }

    fn queue_check_config(&self, q: &MessageQueue) {
        self.internal_assert(
            q.message_size != 0,
            ErrorId::MessageQueueInternalViolatedInvariantInvalidMessageSize,
        );
        self.internal_assert(
            q.queue_length != 0,
            ErrorId::MessageQueueInternalViolatedInvariantInvalidQueueLength,
        );
        let len = q.storage.as_ptr().len();
        self.internal_assert(
            len != 0,
            ErrorId::MessageQueueInternalViolatedInvariantInvalidMessagesPointer,
        );
        self.internal_assert(
            q.message_size.checked_mul(q.queue_length) == Some(len),
            ErrorId::MessageQueueInternalViolatedInvariantConfiguration,
        );
    }

    fn queue_check(&self, id: MessageQueueId, q: &MessageQueue) {
        if !P::INTERNAL_ASSERTS {
            return;
        }
        self.queue_check_config(q);

        let s = *q.state.borrow_mut();
        self.internal_assert(
            s.head < q.queue_length,
            ErrorId::MessageQueueInternalViolatedInvariantInvalidHead,
        );
        self.internal_assert(
            s.available <= q.queue_length,
            ErrorId::MessageQueueInternalViolatedInvariantInvalidAvailable,
        );

        // Waiters only make sense on an empty or full queue.
        let settled = s.available == 0 || s.available == q.queue_length;
        let count = self.config.message_queues.len();
        for (i, t) in self.tasks.iter().enumerate() {
            let Wait::MessageQueue(w) = t.wait() else {
                continue;
            };
            self.internal_assert(
                w.index() < count,
                ErrorId::MessageQueueInternalViolatedInvariantInvalidIdInWaiters,
            );
            if w != id {
                continue;
            }
            self.internal_assert(
                settled,
                ErrorId::MessageQueueInternalViolatedInvariantTasksBlockedDespiteAvailableMessages,
            );
            // A registered waiter is either blocked, or has been woken by
            // its timer and not yet run.
            let runnable = self.sched.is_runnable(TaskId::for_index(i));
            self.internal_assert(
                !runnable || t.pending().contains(SignalSet::TASK_TIMER),
                ErrorId::MessageQueueInternalViolatedInvariantWaitingTaskIsNotBlocked,
            );
        }
    }
}
