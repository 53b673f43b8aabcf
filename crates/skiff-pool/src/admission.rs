//! Admission control: bounds checked-out containers at `max_active`
//!
//! Callers queue on a [`Notify`] tied to the pool lock. A caller is admitted
//! once `active + reserved < max_active`; while anyone is queued, newcomers
//! queue behind them instead of barging, so woken callers make progress.

use crate::pool::Shared;
use crate::state::PoolState;
use tokio::sync::Notify;

/// Capacity held by an admitted caller until it is backed by a slot
///
/// Dropping an armed reservation (creation failed, or the acquiring future
/// was cancelled) hands the capacity back and wakes one waiter.
#[must_use]
pub(crate) struct Reservation<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Reservation<'_> {
    /// The reserved capacity is now an active slot.
    pub fn fulfil(&mut self, state: &mut PoolState) {
        debug_assert!(self.armed);
        state.reserved -= 1;
        self.armed = false;
    }

    /// Convert a checked-out slot that is about to be discarded back into
    /// reserved capacity, so the caller can create a replacement without
    /// queueing again.
    pub fn rearm(&mut self, state: &mut PoolState) {
        debug_assert!(!self.armed);
        state.reserved += 1;
        self.armed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().reserved -= 1;
            self.shared.capacity.notify_one();
        }
    }
}

/// Marks a caller as queued; unqueues on drop if the wait is abandoned.
struct Queued<'a> {
    shared: &'a Shared,
    queued: bool,
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        if self.queued {
            self.shared.state.lock().waiting -= 1;
            // We may have consumed a wakeup meant for capacity; pass it on.
            self.shared.capacity.notify_one();
        }
    }
}

/// Wait until one more container may be checked out.
pub(crate) async fn admit(shared: &Shared) -> Reservation<'_> {
    let mut ticket = Queued {
        shared,
        queued: false,
    };

    loop {
        let notified = shared.capacity.notified();
        tokio::pin!(notified);

        {
            let mut state = shared.state.lock();
            if state.has_capacity() && (ticket.queued || state.waiting == 0) {
                state.reserved += 1;
                if ticket.queued {
                    state.waiting -= 1;
                    ticket.queued = false;
                    if state.has_capacity() && state.waiting > 0 {
                        shared.capacity.notify_one();
                    }
                }
                return Reservation {
                    shared,
                    armed: true,
                };
            }

            if !ticket.queued {
                state.waiting += 1;
                ticket.queued = true;
                tracing::debug!(
                    active = state.active_count(),
                    max_active = state.max_active,
                    waiting = state.waiting,
                    "pool at capacity, waiting"
                );
            }

            // Register before unlocking so a release in between is not lost.
            notified.as_mut().enable();
        }

        notified.await;
    }
}

/// Wake every queued caller, e.g. after `max_active` grows.
pub(crate) fn wake_all(capacity: &Notify) {
    capacity.notify_waiters();
}
