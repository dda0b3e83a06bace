//! Global ticket lock ordering every registry mutation.
//!
//! One sequencer is shared by all memory spaces of a manager: a host
//! allocation queues behind a device free. Only the bookkeeping step is
//! serialised; backend calls happen before a caller waits for its turn.
//!
//! Protocol:
//! 1. `claim()` draws the next ticket (arrival order).
//! 2. `wait_turn(ticket)` parks until `serving == ticket`.
//! 3. The caller mutates a registry while holding the returned [`Turn`].
//! 4. Dropping the `Turn` bumps `serving` and wakes every waiter.
//!
//! Waiting has no deadline: a claimed ticket that is never turned in blocks
//! every later ticket. Callers that do work between claiming and waiting use
//! [`TicketSequencer::reserve`], whose [`Claim`] takes and retires its turn
//! on drop if that work unwinds.

use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{lock, Condvar, Mutex, MutexGuard};

/// Position in the global mutation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Ticket(u64);

impl Ticket {
    #[inline]
    pub fn number(self) -> u64 {
        self.0
    }
}

pub(crate) struct TicketSequencer {
    next_ticket: AtomicU64,
    serving: Mutex<u64>,
    turn_changed: Condvar,
}

impl TicketSequencer {
    pub fn new() -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            serving: Mutex::new(0),
            turn_changed: Condvar::new(),
        }
    }

    /// Draw the next ticket. Claim order is the order mutations apply in.
    #[inline]
    pub fn claim(&self) -> Ticket {
        Ticket(self.next_ticket.fetch_add(1, Ordering::AcqRel))
    }

    /// Draw the next ticket as a guard that always gets retired.
    #[inline]
    pub fn reserve(&self) -> Claim<'_> {
        Claim {
            sequencer: self,
            ticket: self.claim(),
            pending: true,
        }
    }

    /// Block until `ticket` is being served.
    pub fn wait_turn(&self, ticket: Ticket) -> Turn<'_> {
        let mut serving = lock(&self.serving);
        while *serving != ticket.0 {
            serving = self
                .turn_changed
                .wait(serving)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        Turn {
            sequencer: self,
            serving: Some(serving),
            ticket,
        }
    }

    /// Tickets handed out so far.
    #[allow(dead_code)]
    pub fn issued(&self) -> u64 {
        self.next_ticket.load(Ordering::Acquire)
    }

    /// Tickets retired so far (== the ticket currently allowed to mutate).
    #[allow(dead_code)]
    pub fn serving(&self) -> u64 {
        *lock(&self.serving)
    }
}

/// A claimed ticket that has not been turned in yet.
///
/// Dropped without [`wait`](Claim::wait), it still waits for its turn and
/// retires it, so later tickets are not stranded.
pub(crate) struct Claim<'a> {
    sequencer: &'a TicketSequencer,
    ticket: Ticket,
    pending: bool,
}

impl<'a> Claim<'a> {
    #[inline]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Block until this ticket is being served.
    pub fn wait(mut self) -> Turn<'a> {
        self.pending = false;
        self.sequencer.wait_turn(self.ticket)
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.pending {
            log::debug!("[memory] ticket {} abandoned, retiring it", self.ticket.number());
            drop(self.sequencer.wait_turn(self.ticket));
        }
    }
}

/// Exclusive right to mutate registries. Retires its ticket on drop.
pub(crate) struct Turn<'a> {
    sequencer: &'a TicketSequencer,
    serving: Option<MutexGuard<'a, u64>>,
    ticket: Ticket,
}

impl Turn<'_> {
    #[inline]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if let Some(mut serving) = self.serving.take() {
            *serving += 1;
        }
        self.sequencer.turn_changed.notify_all();
    }
}
