//! Exchanges: bounded producer/consumer buffers.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          EXCHANGE                                │
//! │                                                                  │
//! │  produce(item) ─► waiting consumer? ──yes──► hand item over      │
//! │        │                │ no                                     │
//! │        │          buffer room? ──yes──► buffer item              │
//! │        │                │ no                                     │
//! │        └──────────► park producer (cancellable)                  │
//! │                                                                  │
//! │  consume() ─► waiting producer? ──yes──► it pushes, then pop     │
//! │        │                │ no                                     │
//! │        │          buffered item? ──yes──► pop item               │
//! │        │                │ no                                     │
//! │        └──────────► park consumer (cancellable)                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - `items.len() <= capacity`
//! - waiting producers exist only while the buffer is full
//! - waiting consumers exist only while the buffer is empty
//! - at most one of the two waiting queues is non-empty
//!
//! Capacity zero makes every transfer a rendezvous.

use crate::cue::{once_with, Hint};
use crate::types::Signal;
use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::cue::Cue;

struct ExchangeCore<T: 'static> {
    capacity: usize,
    items: VecDeque<T>,
    consumers: VecDeque<Cue<T>>,
    producers: VecDeque<(T, Cue<()>)>,
}

impl<T> ExchangeCore<T> {
    fn check(&self) {
        debug_assert!(self.items.len() <= self.capacity, "exchange over capacity");
        debug_assert!(
            self.producers.is_empty() || self.items.len() == self.capacity,
            "overflowing exchange must be full"
        );
        debug_assert!(
            self.consumers.is_empty() || self.items.is_empty(),
            "underflowing exchange must be empty"
        );
    }
}

/// A bounded producer/consumer buffer with cancellable waits.
pub struct Exchange<T: 'static> {
    core: Rc<RefCell<ExchangeCore<T>>>,
}

impl<T> Clone for Exchange<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Exchange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        write!(
            f,
            "Exchange(capacity: {}, items: {}, producers: {}, consumers: {})",
            core.capacity,
            core.items.len(),
            core.producers.len(),
            core.consumers.len()
        )
    }
}

enum ProduceOutcome<T: 'static> {
    Handed(Cue<T>, T),
    Buffered,
    Parked,
}

enum ConsumeOutcome<T> {
    Relayed(Cue<()>, T),
    Popped(T),
    Parked,
}

impl<T> Exchange<T> {
    /// Creates an exchange with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            core: Rc::new(RefCell::new(ExchangeCore {
                capacity,
                items: VecDeque::new(),
                consumers: VecDeque::new(),
                producers: VecDeque::new(),
            })),
        }
    }

    /// Returns the capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.borrow().capacity
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.borrow().items.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.borrow().items.is_empty()
    }

    /// Returns true if producers are parked waiting for room.
    #[must_use]
    pub fn is_overflowing(&self) -> bool {
        !self.core.borrow().producers.is_empty()
    }

    /// Returns true if consumers are parked waiting for items.
    #[must_use]
    pub fn is_underflowing(&self) -> bool {
        !self.core.borrow().consumers.is_empty()
    }

    /// Produces an item.
    ///
    /// The returned hint reveals (with no value) once the item has been
    /// handed to a consumer or buffered. Cancelling the commitment removes
    /// the parked producer.
    pub fn produce(&self, item: T) -> Hint<()> {
        let join = Rc::clone(&self.core);
        let leave = Rc::clone(&self.core);
        once_with(
            move |cue: &Cue<()>| {
                let outcome = {
                    let mut core = join.borrow_mut();
                    if let Some(consumer) = core.consumers.pop_front() {
                        ProduceOutcome::Handed(consumer, item)
                    } else if core.items.len() < core.capacity {
                        core.items.push_back(item);
                        core.check();
                        ProduceOutcome::Buffered
                    } else {
                        core.producers.push_back((item, cue.clone()));
                        core.check();
                        ProduceOutcome::Parked
                    }
                };
                match outcome {
                    ProduceOutcome::Handed(consumer, item) => {
                        consumer.reveal(Signal::Prompt(item));
                        cue.reveal(Signal::Prompt(()));
                    }
                    ProduceOutcome::Buffered => cue.reveal(Signal::Prompt(())),
                    ProduceOutcome::Parked => {}
                }
            },
            move |revealing, cue| {
                if !revealing {
                    let mut core = leave.borrow_mut();
                    core.producers.retain(|(_, parked)| !parked.ptr_eq(cue));
                }
            },
        )
    }

    /// Consumes an item.
    ///
    /// The returned hint reveals with the oldest available item. If a
    /// producer is parked, it is woken first (its item enters the buffer)
    /// and the oldest buffered item is taken. Cancelling the commitment
    /// removes the parked consumer.
    pub fn consume(&self) -> Hint<T> {
        let join = Rc::clone(&self.core);
        let leave = Rc::clone(&self.core);
        once_with(
            move |cue: &Cue<T>| {
                let outcome = {
                    let mut core = join.borrow_mut();
                    if let Some((item, producer)) = core.producers.pop_front() {
                        core.items.push_back(item);
                        let oldest = core.items.pop_front().expect("buffer cannot be empty");
                        core.check();
                        ConsumeOutcome::Relayed(producer, oldest)
                    } else if let Some(item) = core.items.pop_front() {
                        core.check();
                        ConsumeOutcome::Popped(item)
                    } else {
                        core.consumers.push_back(cue.clone());
                        core.check();
                        ConsumeOutcome::Parked
                    }
                };
                match outcome {
                    ConsumeOutcome::Relayed(producer, item) => {
                        producer.reveal(Signal::Prompt(()));
                        cue.reveal(Signal::Prompt(item));
                    }
                    ConsumeOutcome::Popped(item) => cue.reveal(Signal::Prompt(item)),
                    ConsumeOutcome::Parked => {}
                }
            },
            move |revealing, cue| {
                if !revealing {
                    let mut core = leave.borrow_mut();
                    core.consumers.retain(|parked| !parked.ptr_eq(cue));
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::commit;
    use std::cell::Cell;

    fn noted<T: 'static>(slot: &Rc<RefCell<Option<Signal<T>>>>) -> impl FnOnce(Signal<T>) {
        let slot = Rc::clone(slot);
        move |signal| *slot.borrow_mut() = Some(signal)
    }

    #[test]
    fn buffered_produce_reveals_synchronously() {
        let exchange: Exchange<i32> = Exchange::new(2);
        let ack = Rc::new(RefCell::new(None));
        let rollback = commit(exchange.produce(5), noted(&ack));
        assert!(rollback.is_none());
        assert!(matches!(*ack.borrow(), Some(Signal::Prompt(()))));
        assert_eq!(exchange.len(), 1);
    }

    #[test]
    fn consume_pops_fifo() {
        let exchange: Exchange<i32> = Exchange::new(2);
        commit(exchange.produce(1), |_| {});
        commit(exchange.produce(2), |_| {});

        let got = Rc::new(RefCell::new(None));
        commit(exchange.consume(), noted(&got));
        assert!(matches!(*got.borrow(), Some(Signal::Prompt(1))));
        assert_eq!(exchange.len(), 1);
    }

    #[test]
    fn rendezvous_pairs_producer_and_consumer() {
        let exchange: Exchange<i32> = Exchange::new(0);
        let ack = Rc::new(RefCell::new(None));
        let rollback = commit(exchange.produce(7), noted(&ack));
        assert!(rollback.is_some());
        assert!(exchange.is_overflowing());

        let got = Rc::new(RefCell::new(None));
        let consumer_rollback = commit(exchange.consume(), noted(&got));
        assert!(consumer_rollback.is_none());
        assert!(matches!(*got.borrow(), Some(Signal::Prompt(7))));
        assert!(matches!(*ack.borrow(), Some(Signal::Prompt(()))));
        assert!(!exchange.is_overflowing());
        assert!(!exchange.is_underflowing());
        assert!(exchange.is_empty());
    }

    #[test]
    fn parked_consumer_woken_by_produce() {
        let exchange: Exchange<i32> = Exchange::new(1);
        let got = Rc::new(RefCell::new(None));
        let rollback = commit(exchange.consume(), noted(&got));
        assert!(rollback.is_some());
        assert!(exchange.is_underflowing());

        let rollback = commit(exchange.produce(3), |_| {});
        assert!(rollback.is_none());
        assert!(matches!(*got.borrow(), Some(Signal::Prompt(3))));
        assert!(exchange.is_empty());
    }

    #[test]
    fn cancelled_producer_leaves_queue() {
        let exchange: Exchange<i32> = Exchange::new(0);
        let rollback = commit(exchange.produce(9), |_| {}).expect("should park");
        assert!(exchange.is_overflowing());
        rollback.cancel();
        assert!(!exchange.is_overflowing());

        // A later consumer parks instead of seeing the cancelled item.
        let rollback = commit(exchange.consume(), |_| {});
        assert!(rollback.is_some());
        assert!(exchange.is_underflowing());
    }

    #[test]
    fn cancelled_consumer_leaves_queue() {
        let exchange: Exchange<i32> = Exchange::new(1);
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let rollback = commit(exchange.consume(), move |_| flag.set(true)).expect("should park");
        rollback.cancel();
        assert!(!exchange.is_underflowing());

        commit(exchange.produce(1), |_| {});
        assert!(!fired.get());
        assert_eq!(exchange.len(), 1);
    }

    #[test]
    fn woken_producer_preserves_fifo_over_buffer() {
        let exchange: Exchange<i32> = Exchange::new(1);
        commit(exchange.produce(1), |_| {});
        let parked = commit(exchange.produce(2), |_| {});
        assert!(parked.is_some());

        let got = Rc::new(RefCell::new(None));
        commit(exchange.consume(), noted(&got));
        // The parked producer pushed 2 into the buffer, but the oldest
        // buffered item is handed out first.
        assert!(matches!(*got.borrow(), Some(Signal::Prompt(1))));
        assert_eq!(exchange.len(), 1);
        assert!(!exchange.is_overflowing());
    }
}
