//! Batched publish/subscribe.
//!
//! Items accumulate until one of:
//! - the timeout armed by the first item of a batch elapses (checked on
//!   [`BatchedPubSub::poll`] and on every publish),
//! - the flush-including predicate returns true for the newest item,
//! - the flush-excluding predicate returns true for the newest item; the pending
//!   batch is delivered without it and a new batch starts with it.
//!
//! At most one timer is armed at a time.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::pubsub::{PubSub, SubscriptionId};
use log::debug;
use std::fmt;

type Predicate<T> = Box<dyn FnMut(&T) -> bool>;

pub struct BatchedPubSub<T> {
    timeout_ms: Option<u64>,
    clock: Box<dyn Clock>,
    deadline: Option<u64>,
    batch: Vec<T>,
    flush_including: Option<Predicate<T>>,
    flush_excluding: Option<Predicate<T>>,
    subscribers: PubSub<Vec<T>>,
}

impl<T> BatchedPubSub<T> {
    /// Timed batching on the system clock. `timeout_ms` must be positive.
    pub fn new(timeout_ms: i64) -> Result<Self> {
        if timeout_ms <= 0 {
            return Err(Error::Configuration(format!(
                "batch timeout must be positive, got {}ms",
                timeout_ms
            )));
        }
        let mut batched = Self::untimed();
        batched.timeout_ms = Some(timeout_ms as u64);
        Ok(batched)
    }

    /// Batching driven only by predicates and explicit [`flush`](Self::flush).
    pub fn untimed() -> Self {
        Self {
            timeout_ms: None,
            clock: Box::new(SystemClock),
            deadline: None,
            batch: Vec::new(),
            flush_including: None,
            flush_excluding: None,
            subscribers: PubSub::new(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_flush_including(mut self, predicate: impl FnMut(&T) -> bool + 'static) -> Self {
        self.flush_including = Some(Box::new(predicate));
        self
    }

    pub fn with_flush_excluding(mut self, predicate: impl FnMut(&T) -> bool + 'static) -> Self {
        self.flush_excluding = Some(Box::new(predicate));
        self
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub fn subscribe(&mut self, mut callback: impl FnMut(&[T]) + 'static) -> SubscriptionId {
        self.subscribers.subscribe(move |batch: &Vec<T>| callback(batch))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn pending(&self) -> &[T] {
        &self.batch
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn publish(&mut self, item: T) {
        self.poll();
        let exclude = self.flush_excluding.as_mut().map(|p| p(&item)).unwrap_or(false);
        if exclude {
            self.flush();
        }
        let include = self.flush_including.as_mut().map(|p| p(&item)).unwrap_or(false);
        self.batch.push(item);
        if include {
            self.flush();
            return;
        }
        if let (Some(timeout), None) = (self.timeout_ms, self.deadline) {
            self.deadline = Some(self.clock.now_ms() + timeout);
        }
    }

    /// Delivers the pending batch if its timer has expired. Returns whether it did.
    pub fn poll(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if self.clock.now_ms() >= deadline => {
                debug!("batch timeout expired pending={}", self.batch.len());
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Delivers the pending batch now, if any, and disarms the timer.
    pub fn flush(&mut self) {
        self.deadline = None;
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        self.subscribers.publish(&batch);
    }
}

impl<T: fmt::Debug> fmt::Debug for BatchedPubSub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedPubSub")
            .field("timeout_ms", &self.timeout_ms)
            .field("deadline", &self.deadline)
            .field("batch", &self.batch)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collect<T: Clone + 'static>(batched: &mut BatchedPubSub<T>) -> Rc<RefCell<Vec<Vec<T>>>> {
        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&out);
        batched.subscribe(move |b: &[T]| sink.borrow_mut().push(b.to_vec()));
        out
    }

    #[test]
    fn non_positive_timeout_is_a_configuration_error() {
        assert!(BatchedPubSub::<u32>::new(0).unwrap_err().is_configuration());
        assert!(BatchedPubSub::<u32>::new(-5).unwrap_err().is_configuration());
    }

    #[test]
    fn timeout_flushes_on_poll() {
        let clock = ManualClock::new(0);
        let mut batched = BatchedPubSub::new(10).unwrap().with_clock(clock.clone());
        let out = collect(&mut batched);
        batched.publish(1u32);
        clock.advance(5);
        batched.publish(2);
        assert!(!batched.poll());
        clock.advance(5);
        assert!(batched.poll());
        assert_eq!(*out.borrow(), vec![vec![1, 2]]);
        assert!(!batched.is_armed());
    }

    #[test]
    fn expired_timer_flushes_before_next_item() {
        let clock = ManualClock::new(0);
        let mut batched = BatchedPubSub::new(10).unwrap().with_clock(clock.clone());
        let out = collect(&mut batched);
        batched.publish(1u32);
        clock.advance(20);
        batched.publish(2);
        assert_eq!(*out.borrow(), vec![vec![1]]);
        assert_eq!(batched.pending(), &[2]);
    }

    #[test]
    fn flush_including_delivers_newest_item() {
        let mut batched = BatchedPubSub::untimed().with_flush_including(|x: &u32| *x == 0);
        let out = collect(&mut batched);
        batched.publish(3);
        batched.publish(0);
        batched.publish(4);
        assert_eq!(*out.borrow(), vec![vec![3, 0]]);
        assert_eq!(batched.pending(), &[4]);
    }

    #[test]
    fn flush_excluding_starts_new_batch() {
        let mut batched = BatchedPubSub::untimed().with_flush_excluding(|x: &u32| *x == 0);
        let out = collect(&mut batched);
        batched.publish(0);
        batched.publish(3);
        batched.publish(0);
        batched.flush();
        assert_eq!(*out.borrow(), vec![vec![0, 3], vec![0]]);
    }

    #[test]
    fn untimed_never_arms() {
        let mut batched = BatchedPubSub::untimed();
        let out = collect(&mut batched);
        batched.publish(1u8);
        assert!(!batched.is_armed());
        assert!(!batched.poll());
        assert!(out.borrow().is_empty());
    }
}
