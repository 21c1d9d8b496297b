//! Latest-value broadcast cells and the receiving end handed to callers.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Callback registered on a [`Broadcast`]. Returning `false` unregisters it.
pub type Observer<T> = Box<dyn FnMut(&T) -> bool + Send>;

/// Holds the last published value and pushes new ones to every observer.
///
/// A newly attached observer is immediately called with the last value, if
/// there is one, and then with every later publication.
pub struct Broadcast<T> {
    last: Option<T>,
    observers: Vec<Observer<T>>,
    closed: bool,
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Broadcast {
            last: None,
            observers: Vec::new(),
            closed: false,
        }
    }
}

impl<T> Broadcast<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last published value.
    pub fn latest(&self) -> Option<&T> {
        self.last.as_ref()
    }

    /// Register `observer`, replaying the last value to it first.
    ///
    /// Ignored once the cell is closed.
    pub fn subscribe(&mut self, mut observer: Observer<T>) {
        if self.closed {
            return;
        }
        if let Some(last) = &self.last {
            if !observer(last) {
                return;
            }
        }
        self.observers.push(observer);
    }

    /// Store `value` as the latest and push it to every observer.
    pub fn publish(&mut self, value: T) {
        self.observers.retain_mut(|observer| observer(&value));
        self.last = Some(value);
    }

    /// Forget the last value without notifying anyone.
    pub fn clear(&mut self) {
        self.last = None;
    }

    /// Drop every observer and refuse new ones.
    pub fn close(&mut self) {
        self.closed = true;
        self.observers.clear();
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

/// A live view returned by [`Store::select`](crate::Store::select) and
/// [`Store::observe`](crate::Store::observe).
///
/// Values queue up until read; a slow reader never holds up the store or
/// other selections. The selection ends (reads return `None`) once the store
/// is disposed. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Selection<T> {
    rx: Receiver<T>,
}

impl<T> Selection<T> {
    pub(crate) fn new(rx: Receiver<T>) -> Self {
        Selection { rx }
    }

    /// Block until the next value arrives. `None` once the store is disposed.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Wait at most `timeout` for the next value.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the next value if one is already queued.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take every value already queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Take every value already queued and keep only the newest.
    pub fn latest(&self) -> Option<T> {
        self.rx.try_iter().last()
    }
}

impl<T> Iterator for Selection<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}
