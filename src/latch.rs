//! The load barrier.

use std::collections::VecDeque;

/// A gate that holds work back while a load is in progress.
///
/// While closed, [`defer`](Latch::defer) queues items; [`open`](Latch::open)
/// hands them back exactly once, in arrival order.
#[derive(Debug)]
pub struct Latch<T> {
    pending: bool,
    held: VecDeque<T>,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Latch {
            pending: false,
            held: VecDeque::new(),
        }
    }
}

impl<T> Latch<T> {
    /// A latch that starts open.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        !self.pending
    }

    /// Start holding work back. Items already held stay queued.
    pub fn close(&mut self) {
        self.pending = true;
    }

    /// Queue `item` until the latch opens.
    pub fn defer(&mut self, item: T) {
        self.held.push_back(item);
    }

    /// Open the latch and release everything held, oldest first.
    pub fn open(&mut self) -> VecDeque<T> {
        self.pending = false;
        std::mem::take(&mut self.held)
    }

    /// Number of items waiting.
    pub fn held(&self) -> usize {
        self.held.len()
    }
}
