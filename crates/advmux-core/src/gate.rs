//! Single-permit gate
//!
//! Serializes requests behind one permit. A request either runs immediately,
//! taking the permit, or waits in FIFO order until the holder releases it. The
//! scheduler uses one gate for its refresh pass and one per state machine
//! instance.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct Gate<T> {
    held: bool,
    waiting: VecDeque<T>,
}

impl<T> Default for Gate<T> {
    fn default() -> Self {
        Self {
            held: false,
            waiting: VecDeque::new(),
        }
    }
}

impl<T> Gate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Take the permit without a request; false if already held
    pub fn acquire(&mut self) -> bool {
        if self.held {
            return false;
        }
        self.held = true;
        true
    }

    pub fn release(&mut self) {
        self.held = false;
    }

    /// Queue a request behind the permit
    pub fn defer(&mut self, request: T) {
        self.waiting.push_back(request);
    }

    /// Take the permit for the oldest waiting request
    pub fn admit_next(&mut self) -> Option<T> {
        if self.held {
            return None;
        }
        let request = self.waiting.pop_front()?;
        self.held = true;
        Some(request)
    }

    pub fn pending(&self) -> usize {
        self.waiting.len()
    }
}
