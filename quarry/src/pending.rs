use std::collections::VecDeque;

use crate::job::JobPriority;

/// Anything that can sit in a [`PendingQueue`].
pub trait Prioritized {
    fn priority(&self) -> JobPriority;
}

/// Pending jobs ordered by priority (descending), FIFO among equals.
///
/// Retries bypass the ordering and go straight to the front. Once closed the
/// queue refuses new entries; callers get the rejected item back so its
/// completion can still be signalled.
#[derive(Debug)]
pub struct PendingQueue<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            closed: false,
        }
    }
}

impl<T: Prioritized> PendingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert ahead of the first entry with a strictly lower priority.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.closed {
            return Err(item);
        }
        let priority = item.priority();
        match self.items.iter().position(|queued| queued.priority() < priority) {
            Some(index) => self.items.insert(index, item),
            None => self.items.push_back(item),
        }
        Ok(())
    }

    pub fn push_front(&mut self, item: T) -> Result<(), T> {
        if self.closed {
            return Err(item);
        }
        self.items.push_front(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse further entries and hand back everything still waiting.
    pub fn close(&mut self) -> Vec<T> {
        self.closed = true;
        self.items.drain(..).collect()
    }
}
