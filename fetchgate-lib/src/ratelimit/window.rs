use std::collections::VecDeque;

/// An ordered window of recent events (oldest first).
///
/// Elements are expired from the front with [`Window::purge_while`], which is
/// how the rate limiter forgets start times that slid out of its time window.
#[derive(Debug, Clone)]
pub struct Window<T> {
    data: VecDeque<T>,
}

impl<T> Window<T> {
    /// Create a new window with room for `capacity` elements
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
        }
    }

    /// Append the newest element
    pub fn push(&mut self, item: T) {
        self.data.push_back(item);
    }

    /// Drop elements from the front for as long as `expired` holds.
    /// Returns the number of dropped elements.
    pub fn purge_while(&mut self, mut expired: impl FnMut(&T) -> bool) -> usize {
        let mut purged = 0;
        while self.data.front().is_some_and(&mut expired) {
            self.data.pop_front();
            purged += 1;
        }
        purged
    }

    /// The oldest element, if any
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.data.front()
    }

    /// Get the number of elements currently in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
