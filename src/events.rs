//! Bounded event history and observer lists
//!
//! Failover events, provider switches, and budget alerts are kept in
//! fixed-capacity rings (oldest dropped on overflow) and fanned out to an
//! explicit observer list rather than a single overwritable callback.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Fixed-capacity event ring. Oldest entries are dropped on overflow.
pub struct EventHistory<T> {
    events: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> EventHistory<T> {
    /// Create a history retaining at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn push(&self, event: T) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of retained events, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().cloned().collect()
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all retained events
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// List of subscribers notified synchronously on each event
pub struct ObserverList<E> {
    observers: Mutex<Vec<Box<dyn Fn(&E) + Send + Sync>>>,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer. Observers must not call back into `subscribe`
    /// or `notify` from within the callback.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Invoke every registered observer with the event
    pub fn notify(&self, event: &E) {
        let observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer(event);
        }
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}
