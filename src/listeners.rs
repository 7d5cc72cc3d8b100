//! Listener registry with explicit subscription tokens

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token returned by [`ListenerRegistry::subscribe`]; pass it back to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Set of callbacks notified with a shared event value
///
/// Listeners are identified by their subscription token, never by the
/// closure itself.
pub struct ListenerRegistry<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(Subscription, Listener<T>)>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((token, Arc::new(listener)));
        token
    }

    /// Remove one listener; returns false if the token was not registered
    pub fn unsubscribe(&self, token: Subscription) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    /// Call every listener with `event`
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe.
    pub fn notify(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Subscription, Listener<T>)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
