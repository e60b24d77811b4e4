//! Typed callback registries.
//!
//! Listeners are stored with an id; subscribing returns a [`Subscription`]
//! that removes exactly that callback again.

use std::collections::HashMap;
use std::hash::Hash;

type Callback<E> = Box<dyn FnMut(&E) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub struct Listeners<E: ?Sized> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<E>)>,
}

impl<E: ?Sized> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&E) + Send + 'static) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        Subscription(id)
    }

    /// Returns false if the subscription was already removed.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(id, _)| *id != subscription.0);
        self.callbacks.len() != before
    }

    /// Calls every listener in subscription order.
    pub fn emit(&mut self, event: &E) {
        for (_, callback) in self.callbacks.iter_mut() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<E: ?Sized> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Listeners bucketed by key, e.g. by pitch or by pitch class.
pub struct KeyedListeners<K, E: ?Sized> {
    next_id: u64,
    buckets: HashMap<K, Vec<(u64, Callback<E>)>>,
}

impl<K: Eq + Hash, E: ?Sized> KeyedListeners<K, E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            buckets: HashMap::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        key: K,
        callback: impl FnMut(&E) + Send + 'static,
    ) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.buckets
            .entry(key)
            .or_default()
            .push((id, Box::new(callback)));
        Subscription(id)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let mut removed = false;
        self.buckets.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(id, _)| *id != subscription.0);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        removed
    }

    /// Calls the listeners registered for `key` only.
    pub fn emit(&mut self, key: &K, event: &E) {
        if let Some(callbacks) = self.buckets.get_mut(key) {
            for (_, callback) in callbacks.iter_mut() {
                callback(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl<K: Eq + Hash, E: ?Sized> Default for KeyedListeners<K, E> {
    fn default() -> Self {
        Self::new()
    }
}
