//! Owns the live activations and steps them on every tick.
//!
//! Insertion order is voice age. When a concurrency bound is set the oldest
//! entries are stolen first: cancelled immediately and completed.

use std::collections::VecDeque;
use std::mem;

use tracing::{debug, trace};

use crate::sequencer::activation::ActivationHandle;

pub type OnComplete = Box<dyn FnOnce() + Send>;

struct Entry {
    activation: ActivationHandle,
    on_complete: Option<OnComplete>,
}

impl Entry {
    fn complete(mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }

    fn evict(self) {
        self.activation.cancel_immediate();
        self.complete();
    }
}

#[derive(Default)]
pub struct ActivationPlayer {
    entries: VecDeque<Entry>,
    max_activations: Option<usize>,
}

impl ActivationPlayer {
    pub fn new(max_activations: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            max_activations,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_activations(&self) -> Option<usize> {
        self.max_activations
    }

    pub fn contains(&self, activation: &ActivationHandle) -> bool {
        self.entries.iter().any(|e| e.activation.ptr_eq(activation))
    }

    /// Adds a live activation. Older entries over the bound are stolen
    /// before the new one joins.
    pub fn add_activation(
        &mut self,
        activation: ActivationHandle,
        on_complete: Option<OnComplete>,
    ) {
        let entry = Entry {
            activation,
            on_complete,
        };
        match self.max_activations {
            Some(0) => {
                debug!("no voices available, dropping activation");
                entry.evict();
            }
            Some(max) => {
                self.truncate(max - 1);
                self.entries.push_back(entry);
            }
            None => self.entries.push_back(entry),
        }
    }

    /// `None` removes the bound. Lowering it steals immediately.
    pub fn set_max_activations(&mut self, max_activations: Option<usize>) {
        self.max_activations = max_activations;
        if let Some(max) = max_activations {
            self.truncate(max);
        }
    }

    pub fn clear_all(&mut self) {
        debug!("clearing {} activations", self.entries.len());
        for entry in mem::take(&mut self.entries) {
            entry.evict();
        }
    }

    /// Steps every entry in age order. Completed entries leave the live set
    /// before their callbacks run.
    pub fn step(&mut self) {
        let mut completed = Vec::new();
        for entry in mem::take(&mut self.entries) {
            if entry.activation.step() {
                completed.push(entry);
            } else {
                self.entries.push_back(entry);
            }
        }
        if !completed.is_empty() {
            trace!("{} activations completed", completed.len());
        }
        for entry in completed {
            entry.complete();
        }
    }

    fn truncate(&mut self, max: usize) {
        while self.entries.len() > max {
            if let Some(oldest) = self.entries.pop_front() {
                trace!("stealing oldest activation");
                oldest.evict();
            }
        }
    }
}
