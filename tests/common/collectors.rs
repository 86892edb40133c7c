//! Sinks that remember what they saw

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe list of every item a sink received, in arrival order.
#[derive(Clone)]
pub struct Collected<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Collected<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A per-item consumer for `sink_to_consumer`.
    pub fn consumer(&self) -> impl Fn(T) -> anyhow::Result<()> + Send + Sync + 'static {
        let items = Arc::clone(&self.items);
        move |item| {
            items.lock().push(item);
            Ok(())
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T: Clone + Send + Ord + 'static> Collected<T> {
    pub fn sorted(&self) -> Vec<T> {
        let mut items = self.items();
        items.sort();
        items
    }
}

impl<T: Clone + Send + Eq + std::hash::Hash + 'static> Collected<T> {
    /// How many times each item was seen.
    pub fn counts(&self) -> HashMap<T, usize> {
        let mut counts = HashMap::new();
        for item in self.items() {
            *counts.entry(item).or_insert(0) += 1;
        }
        counts
    }
}
