//! Per-class caps on concurrently running encoder processes.
//!
//! The number of requests in flight is bounded by the host's thread pool;
//! the number of external encoders is bounded here. Acquiring a slot blocks
//! the calling thread until one frees up.

use std::collections::HashMap;
use std::sync::Arc;

use derivforge_common::DerivativeClass;
use parking_lot::{Condvar, Mutex};

use crate::config::Config;

/// Bounded counting semaphore for OS threads.
#[derive(Debug)]
pub struct Semaphore {
    capacity: usize,
    in_use: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Block until a slot is free and take it.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut in_use = self.in_use.lock();
        while *in_use >= self.capacity {
            self.released.wait(&mut in_use);
        }
        *in_use += 1;
        Permit {
            semaphore: Arc::clone(self),
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut in_use = self.in_use.lock();
        if *in_use >= self.capacity {
            return None;
        }
        *in_use += 1;
        Some(Permit {
            semaphore: Arc::clone(self),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(*self.in_use.lock())
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.released.notify_one();
    }
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// One semaphore per derivative class.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    slots: HashMap<DerivativeClass, Arc<Semaphore>>,
}

impl ConcurrencyGovernor {
    /// Build from explicit per-class limits; unlisted classes get one slot.
    pub fn new(limits: impl IntoIterator<Item = (DerivativeClass, usize)>) -> Self {
        let mut slots: HashMap<DerivativeClass, Arc<Semaphore>> = limits
            .into_iter()
            .map(|(class, limit)| (class, Arc::new(Semaphore::new(limit))))
            .collect();
        for class in DerivativeClass::ALL {
            slots
                .entry(class)
                .or_insert_with(|| Arc::new(Semaphore::new(1)));
        }
        Self { slots }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new([
            (DerivativeClass::Thumbnail, config.thumbnails.max_concurrency),
            (DerivativeClass::FastProxy, config.fast_proxy.max_concurrency),
            (DerivativeClass::HdProxy, config.hd_proxy.max_concurrency),
            (DerivativeClass::Hls, config.hls.max_concurrency),
        ])
    }

    /// Block until an encoder slot for `class` is free.
    pub fn acquire(&self, class: DerivativeClass) -> Permit {
        let semaphore = self.semaphore(class);
        if let Some(permit) = semaphore.try_acquire() {
            return permit;
        }
        tracing::debug!(%class, "waiting for encoder slot");
        semaphore.acquire()
    }

    pub fn available(&self, class: DerivativeClass) -> usize {
        self.semaphore(class).available()
    }

    fn semaphore(&self, class: DerivativeClass) -> &Arc<Semaphore> {
        // Every class is inserted at construction.
        &self.slots[&class]
    }
}
