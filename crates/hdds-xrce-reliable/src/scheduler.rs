// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task schedulers gating concurrent access to a shared resource.
//!
//! Producers never block: a full queue drops its oldest entry. Consumers
//! block in [`Scheduler::pop`] until an entry arrives or the scheduler is
//! stopped with [`Scheduler::deinit`], which wakes every waiting consumer.
//!
//! # Example
//! ```
//! use hdds_xrce_reliable::{FcfsScheduler, Scheduler};
//!
//! let scheduler = FcfsScheduler::new(2);
//! scheduler.init();
//! scheduler.push("a", 0);
//! scheduler.push("b", 0);
//! scheduler.push("c", 0); // evicts "a"
//! assert_eq!(scheduler.pop(), Some("b"));
//! ```

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, XrceError};

/// Scheduling policy interface shared by worker threads.
pub trait Scheduler<T>: Send + Sync {
    /// Start accepting consumers.
    fn init(&self);

    /// Stop: every current and future `pop` returns `None`. Pending entries
    /// are kept, not drained.
    fn deinit(&self);

    /// Enqueue `item`. Policies may use `priority`; FCFS ignores it.
    fn push(&self, item: T, priority: u8);

    /// Block until an entry is available or the scheduler stops.
    /// `None` means stopped.
    fn pop(&self) -> Option<T>;

    /// [`pop`](Self::pop) mapped to [`XrceError::SchedulerStopped`].
    fn pop_or_stopped(&self) -> Result<T> {
        self.pop().ok_or(XrceError::SchedulerStopped)
    }
}

#[derive(Debug)]
struct FcfsState<T> {
    queue: VecDeque<T>,
    running: bool,
}

/// First-come-first-served bounded queue.
#[derive(Debug)]
pub struct FcfsScheduler<T> {
    state: Mutex<FcfsState<T>>,
    cond: Condvar,
    max_size: usize,
}

impl<T> FcfsScheduler<T> {
    /// Create a stopped scheduler holding at most `max_size` entries
    /// (a zero capacity is raised to one).
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            state: Mutex::new(FcfsState {
                queue: VecDeque::with_capacity(max_size),
                running: false,
            }),
            cond: Condvar::new(),
            max_size,
        }
    }

    /// Re-inject `item` at the head, ahead of everything queued. Used to
    /// hand back a partially processed item.
    pub fn push_front(&self, item: T) {
        let mut state = self.state.lock();
        if state.queue.len() >= self.max_size {
            // Drop from the tail so the urgent entry survives.
            state.queue.pop_back();
            log::debug!("[FcfsScheduler] queue full, dropped newest entry");
        }
        state.queue.push_front(item);
        self.cond.notify_one();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

impl<T: Send> Scheduler<T> for FcfsScheduler<T> {
    fn init(&self) {
        self.state.lock().running = true;
    }

    fn deinit(&self) {
        self.state.lock().running = false;
        self.cond.notify_all();
    }

    fn push(&self, item: T, _priority: u8) {
        let mut state = self.state.lock();
        if state.queue.len() >= self.max_size {
            state.queue.pop_front();
            log::debug!("[FcfsScheduler] queue full, evicted oldest entry");
        }
        state.queue.push_back(item);
        self.cond.notify_one();
    }

    fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.running && state.queue.is_empty() {
            self.cond.wait(&mut state);
        }
        if !state.running {
            return None;
        }
        let item = state.queue.pop_front();
        if !state.queue.is_empty() {
            // More work left: pass the baton.
            self.cond.notify_one();
        }
        item
    }
}
