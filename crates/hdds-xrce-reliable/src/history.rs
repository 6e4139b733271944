// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-slot history buffer shared by the input and output reliable streams.
//!
//! The caller hands over a backing store which is split into `history`
//! equally sized slots. A sequence number maps to slot `seq mod history`;
//! `history` is a power of two so the mapping stays consistent across the
//! 16-bit wrap. Each slot records how many of its bytes are in use.

use crate::error::{Result, XrceError};
use crate::seq_num::SeqNum;

/// Ring of fixed-capacity byte slots indexed by sequence number.
#[derive(Debug)]
pub struct ReliableHistory<B> {
    buffer: B,
    history: u16,
    capacity: usize,
    sizes: Vec<usize>,
}

impl<B> ReliableHistory<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Split `buffer` into `history` slots.
    ///
    /// Fails when `history` is zero or not a power of two, or when the
    /// backing store is too small to give every slot at least one byte.
    pub fn new(buffer: B, history: u16) -> Result<Self> {
        if history == 0 || !history.is_power_of_two() {
            return Err(XrceError::ConfigError(format!(
                "history must be a power of two, got {}",
                history
            )));
        }
        let capacity = buffer.as_ref().len() / usize::from(history);
        if capacity == 0 {
            return Err(XrceError::ConfigError(format!(
                "backing store of {} bytes cannot hold {} slots",
                buffer.as_ref().len(),
                history
            )));
        }
        Ok(Self {
            buffer,
            history,
            capacity,
            sizes: vec![0; usize::from(history)],
        })
    }

    /// Number of slots.
    #[inline]
    pub fn history(&self) -> u16 {
        self.history
    }

    /// Per-slot byte capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical slot index for `seq`.
    #[inline]
    pub fn slot_for(&self, seq: SeqNum) -> usize {
        usize::from(seq.get() % self.history)
    }

    /// Used length of the slot holding `seq`.
    #[inline]
    pub fn size_of(&self, seq: SeqNum) -> usize {
        self.sizes[self.slot_for(seq)]
    }

    /// Set the used length of the slot holding `seq`, clamped to capacity.
    #[inline]
    pub fn set_size(&mut self, seq: SeqNum, size: usize) {
        let slot = self.slot_for(seq);
        self.sizes[slot] = size.min(self.capacity);
    }

    /// Reset every slot to `size`.
    pub fn fill_sizes(&mut self, size: usize) {
        let size = size.min(self.capacity);
        self.sizes.iter_mut().for_each(|s| *s = size);
    }

    /// Number of slots whose used length equals `size`.
    pub fn count_with_size(&self, size: usize) -> usize {
        self.sizes.iter().filter(|&&s| s == size).count()
    }

    /// Full slot (all `capacity` bytes) holding `seq`.
    pub fn slot(&self, seq: SeqNum) -> &[u8] {
        let start = self.slot_for(seq) * self.capacity;
        &self.buffer.as_ref()[start..start + self.capacity]
    }

    /// Mutable full slot holding `seq`.
    pub fn slot_mut(&mut self, seq: SeqNum) -> &mut [u8] {
        let start = self.slot_for(seq) * self.capacity;
        &mut self.buffer.as_mut()[start..start + self.capacity]
    }

    /// Used bytes of the slot holding `seq`.
    pub fn used(&self, seq: SeqNum) -> &[u8] {
        let size = self.size_of(seq);
        &self.slot(seq)[..size]
    }

    /// Mutable used bytes of the slot holding `seq`.
    pub fn used_mut(&mut self, seq: SeqNum) -> &mut [u8] {
        let size = self.size_of(seq);
        &mut self.slot_mut(seq)[..size]
    }

    /// Give the backing store back to the caller.
    pub fn into_inner(self) -> B {
        self.buffer
    }
}
