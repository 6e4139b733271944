// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable input stream: the receive-side mirror of the output stream.
//!
//! Messages arriving in order are delivered straight through; messages that
//! arrive early but inside the window are parked in their history slot until
//! the gap before them closes. The stream answers writer HEARTBEATs with an
//! ACKNACK computed from which announced slots are still empty.

use crate::error::Result;
use crate::history::ReliableHistory;
use crate::seq_num::SeqNum;
use crate::wire::AcknackPayload;

/// ACKNACK bitmaps cover at most this many sequence numbers.
pub const MAX_NACK_BITS: u16 = 16;

/// What [`InputReliableStream::receive`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Next in order: hand the bytes to the application now.
    Deliver,
    /// Ahead of a gap: stored until [`InputReliableStream::next_message`]
    /// can release it.
    Stored,
    /// Already handled or already stored.
    Duplicate,
    /// Beyond the window, or too large to park in a slot.
    OutOfWindow,
}

/// Receiver side of a reliable stream.
#[derive(Debug)]
pub struct InputReliableStream<B> {
    base: ReliableHistory<B>,
    last_handled: SeqNum,
    last_announced: SeqNum,
}

impl<B> InputReliableStream<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    pub fn new(buffer: B, history: u16) -> Result<Self> {
        let mut stream = Self {
            base: ReliableHistory::new(buffer, history)?,
            last_handled: SeqNum::MAX,
            last_announced: SeqNum::MAX,
        };
        stream.reset();
        Ok(stream)
    }

    pub fn reset(&mut self) {
        self.base.fill_sizes(0);
        self.last_handled = SeqNum::MAX;
        self.last_announced = SeqNum::MAX;
    }

    /// Highest sequence number delivered in order.
    pub fn last_handled(&self) -> SeqNum {
        self.last_handled
    }

    /// Highest sequence number known to exist on the writer side.
    pub fn last_announced(&self) -> SeqNum {
        self.last_announced
    }

    pub fn history(&self) -> u16 {
        self.base.history()
    }

    pub fn into_inner(self) -> B {
        self.base.into_inner()
    }

    /// Accept message `seq` carrying `data` (message body, header stripped).
    pub fn receive(&mut self, seq: SeqNum, data: &[u8]) -> ReceiveOutcome {
        let next = self.last_handled.add(1);
        if seq == next {
            self.base.set_size(seq, 0);
            self.last_handled = seq;
            if self.last_announced.lt(seq) {
                self.last_announced = seq;
            }
            return ReceiveOutcome::Deliver;
        }
        if seq.le(self.last_handled) {
            return ReceiveOutcome::Duplicate;
        }
        if !seq.le(self.last_handled.add(self.base.history())) {
            log::warn!(
                "[InputReliableStream] seq={} outside window (handled={})",
                seq,
                self.last_handled
            );
            return ReceiveOutcome::OutOfWindow;
        }
        if self.base.size_of(seq) != 0 {
            return ReceiveOutcome::Duplicate;
        }
        if data.is_empty() || data.len() > self.base.capacity() {
            log::warn!(
                "[InputReliableStream] cannot park seq={} ({} bytes, slot capacity {})",
                seq,
                data.len(),
                self.base.capacity()
            );
            return ReceiveOutcome::OutOfWindow;
        }
        self.base.slot_mut(seq)[..data.len()].copy_from_slice(data);
        self.base.set_size(seq, data.len());
        if self.last_announced.lt(seq) {
            self.last_announced = seq;
        }
        log::trace!("[InputReliableStream] stored seq={} ahead of gap", seq);
        ReceiveOutcome::Stored
    }

    /// Release the next parked message once it is in order.
    pub fn next_message(&mut self) -> Option<(SeqNum, Vec<u8>)> {
        let next = self.last_handled.add(1);
        if self.base.size_of(next) == 0 {
            return None;
        }
        let data = self.base.used(next).to_vec();
        self.base.set_size(next, 0);
        self.last_handled = next;
        Some((next, data))
    }

    /// Apply a writer HEARTBEAT announcing `first_unacked..=last_unacked`.
    ///
    /// Sequence numbers before `first_unacked` are no longer held by the
    /// writer and are skipped.
    pub fn process_heartbeat(&mut self, first_unacked: SeqNum, last_unacked: SeqNum) {
        let next = self.last_handled.add(1);
        if next.lt(first_unacked) {
            let skipped = first_unacked.distance_from(next);
            log::debug!(
                "[InputReliableStream] writer dropped {} message(s) before seq={}",
                skipped,
                first_unacked
            );
            for i in 0..skipped.min(self.base.history()) {
                self.base.set_size(next.add(i), 0);
            }
            self.last_handled = first_unacked.sub(1);
        }
        if self.last_announced.lt(last_unacked) {
            self.last_announced = last_unacked;
        }
    }

    /// First missing sequence number plus the bitmap of announced-but-missing
    /// messages after it.
    pub fn acknack(&self) -> (SeqNum, u16) {
        let first_unacked = self.last_handled.add(1);
        let to_check = self
            .last_announced
            .distance_from(self.last_handled)
            .min(self.base.history())
            .min(MAX_NACK_BITS);
        let mut bitmap = 0u16;
        for i in 0..to_check {
            if self.base.size_of(first_unacked.add(i)) == 0 {
                bitmap |= 1 << i;
            }
        }
        (first_unacked, bitmap)
    }

    /// [`acknack`](Self::acknack) as a wire payload for `stream_id`.
    pub fn acknack_payload(&self, stream_id: u8) -> AcknackPayload {
        let (first_unacked_seq, nack_bitmap) = self.acknack();
        AcknackPayload {
            first_unacked_seq,
            nack_bitmap,
            stream_id,
        }
    }

    /// Everything announced has been delivered.
    pub fn is_up_to_date(&self) -> bool {
        self.last_handled == self.last_announced
    }
}
