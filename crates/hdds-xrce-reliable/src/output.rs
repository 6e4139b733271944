// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable output stream.
//!
//! A sliding window over [`ReliableHistory`] slots bounded by three
//! watermarks:
//!
//! ```text
//!   last_acknowledged < ... <= last_sent < ... <= last_written
//!   |<------------- at most `history` slots -------------->|
//! ```
//!
//! Producers reserve space with [`prepare_to_write`](OutputReliableStream::prepare_to_write),
//! the session pulls finished slots with [`next_unsent`](OutputReliableStream::next_unsent),
//! and peer ACKNACKs free slots again through
//! [`process_acknack`](OutputReliableStream::process_acknack). Slots are only
//! reused after they have been acknowledged.

use crate::config::StreamConfig;
use crate::error::{Result, XrceError};
use crate::fragment::StreamWriter;
use crate::heartbeat::HeartbeatTimer;
use crate::history::ReliableHistory;
use crate::seq_num::SeqNum;
use crate::wire::{
    HeartbeatPayload, SubmessageHeader, FLAG_LAST_FRAGMENT, SUBHEADER_SIZE, SUBMSG_FRAGMENT,
};

/// Sender side of a reliable stream.
#[derive(Debug)]
pub struct OutputReliableStream<B> {
    base: ReliableHistory<B>,
    header_offset: usize,

    last_written: SeqNum,
    last_sent: SeqNum,
    last_acknowledged: SeqNum,

    heartbeat: HeartbeatTimer,
    send_lost: bool,
}

impl<B> OutputReliableStream<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Create a stream over `buffer` split into `history` slots, reserving
    /// `header_offset` bytes at the front of each slot for the message header.
    pub fn new(buffer: B, history: u16, header_offset: usize) -> Result<Self> {
        let config = StreamConfig {
            history,
            header_offset,
            ..StreamConfig::default()
        };
        Self::with_config(buffer, &config)
    }

    /// Create a stream from a validated [`StreamConfig`]. The buffer length
    /// wins over `config.buffer_size`.
    pub fn with_config(buffer: B, config: &StreamConfig) -> Result<Self> {
        let base = ReliableHistory::new(buffer, config.history)?;
        config.check_capacity(base.capacity())?;
        let mut stream = Self {
            base,
            header_offset: config.header_offset,
            last_written: SeqNum(0),
            last_sent: SeqNum::MAX,
            last_acknowledged: SeqNum::MAX,
            heartbeat: HeartbeatTimer::new(config.min_heartbeat_interval_ms),
            send_lost: false,
        };
        stream.reset();
        Ok(stream)
    }

    /// Return every counter to the empty state. The backing store is kept.
    pub fn reset(&mut self) {
        self.base.fill_sizes(self.header_offset);
        self.last_written = SeqNum(0);
        self.last_sent = SeqNum::MAX;
        self.last_acknowledged = SeqNum::MAX;
        self.heartbeat.reset();
        self.send_lost = false;
    }

    /// Highest sequence number accepting writes.
    pub fn last_written(&self) -> SeqNum {
        self.last_written
    }

    /// Highest sequence number transmitted at least once.
    pub fn last_sent(&self) -> SeqNum {
        self.last_sent
    }

    /// Highest sequence number confirmed by the peer.
    pub fn last_acknowledged(&self) -> SeqNum {
        self.last_acknowledged
    }

    /// A NACK is pending replay.
    pub fn send_lost(&self) -> bool {
        self.send_lost
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn history(&self) -> u16 {
        self.base.history()
    }

    /// Per-slot byte capacity.
    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    /// Used length of the slot holding `seq`.
    pub fn size_of(&self, seq: SeqNum) -> usize {
        self.base.size_of(seq)
    }

    /// Used bytes of the slot holding `seq`, header area included.
    pub fn slot(&self, seq: SeqNum) -> &[u8] {
        self.base.used(seq)
    }

    /// Slots currently holding no payload.
    pub fn free_slots(&self) -> usize {
        self.base.count_with_size(self.header_offset)
    }

    pub fn heartbeat(&self) -> &HeartbeatTimer {
        &self.heartbeat
    }

    /// Release the backing store.
    pub fn into_inner(self) -> B {
        self.base.into_inner()
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Reserve `length` bytes for one submessage.
    ///
    /// The message is appended to the current slot when it fits, otherwise a
    /// fresh slot is opened, otherwise it is fragmented over as many slots as
    /// needed. Returns [`XrceError::WindowFull`] or
    /// [`XrceError::FragmentOverflow`] when the acknowledged window has no
    /// room; both clear once the peer acknowledges more data.
    pub fn prepare_to_write(&mut self, length: usize) -> Result<StreamWriter<'_, B>> {
        let capacity = self.base.capacity();
        let offset = self.header_offset;
        let window_end = self.last_acknowledged.add(self.base.history());
        let seq = self.last_written;
        let size = self.base.size_of(seq);

        if size.checked_add(length).map_or(false, |n| n <= capacity) {
            if !seq.le(window_end) {
                log::debug!("[OutputReliableStream] window full at seq={}", seq);
                return Err(XrceError::WindowFull);
            }
            self.base.set_size(seq, size + length);
            return Ok(StreamWriter::single(&mut self.base, offset, seq, size, size + length));
        }

        if offset.checked_add(length).map_or(false, |n| n <= capacity) {
            let next = seq.add(1);
            if !next.le(window_end) {
                log::debug!("[OutputReliableStream] window full at seq={}", next);
                return Err(XrceError::WindowFull);
            }
            self.base.set_size(next, offset + length);
            self.last_written = next;
            return Ok(StreamWriter::single(&mut self.base, offset, next, offset, offset + length));
        }

        self.prepare_fragments(length, window_end)
    }

    fn prepare_fragments(&mut self, length: usize, window_end: SeqNum) -> Result<StreamWriter<'_, B>> {
        let capacity = self.base.capacity();
        let offset = self.header_offset;

        let mut first = self.last_written;
        let mut size = self.base.size_of(first);
        // Not even one payload byte left after a subheader: start fresh.
        if size + SUBHEADER_SIZE >= capacity {
            first = first.add(1);
            size = self.base.size_of(first);
        }

        let block = capacity.saturating_sub(offset + SUBHEADER_SIZE);
        if block == 0 || size + SUBHEADER_SIZE >= capacity {
            return Err(XrceError::FragmentOverflow);
        }
        let first_fragment = capacity - (size + SUBHEADER_SIZE);
        let remaining = length.saturating_sub(first_fragment);
        let (last_fragment, extra_slots) = if remaining % block == 0 {
            (block, remaining / block)
        } else {
            (remaining % block, remaining / block + 1)
        };

        let history = usize::from(self.base.history());
        let first_is_free = size == offset;
        let needed = extra_slots + usize::from(first_is_free);
        if extra_slots >= history || needed > self.free_slots() {
            log::debug!(
                "[OutputReliableStream] cannot fragment {} bytes: need {} slots, {} free",
                length,
                needed,
                self.free_slots()
            );
            return Err(XrceError::FragmentOverflow);
        }
        let last = first.add(extra_slots as u16);
        if !last.le(window_end) {
            log::debug!("[OutputReliableStream] fragment chain ends past window at seq={}", last);
            return Err(XrceError::FragmentOverflow);
        }

        let mut seq = first;
        let mut fragment_size = first_fragment;
        for _ in 0..extra_slots {
            let start = self.base.size_of(seq);
            SubmessageHeader::new(SUBMSG_FRAGMENT, 0, fragment_size as u16)
                .stamp(&mut self.base.slot_mut(seq)[start..])?;
            self.base.set_size(seq, capacity);
            seq = seq.add(1);
            fragment_size = block;
        }
        SubmessageHeader::new(SUBMSG_FRAGMENT, FLAG_LAST_FRAGMENT, last_fragment as u16)
            .stamp(&mut self.base.slot_mut(seq)[offset..])?;
        self.base.set_size(seq, offset + SUBHEADER_SIZE + last_fragment);
        self.last_written = seq;

        log::trace!(
            "[OutputReliableStream] fragmented {} bytes over seq {}..={}",
            length,
            first,
            last
        );
        Ok(StreamWriter::fragmented(
            &mut self.base,
            offset,
            first,
            last,
            size + SUBHEADER_SIZE,
            length,
        ))
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// A written slot is waiting for transmission and the send window
    /// allows it.
    pub fn has_unsent(&self) -> bool {
        let seq = self.last_sent.add(1);
        let in_flight = self.last_sent.distance_from(self.last_acknowledged);
        seq.le(self.last_written)
            && self.base.size_of(seq) > self.header_offset
            && in_flight != self.base.history()
    }

    /// Next slot to transmit without marking it sent. The slice includes the
    /// `header_offset` bytes reserved for the message header.
    pub fn peek_unsent(&mut self) -> Option<(SeqNum, &mut [u8])> {
        if !self.has_unsent() {
            return None;
        }
        let seq = self.last_sent.add(1);
        Some((seq, self.base.used_mut(seq)))
    }

    /// Record that `seq` (the slot returned by [`peek_unsent`](Self::peek_unsent))
    /// was handed to the transport. Returns `false` if `seq` is not next.
    pub fn mark_sent(&mut self, seq: SeqNum) -> bool {
        if seq != self.last_sent.add(1) {
            return false;
        }
        self.last_sent = seq;
        if self.last_sent == self.last_written {
            self.last_written = self.last_written.add(1);
        }
        log::trace!("[OutputReliableStream] sent seq={}", seq);
        true
    }

    /// Next slot to transmit, marking it sent.
    pub fn next_unsent(&mut self) -> Option<(SeqNum, &mut [u8])> {
        let (seq, _) = self.peek_unsent()?;
        self.mark_sent(seq);
        Some((seq, self.base.used_mut(seq)))
    }

    // -----------------------------------------------------------------------
    // Heartbeat / acknowledgment
    // -----------------------------------------------------------------------

    /// Advance the heartbeat timer. `true` means a HEARTBEAT must go out now.
    pub fn update_heartbeat(&mut self, now_ms: i64) -> bool {
        let outstanding = self.last_acknowledged.lt(self.last_sent);
        self.heartbeat.update(now_ms, outstanding)
    }

    /// HEARTBEAT payload announcing the unacknowledged range.
    pub fn heartbeat_payload(&self, stream_id: u8) -> HeartbeatPayload {
        HeartbeatPayload {
            first_unacked_seq: self.last_acknowledged.add(1),
            last_unacked_seq: self.last_sent,
            stream_id,
        }
    }

    /// Apply a peer ACKNACK: everything before `first_unacked` is freed.
    /// A non-zero `bitmap` schedules replay of unacknowledged slots.
    pub fn process_acknack(&mut self, bitmap: u16, first_unacked: SeqNum) {
        let mut last_acked = first_unacked.sub(1);
        if last_acked.lt(self.last_acknowledged) {
            log::debug!(
                "[OutputReliableStream] stale ACKNACK first_unacked={} (acknowledged={})",
                first_unacked,
                self.last_acknowledged
            );
        } else {
            if self.last_sent.lt(last_acked) {
                log::warn!(
                    "[OutputReliableStream] ACKNACK beyond last sent ({} > {}), clamping",
                    last_acked,
                    self.last_sent
                );
                last_acked = self.last_sent;
            }
            let to_clean = last_acked.distance_from(self.last_acknowledged);
            for _ in 0..to_clean {
                self.last_acknowledged = self.last_acknowledged.add(1);
                self.base.set_size(self.last_acknowledged, self.header_offset);
            }
            if to_clean > 0 {
                log::debug!(
                    "[OutputReliableStream] acknowledged up to seq={} ({} slots freed)",
                    self.last_acknowledged,
                    to_clean
                );
            }
        }
        self.send_lost = bitmap != 0;
        self.heartbeat.reset_tries();
    }

    /// Starting cursor for [`next_lost`](Self::next_lost).
    pub fn begin_lost_cursor(&self) -> SeqNum {
        self.last_acknowledged
    }

    /// Next sent-but-unacknowledged slot after `cursor` while a NACK is
    /// pending. Clears the pending flag once the scan passes `last_sent`.
    pub fn next_lost(&mut self, cursor: &mut SeqNum) -> Option<(SeqNum, &mut [u8])> {
        if !self.send_lost {
            return None;
        }
        loop {
            *cursor = cursor.add(1);
            if !cursor.le(self.last_sent) {
                self.send_lost = false;
                return None;
            }
            if self.base.size_of(*cursor) != self.header_offset {
                let seq = *cursor;
                log::trace!("[OutputReliableStream] replaying seq={}", seq);
                return Some((seq, self.base.used_mut(seq)));
            }
        }
    }

    /// Everything sent has been acknowledged.
    pub fn is_up_to_date(&self) -> bool {
        self.last_acknowledged == self.last_sent
    }
}
