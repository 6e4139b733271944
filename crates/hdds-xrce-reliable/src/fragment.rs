// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer over reserved stream space, and in-order fragment reassembly.
//!
//! When a message does not fit into one slot the output stream lays out a
//! chain of FRAGMENT submessages ahead of time. [`StreamWriter`] then walks
//! the payload region of each slot in sequence order, so serializers simply
//! write bytes and never see the slot boundaries.

use std::io;

use crate::history::ReliableHistory;
use crate::seq_num::SeqNum;
use crate::wire::SUBHEADER_SIZE;

/// Write cursor over space reserved by
/// [`OutputReliableStream::prepare_to_write`](crate::OutputReliableStream::prepare_to_write).
///
/// For a message that fits one slot the writer covers exactly the reserved
/// bytes. For a fragmented message it starts after the first FRAGMENT
/// subheader and moves to the next slot's payload region each time the
/// current one is full, until the last fragment is filled.
#[derive(Debug)]
pub struct StreamWriter<'a, B> {
    history: &'a mut ReliableHistory<B>,
    header_offset: usize,
    seq: SeqNum,
    last_seq: SeqNum,
    pos: usize,
    end: usize,
    written: usize,
    total: usize,
}

impl<'a, B> StreamWriter<'a, B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Single-region writer over `start..end` of the slot holding `seq`.
    pub(crate) fn single(
        history: &'a mut ReliableHistory<B>,
        header_offset: usize,
        seq: SeqNum,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            history,
            header_offset,
            seq,
            last_seq: seq,
            pos: start,
            end,
            written: 0,
            total: end - start,
        }
    }

    /// Writer over a fragment chain `first..=last`. The first payload region
    /// is `start..capacity` of the first slot; later regions are read back
    /// from the slot sizes recorded when the chain was laid out.
    pub(crate) fn fragmented(
        history: &'a mut ReliableHistory<B>,
        header_offset: usize,
        first: SeqNum,
        last: SeqNum,
        start: usize,
        total: usize,
    ) -> Self {
        let end = history.capacity();
        Self {
            history,
            header_offset,
            seq: first,
            last_seq: last,
            pos: start,
            end,
            written: 0,
            total,
        }
    }

    /// Bytes still writable across all remaining regions.
    pub fn remaining(&self) -> usize {
        self.total - self.written
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Total bytes reserved for this message.
    pub fn reserved(&self) -> usize {
        self.total
    }

    /// Sequence number of the slot currently being filled.
    pub fn current_seq(&self) -> SeqNum {
        self.seq
    }

    /// Pad the rest of the reservation with zeros.
    pub fn fill_remaining(&mut self) {
        const ZEROS: [u8; 64] = [0; 64];
        while self.remaining() > 0 {
            let n = self.remaining().min(ZEROS.len());
            self.write_bytes(&ZEROS[..n]);
        }
    }

    fn advance_region(&mut self) -> bool {
        if self.seq == self.last_seq {
            return false;
        }
        self.seq = self.seq.add(1);
        self.pos = self.header_offset + SUBHEADER_SIZE;
        self.end = self.history.size_of(self.seq);
        true
    }

    fn write_bytes(&mut self, mut data: &[u8]) -> usize {
        let mut copied = 0;
        while !data.is_empty() {
            if self.pos >= self.end && !self.advance_region() {
                break;
            }
            let n = data.len().min(self.end - self.pos);
            let (pos, seq) = (self.pos, self.seq);
            self.history.slot_mut(seq)[pos..pos + n].copy_from_slice(&data[..n]);
            self.pos += n;
            copied += n;
            data = &data[n..];
        }
        self.written += copied;
        copied
    }
}

impl<B> io::Write for StreamWriter<'_, B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Collects FRAGMENT payloads delivered in order and yields the original
/// submessage bytes once the fragment flagged `LAST_FRAGMENT` arrives.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    data: Vec<u8>,
    fragments: u16,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment. Returns the reassembled bytes on the last one.
    pub fn push(&mut self, payload: &[u8], last: bool) -> Option<Vec<u8>> {
        self.data.extend_from_slice(payload);
        self.fragments = self.fragments.saturating_add(1);
        if last {
            self.fragments = 0;
            Some(std::mem::take(&mut self.data))
        } else {
            None
        }
    }

    /// `true` while a partially received chain is held.
    pub fn in_progress(&self) -> bool {
        self.fragments > 0
    }

    /// Number of fragments held for the current chain.
    pub fn fragment_count(&self) -> u16 {
        self.fragments
    }

    /// Drop a partially received chain.
    pub fn clear(&mut self) {
        self.data.clear();
        self.fragments = 0;
    }
}
