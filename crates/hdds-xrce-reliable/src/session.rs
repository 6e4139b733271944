// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Client session driving one reliable output and one reliable input stream
// over an `XrceTransport`.
//
// Outbound: submessages are written into the output stream, flushed as one
// datagram per slot, and kept until the peer acknowledges them. HEARTBEATs
// go out on the stream's backoff timer; ACKNACKs trigger replays.
//
// Inbound: reliable messages pass through the input stream so submessages
// reach the inbox in order, with FRAGMENT chains reassembled. Peer
// HEARTBEATs are answered with an ACKNACK.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Instant;

use crate::config::SessionConfig;
use crate::error::{Result, XrceError};
use crate::fragment::FragmentAssembler;
use crate::heartbeat::HEARTBEAT_DISARMED;
use crate::input::{InputReliableStream, ReceiveOutcome};
use crate::output::OutputReliableStream;
use crate::seq_num::SeqNum;
use crate::transport::XrceTransport;
use crate::wire::{
    align_submessage, AcknackPayload, HeartbeatPayload, MessageHeader, StreamKind,
    SubmessageHeader, SubmessageIter, SESSION_ID_WITHOUT_CLIENT_KEY, STREAM_ID_NONE,
    SUBHEADER_SIZE, SUBMSG_ACKNACK, SUBMSG_FRAGMENT, SUBMSG_HEARTBEAT,
};

/// A submessage handed to the application, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSubmessage {
    pub stream_id: u8,
    pub submessage_id: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

/// Session counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages_sent: u64,
    pub messages_resent: u64,
    pub heartbeats_sent: u64,
    pub acknacks_sent: u64,
    pub messages_received: u64,
    pub messages_discarded: u64,
}

/// Client end of an XRCE session.
#[derive(Debug)]
pub struct ClientSession<T> {
    config: SessionConfig,
    transport: T,
    output: OutputReliableStream<Vec<u8>>,
    input: InputReliableStream<Vec<u8>>,
    assembler: FragmentAssembler,
    inbox: VecDeque<ReceivedSubmessage>,
    recv_buf: Vec<u8>,
    epoch: Instant,
    stats: SessionStats,
}

fn message_header(config: &SessionConfig, stream_id: u8, sequence_nr: SeqNum) -> MessageHeader {
    MessageHeader {
        session_id: config.session_id,
        stream_id,
        sequence_nr,
        client_key: (config.session_id < SESSION_ID_WITHOUT_CLIENT_KEY)
            .then_some(config.client_key),
    }
}

impl<T: XrceTransport> ClientSession<T> {
    /// Build a session; stream buffers are `mtu * history` bytes each.
    pub fn new(config: SessionConfig, transport: T) -> Result<Self> {
        config.validate()?;
        if config.mtu > transport.mtu() {
            return Err(XrceError::ConfigError(format!(
                "session MTU {} exceeds transport MTU {}",
                config.mtu,
                transport.mtu()
            )));
        }
        let stream_config = config.stream_config();
        let output =
            OutputReliableStream::with_config(vec![0u8; stream_config.buffer_size], &stream_config)?;
        let input = InputReliableStream::new(vec![0u8; stream_config.buffer_size], config.history)?;
        log::info!(
            "[ClientSession] session_id=0x{:02x} mtu={} history={}",
            config.session_id,
            config.mtu,
            config.history
        );
        Ok(Self {
            recv_buf: vec![0u8; transport.mtu()],
            config,
            transport,
            output,
            input,
            assembler: FragmentAssembler::new(),
            inbox: VecDeque::new(),
            epoch: Instant::now(),
            stats: SessionStats::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn output(&self) -> &OutputReliableStream<Vec<u8>> {
        &self.output
    }

    pub fn input(&self) -> &InputReliableStream<Vec<u8>> {
        &self.input
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Everything written has been sent and acknowledged.
    pub fn is_confirmed(&self) -> bool {
        !self.output.has_unsent() && self.output.is_up_to_date()
    }

    /// Drain submessages received so far.
    pub fn take_received(&mut self) -> Vec<ReceivedSubmessage> {
        self.inbox.drain(..).collect()
    }

    fn now_ms(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Queue one submessage on the reliable output stream. Large submessages
    /// are fragmented. [`XrceError::WindowFull`] and
    /// [`XrceError::FragmentOverflow`] clear once the peer acknowledges.
    pub fn write_submessage(&mut self, submessage_id: u8, flags: u8, payload: &[u8]) -> Result<()> {
        let length = u16::try_from(payload.len()).map_err(|_| XrceError::PayloadLengthMismatch)?;
        let mut header = [0u8; SUBHEADER_SIZE];
        SubmessageHeader::new(submessage_id, flags, length).stamp(&mut header)?;

        let mut writer = self
            .output
            .prepare_to_write(align_submessage(SUBHEADER_SIZE + payload.len()))?;
        writer.write_all(&header)?;
        writer.write_all(payload)?;
        writer.fill_remaining();
        Ok(())
    }

    /// Send every slot that is ready. A slot only counts as sent once the
    /// transport accepted it. Returns the number of datagrams sent.
    pub fn flush(&mut self) -> Result<usize> {
        let stream_id = self.config.output_stream_id;
        let mut sent = 0;
        while let Some((seq, slot)) = self.output.peek_unsent() {
            message_header(&self.config, stream_id, seq).stamp(slot)?;
            self.transport.send(slot)?;
            self.output.mark_sent(seq);
            sent += 1;
        }
        self.stats.messages_sent += sent as u64;
        Ok(sent)
    }

    fn resend_lost(&mut self) -> Result<()> {
        let stream_id = self.config.output_stream_id;
        let mut cursor = self.output.begin_lost_cursor();
        while let Some((seq, slot)) = self.output.next_lost(&mut cursor) {
            message_header(&self.config, stream_id, seq).stamp(slot)?;
            self.transport.send(slot)?;
            self.stats.messages_resent += 1;
        }
        Ok(())
    }

    fn send_heartbeat_if_due(&mut self) -> Result<()> {
        let now = self.now_ms();
        if !self.output.update_heartbeat(now) {
            return Ok(());
        }
        let payload = self.output.heartbeat_payload(self.config.output_stream_id);
        log::trace!(
            "[ClientSession] HEARTBEAT {}..={} (try {})",
            payload.first_unacked_seq,
            payload.last_unacked_seq,
            self.output.heartbeat().tries()
        );
        let mut msg = Vec::with_capacity(16);
        message_header(&self.config, STREAM_ID_NONE, SeqNum(0)).write_to(&mut msg);
        payload.write_submessage(&mut msg);
        self.transport.send(&msg)?;
        self.stats.heartbeats_sent += 1;
        Ok(())
    }

    fn send_acknack(&mut self) -> Result<()> {
        let payload = self.input.acknack_payload(self.config.input_stream_id);
        let mut msg = Vec::with_capacity(16);
        message_header(&self.config, STREAM_ID_NONE, SeqNum(0)).write_to(&mut msg);
        payload.write_submessage(&mut msg);
        self.transport.send(&msg)?;
        self.stats.acknacks_sent += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Run the session for `timeout_ms`: flush, listen, answer and send
    /// heartbeats. Returns whether the output stream is fully acknowledged.
    pub fn run_session_time(&mut self, timeout_ms: u64) -> Result<bool> {
        self.run_until(timeout_ms, |_| false)?;
        Ok(self.is_confirmed())
    }

    /// Run until every written submessage is acknowledged, or fail with
    /// [`XrceError::Timeout`].
    pub fn run_until_confirmed(&mut self, timeout_ms: u64) -> Result<()> {
        if self.run_until(timeout_ms, Self::is_confirmed)? {
            Ok(())
        } else {
            log::warn!(
                "[ClientSession] delivery not confirmed after {} ms (sent={}, acknowledged={})",
                timeout_ms,
                self.output.last_sent(),
                self.output.last_acknowledged()
            );
            Err(XrceError::Timeout)
        }
    }

    fn run_until<F>(&mut self, timeout_ms: u64, done: F) -> Result<bool>
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = self
            .now_ms()
            .saturating_add(i64::try_from(timeout_ms).unwrap_or(i64::MAX));
        loop {
            self.flush()?;
            self.send_heartbeat_if_due()?;
            if done(&*self) {
                return Ok(true);
            }
            let now = self.now_ms();
            let mut wait = deadline.saturating_sub(now);
            let next_heartbeat = self.output.heartbeat().next_timestamp();
            if next_heartbeat != HEARTBEAT_DISARMED {
                wait = wait.min(next_heartbeat.saturating_sub(now));
            }
            self.listen(u64::try_from(wait).unwrap_or(0))?;
            if self.now_ms() >= deadline {
                return Ok(done(&*self));
            }
        }
    }

    /// Wait up to `timeout_ms` for one datagram, then drain whatever else is
    /// already queued.
    fn listen(&mut self, timeout_ms: u64) -> Result<()> {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let mut timeout = timeout_ms;
        let result = loop {
            match self.transport.recv(&mut buf, timeout) {
                Ok(Some(n)) => {
                    self.stats.messages_received += 1;
                    if let Err(e) = self.handle_message(&buf[..n]) {
                        if matches!(e, XrceError::Io(_)) {
                            break Err(e);
                        }
                        self.stats.messages_discarded += 1;
                        log::warn!("[ClientSession] dropped inbound message: {}", e);
                    }
                    timeout = 0;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.recv_buf = buf;
        result
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Process one inbound datagram.
    pub fn handle_message(&mut self, data: &[u8]) -> Result<()> {
        let (header, offset) = MessageHeader::parse(data)?;
        if header.session_id != self.config.session_id {
            log::debug!(
                "[ClientSession] ignoring message for session 0x{:02x}",
                header.session_id
            );
            return Ok(());
        }
        let body = &data[offset..];
        match StreamKind::from_stream_id(header.stream_id) {
            StreamKind::None => self.handle_control(body),
            StreamKind::BestEffort => {
                self.deliver_body(header.stream_id, body);
                Ok(())
            }
            StreamKind::Reliable if header.stream_id == self.config.input_stream_id => {
                self.handle_reliable(header.sequence_nr, body);
                Ok(())
            }
            StreamKind::Reliable => Err(XrceError::UnknownStream(header.stream_id)),
        }
    }

    fn handle_control(&mut self, body: &[u8]) -> Result<()> {
        for sub in SubmessageIter::new(body) {
            let sub = sub?;
            match sub.header.submessage_id {
                SUBMSG_ACKNACK => {
                    let ack = AcknackPayload::parse(sub.payload)?;
                    if ack.stream_id != self.config.output_stream_id {
                        return Err(XrceError::UnknownStream(ack.stream_id));
                    }
                    log::trace!(
                        "[ClientSession] ACKNACK first_unacked={} bitmap=0x{:04x}",
                        ack.first_unacked_seq,
                        ack.nack_bitmap
                    );
                    self.output
                        .process_acknack(ack.nack_bitmap, ack.first_unacked_seq);
                    self.resend_lost()?;
                }
                SUBMSG_HEARTBEAT => {
                    let hb = HeartbeatPayload::parse(sub.payload)?;
                    if hb.stream_id != self.config.input_stream_id {
                        return Err(XrceError::UnknownStream(hb.stream_id));
                    }
                    let before = self.input.last_handled();
                    self.input
                        .process_heartbeat(hb.first_unacked_seq, hb.last_unacked_seq);
                    if self.input.last_handled() != before && self.assembler.in_progress() {
                        log::warn!(
                            "[ClientSession] fragment chain broken by skipped messages, discarding {} fragment(s)",
                            self.assembler.fragment_count()
                        );
                        self.assembler.clear();
                    }
                    self.drain_parked();
                    self.send_acknack()?;
                }
                other => return Err(XrceError::UnknownSubmessageId(other)),
            }
        }
        Ok(())
    }

    fn handle_reliable(&mut self, seq: SeqNum, body: &[u8]) {
        match self.input.receive(seq, body) {
            ReceiveOutcome::Deliver => {
                self.deliver_body(self.config.input_stream_id, body);
                self.drain_parked();
            }
            ReceiveOutcome::Stored => {}
            ReceiveOutcome::Duplicate => {
                log::trace!("[ClientSession] duplicate seq={}", seq);
            }
            ReceiveOutcome::OutOfWindow => {
                self.stats.messages_discarded += 1;
            }
        }
    }

    fn drain_parked(&mut self) {
        let stream_id = self.config.input_stream_id;
        while let Some((_, body)) = self.input.next_message() {
            self.deliver_body(stream_id, &body);
        }
    }

    fn deliver_body(&mut self, stream_id: u8, body: &[u8]) {
        for sub in SubmessageIter::new(body) {
            let sub = match sub {
                Ok(sub) => sub,
                Err(e) => {
                    log::warn!("[ClientSession] malformed submessage on stream 0x{:02x}: {}", stream_id, e);
                    return;
                }
            };
            if sub.header.submessage_id != SUBMSG_FRAGMENT {
                self.inbox.push_back(ReceivedSubmessage {
                    stream_id,
                    submessage_id: sub.header.submessage_id,
                    flags: sub.header.flags,
                    payload: sub.payload.to_vec(),
                });
                continue;
            }
            let Some(whole) = self
                .assembler
                .push(sub.payload, sub.header.is_last_fragment())
            else {
                continue;
            };
            log::trace!("[ClientSession] reassembled {} bytes", whole.len());
            for inner in SubmessageIter::new(&whole) {
                match inner {
                    Ok(inner) => self.inbox.push_back(ReceivedSubmessage {
                        stream_id,
                        submessage_id: inner.header.submessage_id,
                        flags: inner.header.flags,
                        payload: inner.payload.to_vec(),
                    }),
                    Err(e) => {
                        log::warn!("[ClientSession] malformed reassembled submessage: {}", e);
                        break;
                    }
                }
            }
        }
    }
}
