// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// DDS-XRCE framing used by the reliable streams.
//
// Only the pieces the stream machinery exchanges are modelled here: message
// and submessage headers, HEARTBEAT / ACKNACK payloads and the FRAGMENT
// submessage. All parsing is safe: malformed input returns Err, never panics.

use crate::error::{Result, XrceError};
use crate::seq_num::SeqNum;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Message header size without client key.
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Client key size, present when `session_id < SESSION_ID_WITHOUT_CLIENT_KEY`.
pub const CLIENT_KEY_SIZE: usize = 4;

/// Session ids from this value up carry no client key in their header.
pub const SESSION_ID_WITHOUT_CLIENT_KEY: u8 = 0x80;

/// Submessage header size in bytes.
pub const SUBHEADER_SIZE: usize = 4;

/// Submessages start on this alignment inside a message.
pub const SUBMESSAGE_ALIGNMENT: usize = 4;

// Submessage IDs
pub const SUBMSG_CREATE_CLIENT: u8 = 0;
pub const SUBMSG_CREATE: u8 = 1;
pub const SUBMSG_GET_INFO: u8 = 2;
pub const SUBMSG_DELETE: u8 = 3;
pub const SUBMSG_STATUS_AGENT: u8 = 4;
pub const SUBMSG_STATUS: u8 = 5;
pub const SUBMSG_INFO: u8 = 6;
pub const SUBMSG_WRITE_DATA: u8 = 7;
pub const SUBMSG_READ_DATA: u8 = 8;
pub const SUBMSG_DATA: u8 = 9;
pub const SUBMSG_ACKNACK: u8 = 10;
pub const SUBMSG_HEARTBEAT: u8 = 11;
pub const SUBMSG_RESET: u8 = 12;
pub const SUBMSG_FRAGMENT: u8 = 13;
pub const SUBMSG_TIMESTAMP: u8 = 14;
pub const SUBMSG_TIMESTAMP_REPLY: u8 = 15;

// Submessage flags
pub const FLAG_LITTLE_ENDIAN: u8 = 0x01;
pub const FLAG_LAST_FRAGMENT: u8 = 0x02;

// Stream ids
pub const STREAM_ID_NONE: u8 = 0x00;
pub const STREAM_ID_BEST_EFFORT_FIRST: u8 = 0x01;
pub const STREAM_ID_RELIABLE_FIRST: u8 = 0x80;

const HEARTBEAT_PAYLOAD_SIZE: usize = 5;
const ACKNACK_PAYLOAD_SIZE: usize = 5;

/// Round `len` up to the submessage alignment.
#[inline]
pub fn align_submessage(len: usize) -> usize {
    (len + SUBMESSAGE_ALIGNMENT - 1) & !(SUBMESSAGE_ALIGNMENT - 1)
}

/// Header size for a session: 4 bytes, plus the client key for low ids.
#[inline]
pub fn message_header_size(session_id: u8) -> usize {
    if session_id < SESSION_ID_WITHOUT_CLIENT_KEY {
        MESSAGE_HEADER_SIZE + CLIENT_KEY_SIZE
    } else {
        MESSAGE_HEADER_SIZE
    }
}

/// Identifies the delivery kind of a stream from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// stream_id == 0: session-level submessages (HEARTBEAT, ACKNACK, ...).
    None,
    /// stream_id 1..=127: fire-and-forget.
    BestEffort,
    /// stream_id 128..=255: reliable delivery.
    Reliable,
}

impl StreamKind {
    pub fn from_stream_id(id: u8) -> Self {
        match id {
            STREAM_ID_NONE => Self::None,
            id if id < STREAM_ID_RELIABLE_FIRST => Self::BestEffort,
            _ => Self::Reliable,
        }
    }
}

// ---------------------------------------------------------------------------
// Message header
// ---------------------------------------------------------------------------

/// Top-level XRCE message header (4 or 8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub session_id: u8,
    pub stream_id: u8,
    pub sequence_nr: SeqNum,
    /// Present only when `session_id < 0x80`.
    pub client_key: Option<[u8; 4]>,
}

impl MessageHeader {
    /// Encoded size of this header.
    pub fn size(&self) -> usize {
        message_header_size(self.session_id)
    }

    /// Parse a header; returns the header and the number of bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(XrceError::BufferTooShort);
        }
        let session_id = buf[0];
        let size = message_header_size(session_id);
        if buf.len() < size {
            return Err(XrceError::BufferTooShort);
        }
        let client_key = if size > MESSAGE_HEADER_SIZE {
            let mut key = [0u8; CLIENT_KEY_SIZE];
            key.copy_from_slice(&buf[MESSAGE_HEADER_SIZE..size]);
            Some(key)
        } else {
            None
        };
        let header = Self {
            session_id,
            stream_id: buf[1],
            sequence_nr: SeqNum(u16::from_le_bytes([buf[2], buf[3]])),
            client_key,
        };
        Ok((header, size))
    }

    /// Stamp the header into the front of `buf` (in place, as the streams
    /// reserve `header_offset` bytes at the start of every slot).
    pub fn stamp(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if buf.len() < size {
            return Err(XrceError::BufferTooShort);
        }
        buf[0] = self.session_id;
        buf[1] = self.stream_id;
        buf[2..4].copy_from_slice(&self.sequence_nr.get().to_le_bytes());
        if size > MESSAGE_HEADER_SIZE {
            let key = self.client_key.unwrap_or_default();
            buf[MESSAGE_HEADER_SIZE..size].copy_from_slice(&key);
        }
        Ok(size)
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + self.size(), 0);
        // Size was reserved just above.
        let _ = self.stamp(&mut buf[start..]);
    }
}

// ---------------------------------------------------------------------------
// Submessage header
// ---------------------------------------------------------------------------

/// Submessage header (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageHeader {
    pub submessage_id: u8,
    pub flags: u8,
    pub length: u16,
}

impl SubmessageHeader {
    /// Little-endian header for `id` with extra `flags`.
    pub fn new(submessage_id: u8, flags: u8, length: u16) -> Self {
        Self {
            submessage_id,
            flags: flags | FLAG_LITTLE_ENDIAN,
            length,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUBHEADER_SIZE {
            return Err(XrceError::BufferTooShort);
        }
        let flags = buf[1];
        let raw = [buf[2], buf[3]];
        Ok(Self {
            submessage_id: buf[0],
            flags,
            // The length field follows the submessage endianness flag.
            length: if flags & FLAG_LITTLE_ENDIAN != 0 {
                u16::from_le_bytes(raw)
            } else {
                u16::from_be_bytes(raw)
            },
        })
    }

    /// Write into the first four bytes of `buf`.
    pub fn stamp(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < SUBHEADER_SIZE {
            return Err(XrceError::BufferTooShort);
        }
        buf[0] = self.submessage_id;
        buf[1] = self.flags;
        let len = if self.flags & FLAG_LITTLE_ENDIAN != 0 {
            self.length.to_le_bytes()
        } else {
            self.length.to_be_bytes()
        };
        buf[2..4].copy_from_slice(&len);
        Ok(())
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + SUBHEADER_SIZE, 0);
        // Size was reserved just above.
        let _ = self.stamp(&mut buf[start..]);
    }

    pub fn is_last_fragment(&self) -> bool {
        self.flags & FLAG_LAST_FRAGMENT != 0
    }
}

// ---------------------------------------------------------------------------
// Reliability payloads
// ---------------------------------------------------------------------------

/// HEARTBEAT (0x0B): writer announces the range it still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub first_unacked_seq: SeqNum,
    pub last_unacked_seq: SeqNum,
    pub stream_id: u8,
}

/// ACKNACK (0x0A): reader reports its cumulative watermark plus gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknackPayload {
    pub first_unacked_seq: SeqNum,
    /// Bit `i` set: `first_unacked_seq + i` is missing.
    pub nack_bitmap: u16,
    pub stream_id: u8,
}

impl HeartbeatPayload {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < HEARTBEAT_PAYLOAD_SIZE {
            return Err(XrceError::PayloadLengthMismatch);
        }
        Ok(Self {
            first_unacked_seq: SeqNum(u16::from_le_bytes([payload[0], payload[1]])),
            last_unacked_seq: SeqNum(u16::from_le_bytes([payload[2], payload[3]])),
            stream_id: payload[4],
        })
    }

    /// Serialize as a complete submessage (header + payload).
    pub fn write_submessage(&self, buf: &mut Vec<u8>) {
        SubmessageHeader::new(SUBMSG_HEARTBEAT, 0, HEARTBEAT_PAYLOAD_SIZE as u16).write_to(buf);
        buf.extend_from_slice(&self.first_unacked_seq.get().to_le_bytes());
        buf.extend_from_slice(&self.last_unacked_seq.get().to_le_bytes());
        buf.push(self.stream_id);
    }
}

impl AcknackPayload {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < ACKNACK_PAYLOAD_SIZE {
            return Err(XrceError::PayloadLengthMismatch);
        }
        Ok(Self {
            first_unacked_seq: SeqNum(u16::from_le_bytes([payload[0], payload[1]])),
            // Bitmap travels as a two-octet array, most significant first.
            nack_bitmap: u16::from_be_bytes([payload[2], payload[3]]),
            stream_id: payload[4],
        })
    }

    /// Serialize as a complete submessage (header + payload).
    pub fn write_submessage(&self, buf: &mut Vec<u8>) {
        SubmessageHeader::new(SUBMSG_ACKNACK, 0, ACKNACK_PAYLOAD_SIZE as u16).write_to(buf);
        buf.extend_from_slice(&self.first_unacked_seq.get().to_le_bytes());
        buf.extend_from_slice(&self.nack_bitmap.to_be_bytes());
        buf.push(self.stream_id);
    }
}

// ---------------------------------------------------------------------------
// Submessage iteration
// ---------------------------------------------------------------------------

/// One submessage borrowed from a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSubmessage<'a> {
    pub header: SubmessageHeader,
    pub payload: &'a [u8],
}

/// Walks the submessages of a message body, skipping alignment padding.
#[derive(Debug, Clone)]
pub struct SubmessageIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> SubmessageIter<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            buf: body,
            offset: 0,
        }
    }
}

impl<'a> Iterator for SubmessageIter<'a> {
    type Item = Result<RawSubmessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + SUBHEADER_SIZE > self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.offset..];
        let header = match SubmessageHeader::parse(rest) {
            Ok(h) => h,
            Err(e) => {
                self.offset = self.buf.len();
                return Some(Err(e));
            }
        };
        let end = SUBHEADER_SIZE + usize::from(header.length);
        if rest.len() < end {
            self.offset = self.buf.len();
            return Some(Err(XrceError::BufferTooShort));
        }
        let payload = &rest[SUBHEADER_SIZE..end];
        self.offset += align_submessage(end);
        Some(Ok(RawSubmessage { header, payload }))
    }
}

/// Serialize one submessage, padded to the submessage alignment.
pub fn write_submessage(buf: &mut Vec<u8>, submessage_id: u8, flags: u8, payload: &[u8]) -> Result<()> {
    let length = u16::try_from(payload.len()).map_err(|_| XrceError::PayloadLengthMismatch)?;
    SubmessageHeader::new(submessage_id, flags, length).write_to(buf);
    buf.extend_from_slice(payload);
    let padded = align_submessage(buf.len());
    buf.resize(padded, 0);
    Ok(())
}
