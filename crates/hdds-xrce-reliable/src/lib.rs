// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDS-XRCE reliable streams for resource-constrained clients.
//!
//! Implements the reliability layer of an XRCE client: a windowed output
//! stream that packs, fragments, retransmits and frees messages driven by
//! peer ACKNACKs, the matching input stream, and a first-come-first-served
//! scheduler for handing work between threads.
//!
//! # Architecture
//!
//! ```text
//!  application                ClientSession                     agent
//!      |                           |                               |
//!      |-- write_submessage ------>| OutputReliableStream          |
//!      |                           |   prepare_to_write            |
//!      |                           |-- flush (one slot/datagram) ->|
//!      |                           |-- HEARTBEAT (backoff) ------->|
//!      |                           |<- ACKNACK (free + replay) ----|
//!      |                           |                               |
//!      |                           |<- reliable data --------------|
//!      |<- take_received ----------| InputReliableStream           |
//!      |                           |   + FragmentAssembler         |
//! ```
//!
//! # Key Features
//!
//! - **Caller-owned memory**: streams run over any `AsRef<[u8]> + AsMut<[u8]>`
//!   backing store split into power-of-two history slots
//! - **Wrapping sequence numbers**: 16-bit serial-number arithmetic
//! - **Fragmentation**: oversized submessages span consecutive slots
//! - **Transport-agnostic**: UDP (socket2) and in-process loopback transports
//!
//! # Example
//! ```
//! use std::io::Write;
//! use hdds_xrce_reliable::{OutputReliableStream, SeqNum};
//!
//! let mut stream = OutputReliableStream::new(vec![0u8; 8 * 64], 8, 4).unwrap();
//! stream.prepare_to_write(10).unwrap().write_all(&[0xAB; 10]).unwrap();
//! let (seq, slot) = stream.next_unsent().unwrap();
//! assert_eq!(seq, SeqNum(0));
//! assert_eq!(slot.len(), 14);
//! stream.process_acknack(0, SeqNum(1));
//! assert!(stream.is_up_to_date());
//! ```

pub mod config;
pub mod error;
pub mod fragment;
pub mod heartbeat;
pub mod history;
pub mod input;
pub mod output;
pub mod scheduler;
pub mod seq_num;
pub mod session;
pub mod transport;
pub mod wire;

// Re-exports for convenience.
pub use config::{SessionConfig, StreamConfig, DEFAULT_HISTORY, DEFAULT_MTU, DEFAULT_SESSION_ID};
pub use error::{Result, XrceError};
pub use fragment::{FragmentAssembler, StreamWriter};
pub use heartbeat::{HeartbeatTimer, DEFAULT_MIN_HEARTBEAT_INTERVAL_MS, MAX_HEARTBEAT_TRIES};
pub use history::ReliableHistory;
pub use input::{InputReliableStream, ReceiveOutcome};
pub use output::OutputReliableStream;
pub use scheduler::{FcfsScheduler, Scheduler};
pub use seq_num::SeqNum;
pub use session::{ClientSession, ReceivedSubmessage, SessionStats};
pub use transport::{LoopbackTransport, LossFilter, UdpTransport, XrceTransport};
pub use wire::{
    AcknackPayload, HeartbeatPayload, MessageHeader, StreamKind, SubmessageHeader,
    SubmessageIter,
};

#[cfg(test)]
mod tests;
