// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Error type shared by streams, wire codec, scheduler and session.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, XrceError>;

/// Errors produced by the XRCE reliable-stream subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XrceError {
    /// No slot available under the current acknowledgment watermark.
    /// Retry once the peer has acknowledged more data.
    WindowFull,
    /// The message needs more fragment slots than are currently free.
    /// Retry once the peer has acknowledged more data.
    FragmentOverflow,
    /// The scheduler was deinitialized while a consumer was waiting.
    SchedulerStopped,
    /// Not enough bytes to parse a header / payload.
    BufferTooShort,
    /// Unknown submessage id.
    UnknownSubmessageId(u8),
    /// Payload length does not match the expected size.
    PayloadLengthMismatch,
    /// Inbound traffic addressed to a stream this session does not own.
    UnknownStream(u8),
    /// A transport-level I/O error (message only, not the original error).
    Io(String),
    /// The session did not get a confirmation in time.
    Timeout,
    /// Configuration validation error.
    ConfigError(String),
}

impl XrceError {
    /// `true` for conditions the caller is expected to retry after more
    /// acknowledgments arrive.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::WindowFull | Self::FragmentOverflow)
    }
}

impl fmt::Display for XrceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WindowFull => write!(f, "reliable stream window full"),
            Self::FragmentOverflow => write!(f, "not enough free slots to fragment message"),
            Self::SchedulerStopped => write!(f, "scheduler stopped"),
            Self::BufferTooShort => write!(f, "buffer too short"),
            Self::UnknownSubmessageId(id) => write!(f, "unknown submessage id: 0x{:02x}", id),
            Self::PayloadLengthMismatch => write!(f, "payload length mismatch"),
            Self::UnknownStream(id) => write!(f, "unknown stream: 0x{:02x}", id),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Timeout => write!(f, "timeout"),
            Self::ConfigError(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for XrceError {}

impl From<std::io::Error> for XrceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
