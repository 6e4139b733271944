// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Stream and session configuration with validation.

use crate::error::XrceError;
use crate::heartbeat::DEFAULT_MIN_HEARTBEAT_INTERVAL_MS;
use crate::wire::{message_header_size, STREAM_ID_RELIABLE_FIRST, SUBHEADER_SIZE};

/// Default transport MTU, matching the Micro XRCE-DDS UDP transport.
pub const DEFAULT_MTU: usize = 512;

/// Default number of slots per reliable stream.
pub const DEFAULT_HISTORY: u16 = 8;

/// Default session id (>= 0x80, so headers carry no client key).
pub const DEFAULT_SESSION_ID: u8 = 0x81;

/// Configuration for one reliable stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Total backing store size in bytes (default: MTU * history).
    pub buffer_size: usize,
    /// Number of slots; must be a power of two (default: 8).
    pub history: u16,
    /// Bytes reserved at the front of each slot for the message header
    /// (default: 4, a session header without client key).
    pub header_offset: usize,
    /// Minimum heartbeat interval in milliseconds (default: 1).
    pub min_heartbeat_interval_ms: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_MTU * usize::from(DEFAULT_HISTORY),
            history: DEFAULT_HISTORY,
            header_offset: message_header_size(DEFAULT_SESSION_ID),
            min_heartbeat_interval_ms: DEFAULT_MIN_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl StreamConfig {
    /// Per-slot capacity implied by `buffer_size` and `history`.
    pub fn slot_capacity(&self) -> usize {
        if self.history == 0 {
            0
        } else {
            self.buffer_size / usize::from(self.history)
        }
    }

    /// Validate configuration. Returns Ok(()) if valid.
    pub fn validate(&self) -> Result<(), XrceError> {
        if self.history == 0 || !self.history.is_power_of_two() {
            return Err(XrceError::ConfigError(
                "history must be a power of two".into(),
            ));
        }
        self.check_capacity(self.slot_capacity())
    }

    /// Check the parts of the configuration that depend on the actual slot
    /// capacity of a backing store.
    pub(crate) fn check_capacity(&self, capacity: usize) -> Result<(), XrceError> {
        // A fragment needs its subheader plus at least one payload byte.
        if capacity <= self.header_offset + SUBHEADER_SIZE {
            return Err(XrceError::ConfigError(format!(
                "slot capacity {} too small for header offset {}",
                capacity, self.header_offset
            )));
        }
        // Fragment lengths travel in a u16 field.
        if capacity > usize::from(u16::MAX) {
            return Err(XrceError::ConfigError(
                "slot capacity must be <= 65535".into(),
            ));
        }
        if self.min_heartbeat_interval_ms <= 0 {
            return Err(XrceError::ConfigError(
                "min_heartbeat_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session id (default: 0x81). Ids below 0x80 put the client key in
    /// every message header.
    pub session_id: u8,
    /// Client key sent in headers when `session_id < 0x80`.
    pub client_key: [u8; 4],
    /// Reliable output stream id (default: 0x80).
    pub output_stream_id: u8,
    /// Reliable input stream id (default: 0x80).
    pub input_stream_id: u8,
    /// Transport MTU, also the slot capacity (default: 512).
    pub mtu: usize,
    /// Slots per reliable stream (default: 8).
    pub history: u16,
    /// Minimum heartbeat interval in milliseconds (default: 1).
    pub min_heartbeat_interval_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION_ID,
            client_key: [0xAA, 0xAA, 0xBB, 0xBB],
            output_stream_id: STREAM_ID_RELIABLE_FIRST,
            input_stream_id: STREAM_ID_RELIABLE_FIRST,
            mtu: DEFAULT_MTU,
            history: DEFAULT_HISTORY,
            min_heartbeat_interval_ms: DEFAULT_MIN_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Stream configuration derived from the session settings.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            buffer_size: self.mtu * usize::from(self.history),
            history: self.history,
            header_offset: message_header_size(self.session_id),
            min_heartbeat_interval_ms: self.min_heartbeat_interval_ms,
        }
    }

    /// Validate configuration. Returns Ok(()) if valid.
    pub fn validate(&self) -> Result<(), XrceError> {
        if self.output_stream_id < STREAM_ID_RELIABLE_FIRST {
            return Err(XrceError::ConfigError(
                "output_stream_id must be a reliable stream id (>= 0x80)".into(),
            ));
        }
        if self.input_stream_id < STREAM_ID_RELIABLE_FIRST {
            return Err(XrceError::ConfigError(
                "input_stream_id must be a reliable stream id (>= 0x80)".into(),
            ));
        }
        self.stream_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let stream = StreamConfig::default();
        assert_eq!(stream.slot_capacity(), 512);
        assert_eq!(stream.header_offset, 4);
        stream.validate().unwrap();
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let cfg = StreamConfig {
            history: 6,
            ..StreamConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = StreamConfig {
            buffer_size: 64,
            history: 8,
            ..StreamConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = StreamConfig {
            min_heartbeat_interval_ms: 0,
            ..StreamConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SessionConfig {
            output_stream_id: 0x01,
            ..SessionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(XrceError::ConfigError(_))));
    }

    #[test]
    fn test_client_key_widens_header_offset() {
        let cfg = SessionConfig {
            session_id: 0x01,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.stream_config().header_offset, 8);
    }
}
