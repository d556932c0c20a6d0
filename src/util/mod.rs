//! Utility Functions Module
//!
//! This module provides common helpers used throughout the MS/TP stack.
//!
//! # Overview
//!
//! Utilities provided include:
//! - CRC calculation for MS/TP frame headers and data
//! - Millisecond timers (see [`mstimer`])
//! - Protocol statistics counters
//! - A macro for enums with reserved and proprietary value ranges
//!
//! # Example
//!
//! ```
//! use bacnet_mstp::util::{crc16_mstp, crc8_mstp_header};
//!
//! // Worked examples from ASHRAE 135 Annex G
//! assert_eq!(crc8_mstp_header(&[0x00, 0x10, 0x05, 0x00, 0x00]), 0x8C);
//! assert_eq!(crc16_mstp(&[0x01, 0x22, 0x30]), 0xBD10);
//! ```

pub mod enum_macros;
pub mod mstimer;

pub use mstimer::{MillisecondClock, MsTimer, TickSource};

use crc::{Algorithm, Crc, CRC_16_IBM_SDLC};

/// MS/TP header CRC: x^8 + x^7 + 1, LSB first, initial 0xFF, ones complement.
pub const CRC_8_MSTP_HEADER: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x81,
    init: 0xff,
    refin: true,
    refout: true,
    xorout: 0xff,
    check: 0x89,
    residue: 0xaa,
};

const HEADER_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_MSTP_HEADER);

/// MS/TP data CRC is CRC-CCITT, LSB first, initial 0xFFFF, ones complement.
const DATA_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Calculate the CRC-8 over an MS/TP header (frame type through data length)
pub fn crc8_mstp_header(header: &[u8]) -> u8 {
    HEADER_CRC.checksum(header)
}

/// Calculate the CRC-16 over MS/TP frame data
///
/// The result is transmitted least significant octet first.
pub fn crc16_mstp(data: &[u8]) -> u16 {
    DATA_CRC.checksum(data)
}

/// Statistics collection helpers
pub mod statistics {
    /// MS/TP port counters
    ///
    /// All counters wrap on overflow; they are diagnostics, not protocol state.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct MstpStatistics {
        /// Frames that passed both CRC checks
        pub frames_received: u32,
        /// Frames handed to the transport
        pub frames_sent: u32,
        /// Header CRC failures
        pub header_crc_errors: u32,
        /// Data CRC failures
        pub data_crc_errors: u32,
        /// Frames abandoned on line error, inter-byte timeout or oversize
        pub aborted_frames: u32,
        /// Data frames delivered to the upper layer
        pub pdus_delivered: u32,
        /// Tokens addressed to this station
        pub tokens_received: u32,
        /// Tokens passed to another station
        pub tokens_passed: u32,
        /// Poll-For-Master frames sent
        pub polls_sent: u32,
        /// Expected replies that never arrived
        pub reply_timeouts: u32,
        /// Times this station regenerated a lost token
        pub lost_tokens: u32,
    }

    impl MstpStatistics {
        /// Create new statistics
        pub fn new() -> Self {
            Self::default()
        }

        /// Record a frame that passed validation
        pub fn record_received(&mut self) {
            self.frames_received = self.frames_received.wrapping_add(1);
        }

        /// Record a frame handed to the transport
        pub fn record_sent(&mut self) {
            self.frames_sent = self.frames_sent.wrapping_add(1);
        }

        /// Total frames rejected for any reason
        pub fn invalid_frames(&self) -> u32 {
            self.header_crc_errors
                .wrapping_add(self.data_crc_errors)
                .wrapping_add(self.aborted_frames)
        }

        /// Reset all statistics
        pub fn reset(&mut self) {
            *self = Self::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::statistics::MstpStatistics;
    use super::*;

    #[test]
    fn test_header_crc_annex_g() {
        // Token from 0x05 to 0x10
        assert_eq!(crc8_mstp_header(&[0x00, 0x10, 0x05, 0x00, 0x00]), 0x8C);
        assert_eq!(crc8_mstp_header(b"123456789"), 0x89);
    }

    #[test]
    fn test_data_crc_annex_g() {
        let crc = crc16_mstp(&[0x01, 0x22, 0x30]);
        assert_eq!(crc, 0xBD10);
        // Sent low octet first
        assert_eq!(crc.to_le_bytes(), [0x10, 0xBD]);
        assert_eq!(crc16_mstp(b"123456789"), 0x906E);
    }

    #[test]
    fn test_statistics_reset() {
        let mut stats = MstpStatistics::new();
        stats.record_received();
        stats.record_sent();
        stats.header_crc_errors = 2;
        stats.aborted_frames = 1;
        assert_eq!(stats.invalid_frames(), 3);

        stats.reset();
        assert_eq!(stats, MstpStatistics::default());
    }
}
