//! RS-485 Byte Transport Module
//!
//! This module provides the byte-level transport underneath the MS/TP
//! datalink: a half-duplex serial pipe with driver-enable control, a receive
//! FIFO that timestamps every byte, and latched line error flags.
//!
//! # Overview
//!
//! The transport handles:
//! - Receive FIFO filled from the receive interrupt, drained by the datalink task
//! - Interrupt-driven transmission of one frame at a time
//! - Driver-enable setup and hold timing around each transmission
//! - Overrun, framing, parity and FIFO overflow latches
//! - Byte counters for diagnostics
//!
//! The datalink only sees the [`ByteTransport`] trait, so the state machines
//! can be driven by the [`rs485::Rs485`] driver on hardware or by a scripted
//! transport in host tests.
//!
//! # Example
//!
//! ```
//! use bacnet_mstp::transport::BaudRate;
//!
//! let baud = BaudRate::try_from(38400).unwrap();
//! assert_eq!(u32::from(baud), 38400);
//! assert!(BaudRate::try_from(12345).is_err());
//! ```

pub mod fifo;
pub mod rs485;

pub use fifo::RxFifo;
pub use rs485::{Rs485, Uart};

use bitflags::bitflags;
use core::fmt;

use crate::datalink::{DataLinkError, Result};

/// Receive FIFO depth, in bytes
pub const RX_FIFO_SIZE: usize = 512;

/// Transmit buffer size; the largest MS/TP frame must fit
pub const TX_BUFFER_SIZE: usize = 512;

/// Standard MS/TP baud rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
pub enum BaudRate {
    B9600,
    #[default]
    B19200,
    B38400,
    B57600,
    B76800,
    B115200,
}

impl BaudRate {
    /// Every supported rate, slowest first
    pub const ALL: [BaudRate; 6] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B76800,
        BaudRate::B115200,
    ];

    /// Bits per second
    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B76800 => 76800,
            BaudRate::B115200 => 115200,
        }
    }

    /// Time on the wire for one 8N1 character, rounded up to whole microseconds
    pub const fn char_time_us(self) -> u32 {
        10_000_000u32.div_ceil(self.bps())
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = DataLinkError;

    fn try_from(value: u32) -> Result<Self> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.bps() == value)
            .ok_or(DataLinkError::UnsupportedBaudRate(value))
    }
}

impl From<BaudRate> for u32 {
    fn from(value: BaudRate) -> Self {
        value.bps()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps", self.bps())
    }
}

/// A received byte and the millisecond tick at which it arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxByte {
    pub byte: u8,
    pub timestamp: u32,
}

impl RxByte {
    pub const fn new(byte: u8, timestamp: u32) -> Self {
        Self { byte, timestamp }
    }
}

/// One entry of the receive stream, in arrival order
///
/// Line errors are queued between the bytes they interrupted, so the frame
/// assembler discards exactly the frame that lost data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    Byte(RxByte),
    /// The line reported errors at `timestamp`
    Error { errors: LineErrors, timestamp: u32 },
}

impl From<RxByte> for RxEvent {
    fn from(byte: RxByte) -> Self {
        RxEvent::Byte(byte)
    }
}

bitflags! {
    /// Receive line errors
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct LineErrors: u8 {
        const OVERRUN = 1 << 0;
        const FRAMING = 1 << 1;
        const PARITY = 1 << 2;
        /// A byte was lost because the receive FIFO was full
        const FIFO_OVERFLOW = 1 << 3;
    }
}

/// Byte-level transport counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportStatistics {
    /// Bytes taken off the line by the receive interrupt
    pub rx_bytes: u32,
    /// Bytes written to the UART
    pub tx_bytes: u32,
    /// Bytes dropped because the receive FIFO was full
    pub fifo_overflows: u32,
    /// Line error events (overrun, framing, parity)
    pub line_errors: u32,
}

impl TransportStatistics {
    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Half-duplex byte transport consumed by the MS/TP state machines
///
/// None of these calls may block beyond the driver-enable micro-delays.
pub trait ByteTransport {
    /// Flush the receive FIFO, abandon any transmission and release the bus
    fn initialize(&mut self);

    /// Change the line speed
    fn set_baud(&mut self, baud: BaudRate);

    /// Currently configured line speed
    fn baud(&self) -> BaudRate;

    /// True when no transmission is in flight
    fn transmit_ready(&self) -> bool;

    /// Start transmitting a complete frame
    ///
    /// Empty or oversized frames are rejected without touching the line, as
    /// is any frame offered while a previous one is still going out.
    fn send_frame(&mut self, bytes: &[u8]) -> Result<()>;

    /// True when at least one receive event is waiting
    fn data_available(&self) -> bool;

    /// Pop the oldest receive event
    fn receive(&mut self) -> Option<RxEvent>;

    /// Report and clear the latched error summary
    ///
    /// The latch is for diagnostics; the same errors also appear in the
    /// receive stream as [`RxEvent::Error`].
    fn receive_error(&mut self) -> bool {
        !self.take_errors().is_empty()
    }

    /// Take the latched error summary, clearing it
    fn take_errors(&mut self) -> LineErrors;

    /// Snapshot of the byte counters
    fn statistics(&self) -> TransportStatistics;

    /// Zero the byte counters
    fn reset_statistics(&mut self);
}

/// Checks a frame against the transmit buffer limits
pub(crate) fn check_frame_len(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(DataLinkError::EmptyFrame);
    }
    if bytes.len() > TX_BUFFER_SIZE {
        return Err(DataLinkError::FrameTooLarge {
            len: bytes.len(),
            max: TX_BUFFER_SIZE,
        });
    }
    Ok(())
}

/// Scripted transport for host tests
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// Records every frame sent and replays injected bytes and errors
    ///
    /// Transmissions complete instantly unless `hold_transmit` is set, in
    /// which case the transport reports busy until `complete_transmit`.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub rx: VecDeque<RxEvent>,
        pub sent: Vec<Vec<u8>>,
        pub errors: LineErrors,
        pub baud: BaudRate,
        pub hold_transmit: bool,
        pub busy: bool,
        pub initialized: u32,
        pub stats: TransportStatistics,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue bytes that all arrived at the same tick
        pub fn inject(&mut self, bytes: &[u8], timestamp: u32) {
            for &byte in bytes {
                self.rx.push_back(RxByte::new(byte, timestamp).into());
                self.stats.rx_bytes += 1;
            }
        }

        /// Queue a line error between the bytes already injected and the next
        pub fn inject_error(&mut self, errors: LineErrors, timestamp: u32) {
            self.rx.push_back(RxEvent::Error { errors, timestamp });
            self.errors |= errors;
            self.stats.line_errors += 1;
        }

        pub fn complete_transmit(&mut self) {
            self.busy = false;
        }

        /// Frames sent so far, oldest first, and forget them
        pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
            core::mem::take(&mut self.sent)
        }
    }

    impl ByteTransport for MockTransport {
        fn initialize(&mut self) {
            self.rx.clear();
            self.busy = false;
            self.errors = LineErrors::empty();
            self.initialized += 1;
        }

        fn set_baud(&mut self, baud: BaudRate) {
            self.baud = baud;
        }

        fn baud(&self) -> BaudRate {
            self.baud
        }

        fn transmit_ready(&self) -> bool {
            !self.busy
        }

        fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
            check_frame_len(bytes)?;
            if self.busy {
                return Err(DataLinkError::TransportBusy);
            }
            self.sent.push(bytes.to_vec());
            self.stats.tx_bytes += bytes.len() as u32;
            self.busy = self.hold_transmit;
            Ok(())
        }

        fn data_available(&self) -> bool {
            !self.rx.is_empty()
        }

        fn receive(&mut self) -> Option<RxEvent> {
            self.rx.pop_front()
        }

        fn take_errors(&mut self) -> LineErrors {
            core::mem::take(&mut self.errors)
        }

        fn statistics(&self) -> TransportStatistics {
            self.stats
        }

        fn reset_statistics(&mut self) {
            self.stats.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn test_baud_rate_set() {
        for rate in BaudRate::ALL {
            assert_eq!(BaudRate::try_from(rate.bps()).unwrap(), rate);
        }
        assert_eq!(BaudRate::default(), BaudRate::B19200);
    }

    #[test]
    fn test_unsupported_baud_rate() {
        for bad in [0, 300, 4800, 12345, 14400, 230400] {
            match BaudRate::try_from(bad) {
                Err(DataLinkError::UnsupportedBaudRate(v)) => assert_eq!(v, bad),
                other => panic!("expected rejection for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_char_time() {
        assert_eq!(BaudRate::B9600.char_time_us(), 1042);
        assert_eq!(BaudRate::B115200.char_time_us(), 87);
    }

    #[test]
    fn test_frame_length_limits() {
        assert!(matches!(check_frame_len(&[]), Err(DataLinkError::EmptyFrame)));
        assert!(check_frame_len(&[0u8; TX_BUFFER_SIZE]).is_ok());
        assert!(matches!(
            check_frame_len(&[0u8; TX_BUFFER_SIZE + 1]),
            Err(DataLinkError::FrameTooLarge { len: 513, max: 512 })
        ));
    }

    #[test]
    fn test_receive_error_clears_latch() {
        let mut transport = MockTransport::new();
        transport.inject_error(LineErrors::OVERRUN | LineErrors::FRAMING, 3);
        assert!(transport.receive_error());
        assert!(!transport.receive_error());
        // The stream copy is still queued
        assert_eq!(
            transport.receive(),
            Some(RxEvent::Error {
                errors: LineErrors::OVERRUN | LineErrors::FRAMING,
                timestamp: 3
            })
        );
    }

    #[test]
    fn test_mock_transport_busy() {
        let mut transport = MockTransport::new();
        transport.hold_transmit = true;
        transport.send_frame(&[0x55, 0xFF]).unwrap();
        assert!(!transport.transmit_ready());
        assert!(matches!(
            transport.send_frame(&[0x55]),
            Err(DataLinkError::TransportBusy)
        ));
        transport.complete_transmit();
        assert!(transport.transmit_ready());
        assert_eq!(transport.take_sent().len(), 1);
    }
}
