//! BACnet Data Link Layer Module
//!
//! This module implements the MS/TP data link layer for BACnet communication
//! over RS-485. The data link layer sits between the byte transport and the
//! network layer, handling frame-level communication and media access.
//!
//! # Overview
//!
//! The data link layer is responsible for:
//! - **Frame Assembly/Disassembly**: building and parsing MS/TP frames ([`mstp`])
//! - **Error Detection**: header CRC-8 and data CRC-16 verification
//! - **Media Access Control**: the token-passing master node state machine ([`mstp::master`])
//! - **Upper Layer Glue**: single-slot send and receive for the network layer ([`dlmstp`])
//!
//! # MS/TP (Master-Slave/Token-Passing)
//!
//! - RS-485 based serial communication
//! - Token-passing for media access control
//! - Up to 128 masters (0-127) and slaves up to 254
//! - Station 255 is the broadcast address
//!
//! # Architecture
//!
//! Upper layers talk to the [`DataLink`] trait and receive inbound NPDUs
//! through an [`NpduHandler`]. The facade owns the port state and a
//! [`ByteTransport`](crate::transport::ByteTransport).
//!
//! # Examples
//!
//! ```
//! use bacnet_mstp::datalink::{DataLinkAddress, DataLinkError};
//!
//! assert_eq!(DataLinkAddress::Broadcast.mac(), 255);
//! assert_eq!(DataLinkAddress::from_mac(255), DataLinkAddress::Broadcast);
//!
//! // Errors map onto the integer codes firmware expects
//! assert_eq!(DataLinkError::EmptyPdu.code(), -1);
//! assert_eq!(DataLinkError::TransmitBusy.code(), -2);
//! ```

use core::fmt;

use thiserror::Error;

/// Result type for data link operations.
pub type Result<T> = core::result::Result<T, DataLinkError>;

/// Errors that can occur during data link layer operations.
///
/// Nothing in the data link aborts: every anomaly is either a state machine
/// transition or one of these values returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DataLinkError {
    /// `send_pdu` was given no data.
    #[error("PDU is empty")]
    EmptyPdu,

    /// The PDU does not fit in one MS/TP frame.
    #[error("PDU of {len} bytes exceeds the {max} byte limit")]
    PduTooLarge { len: usize, max: usize },

    /// A PDU is already staged and waiting for the token.
    ///
    /// The staged PDU is kept; the caller should retry after the next token.
    #[error("transmit slot already holds a PDU")]
    TransmitBusy,

    /// The frame encoder was handed a buffer that is too small.
    #[error("buffer of {capacity} bytes cannot hold a {needed} byte frame")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// Station address outside 0-254.
    #[error("invalid station address {0}")]
    InvalidStationAddress(u8),

    /// Max master outside 0-127.
    #[error("invalid max master {0}")]
    InvalidMaxMaster(u8),

    /// Max info frames must be at least one.
    #[error("invalid max info frames {0}")]
    InvalidMaxInfoFrames(u8),

    /// Baud rate not in the standard MS/TP set.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// Invalid frame format detected.
    #[error("invalid frame format")]
    InvalidFrame,

    /// CRC check failed during frame validation.
    #[error("CRC check failed")]
    CrcError,

    /// The transport was asked to send zero bytes.
    #[error("empty frame")]
    EmptyFrame,

    /// The frame does not fit in the transport's transmit buffer.
    #[error("frame of {len} bytes exceeds the {max} byte transmit buffer")]
    FrameTooLarge { len: usize, max: usize },

    /// A transmission is already in flight.
    #[error("transport busy")]
    TransportBusy,

    /// Destination cannot be expressed as an MS/TP station.
    #[error("address error")]
    AddressError,
}

impl DataLinkError {
    /// Negative integer code for C-style callers
    ///
    /// - `-1` invalid argument
    /// - `-2` transmit slot busy
    /// - `-3` configuration rejected
    /// - `-4` transport rejected the frame
    pub fn code(&self) -> i32 {
        match self {
            DataLinkError::EmptyPdu
            | DataLinkError::PduTooLarge { .. }
            | DataLinkError::InvalidFrame
            | DataLinkError::CrcError
            | DataLinkError::AddressError => -1,
            DataLinkError::TransmitBusy => -2,
            DataLinkError::InvalidStationAddress(_)
            | DataLinkError::InvalidMaxMaster(_)
            | DataLinkError::InvalidMaxInfoFrames(_)
            | DataLinkError::UnsupportedBaudRate(_) => -3,
            DataLinkError::BufferTooSmall { .. }
            | DataLinkError::EmptyFrame
            | DataLinkError::FrameTooLarge { .. }
            | DataLinkError::TransportBusy => -4,
        }
    }
}

/// Data link layer address representation.
///
/// # Examples
///
/// ```
/// use bacnet_mstp::datalink::DataLinkAddress;
///
/// let device = DataLinkAddress::MsTP(42);
/// assert_eq!(device.mac(), 42);
/// assert!(DataLinkAddress::Broadcast.is_broadcast());
/// assert!(DataLinkAddress::MsTP(255).is_broadcast());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataLinkAddress {
    /// MS/TP station address.
    ///
    /// Valid ranges:
    /// - 0-127: Master nodes (can initiate communication)
    /// - 128-254: Slave nodes (only respond to requests)
    MsTP(u8),

    /// Broadcast to all stations on the segment (MAC 255).
    Broadcast,
}

impl DataLinkAddress {
    /// One-octet MS/TP MAC for this address
    pub fn mac(&self) -> u8 {
        match self {
            DataLinkAddress::MsTP(station) => *station,
            DataLinkAddress::Broadcast => mstp::MSTP_BROADCAST_ADDRESS,
        }
    }

    /// Address for a MAC read off the wire
    pub fn from_mac(mac: u8) -> Self {
        if mac == mstp::MSTP_BROADCAST_ADDRESS {
            DataLinkAddress::Broadcast
        } else {
            DataLinkAddress::MsTP(mac)
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.mac() == mstp::MSTP_BROADCAST_ADDRESS
    }
}

impl fmt::Display for DataLinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkAddress::MsTP(station) if *station != mstp::MSTP_BROADCAST_ADDRESS => {
                write!(f, "MS/TP {}", station)
            }
            _ => f.write_str("MS/TP broadcast"),
        }
    }
}

/// NPDU control information the data link needs from the network layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NpduData {
    /// Sent as BACnet-Data-Expecting-Reply when set
    pub data_expecting_reply: bool,
}

impl NpduData {
    pub const fn expecting_reply() -> Self {
        Self {
            data_expecting_reply: true,
        }
    }

    pub const fn not_expecting_reply() -> Self {
        Self {
            data_expecting_reply: false,
        }
    }
}

/// Receiver for inbound NPDUs
///
/// Called from inside the datalink task once per validated data frame
/// addressed to this station or to broadcast. It must return promptly.
///
/// Any `FnMut(DataLinkAddress, &[u8])` closure is a handler.
pub trait NpduHandler {
    fn handle_npdu(&mut self, source: DataLinkAddress, pdu: &[u8]);
}

impl<F> NpduHandler for F
where
    F: FnMut(DataLinkAddress, &[u8]),
{
    fn handle_npdu(&mut self, source: DataLinkAddress, pdu: &[u8]) {
        self(source, pdu)
    }
}

/// Common interface the network layer uses to reach a data link.
pub trait DataLink {
    /// Stage an NPDU for transmission to `dest`.
    ///
    /// Returns the number of bytes accepted. The frame goes out the next time
    /// this station holds the token.
    fn send_pdu(&mut self, dest: &DataLinkAddress, npdu: &NpduData, pdu: &[u8]) -> Result<usize>;

    /// Run the data link; call from the main loop at a bounded interval.
    fn task(&mut self);

    /// The address that identifies this station on the segment.
    fn local_address(&self) -> DataLinkAddress;

    /// The address that reaches every station on the segment.
    fn broadcast_address(&self) -> DataLinkAddress {
        DataLinkAddress::Broadcast
    }
}

/// MS/TP (Master-Slave/Token-Passing) frame codec and state machines.
pub mod mstp;

/// Datalink facade owning the port, transport and upper layer handler.
pub mod dlmstp;

pub use dlmstp::Dlmstp;
pub use mstp::{FrameType, MstpConfig, MstpFrame};
