//! BACnet MS/TP (Master-Slave/Token-Passing) Data Link Implementation
//!
//! This module implements the BACnet MS/TP data link layer as defined in ASHRAE 135 Clause 9.
//! MS/TP provides multi-drop, half-duplex communication over EIA-485 (RS-485) physical layer.
//!
//! # Overview
//!
//! MS/TP provides:
//! - Token-passing protocol for medium access control ([`master`])
//! - Byte-level frame reception with CRC checks and timeouts ([`receive`])
//! - Master and slave node support
//! - Automatic token management and lost token recovery
//! - Support for up to 128 master nodes (addresses 0-127)
//! - Slave nodes at addresses 128-254
//!
//! # Frame Format
//!
//! MS/TP Frame:
//! - Preamble (2 bytes): 0x55, 0xFF
//! - Frame Type (1 byte)
//! - Destination Address (1 byte)
//! - Source Address (1 byte)
//! - Data Length (2 bytes, big-endian)
//! - Header CRC (1 byte)
//! - Data (0-501 bytes)
//! - Data CRC (2 bytes, little-endian) - only if data length > 0
//!
//! # Example
//!
//! ```
//! use bacnet_mstp::datalink::mstp::{create_frame, FrameType, MSTP_MAX_FRAME_SIZE};
//!
//! let mut buffer = [0u8; MSTP_MAX_FRAME_SIZE];
//! let len = create_frame(&mut buffer, FrameType::Token, 1, 2, &[]).unwrap();
//! assert_eq!(&buffer[..len], &[0x55, 0xFF, 0x00, 0x01, 0x02, 0x00, 0x00, 0x40]);
//! ```

pub mod master;
pub mod receive;

pub use master::{MstpIo, MstpPort, MstpState};
pub use receive::{FrameReceiver, ReceiveOutcome, ReceiveState};

use crate::datalink::{DataLinkError, Result};
use crate::transport::BaudRate;
use crate::util::{crc16_mstp, crc8_mstp_header};

/// MS/TP frame preamble bytes
pub const MSTP_PREAMBLE_55: u8 = 0x55;
pub const MSTP_PREAMBLE_FF: u8 = 0xFF;

/// Maximum MS/TP data length
pub const MSTP_MAX_DATA_LENGTH: usize = 501;

/// MS/TP header size (without data)
pub const MSTP_HEADER_SIZE: usize = 8;

/// MS/TP maximum frame size
pub const MSTP_MAX_FRAME_SIZE: usize = MSTP_HEADER_SIZE + MSTP_MAX_DATA_LENGTH + 2;

/// Destination address reaching every station
pub const MSTP_BROADCAST_ADDRESS: u8 = 255;

/// Highest address a master node may use
pub const MSTP_MAX_MASTER: u8 = 127;

/// Highest address any node may use
pub const MSTP_MAX_STATION: u8 = 254;

/// Tokens between maintenance Poll For Master cycles
pub const N_POLL: u8 = 50;

/// Retries of a token pass before searching for a new successor
pub const N_RETRY_TOKEN: u8 = 1;

/// Octets that must be seen before a station is considered active
pub const N_MIN_OCTETS: u8 = 4;

/// Maximum gap between octets of one frame, in milliseconds
pub const T_FRAME_ABORT: u32 = 95;

/// Token generation slot width, in milliseconds
pub const T_SLOT: u32 = 10;

/// Silence after which the token is assumed lost, in milliseconds
pub const T_NO_TOKEN: u32 = 500;

/// Time to wait for a reply to a data frame, in milliseconds
pub const T_REPLY_TIMEOUT: u32 = 255;

/// Time the upper layer has to produce a reply, in milliseconds
pub const T_REPLY_DELAY: u32 = 250;

/// Time to wait for a passed token or poll to be used, in milliseconds
pub const T_USAGE_TIMEOUT: u32 = 50;

crate::generate_custom_enum! {
    /// MS/TP frame types
    ///
    /// Types 8-127 are reserved by ASHRAE and 128-255 are proprietary. Both
    /// are carried through the receiver but never acted on.
    FrameType {
        Token = 0,
        PollForMaster = 1,
        ReplyToPollForMaster = 2,
        TestRequest = 3,
        TestResponse = 4,
        BacnetDataExpectingReply = 5,
        BacnetDataNotExpectingReply = 6,
        ReplyPostponed = 7,
    },
    u8,
    128..=255
}

impl FrameType {
    /// Check if this frame type carries an NPDU
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            FrameType::BacnetDataExpectingReply | FrameType::BacnetDataNotExpectingReply
        )
    }
}

impl Default for FrameType {
    fn default() -> Self {
        FrameType::Token
    }
}

/// Encode the eight header octets, preamble and CRC included
pub fn encode_header(frame_type: FrameType, destination: u8, source: u8, data_length: u16) -> [u8; MSTP_HEADER_SIZE] {
    let [len_hi, len_lo] = data_length.to_be_bytes();
    let mut header = [
        MSTP_PREAMBLE_55,
        MSTP_PREAMBLE_FF,
        frame_type.into(),
        destination,
        source,
        len_hi,
        len_lo,
        0,
    ];
    header[7] = crc8_mstp_header(&header[2..7]);
    header
}

/// Write a complete MS/TP frame into `buffer`
///
/// Returns the number of bytes written. Nothing is written if the data
/// exceeds [`MSTP_MAX_DATA_LENGTH`] or the frame does not fit.
pub fn create_frame(
    buffer: &mut [u8],
    frame_type: FrameType,
    destination: u8,
    source: u8,
    data: &[u8],
) -> Result<usize> {
    if data.len() > MSTP_MAX_DATA_LENGTH {
        return Err(DataLinkError::PduTooLarge {
            len: data.len(),
            max: MSTP_MAX_DATA_LENGTH,
        });
    }
    let needed = frame_size(data.len());
    if buffer.len() < needed {
        return Err(DataLinkError::BufferTooSmall {
            needed,
            capacity: buffer.len(),
        });
    }

    let header = encode_header(frame_type, destination, source, data.len() as u16);
    buffer[..MSTP_HEADER_SIZE].copy_from_slice(&header);
    if !data.is_empty() {
        let data_end = MSTP_HEADER_SIZE + data.len();
        buffer[MSTP_HEADER_SIZE..data_end].copy_from_slice(data);
        buffer[data_end..needed].copy_from_slice(&crc16_mstp(data).to_le_bytes());
    }
    Ok(needed)
}

/// On-wire size of a frame carrying `data_length` octets
pub const fn frame_size(data_length: usize) -> usize {
    if data_length == 0 {
        MSTP_HEADER_SIZE
    } else {
        MSTP_HEADER_SIZE + data_length + 2
    }
}

/// MS/TP frame structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MstpFrame {
    /// Frame type
    pub frame_type: FrameType,
    /// Destination address
    pub destination: u8,
    /// Source address
    pub source: u8,
    /// Frame data
    pub data: heapless::Vec<u8, MSTP_MAX_DATA_LENGTH>,
}

impl MstpFrame {
    /// Create a new MS/TP frame
    pub fn new(frame_type: FrameType, destination: u8, source: u8, data: &[u8]) -> Result<Self> {
        let data = heapless::Vec::from_slice(data).map_err(|_| DataLinkError::PduTooLarge {
            len: data.len(),
            max: MSTP_MAX_DATA_LENGTH,
        })?;
        Ok(Self {
            frame_type,
            destination,
            source,
            data,
        })
    }

    /// Create a token frame
    pub fn token(destination: u8, source: u8) -> Self {
        Self::control(FrameType::Token, destination, source)
    }

    /// Create a Poll For Master frame
    pub fn poll_for_master(destination: u8, source: u8) -> Self {
        Self::control(FrameType::PollForMaster, destination, source)
    }

    fn control(frame_type: FrameType, destination: u8, source: u8) -> Self {
        Self {
            frame_type,
            destination,
            source,
            data: heapless::Vec::new(),
        }
    }

    /// Create a BACnet data frame
    pub fn bacnet_data(destination: u8, source: u8, data: &[u8], expecting_reply: bool) -> Result<Self> {
        let frame_type = if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };
        Self::new(frame_type, destination, source, data)
    }

    pub fn data_length(&self) -> u16 {
        self.data.len() as u16
    }

    /// Encode the frame into `buffer`, returning the length written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        create_frame(buffer, self.frame_type, self.destination, self.source, &self.data)
    }

    /// Decode one complete frame from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MSTP_HEADER_SIZE {
            return Err(DataLinkError::InvalidFrame);
        }
        if bytes[0] != MSTP_PREAMBLE_55 || bytes[1] != MSTP_PREAMBLE_FF {
            return Err(DataLinkError::InvalidFrame);
        }
        if crc8_mstp_header(&bytes[2..7]) != bytes[7] {
            return Err(DataLinkError::CrcError);
        }

        let data_length = usize::from(u16::from_be_bytes([bytes[5], bytes[6]]));
        if data_length > MSTP_MAX_DATA_LENGTH || bytes.len() != frame_size(data_length) {
            return Err(DataLinkError::InvalidFrame);
        }

        let data = &bytes[MSTP_HEADER_SIZE..MSTP_HEADER_SIZE + data_length];
        if data_length > 0 {
            let crc_at = MSTP_HEADER_SIZE + data_length;
            let received = u16::from_le_bytes([bytes[crc_at], bytes[crc_at + 1]]);
            if crc16_mstp(data) != received {
                return Err(DataLinkError::CrcError);
            }
        }

        Self::new(bytes[2].into(), bytes[3], bytes[4], data)
    }

    /// Check if this is a token frame
    pub fn is_token(&self) -> bool {
        self.frame_type == FrameType::Token
    }

    /// Check if this is a data frame
    pub fn is_data(&self) -> bool {
        self.frame_type.is_data()
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == MSTP_BROADCAST_ADDRESS
    }
}

/// Outbound NPDU staged by the upper layer until this station holds the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitPacket {
    pub frame_type: FrameType,
    pub destination: u8,
    pub pdu: heapless::Vec<u8, MSTP_MAX_DATA_LENGTH>,
}

impl TransmitPacket {
    pub fn new(frame_type: FrameType, destination: u8, pdu: &[u8]) -> Result<Self> {
        if pdu.is_empty() {
            return Err(DataLinkError::EmptyPdu);
        }
        let pdu = heapless::Vec::from_slice(pdu).map_err(|_| DataLinkError::PduTooLarge {
            len: pdu.len(),
            max: MSTP_MAX_DATA_LENGTH,
        })?;
        Ok(Self {
            frame_type,
            destination,
            pdu,
        })
    }

    /// True if sending this packet obliges the station to wait for a reply
    pub fn expects_reply(&self) -> bool {
        match self.frame_type {
            FrameType::BacnetDataExpectingReply => self.destination != MSTP_BROADCAST_ADDRESS,
            FrameType::TestRequest => true,
            _ => false,
        }
    }
}

/// MS/TP node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MstpConfig {
    /// Local station address (0-254, 255 is broadcast)
    pub station_address: u8,
    /// Maximum master address (highest master on network)
    pub max_master: u8,
    /// Maximum info frames (number of frames to send when holding token)
    pub max_info_frames: u8,
    /// Line speed
    pub baud_rate: BaudRate,
    /// Lost token timeout (milliseconds)
    pub token_timeout: u32,
    /// Reply timeout (milliseconds)
    pub reply_timeout: u32,
    /// Time allowed for the upper layer to produce a reply (milliseconds)
    pub reply_delay: u32,
    /// Usage timeout (milliseconds)
    pub usage_timeout: u32,
}

impl Default for MstpConfig {
    fn default() -> Self {
        Self {
            station_address: 1,
            max_master: MSTP_MAX_MASTER,
            max_info_frames: 1,
            baud_rate: BaudRate::B19200,
            token_timeout: T_NO_TOKEN,
            reply_timeout: T_REPLY_TIMEOUT,
            reply_delay: T_REPLY_DELAY,
            usage_timeout: T_USAGE_TIMEOUT,
        }
    }
}

impl MstpConfig {
    /// Check every field against its legal range
    pub fn validate(&self) -> Result<()> {
        validate_station_address(self.station_address)?;
        validate_max_master(self.max_master)?;
        validate_max_info_frames(self.max_info_frames)?;
        Ok(())
    }

    /// True if this station takes part in token passing
    pub fn is_master(&self) -> bool {
        is_master_node(self.station_address) && self.station_address <= self.max_master
    }
}

/// Validate MS/TP station address
pub fn validate_station_address(address: u8) -> Result<()> {
    if address > MSTP_MAX_STATION {
        return Err(DataLinkError::InvalidStationAddress(address));
    }
    Ok(())
}

pub fn validate_max_master(max_master: u8) -> Result<()> {
    if max_master > MSTP_MAX_MASTER {
        return Err(DataLinkError::InvalidMaxMaster(max_master));
    }
    Ok(())
}

pub fn validate_max_info_frames(max_info_frames: u8) -> Result<()> {
    if max_info_frames == 0 {
        return Err(DataLinkError::InvalidMaxInfoFrames(max_info_frames));
    }
    Ok(())
}

/// Check if address is a master node
pub fn is_master_node(address: u8) -> bool {
    address <= MSTP_MAX_MASTER
}

/// Check if address is a slave node
pub fn is_slave_node(address: u8) -> bool {
    (MSTP_MAX_MASTER + 1..=MSTP_MAX_STATION).contains(&address)
}
