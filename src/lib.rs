#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod datalink;
pub mod object;
pub mod transport;
pub mod util;

// Re-export main types without glob imports to avoid conflicts
pub use datalink::{DataLink, DataLinkAddress, DataLinkError, Dlmstp, NpduData, NpduHandler};
pub use datalink::mstp::{FrameType, MstpConfig, MstpFrame, MstpState};
pub use transport::{BaudRate, ByteTransport};
pub use util::{MillisecondClock, MsTimer, TickSource};

#[doc(hidden)]
pub use pastey;

pub const BACNET_PROTOCOL_VERSION: u8 = 1;

/// Largest APDU an MS/TP frame can carry
pub const BACNET_MAX_APDU: usize = 480;

/// Largest NPDU an MS/TP frame can carry
pub const BACNET_MAX_MPDU: usize = datalink::mstp::MSTP_MAX_DATA_LENGTH;

#[cfg(test)]
mod tests {
    use crate::datalink::mstp::{create_frame, MSTP_MAX_FRAME_SIZE};
    use crate::util::crc16_mstp;
    use crate::{DataLinkAddress, FrameType, MstpConfig};

    #[test]
    fn test_limits() {
        assert!(crate::BACNET_MAX_APDU < crate::BACNET_MAX_MPDU);
        let mut buffer = [0u8; MSTP_MAX_FRAME_SIZE];
        let payload = [0u8; crate::BACNET_MAX_MPDU];
        let len = create_frame(&mut buffer, FrameType::BacnetDataNotExpectingReply, 2, 1, &payload).unwrap();
        assert_eq!(len, MSTP_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_defaults() {
        let config = MstpConfig::default();
        assert_eq!(config.station_address, 1);
        assert_eq!(u32::from(config.baud_rate), 19200);
        assert_eq!(DataLinkAddress::Broadcast.mac(), 0xFF);
        assert_eq!(crc16_mstp(b"123456789"), 0x906E);
    }
}
