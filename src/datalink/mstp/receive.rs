//! Receive frame state machine
//!
//! Assembles MS/TP frames one octet at a time. Each octet carries the tick at
//! which it arrived, so a gap longer than [`T_FRAME_ABORT`] between octets of
//! the same frame aborts it even if the octets are processed much later.
//!
//! Any failure sends the machine back to preamble search. The caller decides
//! what a failed frame means; the receiver only reports it.

use log::trace;

use super::{
    FrameType, MstpFrame, MSTP_MAX_DATA_LENGTH, MSTP_PREAMBLE_55, MSTP_PREAMBLE_FF, T_FRAME_ABORT,
};
use crate::util::{crc16_mstp, crc8_mstp_header};

/// Receive state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    /// Waiting for the first preamble octet
    #[default]
    Idle,
    /// Saw 0x55, expecting 0xFF
    Preamble,
    /// Collecting frame type, addresses and length
    Header,
    /// Expecting the header CRC octet
    HeaderCrc,
    /// Collecting data octets
    Data,
    /// Collecting the two data CRC octets
    DataCrc,
}

/// Why the receiver returned to preamble search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Both CRCs matched; the frame is available from [`FrameReceiver::take_frame`]
    Complete,
    BadHeaderCrc,
    BadDataCrc,
    /// The header announced more data than any frame may carry
    TooLong,
    /// Inter-octet timeout or line error inside a frame
    Aborted,
}

impl ReceiveOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ReceiveOutcome::Complete)
    }
}

/// Octet-at-a-time MS/TP frame assembler
#[derive(Debug, Default)]
pub struct FrameReceiver {
    state: ReceiveState,
    header: [u8; 5],
    index: usize,
    data_length: usize,
    data_crc: [u8; 2],
    last_octet_at: u32,
    frame: MstpFrame,
    complete: bool,
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Feed one octet received at `timestamp`
    pub fn receive_byte(&mut self, byte: u8, timestamp: u32) -> Option<ReceiveOutcome> {
        let gap = timestamp.wrapping_sub(self.last_octet_at);
        self.last_octet_at = timestamp;

        let timed_out = if self.state != ReceiveState::Idle && gap > T_FRAME_ABORT {
            self.abandon()
        } else {
            None
        };

        self.advance(byte).or(timed_out)
    }

    /// Abort a frame whose next octet is overdue at `now`
    ///
    /// An octet stamped after `now` counts as no gap at all.
    pub fn check_timeout(&mut self, now: u32) -> Option<ReceiveOutcome> {
        let gap = now.wrapping_sub(self.last_octet_at);
        if self.state != ReceiveState::Idle && gap > T_FRAME_ABORT && gap <= i32::MAX as u32 {
            self.abandon()
        } else {
            None
        }
    }

    /// Discard the frame in progress after a UART error
    pub fn line_error(&mut self) -> Option<ReceiveOutcome> {
        self.abandon()
    }

    /// The last complete frame, if it has not been taken
    pub fn frame(&self) -> Option<&MstpFrame> {
        self.complete.then_some(&self.frame)
    }

    /// Move the last complete frame out of the receiver
    pub fn take_frame(&mut self) -> Option<MstpFrame> {
        if self.complete {
            self.complete = false;
            Some(core::mem::take(&mut self.frame))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Return to idle; only a frame already past its preamble counts as aborted
    fn abandon(&mut self) -> Option<ReceiveOutcome> {
        let outcome = match self.state {
            ReceiveState::Idle | ReceiveState::Preamble => None,
            _ => Some(ReceiveOutcome::Aborted),
        };
        if outcome.is_some() {
            trace!("MS/TP rx: frame aborted in {:?}", self.state);
        }
        self.state = ReceiveState::Idle;
        outcome
    }

    fn advance(&mut self, byte: u8) -> Option<ReceiveOutcome> {
        match self.state {
            ReceiveState::Idle => {
                if byte == MSTP_PREAMBLE_55 {
                    self.state = ReceiveState::Preamble;
                }
                None
            }
            ReceiveState::Preamble => {
                self.state = match byte {
                    MSTP_PREAMBLE_FF => {
                        self.index = 0;
                        ReceiveState::Header
                    }
                    // A repeated first octet may still start a frame
                    MSTP_PREAMBLE_55 => ReceiveState::Preamble,
                    _ => ReceiveState::Idle,
                };
                None
            }
            ReceiveState::Header => {
                self.header[self.index] = byte;
                self.index += 1;
                if self.index == self.header.len() {
                    self.state = ReceiveState::HeaderCrc;
                }
                None
            }
            ReceiveState::HeaderCrc => self.finish_header(byte),
            ReceiveState::Data => {
                // Capacity was checked against data_length in finish_header
                let _ = self.frame.data.push(byte);
                if self.frame.data.len() == self.data_length {
                    self.index = 0;
                    self.state = ReceiveState::DataCrc;
                }
                None
            }
            ReceiveState::DataCrc => {
                self.data_crc[self.index] = byte;
                self.index += 1;
                if self.index < self.data_crc.len() {
                    return None;
                }
                self.state = ReceiveState::Idle;
                if crc16_mstp(&self.frame.data) == u16::from_le_bytes(self.data_crc) {
                    Some(self.finish_frame())
                } else {
                    Some(ReceiveOutcome::BadDataCrc)
                }
            }
        }
    }

    fn finish_header(&mut self, crc: u8) -> Option<ReceiveOutcome> {
        self.state = ReceiveState::Idle;
        if crc8_mstp_header(&self.header) != crc {
            return Some(ReceiveOutcome::BadHeaderCrc);
        }

        let [frame_type, destination, source, len_hi, len_lo] = self.header;
        self.frame.frame_type = FrameType::from(frame_type);
        self.frame.destination = destination;
        self.frame.source = source;
        self.frame.data.clear();
        self.complete = false;
        self.data_length = usize::from(u16::from_be_bytes([len_hi, len_lo]));

        if self.data_length == 0 {
            Some(self.finish_frame())
        } else if self.data_length > MSTP_MAX_DATA_LENGTH {
            Some(ReceiveOutcome::TooLong)
        } else {
            self.state = ReceiveState::Data;
            None
        }
    }

    fn finish_frame(&mut self) -> ReceiveOutcome {
        self.complete = true;
        trace!(
            "MS/TP rx: {} {} -> {} ({} bytes)",
            self.frame.frame_type,
            self.frame.source,
            self.frame.destination,
            self.frame.data.len()
        );
        ReceiveOutcome::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalink::mstp::{create_frame, MSTP_MAX_FRAME_SIZE};
    use proptest::prelude::*;
    use std::vec::Vec;

    fn feed(rx: &mut FrameReceiver, bytes: &[u8], timestamp: u32) -> Vec<ReceiveOutcome> {
        bytes
            .iter()
            .filter_map(|&b| rx.receive_byte(b, timestamp))
            .collect()
    }

    #[test]
    fn test_token_frame() {
        let mut rx = FrameReceiver::new();
        let bytes = hex::decode("55ff000102000040").unwrap();
        assert_eq!(feed(&mut rx, &bytes, 0), [ReceiveOutcome::Complete]);
        assert_eq!(rx.state(), ReceiveState::Idle);

        let frame = rx.frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Token);
        assert_eq!(frame.destination, 1);
        assert_eq!(frame.source, 2);

        let taken = rx.take_frame().unwrap();
        assert!(taken.data.is_empty());
        assert!(rx.frame().is_none());
    }

    #[test]
    fn test_data_frame() {
        let mut rx = FrameReceiver::new();
        let bytes = hex::decode("55ff06020100036301223010bd").unwrap();
        assert_eq!(feed(&mut rx, &bytes, 5), [ReceiveOutcome::Complete]);
        let frame = rx.take_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::BacnetDataNotExpectingReply);
        assert_eq!(&frame.data[..], &[0x01, 0x22, 0x30]);
    }

    #[test]
    fn test_noise_before_preamble() {
        let mut rx = FrameReceiver::new();
        let mut bytes = std::vec![0x00, 0x13, 0x55, 0x42, 0x55, 0x55];
        bytes.extend(hex::decode("ff000102000040").unwrap());
        assert_eq!(feed(&mut rx, &bytes, 0), [ReceiveOutcome::Complete]);
        assert_eq!(rx.frame().map(|f| f.source), Some(2));
    }

    #[test]
    fn test_bad_header_crc() {
        let mut rx = FrameReceiver::new();
        assert_eq!(
            feed(&mut rx, &hex::decode("55ff000102000041").unwrap(), 0),
            [ReceiveOutcome::BadHeaderCrc]
        );
        assert!(rx.take_frame().is_none());
        assert_eq!(rx.state(), ReceiveState::Idle);
    }

    #[test]
    fn test_bad_data_crc() {
        let mut rx = FrameReceiver::new();
        assert_eq!(
            feed(&mut rx, &hex::decode("55ff06020100036301223010be").unwrap(), 0),
            [ReceiveOutcome::BadDataCrc]
        );
        assert!(rx.take_frame().is_none());
    }

    #[test]
    fn test_too_long() {
        let mut rx = FrameReceiver::new();
        // length 0x01F6 = 502
        let header = [0x06, 0x02, 0x01, 0x01, 0xF6];
        let mut bytes = std::vec![0x55, 0xFF];
        bytes.extend_from_slice(&header);
        bytes.push(crc8_mstp_header(&header));
        assert_eq!(feed(&mut rx, &bytes, 0), [ReceiveOutcome::TooLong]);
        assert_eq!(rx.state(), ReceiveState::Idle);
    }

    #[test]
    fn test_inter_octet_gap_aborts() {
        let mut rx = FrameReceiver::new();
        let bytes = hex::decode("55ff06020100036301223010bd").unwrap();
        assert!(feed(&mut rx, &bytes[..6], 1_000).is_empty());
        assert_eq!(rx.state(), ReceiveState::Header);

        // The rest arrives 96 ms later
        assert_eq!(
            feed(&mut rx, &bytes[6..], 1_000 + T_FRAME_ABORT + 1),
            [ReceiveOutcome::Aborted]
        );
        assert!(rx.take_frame().is_none());
    }

    #[test]
    fn test_gap_within_limit_is_accepted() {
        let mut rx = FrameReceiver::new();
        let bytes = hex::decode("55ff000102000040").unwrap();
        let outcomes: Vec<_> = bytes
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| rx.receive_byte(b, i as u32 * T_FRAME_ABORT))
            .collect();
        assert_eq!(outcomes, [ReceiveOutcome::Complete]);
    }

    #[test]
    fn test_check_timeout() {
        let mut rx = FrameReceiver::new();
        feed(&mut rx, &[0x55, 0xFF, 0x00], 10);
        assert_eq!(rx.check_timeout(10 + T_FRAME_ABORT), None);
        assert_eq!(rx.check_timeout(11 + T_FRAME_ABORT), Some(ReceiveOutcome::Aborted));
        assert_eq!(rx.state(), ReceiveState::Idle);

        // Stale preamble resets quietly
        feed(&mut rx, &[0x55], 200);
        assert_eq!(rx.check_timeout(400), None);
        assert_eq!(rx.state(), ReceiveState::Idle);
    }

    #[test]
    fn test_check_timeout_before_octet_timestamp() {
        let mut rx = FrameReceiver::new();
        feed(&mut rx, &[0x55, 0xFF, 0x00, 0x01], 101);

        // Tick read just before the octets were stamped
        assert_eq!(rx.check_timeout(100), None);
        assert_eq!(rx.state(), ReceiveState::Header);

        assert_eq!(feed(&mut rx, &[0x02, 0x00, 0x00, 0x40], 102), [ReceiveOutcome::Complete]);
    }

    #[test]
    fn test_line_error() {
        let mut rx = FrameReceiver::new();
        assert_eq!(rx.line_error(), None);
        feed(&mut rx, &[0x55, 0xFF, 0x06, 0x02], 0);
        assert_eq!(rx.line_error(), Some(ReceiveOutcome::Aborted));

        // Resynchronises on the next frame
        let bytes = hex::decode("55ff000102000040").unwrap();
        assert_eq!(feed(&mut rx, &bytes, 1), [ReceiveOutcome::Complete]);
    }

    #[test]
    fn test_timestamp_wraparound() {
        let mut rx = FrameReceiver::new();
        let bytes = hex::decode("55ff000102000040").unwrap();
        let start = u32::MAX - 3;
        let outcomes: Vec<_> = bytes
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| rx.receive_byte(b, start.wrapping_add(i as u32)))
            .collect();
        assert_eq!(outcomes, [ReceiveOutcome::Complete]);
    }

    fn frame_bytes(frame_type: u8, destination: u8, source: u8, data: &[u8]) -> Vec<u8> {
        let mut buffer = [0u8; MSTP_MAX_FRAME_SIZE];
        let len = create_frame(&mut buffer, frame_type.into(), destination, source, data).unwrap();
        buffer[..len].to_vec()
    }

    proptest! {
        #[test]
        fn receiver_recovers_created_frames(
            frame_type in any::<u8>(),
            destination in any::<u8>(),
            source in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..=MSTP_MAX_DATA_LENGTH),
        ) {
            let mut rx = FrameReceiver::new();
            let bytes = frame_bytes(frame_type, destination, source, &data);
            prop_assert_eq!(feed(&mut rx, &bytes, 0), std::vec![ReceiveOutcome::Complete]);

            let frame = rx.take_frame().unwrap();
            prop_assert_eq!(u8::from(frame.frame_type), frame_type);
            prop_assert_eq!(frame.destination, destination);
            prop_assert_eq!(frame.source, source);
            prop_assert_eq!(&frame.data[..], &data[..]);
        }

        #[test]
        fn single_bit_flip_is_rejected(
            frame_type in 0u8..8,
            destination in any::<u8>(),
            source in any::<u8>(),
            data in proptest::collection::vec(0u8..0x55, 0..64),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut bytes = frame_bytes(frame_type, destination, source, &data);
            // Flip anywhere after the preamble
            let index = 2 + position.index(bytes.len() - 2);
            bytes[index] ^= 1 << bit;

            let mut rx = FrameReceiver::new();
            let outcomes = feed(&mut rx, &bytes, 0);
            prop_assert!(!outcomes.contains(&ReceiveOutcome::Complete));
            prop_assert!(matches!(
                outcomes.first(),
                Some(ReceiveOutcome::BadHeaderCrc) | Some(ReceiveOutcome::BadDataCrc)
            ));
            prop_assert!(rx.take_frame().is_none());
        }
    }
}
