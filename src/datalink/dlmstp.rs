//! MS/TP Datalink Facade
//!
//! [`Dlmstp`] ties the pieces together: it owns a [`ByteTransport`], a
//! [`TickSource`], the upper layer's [`NpduHandler`] and one [`MstpPort`].
//! The network layer stages at most one outbound NPDU with
//! [`send_pdu`](Dlmstp::send_pdu) and calls [`task`](Dlmstp::task) from its
//! main loop; inbound NPDUs come back through the handler from inside `task`.
//!
//! # Example
//!
//! ```
//! use bacnet_mstp::datalink::{DataLinkAddress, Dlmstp, NpduData};
//! use bacnet_mstp::transport::{BaudRate, ByteTransport, LineErrors, RxEvent, TransportStatistics};
//! use bacnet_mstp::util::MillisecondClock;
//!
//! /// A line nobody else is listening on
//! struct Loopback;
//!
//! impl ByteTransport for Loopback {
//!     fn initialize(&mut self) {}
//!     fn set_baud(&mut self, _baud: BaudRate) {}
//!     fn baud(&self) -> BaudRate { BaudRate::B38400 }
//!     fn transmit_ready(&self) -> bool { true }
//!     fn send_frame(&mut self, _bytes: &[u8]) -> bacnet_mstp::datalink::Result<()> { Ok(()) }
//!     fn data_available(&self) -> bool { false }
//!     fn receive(&mut self) -> Option<RxEvent> { None }
//!     fn take_errors(&mut self) -> LineErrors { LineErrors::empty() }
//!     fn statistics(&self) -> TransportStatistics { TransportStatistics::default() }
//!     fn reset_statistics(&mut self) {}
//! }
//!
//! let clock = MillisecondClock::new();
//! let mut dl = Dlmstp::new(Loopback, &clock, |_src: DataLinkAddress, _pdu: &[u8]| {});
//! dl.set_mac_address(3).unwrap();
//! dl.init("rs485").unwrap();
//!
//! let sent = dl.send_pdu(&DataLinkAddress::Broadcast, &NpduData::default(), &[0x01, 0x00]).unwrap();
//! assert_eq!(sent, 2);
//! assert!(dl.send_pdu(&DataLinkAddress::Broadcast, &NpduData::default(), &[0x01]).is_err());
//! dl.task();
//! ```

use log::{debug, info, warn};

use super::mstp::{
    validate_max_info_frames, validate_max_master, validate_station_address, FrameType, MstpConfig, MstpIo,
    MstpPort, MstpState, TransmitPacket,
};
use super::{DataLink, DataLinkAddress, NpduData, NpduHandler, Result};
use crate::transport::{BaudRate, ByteTransport, RxEvent};
use crate::util::statistics::MstpStatistics;
use crate::util::TickSource;

/// Upper bound on immediate state transitions per `task` call
const MAX_STEPS_PER_TASK: usize = 16;

/// MS/TP datalink over a byte transport
pub struct Dlmstp<T, C, H> {
    transport: T,
    clock: C,
    handler: H,
    config: MstpConfig,
    port: MstpPort,
    pending: Option<TransmitPacket>,
    initialized: bool,
}

impl<T, C, H> Dlmstp<T, C, H>
where
    T: ByteTransport,
    C: TickSource,
    H: NpduHandler,
{
    /// Datalink with the default configuration (station 1, 19200 baud)
    pub fn new(transport: T, clock: C, handler: H) -> Self {
        let config = MstpConfig::default();
        Self {
            port: MstpPort::new(&config),
            transport,
            clock,
            handler,
            config,
            pending: None,
            initialized: false,
        }
    }

    /// Datalink with a validated configuration
    pub fn with_config(config: MstpConfig, transport: T, clock: C, handler: H) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            port: MstpPort::new(&config),
            transport,
            clock,
            handler,
            config,
            pending: None,
            initialized: false,
        })
    }

    /// Bring up the transport and start the node state machine
    ///
    /// Calling it again restarts the port from scratch.
    pub fn init(&mut self, interface_name: &str) -> Result<()> {
        self.config.validate()?;
        self.transport.initialize();
        self.transport.set_baud(self.config.baud_rate);
        self.port.reset(self.clock.now());
        self.pending = None;
        self.initialized = true;
        info!(
            "MS/TP: {} up, station {} max master {} at {} baud",
            interface_name, self.config.station_address, self.config.max_master, self.config.baud_rate
        );
        Ok(())
    }

    /// Stop taking part in the network; `task` does nothing until `init`
    pub fn cleanup(&mut self) {
        if self.initialized {
            info!("MS/TP: station {} shut down", self.config.station_address);
        }
        self.initialized = false;
        self.pending = None;
        self.port.reset(self.clock.now());
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Stage one NPDU; it is sent the next time this station holds the token
    ///
    /// Fails with [`DataLinkError::TransmitBusy`](super::DataLinkError::TransmitBusy)
    /// while an earlier NPDU is still staged; that NPDU is kept.
    pub fn send_pdu(&mut self, dest: &DataLinkAddress, npdu: &NpduData, pdu: &[u8]) -> Result<usize> {
        let frame_type = if npdu.data_expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };
        let packet = TransmitPacket::new(frame_type, dest.mac(), pdu)?;

        if self.pending.is_some() {
            warn!("MS/TP: transmit slot busy, {} byte PDU to {} rejected", pdu.len(), dest);
            return Err(super::DataLinkError::TransmitBusy);
        }

        debug!("MS/TP: staged {} bytes for {}", pdu.len(), dest);
        self.pending = Some(packet);
        Ok(pdu.len())
    }

    /// Run the receive path and the node state machine until both settle
    ///
    /// Never blocks. Inbound NPDUs reach the handler from here.
    pub fn task(&mut self) {
        if !self.initialized {
            return;
        }

        loop {
            if self.port.frame_pending() {
                self.run_port();
                if self.port.frame_pending() {
                    // The node is busy; leave the rest in the FIFO
                    break;
                }
            }
            match self.transport.receive() {
                Some(RxEvent::Byte(rx)) => {
                    self.port.receive_byte(rx);
                }
                Some(RxEvent::Error { errors, timestamp }) => {
                    warn!("MS/TP: line errors {:?}", errors);
                    self.port.line_error(timestamp);
                }
                None => break,
            }
        }

        // Read after draining: octets stamped during the drain are not stale.
        // A byte still queued means the line was not idle.
        if !self.transport.data_available() {
            self.port.check_receive_timeout(self.clock.now());
        }
        self.run_port();
    }

    fn run_port(&mut self) {
        let Self {
            transport,
            clock,
            handler,
            port,
            pending,
            ..
        } = self;
        let mut io = PortIo {
            transport,
            clock,
            handler,
            pending,
        };
        for _ in 0..MAX_STEPS_PER_TASK {
            if !port.step(&mut io) {
                break;
            }
        }
    }

    pub fn my_address(&self) -> DataLinkAddress {
        DataLinkAddress::MsTP(self.config.station_address)
    }

    pub fn broadcast_address(&self) -> DataLinkAddress {
        DataLinkAddress::Broadcast
    }

    pub fn mac_address(&self) -> u8 {
        self.config.station_address
    }

    /// Change this station's address (0-254); a new address restarts the port
    pub fn set_mac_address(&mut self, mac: u8) -> Result<()> {
        validate_station_address(mac)?;
        if mac != self.config.station_address {
            self.config.station_address = mac;
            self.port.set_this_station(mac, self.clock.now());
        }
        Ok(())
    }

    pub fn max_master(&self) -> u8 {
        self.config.max_master
    }

    pub fn set_max_master(&mut self, max_master: u8) -> Result<()> {
        validate_max_master(max_master)?;
        self.config.max_master = max_master;
        self.port.set_max_master(max_master);
        Ok(())
    }

    pub fn max_info_frames(&self) -> u8 {
        self.config.max_info_frames
    }

    pub fn set_max_info_frames(&mut self, max_info_frames: u8) -> Result<()> {
        validate_max_info_frames(max_info_frames)?;
        self.config.max_info_frames = max_info_frames;
        self.port.set_max_info_frames(max_info_frames);
        Ok(())
    }

    pub fn baud_rate(&self) -> BaudRate {
        self.config.baud_rate
    }

    /// Change the line speed; rates outside the MS/TP set change nothing
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        let baud = BaudRate::try_from(baud)?;
        self.config.baud_rate = baud;
        if self.initialized {
            self.transport.set_baud(baud);
        }
        info!("MS/TP: baud rate {}", baud);
        Ok(())
    }

    pub fn config(&self) -> &MstpConfig {
        &self.config
    }

    pub fn state(&self) -> MstpState {
        self.port.state()
    }

    pub fn port(&self) -> &MstpPort {
        &self.port
    }

    pub fn statistics(&self) -> &MstpStatistics {
        self.port.statistics()
    }

    /// Clear the port counters and the transport's byte counters
    pub fn reset_statistics(&mut self) {
        self.port.reset_statistics();
        self.transport.reset_statistics();
    }

    /// True while a staged NPDU waits for the token
    pub fn transmit_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

impl<T, C, H> DataLink for Dlmstp<T, C, H>
where
    T: ByteTransport,
    C: TickSource,
    H: NpduHandler,
{
    fn send_pdu(&mut self, dest: &DataLinkAddress, npdu: &NpduData, pdu: &[u8]) -> Result<usize> {
        Dlmstp::send_pdu(self, dest, npdu, pdu)
    }

    fn task(&mut self) {
        Dlmstp::task(self)
    }

    fn local_address(&self) -> DataLinkAddress {
        self.my_address()
    }
}

/// The facade's view of the world, lent to the port for one `task`
struct PortIo<'a, T, C, H> {
    transport: &'a mut T,
    clock: &'a C,
    handler: &'a mut H,
    pending: &'a mut Option<TransmitPacket>,
}

impl<T, C, H> MstpIo for PortIo<'_, T, C, H>
where
    T: ByteTransport,
    C: TickSource,
    H: NpduHandler,
{
    fn now(&self) -> u32 {
        self.clock.now()
    }

    fn transmit_ready(&self) -> bool {
        self.transport.transmit_ready()
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.send_frame(frame)
    }

    fn take_pdu(&mut self) -> Option<TransmitPacket> {
        self.pending.take()
    }

    fn take_reply(&mut self, requester: u8) -> Option<TransmitPacket> {
        let is_reply = self.pending.as_ref().is_some_and(|packet| {
            packet.destination == requester && packet.frame_type == FrameType::BacnetDataNotExpectingReply
        });
        if is_reply {
            self.pending.take()
        } else {
            None
        }
    }

    fn deliver(&mut self, source: u8, pdu: &[u8]) {
        self.handler.handle_npdu(DataLinkAddress::from_mac(source), pdu);
    }
}
