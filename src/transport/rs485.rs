//! RS-485 half-duplex driver
//!
//! Drives a UART through its transmit-empty interrupt and toggles the
//! transceiver's driver-enable line around each frame. The receive side only
//! queues bytes; frame assembly happens later in the datalink task.
//!
//! The driver is shared between interrupt handlers and the main loop, so
//! every method takes `&self`. Typical wiring:
//!
//! ```ignore
//! // 1 ms timer interrupt
//! CLOCK.tick();
//!
//! // UART interrupt
//! if uart.overrun() { RS485.on_line_error(LineErrors::OVERRUN, CLOCK.now()); }
//! if uart.rx_ready() { RS485.on_byte_received(uart.read(), CLOCK.now()); }
//! if uart.tx_empty() { RS485.on_transmit_empty(); }
//! if uart.tx_complete() { RS485.on_transmit_complete(); }
//! ```
//!
//! The setup and hold delays spin inside a critical section. They are the
//! only blocking waits in the stack and are bounded by [`DRIVER_SETUP_US`]
//! and [`DRIVER_HOLD_US`]. Waiting for the shift register to empty is left
//! to the transmit-complete interrupt.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{debug, trace, warn};

use super::{
    check_frame_len, BaudRate, ByteTransport, LineErrors, RxByte, RxEvent, RxFifo, TransportStatistics,
    RX_FIFO_SIZE, TX_BUFFER_SIZE,
};
use crate::datalink::{DataLinkError, Result};

/// Driver-enable setup time before the first start bit
pub const DRIVER_SETUP_US: u32 = 10;

/// Driver-enable hold time after the last stop bit
pub const DRIVER_HOLD_US: u32 = 10;

/// Register-level UART access needed by [`Rs485`]
pub trait Uart {
    /// Reprogram the baud rate generator
    fn set_baud_rate(&mut self, baud: BaudRate);

    /// Load one byte into the transmit holding register
    fn write_byte(&mut self, byte: u8);

    /// Enable or disable the transmit-empty interrupt
    fn set_tx_interrupt(&mut self, enabled: bool);

    /// Enable or disable the interrupt raised once the shift register has
    /// sent the last stop bit
    fn set_tx_complete_interrupt(&mut self, enabled: bool);
}

struct Hardware<U, P, D> {
    uart: U,
    driver_enable: P,
    delay: D,
    baud: BaudRate,
    buffer: heapless::Vec<u8, TX_BUFFER_SIZE>,
    pos: usize,
}

impl<U: Uart, P: OutputPin, D: DelayNs> Hardware<U, P, D> {
    fn enable_driver(&mut self) {
        if self.driver_enable.set_high().is_err() {
            warn!("RS-485: failed to assert driver enable");
        }
    }

    fn release_driver(&mut self) {
        if self.driver_enable.set_low().is_err() {
            warn!("RS-485: failed to release driver enable");
        }
    }
}

/// Interrupt-driven RS-485 transport
pub struct Rs485<U, P, D> {
    hw: Mutex<RefCell<Hardware<U, P, D>>>,
    rx: RxFifo<RX_FIFO_SIZE>,
    transmitting: AtomicBool,
    errors: Mutex<Cell<LineErrors>>,
    stats: Mutex<Cell<TransportStatistics>>,
}

impl<U: Uart, P: OutputPin, D: DelayNs> Rs485<U, P, D> {
    /// Take ownership of the UART, driver-enable pin and delay provider
    ///
    /// Call [`initialize`](ByteTransport::initialize) before enabling the
    /// UART interrupts.
    pub fn new(uart: U, driver_enable: P, delay: D) -> Self {
        Self {
            hw: Mutex::new(RefCell::new(Hardware {
                uart,
                driver_enable,
                delay,
                baud: BaudRate::default(),
                buffer: heapless::Vec::new(),
                pos: 0,
            })),
            rx: RxFifo::new(),
            transmitting: AtomicBool::new(false),
            errors: Mutex::new(Cell::new(LineErrors::empty())),
            stats: Mutex::new(Cell::new(TransportStatistics::default())),
        }
    }

    /// Give the peripherals back
    pub fn release(self) -> (U, P, D) {
        let hw = self.hw.into_inner().into_inner();
        (hw.uart, hw.driver_enable, hw.delay)
    }

    fn update_stats(&self, f: impl FnOnce(&mut TransportStatistics)) {
        critical_section::with(|cs| {
            let cell = self.stats.borrow(cs);
            let mut stats = cell.get();
            f(&mut stats);
            cell.set(stats);
        });
    }

    fn latch(&self, errors: LineErrors) {
        critical_section::with(|cs| {
            let cell = self.errors.borrow(cs);
            cell.set(cell.get() | errors);
        });
    }

    /// Receive interrupt entry point
    ///
    /// Report any line error for this character with
    /// [`on_line_error`](Self::on_line_error) first, so the error lands ahead
    /// of it in the stream.
    pub fn on_byte_received(&self, byte: u8, timestamp: u32) {
        let queued = self.rx.push(RxByte::new(byte, timestamp));
        self.update_stats(|stats| {
            stats.rx_bytes = stats.rx_bytes.wrapping_add(1);
            if !queued {
                stats.fifo_overflows = stats.fifo_overflows.wrapping_add(1);
            }
        });
        if !queued {
            self.latch(LineErrors::FIFO_OVERFLOW);
        }
    }

    /// Line error interrupt entry point
    ///
    /// The error is queued behind the bytes already received; the frame
    /// assembler drops whatever frame it is in when it reaches it.
    pub fn on_line_error(&self, errors: LineErrors, timestamp: u32) {
        if errors.is_empty() {
            return;
        }
        if !self.rx.push_error(errors, timestamp) {
            self.latch(LineErrors::FIFO_OVERFLOW);
        }
        self.latch(errors);
        self.update_stats(|stats| stats.line_errors = stats.line_errors.wrapping_add(1));
    }

    /// Transmit-empty interrupt entry point
    ///
    /// Loads the next byte. After the last one it hands over to the
    /// transmit-complete interrupt.
    pub fn on_transmit_empty(&self) {
        let sent_byte = critical_section::with(|cs| {
            let mut hw = self.hw.borrow_ref_mut(cs);
            let hw = &mut *hw;

            if let Some(&byte) = hw.buffer.get(hw.pos) {
                hw.uart.write_byte(byte);
                hw.pos += 1;
                return true;
            }

            hw.uart.set_tx_interrupt(false);
            if self.transmitting.load(Ordering::Acquire) {
                hw.uart.set_tx_complete_interrupt(true);
            }
            false
        });

        if sent_byte {
            self.update_stats(|stats| stats.tx_bytes = stats.tx_bytes.wrapping_add(1));
        }
    }

    /// Transmit-complete interrupt entry point
    ///
    /// The last stop bit is out: hold the driver for [`DRIVER_HOLD_US`],
    /// then return the bus to receive mode.
    pub fn on_transmit_complete(&self) {
        critical_section::with(|cs| {
            let mut hw = self.hw.borrow_ref_mut(cs);
            hw.uart.set_tx_complete_interrupt(false);
            if !self.transmitting.load(Ordering::Acquire) || hw.pos < hw.buffer.len() {
                return;
            }
            hw.delay.delay_us(DRIVER_HOLD_US);
            hw.release_driver();
            trace!("RS-485: {} bytes out", hw.buffer.len());
            hw.buffer.clear();
            hw.pos = 0;
            self.transmitting.store(false, Ordering::Release);
        });
    }

    /// Bytes waiting in the receive FIFO
    pub fn rx_pending(&self) -> usize {
        self.rx.len()
    }
}

impl<U, P, D> ByteTransport for &Rs485<U, P, D>
where
    U: Uart,
    P: OutputPin,
    D: DelayNs,
{
    fn initialize(&mut self) {
        critical_section::with(|cs| {
            let mut hw = self.hw.borrow_ref_mut(cs);
            hw.uart.set_tx_interrupt(false);
            hw.uart.set_tx_complete_interrupt(false);
            hw.release_driver();
            hw.buffer.clear();
            hw.pos = 0;
            let baud = hw.baud;
            hw.uart.set_baud_rate(baud);
            self.transmitting.store(false, Ordering::Release);
            self.errors.borrow(cs).set(LineErrors::empty());
        });
        self.rx.clear();
        debug!("RS-485: initialized");
    }

    fn set_baud(&mut self, baud: BaudRate) {
        critical_section::with(|cs| {
            let mut hw = self.hw.borrow_ref_mut(cs);
            hw.baud = baud;
            hw.uart.set_baud_rate(baud);
        });
        debug!("RS-485: baud rate {}", baud);
    }

    fn baud(&self) -> BaudRate {
        critical_section::with(|cs| self.hw.borrow_ref(cs).baud)
    }

    fn transmit_ready(&self) -> bool {
        !self.transmitting.load(Ordering::Acquire)
    }

    fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
        check_frame_len(bytes)?;

        critical_section::with(|cs| -> Result<()> {
            if self.transmitting.load(Ordering::Acquire) {
                return Err(DataLinkError::TransportBusy);
            }

            let mut hw = self.hw.borrow_ref_mut(cs);
            let hw = &mut *hw;
            hw.buffer.clear();
            hw.buffer
                .extend_from_slice(bytes)
                .map_err(|_| DataLinkError::FrameTooLarge {
                    len: bytes.len(),
                    max: TX_BUFFER_SIZE,
                })?;

            self.transmitting.store(true, Ordering::Release);
            hw.enable_driver();
            hw.delay.delay_us(DRIVER_SETUP_US);

            // The first byte primes the transmit-empty interrupt
            hw.uart.write_byte(bytes[0]);
            hw.pos = 1;
            hw.uart.set_tx_interrupt(true);
            Ok(())
        })?;

        self.update_stats(|stats| stats.tx_bytes = stats.tx_bytes.wrapping_add(1));
        Ok(())
    }

    fn data_available(&self) -> bool {
        !self.rx.is_empty()
    }

    fn receive(&mut self) -> Option<RxEvent> {
        self.rx.pop()
    }

    fn take_errors(&mut self) -> LineErrors {
        critical_section::with(|cs| self.errors.borrow(cs).replace(LineErrors::empty()))
    }

    fn statistics(&self) -> TransportStatistics {
        critical_section::with(|cs| self.stats.borrow(cs).get())
    }

    fn reset_statistics(&mut self) {
        critical_section::with(|cs| self.stats.borrow(cs).set(TransportStatistics::default()));
        self.rx.reset_overflows();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockUart {
        written: Vec<u8>,
        tx_interrupt: bool,
        tc_interrupt: bool,
        baud: Option<BaudRate>,
    }

    impl Uart for MockUart {
        fn set_baud_rate(&mut self, baud: BaudRate) {
            self.baud = Some(baud);
        }

        fn write_byte(&mut self, byte: u8) {
            self.written.push(byte);
        }

        fn set_tx_interrupt(&mut self, enabled: bool) {
            self.tx_interrupt = enabled;
        }

        fn set_tx_complete_interrupt(&mut self, enabled: bool) {
            self.tc_interrupt = enabled;
        }
    }

    #[derive(Default)]
    struct MockPin {
        history: Vec<bool>,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> core::result::Result<(), Infallible> {
            self.history.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> core::result::Result<(), Infallible> {
            self.history.push(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDelay {
        total_ns: u64,
    }

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }

    fn driver() -> Rs485<MockUart, MockPin, MockDelay> {
        let rs485 = Rs485::new(MockUart::default(), MockPin::default(), MockDelay::default());
        (&rs485).initialize();
        rs485
    }

    #[test]
    fn test_initialize_leaves_receive_mode() {
        let rs485 = driver();
        assert!((&rs485).transmit_ready());
        let (uart, pin, _) = rs485.release();
        assert_eq!(pin.history, [false]);
        assert_eq!(uart.baud, Some(BaudRate::B19200));
        assert!(!uart.tx_interrupt);
    }

    #[test]
    fn test_send_frame_interrupt_driven() {
        let rs485 = driver();
        let mut port = &rs485;
        let frame = [0x55, 0xFF, 0x00, 0x01, 0x02, 0x00, 0x00, 0x40];

        port.send_frame(&frame).unwrap();
        assert!(!port.transmit_ready());
        assert!(matches!(
            port.send_frame(&frame),
            Err(DataLinkError::TransportBusy)
        ));

        // One interrupt per remaining byte, then one more once the buffer is empty
        for _ in 1..frame.len() {
            rs485.on_transmit_empty();
            assert!(!port.transmit_ready());
        }
        rs485.on_transmit_empty();
        assert_eq!(port.statistics().tx_bytes, frame.len() as u32);

        // The driver stays on until the last stop bit is out
        assert!(!port.transmit_ready());
        rs485.on_transmit_complete();
        assert!(port.transmit_ready());

        let (uart, pin, delay) = rs485.release();
        assert_eq!(uart.written, frame);
        assert!(!uart.tx_interrupt);
        assert!(!uart.tc_interrupt);
        // init low, enable high, release low
        assert_eq!(pin.history, [false, true, false]);
        assert!(delay.total_ns >= u64::from(DRIVER_SETUP_US + DRIVER_HOLD_US) * 1_000);
    }

    #[test]
    fn test_early_transmit_complete_keeps_driver() {
        let rs485 = driver();
        let mut port = &rs485;
        port.send_frame(&[0x55, 0xFF, 0x00]).unwrap();

        // Shift register idle between bytes: not the end of the frame
        rs485.on_transmit_complete();
        assert!(!port.transmit_ready());

        rs485.on_transmit_empty();
        rs485.on_transmit_empty();
        rs485.on_transmit_empty();
        rs485.on_transmit_complete();
        assert!(port.transmit_ready());

        let (uart, pin, delay) = rs485.release();
        assert_eq!(uart.written, [0x55, 0xFF, 0x00]);
        assert_eq!(pin.history, [false, true, false]);
        // Only the setup and hold waits, never a spin on the shift register
        assert_eq!(delay.total_ns, u64::from(DRIVER_SETUP_US + DRIVER_HOLD_US) * 1_000);
    }

    #[test]
    fn test_send_frame_rejects_bad_lengths() {
        let rs485 = driver();
        let mut port = &rs485;
        assert!(matches!(port.send_frame(&[]), Err(DataLinkError::EmptyFrame)));
        assert!(matches!(
            port.send_frame(&[0u8; TX_BUFFER_SIZE + 1]),
            Err(DataLinkError::FrameTooLarge { .. })
        ));
        assert!(port.transmit_ready());

        let (uart, pin, _) = rs485.release();
        assert!(uart.written.is_empty());
        assert_eq!(pin.history, [false]);
    }

    #[test]
    fn test_receive_with_timestamps() {
        let rs485 = driver();
        let mut port = &rs485;
        assert!(!port.data_available());

        rs485.on_byte_received(0x55, 10);
        rs485.on_byte_received(0xFF, 11);
        assert!(port.data_available());
        assert_eq!(rs485.rx_pending(), 2);

        assert_eq!(port.receive(), Some(RxEvent::Byte(RxByte::new(0x55, 10))));
        assert_eq!(port.receive(), Some(RxEvent::Byte(RxByte::new(0xFF, 11))));
        assert_eq!(port.receive(), None);
        assert_eq!(port.statistics().rx_bytes, 2);
    }

    #[test]
    fn test_fifo_overflow_latches_error() {
        let rs485 = driver();
        let mut port = &rs485;
        for i in 0..=RX_FIFO_SIZE {
            rs485.on_byte_received(i as u8, 0);
        }
        assert_eq!(port.statistics().fifo_overflows, 1);
        assert_eq!(port.take_errors(), LineErrors::FIFO_OVERFLOW);
        assert!(!port.receive_error());
    }

    #[test]
    fn test_line_errors_latched_until_read() {
        let rs485 = driver();
        let mut port = &rs485;
        rs485.on_line_error(LineErrors::FRAMING, 0);
        rs485.on_line_error(LineErrors::OVERRUN, 1);
        assert_eq!(port.take_errors(), LineErrors::FRAMING | LineErrors::OVERRUN);
        assert!(port.take_errors().is_empty());
        assert_eq!(port.statistics().line_errors, 2);

        port.reset_statistics();
        assert_eq!(port.statistics(), TransportStatistics::default());
    }

    #[test]
    fn test_line_error_queued_in_stream_order() {
        let rs485 = driver();
        let mut port = &rs485;
        rs485.on_byte_received(0x55, 4);
        rs485.on_line_error(LineErrors::PARITY, 5);
        rs485.on_byte_received(0xFF, 6);

        assert_eq!(port.receive(), Some(RxEvent::Byte(RxByte::new(0x55, 4))));
        assert_eq!(
            port.receive(),
            Some(RxEvent::Error {
                errors: LineErrors::PARITY,
                timestamp: 5
            })
        );
        assert_eq!(port.receive(), Some(RxEvent::Byte(RxByte::new(0xFF, 6))));
        assert_eq!(port.take_errors(), LineErrors::PARITY);
    }

    #[test]
    fn test_set_baud() {
        let rs485 = driver();
        let mut port = &rs485;
        port.set_baud(BaudRate::B76800);
        assert_eq!(port.baud(), BaudRate::B76800);
        let (uart, _, _) = rs485.release();
        assert_eq!(uart.baud, Some(BaudRate::B76800));
    }
}
