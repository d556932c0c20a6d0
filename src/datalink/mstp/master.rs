//! MS/TP node state machines
//!
//! [`MstpPort`] holds everything one MS/TP port needs between calls: the
//! receive frame assembler, the master node state, the token bookkeeping and
//! the silence timer. It never touches hardware directly; every side effect
//! goes through an [`MstpIo`] supplied by the caller on each step.
//!
//! # Master node states
//!
//! - `Initialize`: forget the successor, schedule a poll on first token
//! - `Idle`: wait for a frame; answer polls, tests and data
//! - `UseToken`: send one staged frame
//! - `WaitForReply`: wait up to Treply_timeout for the answer
//! - `DoneWithToken`: send more, pass the token or poll for a master
//! - `PassToken`: watch the successor start using the token
//! - `NoToken`: staggered wait before generating a new token
//! - `PollForMaster`: look for a successor
//! - `AnswerDataRequest`: reply, or postpone the reply
//!
//! Stations above `max_master` run the slave node machine, which only uses
//! `Idle` and `AnswerDataRequest`.

use log::{debug, info, trace, warn};

use super::{
    create_frame, FrameType, MstpConfig, MstpFrame, ReceiveOutcome, TransmitPacket, FrameReceiver,
    MSTP_MAX_FRAME_SIZE, N_MIN_OCTETS, N_POLL, N_RETRY_TOKEN, T_SLOT,
};
use crate::datalink::Result;
use crate::transport::RxByte;
use crate::util::statistics::MstpStatistics;
use crate::util::MsTimer;

/// MS/TP node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MstpState {
    /// Initialize state
    #[default]
    Initialize,
    /// Idle state (no token)
    Idle,
    /// Use token state
    UseToken,
    /// Waiting for the reply to a data frame
    WaitForReply,
    /// Done with token state
    DoneWithToken,
    /// Pass token state
    PassToken,
    /// Silence detected, deciding whether to generate a token
    NoToken,
    /// Looking for a successor station
    PollForMaster,
    /// Answer data request state
    AnswerDataRequest,
}

/// Side effects available to the node state machines
pub trait MstpIo {
    /// Current millisecond tick
    fn now(&self) -> u32;

    /// True when the previous frame has left the line
    fn transmit_ready(&self) -> bool;

    /// Put a fully encoded frame on the line
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Take the next frame the upper layer wants sent while holding the token
    fn take_pdu(&mut self) -> Option<TransmitPacket>;

    /// Take a staged reply for `requester`, if the upper layer has one
    fn take_reply(&mut self, requester: u8) -> Option<TransmitPacket>;

    /// Hand an inbound NPDU to the upper layer
    fn deliver(&mut self, source: u8, pdu: &[u8]);
}

#[derive(Debug)]
enum Received {
    Valid(MstpFrame),
    Invalid,
}

/// One MS/TP port: receive assembler plus node state machine
#[derive(Debug)]
pub struct MstpPort {
    this_station: u8,
    max_master: u8,
    max_info_frames: u8,
    token_timeout: u32,
    reply_timeout: u32,
    reply_delay: u32,
    usage_timeout: u32,

    state: MstpState,
    receiver: FrameReceiver,
    received: Option<Received>,

    next_station: u8,
    poll_station: u8,
    token_count: u8,
    frame_count: u8,
    retry_count: u8,
    event_count: u8,
    sole_master: bool,
    requester: u8,

    silence: MsTimer,
    transmitting: bool,
    tx_buffer: [u8; MSTP_MAX_FRAME_SIZE],
    stats: MstpStatistics,
}

impl MstpPort {
    /// Create a port in the `Initialize` state
    ///
    /// The configuration is assumed valid; see [`MstpConfig::validate`].
    pub fn new(config: &MstpConfig) -> Self {
        Self {
            this_station: config.station_address,
            max_master: config.max_master,
            max_info_frames: config.max_info_frames,
            token_timeout: config.token_timeout,
            reply_timeout: config.reply_timeout,
            reply_delay: config.reply_delay,
            usage_timeout: config.usage_timeout,
            state: MstpState::Initialize,
            receiver: FrameReceiver::new(),
            received: None,
            next_station: config.station_address,
            poll_station: config.station_address,
            token_count: 0,
            frame_count: 0,
            retry_count: 0,
            event_count: 0,
            sole_master: false,
            requester: 0,
            silence: MsTimer::new(),
            transmitting: false,
            tx_buffer: [0; MSTP_MAX_FRAME_SIZE],
            stats: MstpStatistics::new(),
        }
    }

    /// Drop any partial or pending frame and restart from `Initialize`
    pub fn reset(&mut self, now: u32) {
        self.state = MstpState::Initialize;
        self.receiver.reset();
        self.received = None;
        self.event_count = 0;
        self.transmitting = false;
        self.silence.reset(now);
    }

    pub fn state(&self) -> MstpState {
        self.state
    }

    pub fn this_station(&self) -> u8 {
        self.this_station
    }

    /// Change the station address; a new address restarts the node
    pub fn set_this_station(&mut self, station: u8, now: u32) {
        if station != self.this_station {
            info!("MS/TP: station address {} -> {}", self.this_station, station);
            self.this_station = station;
            self.next_station = station;
            self.poll_station = station;
            self.reset(now);
        }
    }

    pub fn max_master(&self) -> u8 {
        self.max_master
    }

    pub fn set_max_master(&mut self, max_master: u8) {
        self.max_master = max_master;
        if self.next_station > max_master {
            self.next_station = self.this_station;
        }
        if self.poll_station > max_master {
            self.poll_station = self.this_station;
        }
    }

    pub fn max_info_frames(&self) -> u8 {
        self.max_info_frames
    }

    pub fn set_max_info_frames(&mut self, max_info_frames: u8) {
        self.max_info_frames = max_info_frames;
    }

    /// True if this station takes part in token passing
    pub fn is_master(&self) -> bool {
        self.this_station <= self.max_master
    }

    /// Station the token is passed to; equal to this station when unknown
    pub fn next_station(&self) -> u8 {
        self.next_station
    }

    pub fn poll_station(&self) -> u8 {
        self.poll_station
    }

    pub fn token_count(&self) -> u8 {
        self.token_count
    }

    pub fn sole_master(&self) -> bool {
        self.sole_master
    }

    pub fn event_count(&self) -> u8 {
        self.event_count
    }

    /// Milliseconds since the line was last active
    ///
    /// Activity stamped after `now` counts as zero silence.
    pub fn silence(&self, now: u32) -> u32 {
        let elapsed = self.silence.elapsed(now);
        if elapsed > i32::MAX as u32 {
            0
        } else {
            elapsed
        }
    }

    /// True while a received frame waits for the node state machine
    pub fn frame_pending(&self) -> bool {
        self.received.is_some()
    }

    pub fn statistics(&self) -> &MstpStatistics {
        &self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    /// Feed one received octet to the frame assembler
    pub fn receive_byte(&mut self, rx: RxByte) -> Option<ReceiveOutcome> {
        self.touch(rx.timestamp);
        self.event_count = self.event_count.saturating_add(1);
        let outcome = self.receiver.receive_byte(rx.byte, rx.timestamp)?;
        self.record(outcome);
        Some(outcome)
    }

    /// Abort a partial frame whose next octet is overdue
    pub fn check_receive_timeout(&mut self, now: u32) {
        if let Some(outcome) = self.receiver.check_timeout(now) {
            self.record(outcome);
        }
    }

    /// Report a UART error; the partial frame, if any, is discarded
    pub fn line_error(&mut self, now: u32) {
        self.touch(now);
        self.event_count = self.event_count.saturating_add(1);
        if let Some(outcome) = self.receiver.line_error() {
            self.record(outcome);
        }
    }

    /// Run one transition of the node state machine
    ///
    /// Returns `true` when the machine should be stepped again immediately.
    /// Nothing happens while the transport is still sending.
    pub fn step<I: MstpIo>(&mut self, io: &mut I) -> bool {
        if !io.transmit_ready() {
            return false;
        }
        let now = io.now();
        if self.transmitting {
            self.transmitting = false;
            self.silence.reset(now);
        }

        if self.is_master() {
            self.master_step(io, now)
        } else {
            self.slave_step(io, now)
        }
    }

    /// Restart the silence timer unless the octet predates the last restart
    fn touch(&mut self, at: u32) {
        if self.silence.elapsed(at) <= i32::MAX as u32 {
            self.silence.reset(at);
        }
    }

    fn record(&mut self, outcome: ReceiveOutcome) {
        match outcome {
            ReceiveOutcome::Complete => {
                self.stats.record_received();
                if let Some(frame) = self.receiver.take_frame() {
                    self.received = Some(Received::Valid(frame));
                }
                return;
            }
            ReceiveOutcome::BadHeaderCrc => {
                self.stats.header_crc_errors = self.stats.header_crc_errors.wrapping_add(1);
                warn!("MS/TP: header CRC error");
            }
            ReceiveOutcome::BadDataCrc => {
                self.stats.data_crc_errors = self.stats.data_crc_errors.wrapping_add(1);
                warn!("MS/TP: data CRC error");
            }
            ReceiveOutcome::TooLong | ReceiveOutcome::Aborted => {
                self.stats.aborted_frames = self.stats.aborted_frames.wrapping_add(1);
                debug!("MS/TP: frame discarded ({:?})", outcome);
            }
        }
        if self.received.is_none() {
            self.received = Some(Received::Invalid);
        }
    }

    fn set_state(&mut self, state: MstpState) {
        if state != self.state {
            debug!("MS/TP: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Address after `station`, wrapping at `max_master`
    fn following(&self, station: u8) -> u8 {
        ((u16::from(station) + 1) % (u16::from(self.max_master) + 1)) as u8
    }

    fn send<I: MstpIo>(&mut self, io: &mut I, frame_type: FrameType, destination: u8, data: &[u8]) {
        let result = create_frame(&mut self.tx_buffer, frame_type, destination, self.this_station, data)
            .and_then(|len| io.send_frame(&self.tx_buffer[..len]));
        match result {
            Ok(()) => {
                self.stats.record_sent();
                trace!("MS/TP tx: {} {} -> {} ({} bytes)", frame_type, self.this_station, destination, data.len());
            }
            Err(e) => warn!("MS/TP: {} to {} not sent: {}", frame_type, destination, e),
        }
        self.silence.reset(io.now());
        self.transmitting = !io.transmit_ready();
    }

    fn send_token<I: MstpIo>(&mut self, io: &mut I) {
        self.send(io, FrameType::Token, self.next_station, &[]);
        self.stats.tokens_passed = self.stats.tokens_passed.wrapping_add(1);
        self.retry_count = 0;
        self.event_count = 0;
        self.set_state(MstpState::PassToken);
    }

    fn send_poll<I: MstpIo>(&mut self, io: &mut I, station: u8) {
        self.poll_station = station;
        self.send(io, FrameType::PollForMaster, station, &[]);
        self.stats.polls_sent = self.stats.polls_sent.wrapping_add(1);
        self.retry_count = 0;
        self.set_state(MstpState::PollForMaster);
    }

    fn deliver<I: MstpIo>(&mut self, io: &mut I, frame: &MstpFrame) {
        if !frame.data.is_empty() {
            self.stats.pdus_delivered = self.stats.pdus_delivered.wrapping_add(1);
            io.deliver(frame.source, &frame.data);
        }
    }

    /// Handling shared by master and slave nodes for frames seen while idle
    fn accept_frame<I: MstpIo>(&mut self, io: &mut I, frame: &MstpFrame) {
        let for_us = frame.destination == self.this_station;
        match frame.frame_type {
            FrameType::BacnetDataExpectingReply if for_us => {
                self.deliver(io, frame);
                self.requester = frame.source;
                self.set_state(MstpState::AnswerDataRequest);
            }
            FrameType::BacnetDataExpectingReply | FrameType::BacnetDataNotExpectingReply
                if for_us || frame.is_broadcast() =>
            {
                self.deliver(io, frame);
            }
            FrameType::TestRequest if for_us => {
                self.send(io, FrameType::TestResponse, frame.source, &frame.data);
            }
            _ => {}
        }
    }

    fn answer_data_request<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        if let Some(reply) = io.take_reply(self.requester) {
            self.send(io, reply.frame_type, reply.destination, &reply.pdu);
            self.set_state(MstpState::Idle);
        } else if self.silence(now) >= self.reply_delay {
            debug!("MS/TP: reply to {} postponed", self.requester);
            self.send(io, FrameType::ReplyPostponed, self.requester, &[]);
            self.set_state(MstpState::Idle);
        }
        false
    }

    fn slave_step<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        match self.state {
            MstpState::Idle => {
                if let Some(Received::Valid(frame)) = self.received.take() {
                    self.accept_frame(io, &frame);
                }
                false
            }
            MstpState::AnswerDataRequest => self.answer_data_request(io, now),
            _ => {
                self.set_state(MstpState::Idle);
                true
            }
        }
    }

    fn master_step<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        match self.state {
            MstpState::Initialize => {
                self.next_station = self.this_station;
                self.poll_station = self.this_station;
                // Poll for a master the first time the token arrives
                self.token_count = N_POLL;
                self.sole_master = false;
                self.set_state(MstpState::Idle);
                true
            }
            MstpState::Idle => self.idle(io, now),
            MstpState::UseToken => self.use_token(io),
            MstpState::WaitForReply => self.wait_for_reply(io, now),
            MstpState::DoneWithToken => self.done_with_token(io),
            MstpState::PassToken => self.pass_token(io, now),
            MstpState::NoToken => self.no_token(io, now),
            MstpState::PollForMaster => self.poll_for_master(io, now),
            MstpState::AnswerDataRequest => self.answer_data_request(io, now),
        }
    }

    fn idle<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        match self.received.take() {
            Some(Received::Invalid) => false,
            Some(Received::Valid(frame)) => {
                let for_us = frame.destination == self.this_station;
                match frame.frame_type {
                    FrameType::Token if for_us => {
                        trace!("MS/TP: token from {}", frame.source);
                        self.stats.tokens_received = self.stats.tokens_received.wrapping_add(1);
                        self.frame_count = 0;
                        self.sole_master = false;
                        self.set_state(MstpState::UseToken);
                        true
                    }
                    FrameType::PollForMaster if for_us => {
                        self.send(io, FrameType::ReplyToPollForMaster, frame.source, &[]);
                        false
                    }
                    _ => {
                        self.accept_frame(io, &frame);
                        false
                    }
                }
            }
            None if self.silence(now) >= self.token_timeout => {
                debug!("MS/TP: no token for {} ms", self.silence(now));
                self.event_count = 0;
                self.set_state(MstpState::NoToken);
                true
            }
            None => false,
        }
    }

    fn use_token<I: MstpIo>(&mut self, io: &mut I) -> bool {
        let Some(packet) = io.take_pdu() else {
            self.frame_count = self.max_info_frames;
            self.set_state(MstpState::DoneWithToken);
            return true;
        };

        self.send(io, packet.frame_type, packet.destination, &packet.pdu);
        self.frame_count = self.frame_count.saturating_add(1);
        if packet.expects_reply() {
            self.set_state(MstpState::WaitForReply);
        } else {
            self.set_state(MstpState::DoneWithToken);
        }
        false
    }

    fn wait_for_reply<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        if self.silence(now) >= self.reply_timeout {
            warn!("MS/TP: no reply within {} ms", self.reply_timeout);
            self.stats.reply_timeouts = self.stats.reply_timeouts.wrapping_add(1);
            // Any retry waits for the next token
            self.frame_count = self.max_info_frames;
            self.set_state(MstpState::DoneWithToken);
            return true;
        }

        match self.received.take() {
            None => false,
            Some(Received::Invalid) => {
                self.set_state(MstpState::DoneWithToken);
                true
            }
            Some(Received::Valid(frame)) => {
                let next = if frame.destination != self.this_station {
                    MstpState::Idle
                } else {
                    match frame.frame_type {
                        FrameType::BacnetDataNotExpectingReply => {
                            self.deliver(io, &frame);
                            MstpState::DoneWithToken
                        }
                        FrameType::TestResponse | FrameType::ReplyPostponed => MstpState::DoneWithToken,
                        _ => MstpState::Idle,
                    }
                };
                if next == MstpState::Idle {
                    debug!("MS/TP: unexpected {} from {} while waiting for reply", frame.frame_type, frame.source);
                }
                self.set_state(next);
                true
            }
        }
    }

    fn done_with_token<I: MstpIo>(&mut self, io: &mut I) -> bool {
        let next_this_station = self.following(self.this_station);

        if self.frame_count < self.max_info_frames {
            self.set_state(MstpState::UseToken);
            return true;
        }

        if !self.sole_master && self.next_station == self.this_station {
            // Successor unknown
            self.send_poll(io, next_this_station);
            return false;
        }

        if self.token_count < N_POLL - 1 {
            self.token_count += 1;
            if self.sole_master && self.next_station != next_this_station {
                // Keep the token; resume on the next task call
                self.frame_count = 0;
                self.set_state(MstpState::UseToken);
            } else {
                self.send_token(io);
            }
            return false;
        }

        let next_poll_station = self.following(self.poll_station);
        if next_poll_station == self.next_station {
            if self.sole_master {
                let station = self.following(self.next_station);
                self.send_poll(io, station);
                self.next_station = self.this_station;
            } else {
                self.poll_station = self.this_station;
                self.send_token(io);
            }
            self.token_count = 1;
        } else {
            // Maintenance poll, one address per Npoll tokens
            self.send_poll(io, next_poll_station);
        }
        false
    }

    fn pass_token<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        if self.silence(now) <= self.usage_timeout {
            if self.event_count > N_MIN_OCTETS {
                self.set_state(MstpState::Idle);
                return true;
            }
            return false;
        }

        if self.retry_count < N_RETRY_TOKEN {
            self.retry_count += 1;
            debug!("MS/TP: retrying token to {}", self.next_station);
            self.send(io, FrameType::Token, self.next_station, &[]);
            self.stats.tokens_passed = self.stats.tokens_passed.wrapping_add(1);
            self.event_count = 0;
        } else {
            warn!("MS/TP: station {} did not use the token", self.next_station);
            let station = self.following(self.next_station);
            self.send_poll(io, station);
            self.next_station = self.this_station;
            self.token_count = 0;
        }
        false
    }

    fn no_token<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        let my_timeout = self.token_timeout + T_SLOT * u32::from(self.this_station);
        let silence = self.silence(now);

        if silence < my_timeout {
            if self.event_count > N_MIN_OCTETS {
                // A lower address got there first
                self.set_state(MstpState::Idle);
                return true;
            }
            return false;
        }

        warn!("MS/TP: token lost, station {} generating a new one after {} ms", self.this_station, silence);
        self.stats.lost_tokens = self.stats.lost_tokens.wrapping_add(1);
        let station = self.following(self.this_station);
        self.send_poll(io, station);
        self.next_station = self.this_station;
        self.token_count = 0;
        false
    }

    fn poll_for_master<I: MstpIo>(&mut self, io: &mut I, now: u32) -> bool {
        let invalid = match self.received.take() {
            Some(Received::Valid(frame)) => {
                if frame.destination == self.this_station && frame.frame_type == FrameType::ReplyToPollForMaster {
                    info!("MS/TP: station {} answered poll", frame.source);
                    self.sole_master = false;
                    self.next_station = frame.source;
                    self.send_token(io);
                    self.poll_station = self.this_station;
                    self.token_count = 0;
                    return false;
                }
                // Another token is about; drop ours and resynchronise
                debug!("MS/TP: unexpected {} from {} while polling", frame.frame_type, frame.source);
                self.set_state(MstpState::Idle);
                return true;
            }
            Some(Received::Invalid) => true,
            None => false,
        };

        if !invalid && self.silence(now) <= self.usage_timeout {
            return false;
        }

        if self.sole_master {
            self.frame_count = 0;
            self.set_state(MstpState::UseToken);
            return true;
        }

        if self.next_station != self.this_station {
            // Maintenance poll unanswered; carry on to the known successor
            self.send_token(io);
            return false;
        }

        let next_poll_station = self.following(self.poll_station);
        if next_poll_station != self.this_station {
            self.send_poll(io, next_poll_station);
            return false;
        }

        info!("MS/TP: no other master found, station {} is sole master", self.this_station);
        self.sole_master = true;
        self.frame_count = 0;
        self.set_state(MstpState::UseToken);
        true
    }
}
