//! The link state machine.
//!
//! The machine only ever runs inside a dispatch pass, so it owns its state
//! outright. Everything it learns from the outside world (line levels,
//! registered buffers) comes through [`Signals`]; everything it does to the
//! outside world goes through the transfer engine and the event sink.
//!
//! Chunk progress is accumulated when a transfer *completes*, in both
//! directions, so `moved` always counts bytes that are actually on the wire.
use core::fmt;

use crate::{
    engine::TransferEngine,
    event::{Event, EventSink},
    phy::Stats,
    settings::PhySettings,
    signals::{Outbound, Signals, Trigger},
    wire,
};

/// The state of a link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum State {
    /// The link is closed.
    Disabled = 0,
    /// Open, with nothing in flight.
    Idle,
    /// An outbound packet is waiting for the peer to become ready before
    /// its header is sent.
    TxWaitForPeerReady,
    /// The peer requested a transfer, and we are waiting for it to become
    /// ready before polling it.
    RxWaitForPeerReady,
    /// Sending an outbound packet's length header.
    TxHeader,
    /// Sending an outbound packet's payload, one chunk at a time.
    TxPayload,
    /// Sending an all-zero header to give the peer the bus.
    TxZeroHeader,
    /// Reading the peer's length header.
    RxHeader,
    /// Waiting for the receiver to supply a buffer for an inbound packet.
    MemoryRequest,
    /// Reading an inbound packet's payload, one chunk at a time.
    RxPayload,
}

/// Progress of one packet through the engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Progress {
    total: u16,
    moved: u16,
    /// Length of the chunk currently in flight.
    current: u16,
}

/// Everything the machine may touch while handling one trigger.
pub(crate) struct Io<'a, E, S> {
    pub(crate) engine: &'a mut E,
    pub(crate) sink: &'a mut S,
    pub(crate) signals: &'static Signals,
    pub(crate) stats: &'a mut Stats,
    pub(crate) mtu: u16,
}

pub(crate) struct Machine {
    state: State,
    /// Set when a step finished but the peer was not ready for the next one.
    /// The next peer-ready edge resumes where we left off.
    wait_for_ready: bool,
    header: [u8; wire::HEADER_LEN],
    tx: Progress,
    rx: Progress,
    outbound: Option<Outbound>,
    inbound: Option<&'static mut [u8]>,
    /// Payload chunks of dropped packets are read into here and discarded.
    discard: [u8; PhySettings::MAX_MTU as usize],
}

// === impl State ===

impl State {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Disabled,
            1 => State::Idle,
            2 => State::TxWaitForPeerReady,
            3 => State::RxWaitForPeerReady,
            4 => State::TxHeader,
            5 => State::TxPayload,
            6 => State::TxZeroHeader,
            7 => State::RxHeader,
            8 => State::MemoryRequest,
            9 => State::RxPayload,
            _ => unreachable!("invalid link state {value}"),
        }
    }

    /// Returns `true` if the link is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, State::Disabled)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Disabled => "disabled",
            State::Idle => "idle",
            State::TxWaitForPeerReady => "tx-wait-for-peer-ready",
            State::RxWaitForPeerReady => "rx-wait-for-peer-ready",
            State::TxHeader => "tx-header",
            State::TxPayload => "tx-payload",
            State::TxZeroHeader => "tx-zero-header",
            State::RxHeader => "rx-header",
            State::MemoryRequest => "memory-request",
            State::RxPayload => "rx-payload",
        };
        f.pad(name)
    }
}

// === impl Progress ===

impl Progress {
    fn new(total: u16) -> Self {
        Self {
            total,
            moved: 0,
            current: 0,
        }
    }

    fn is_done(&self) -> bool {
        self.moved == self.total
    }

    /// Records the chunk in flight as moved.
    fn advance(&mut self) {
        self.moved += self.current;
        self.current = 0;
        assert!(
            self.moved <= self.total,
            "moved {} of a {} byte packet",
            self.moved,
            self.total
        );
    }
}

// === impl Io ===

impl<E, S> Io<'_, E, S>
where
    E: TransferEngine,
    S: EventSink,
{
    fn write(&mut self, data: &[u8]) {
        if let Err(error) = self.engine.start_write(data) {
            tracing::warn!(?error, len = data.len(), "transfer engine refused a write");
            self.stats.transfer_errors += 1;
        }
    }

    fn read(&mut self, len: u16) {
        if let Err(error) = self.engine.start_read(usize::from(len)) {
            tracing::warn!(?error, len, "transfer engine refused a read");
            self.stats.transfer_errors += 1;
        }
    }

    fn emit(&mut self, event: Event) {
        self.sink.on_event(event);
    }
}

// === impl Machine ===

impl Machine {
    pub(crate) const fn new() -> Self {
        Self {
            state: State::Disabled,
            wait_for_ready: false,
            header: [0; wire::HEADER_LEN],
            tx: Progress {
                total: 0,
                moved: 0,
                current: 0,
            },
            rx: Progress {
                total: 0,
                moved: 0,
                current: 0,
            },
            outbound: None,
            inbound: None,
            discard: [0; PhySettings::MAX_MTU as usize],
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn wait_for_ready(&self) -> bool {
        self.wait_for_ready
    }

    /// Moves to [`State::Idle`] with nothing in flight.
    pub(crate) fn start(&mut self) {
        self.reset();
        self.state = State::Idle;
    }

    /// Moves to [`State::Disabled`], returning any buffers the machine held.
    pub(crate) fn stop(&mut self) -> (Option<&'static [u8]>, Option<&'static mut [u8]>) {
        let held = (
            self.outbound.take().map(|outbound| outbound.buf),
            self.inbound.take(),
        );
        self.reset();
        held
    }

    fn reset(&mut self) {
        self.state = State::Disabled;
        self.wait_for_ready = false;
        self.header = [0; wire::HEADER_LEN];
        self.tx = Progress::default();
        self.rx = Progress::default();
        self.outbound = None;
        self.inbound = None;
    }

    /// Handles one trigger taken from the pending set.
    pub(crate) fn handle<E, S>(&mut self, trigger: Trigger, io: &mut Io<'_, E, S>)
    where
        E: TransferEngine,
        S: EventSink,
    {
        use self::{State::*, Trigger::*};

        match (self.state, trigger) {
            (Idle, PeerRequest) => {
                self.wait_for_ready = false;
                self.poll_peer(io);
            }
            (Idle, TxSubmitted) => {
                let outbound = io.signals.outbound();
                assert!(
                    outbound.is_some(),
                    "outbound packet submitted with no buffer registered"
                );
                self.outbound = outbound;
                self.wait_for_ready = false;
                self.begin_tx(io);
            }

            (TxWaitForPeerReady, PeerReady) => self.send_header(io),
            (RxWaitForPeerReady, PeerReady) => self.send_zero_header(io),

            (TxHeader, TransferDone) => {
                let len = self.outbound.map(|outbound| outbound.len).unwrap_or(0);
                self.tx = Progress::new(len);
                if io.signals.peer_ready() {
                    self.enter(TxPayload, io);
                    self.send_chunk(io);
                } else {
                    self.wait_for_ready = true;
                }
            }
            (TxHeader, PeerReady) if self.wait_for_ready => {
                self.wait_for_ready = false;
                self.enter(TxPayload, io);
                self.send_chunk(io);
            }

            (TxPayload, TransferDone) => {
                self.tx.advance();
                if self.tx.is_done() {
                    self.finish_tx(io);
                } else if io.signals.peer_ready() {
                    self.send_chunk(io);
                } else {
                    self.wait_for_ready = true;
                }
            }
            (TxPayload, PeerReady) if self.wait_for_ready => {
                self.wait_for_ready = false;
                self.send_chunk(io);
            }

            (TxZeroHeader, TransferDone) => {
                if io.signals.peer_ready() {
                    self.read_header(io);
                } else {
                    self.wait_for_ready = true;
                }
            }
            (TxZeroHeader, PeerReady) if self.wait_for_ready => {
                self.wait_for_ready = false;
                self.read_header(io);
            }

            (RxHeader, TransferDone) => {
                io.engine.finish_read(&mut self.header);
                let len = wire::decode_header(self.header);
                tracing::trace!(len, "inbound header");
                self.rx = Progress::new(len);
                io.signals.announce_inbound(len);
                // Published before the request goes out, so the receiver may
                // answer from inside the callback.
                self.enter(MemoryRequest, io);
                io.emit(Event::BufferRequest { len });
            }

            (MemoryRequest, RxSupplied) => {
                let Some(inbound) = io.signals.claim_inbound() else {
                    tracing::trace!("receive buffer flag with nothing supplied");
                    return;
                };
                self.inbound = inbound;
                if self.rx.is_done() {
                    // Nothing to read for an empty packet.
                    self.finish_rx(io);
                } else if io.signals.peer_ready() {
                    self.enter(RxPayload, io);
                    self.receive_chunk(io);
                } else {
                    self.wait_for_ready = true;
                }
            }
            (MemoryRequest, PeerReady) if self.wait_for_ready => {
                self.wait_for_ready = false;
                self.enter(RxPayload, io);
                self.receive_chunk(io);
            }

            (RxPayload, TransferDone) => {
                self.store_chunk(io);
                if self.rx.is_done() {
                    self.finish_rx(io);
                } else if io.signals.peer_ready() {
                    self.receive_chunk(io);
                } else {
                    self.wait_for_ready = true;
                }
            }
            (RxPayload, PeerReady) if self.wait_for_ready => {
                self.wait_for_ready = false;
                self.receive_chunk(io);
            }

            (state, trigger) => {
                tracing::trace!(%state, ?trigger, "nothing to do");
            }
        }
    }

    fn enter<E, S>(&mut self, state: State, io: &mut Io<'_, E, S>) {
        self.state = state;
        io.signals.publish_state(state);
    }

    /// The peer asked for the bus: give it an all-zero header as soon as it
    /// is ready to clock one in.
    fn poll_peer<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        if io.signals.peer_ready() {
            self.send_zero_header(io);
        } else {
            self.enter(State::RxWaitForPeerReady, io);
        }
    }

    fn begin_tx<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        if io.signals.peer_ready() {
            self.send_header(io);
        } else {
            self.enter(State::TxWaitForPeerReady, io);
        }
    }

    fn send_header<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        let len = self.outbound.map(|outbound| outbound.len).unwrap_or(0);
        self.header = wire::encode_header(len);
        self.enter(State::TxHeader, io);
        io.write(&self.header);
    }

    fn send_zero_header<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        self.header = wire::encode_header(0);
        self.enter(State::TxZeroHeader, io);
        io.write(&self.header);
    }

    fn read_header<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        self.enter(State::RxHeader, io);
        io.read(wire::HEADER_LEN as u16);
    }

    fn send_chunk<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        let Some(outbound) = self.outbound else {
            return;
        };
        let len = wire::chunk_len(io.mtu, self.tx.total, self.tx.moved);
        self.tx.current = len;
        let start = usize::from(self.tx.moved);
        io.write(&outbound.buf[start..start + usize::from(len)]);
    }

    fn receive_chunk<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        let len = wire::chunk_len(io.mtu, self.rx.total, self.rx.moved);
        self.rx.current = len;
        io.read(len);
    }

    fn store_chunk<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        let start = usize::from(self.rx.moved);
        let len = usize::from(self.rx.current);
        match self.inbound {
            Some(ref mut buf) => io.engine.finish_read(&mut buf[start..start + len]),
            None => io.engine.finish_read(&mut self.discard[..len]),
        }
        self.rx.advance();
    }

    fn finish_tx<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        self.outbound = None;
        if let Some(outbound) = io.signals.release_outbound() {
            io.stats.packets_sent += 1;
            tracing::debug!(len = outbound.len, "packet sent");
            io.emit(Event::Sent { buf: outbound.buf });
        }

        if io.signals.peer_request() {
            self.poll_peer(io);
        } else {
            self.enter(State::Idle, io);
        }
    }

    fn finish_rx<E: TransferEngine, S: EventSink>(&mut self, io: &mut Io<'_, E, S>) {
        let len = self.rx.total;
        match self.inbound.take() {
            Some(buf) => {
                io.stats.packets_received += 1;
                tracing::debug!(len, "packet received");
                io.emit(Event::Received { buf, len });
            }
            None => {
                io.stats.packets_dropped += 1;
                tracing::debug!(len, "packet dropped");
                io.emit(Event::Dropped { len });
            }
        }
        io.signals.release_inbound();

        // Anything submitted while we were receiving goes out first.
        if let Some(outbound) = io.signals.outbound() {
            self.outbound = Some(outbound);
            self.begin_tx(io);
        } else if io.signals.peer_request() {
            self.poll_peer(io);
        } else {
            self.enter(State::Idle, io);
        }
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("state", &self.state)
            .field("wait_for_ready", &self.wait_for_ready)
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .field("outbound", &self.outbound.map(|outbound| outbound.len))
            .field("inbound", &self.inbound.as_ref().map(|buf| buf.len()))
            .finish()
    }
}
