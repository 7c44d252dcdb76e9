//! State shared between interrupt handlers, API callers and the dispatcher.
//!
//! Producers (the two line edge interrupts, the engine's completion interrupt
//! and the two API calls) never touch the state machine. They latch a level,
//! raise a pending flag and wake the dispatcher; the dispatcher is the only
//! consumer of the flags. Buffer descriptors are published together with
//! their flag inside a critical section, so that a higher-priority interrupt
//! never observes a half-written descriptor.
use core::{cell::RefCell, mem};

use critical_section::Mutex;
use maitake_sync::{Closed, WaitCell};
use portable_atomic::{
    AtomicBool, AtomicU16, AtomicU8,
    Ordering::{AcqRel, Acquire, Release},
};

use crate::{engine::TransferStatus, machine::State, Error};

mycelium_bitfield::bitfield! {
    /// Events waiting for the next dispatch pass, packed into one byte.
    #[derive(PartialEq, Eq)]
    pub struct PendingFlags<u8> {
        pub const PEER_REQUEST: bool;
        pub const PEER_READY: bool;
        pub const TRANSFER_DONE: bool;
        pub const RX_SUPPLIED: bool;
        pub const TX_SUBMITTED: bool;
    }
}

/// The kinds of event the dispatcher feeds to the state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// The peer-request line was asserted.
    PeerRequest,
    /// The peer-ready line was asserted.
    PeerReady,
    /// The transfer engine finished a transfer.
    TransferDone,
    /// A receive buffer (or `None`) was supplied.
    RxSupplied,
    /// An outbound packet was submitted.
    TxSubmitted,
}

/// Signals shared between a [`Phy`](crate::Phy) and the contexts that feed it.
///
/// This is normally a `static`, so that interrupt handlers can reach it:
///
/// ```
/// static SIGNALS: splitphy::Signals = splitphy::Signals::new();
/// ```
///
/// Each `Signals` must be used by exactly one [`Phy`](crate::Phy).
pub struct Signals {
    pending: AtomicU8,
    peer_ready: AtomicBool,
    peer_request: AtomicBool,
    transfer_failed: AtomicBool,
    open: AtomicBool,
    masked: AtomicBool,
    /// Mirror of the state machine's state, for API callers.
    state: AtomicU8,
    /// Length announced by the last inbound header.
    rx_declared: AtomicU16,
    dispatch: WaitCell,
    buffers: Mutex<RefCell<Buffers>>,
}

/// Entry point for the transfer engine's completion interrupt.
///
/// Obtained from [`Phy::completion`](crate::Phy::completion).
#[derive(Clone, Copy)]
pub struct Completion {
    signals: &'static Signals,
}

/// A registered outbound packet: the first `len` bytes of `buf`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Outbound {
    pub(crate) buf: &'static [u8],
    pub(crate) len: u16,
}

/// Buffers handed back by [`Phy::close`](crate::Phy::close).
#[derive(Debug, Default)]
pub struct Reclaimed {
    /// The outbound packet that was in flight, if any.
    pub outbound: Option<&'static [u8]>,
    /// The receive buffer that had been supplied, if any.
    pub inbound: Option<&'static mut [u8]>,
}

struct Buffers {
    outbound: Option<Outbound>,
    inbound: Inbound,
}

enum Inbound {
    /// Nothing has been supplied for the current inbound packet.
    Empty,
    /// Supplied by the caller, not yet picked up by the dispatcher.
    Supplied(Option<&'static mut [u8]>),
    /// Picked up by the dispatcher, or the packet has finished.
    Claimed,
}

// === impl Trigger ===

impl Trigger {
    /// Every trigger, in the order a dispatch pass checks them.
    pub const PRIORITY: [Trigger; 5] = [
        Trigger::PeerRequest,
        Trigger::PeerReady,
        Trigger::TransferDone,
        Trigger::RxSupplied,
        Trigger::TxSubmitted,
    ];

    fn bit(self) -> u8 {
        let flags = PendingFlags::new();
        let flags = match self {
            Trigger::PeerRequest => flags.with(PendingFlags::PEER_REQUEST, true),
            Trigger::PeerReady => flags.with(PendingFlags::PEER_READY, true),
            Trigger::TransferDone => flags.with(PendingFlags::TRANSFER_DONE, true),
            Trigger::RxSupplied => flags.with(PendingFlags::RX_SUPPLIED, true),
            Trigger::TxSubmitted => flags.with(PendingFlags::TX_SUBMITTED, true),
        };
        flags.bits()
    }
}

// === impl Signals ===

impl Signals {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicU8::new(0),
            peer_ready: AtomicBool::new(false),
            peer_request: AtomicBool::new(false),
            transfer_failed: AtomicBool::new(false),
            open: AtomicBool::new(false),
            masked: AtomicBool::new(false),
            state: AtomicU8::new(State::Disabled as u8),
            rx_declared: AtomicU16::new(0),
            dispatch: WaitCell::new(),
            buffers: Mutex::new(RefCell::new(Buffers {
                outbound: None,
                inbound: Inbound::Empty,
            })),
        }
    }

    /// Returns the current state of the link.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Acquire))
    }

    /// Returns the flags currently waiting for a dispatch pass.
    pub fn pending(&self) -> PendingFlags {
        PendingFlags::from_bits(self.pending.load(Acquire))
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Acquire) != 0
    }

    // --- handshake lines ---

    pub(crate) fn ready_edge(&self, asserted: bool) {
        self.peer_ready.store(asserted, Release);
        if asserted {
            self.raise(Trigger::PeerReady);
        }
    }

    pub(crate) fn request_edge(&self, asserted: bool) {
        self.peer_request.store(asserted, Release);
        if asserted {
            self.raise(Trigger::PeerRequest);
        }
    }

    pub(crate) fn peer_ready(&self) -> bool {
        self.peer_ready.load(Acquire)
    }

    pub(crate) fn peer_request(&self) -> bool {
        self.peer_request.load(Acquire)
    }

    // --- transfer completion ---

    fn transfer_complete(&self, status: TransferStatus) {
        if !self.open.load(Acquire) {
            tracing::trace!(?status, "transfer completed while closed, ignoring");
            return;
        }
        if status == TransferStatus::Failed {
            self.transfer_failed.store(true, Release);
        }
        self.raise(Trigger::TransferDone);
    }

    pub(crate) fn take_transfer_failed(&self) -> bool {
        self.transfer_failed.swap(false, AcqRel)
    }

    // --- dispatch ---

    fn raise(&self, trigger: Trigger) {
        if !self.open.load(Acquire) {
            return;
        }
        self.pending.fetch_or(trigger.bit(), AcqRel);
        self.dispatch.wake();
    }

    /// Clears `trigger`'s flag, returning whether it was set.
    pub(crate) fn take(&self, trigger: Trigger) -> bool {
        let bit = trigger.bit();
        self.pending.fetch_and(!bit, AcqRel) & bit != 0
    }

    pub(crate) fn mask(&self) {
        self.masked.store(true, Release);
    }

    pub(crate) fn unmask(&self) {
        self.masked.store(false, Release);
        if self.has_pending() {
            self.dispatch.wake();
        }
    }

    pub(crate) fn is_masked(&self) -> bool {
        self.masked.load(Acquire)
    }

    pub(crate) async fn wait_for_dispatch(&self) -> Result<(), Closed> {
        self.dispatch.wait().await
    }

    // --- lifecycle ---

    pub(crate) fn publish_state(&self, state: State) {
        self.state.store(state as u8, Release);
    }

    /// Seeds the line levels and starts accepting signals. Edges sampled here
    /// do not raise pending flags.
    pub(crate) fn open(&self, peer_ready: bool, peer_request: bool) {
        self.pending.store(0, Release);
        self.transfer_failed.store(false, Release);
        self.masked.store(false, Release);
        self.peer_ready.store(peer_ready, Release);
        self.peer_request.store(peer_request, Release);
        self.publish_state(State::Idle);
        self.open.store(true, Release);
    }

    /// Stops accepting signals, drops anything pending and takes back any
    /// registered buffers.
    pub(crate) fn close(&self) -> Reclaimed {
        self.open.store(false, Release);
        self.pending.store(0, Release);
        self.transfer_failed.store(false, Release);
        self.rx_declared.store(0, Release);
        self.publish_state(State::Disabled);
        critical_section::with(|cs| {
            let mut buffers = self.buffers.borrow_ref_mut(cs);
            let inbound = match mem::replace(&mut buffers.inbound, Inbound::Empty) {
                Inbound::Supplied(buf) => buf,
                Inbound::Empty | Inbound::Claimed => None,
            };
            Reclaimed {
                outbound: buffers.outbound.take().map(|outbound| outbound.buf),
                inbound,
            }
        })
    }

    // --- buffer registry ---

    pub(crate) fn submit_outbound(&self, buf: &'static [u8], len: u16) -> Result<(), Error> {
        if buf.is_empty() {
            return Err(Error::NullBuffer);
        }
        if len == 0 || usize::from(len) > buf.len() {
            return Err(Error::InvalidLength);
        }
        if !self.open.load(Acquire) {
            return Err(Error::NotOpen);
        }

        critical_section::with(|cs| {
            let mut buffers = self.buffers.borrow_ref_mut(cs);
            if buffers.outbound.is_some() {
                return Err(Error::Busy);
            }
            buffers.outbound = Some(Outbound { buf, len });
            self.pending.fetch_or(Trigger::TxSubmitted.bit(), AcqRel);
            Ok(())
        })?;
        self.dispatch.wake();
        Ok(())
    }

    pub(crate) fn supply_inbound(&self, buf: Option<&'static mut [u8]>) -> Result<(), Error> {
        if self.state() != State::MemoryRequest {
            return Err(Error::WrongState);
        }
        if let Some(ref buf) = buf {
            if buf.len() < usize::from(self.rx_declared.load(Acquire)) {
                return Err(Error::InvalidLength);
            }
        }

        critical_section::with(|cs| {
            let mut buffers = self.buffers.borrow_ref_mut(cs);
            if !matches!(buffers.inbound, Inbound::Empty) {
                return Err(Error::Busy);
            }
            buffers.inbound = Inbound::Supplied(buf);
            self.pending.fetch_or(Trigger::RxSupplied.bit(), AcqRel);
            Ok(())
        })?;
        self.dispatch.wake();
        Ok(())
    }

    pub(crate) fn outbound(&self) -> Option<Outbound> {
        critical_section::with(|cs| self.buffers.borrow_ref(cs).outbound)
    }

    pub(crate) fn release_outbound(&self) -> Option<Outbound> {
        critical_section::with(|cs| self.buffers.borrow_ref_mut(cs).outbound.take())
    }

    /// Records the length of the next inbound packet and opens the slot for
    /// its receive buffer.
    pub(crate) fn announce_inbound(&self, len: u16) {
        self.rx_declared.store(len, Release);
        critical_section::with(|cs| {
            self.buffers.borrow_ref_mut(cs).inbound = Inbound::Empty;
        })
    }

    /// Picks up the supplied receive buffer. Returns `None` if nothing was
    /// supplied since the last claim.
    pub(crate) fn claim_inbound(&self) -> Option<Option<&'static mut [u8]>> {
        critical_section::with(|cs| {
            let mut buffers = self.buffers.borrow_ref_mut(cs);
            match mem::replace(&mut buffers.inbound, Inbound::Claimed) {
                Inbound::Supplied(buf) => Some(buf),
                other => {
                    buffers.inbound = other;
                    None
                }
            }
        })
    }

    /// Ends the current inbound packet. The slot stays closed until the next
    /// header is announced, so a late supply is refused even while the state
    /// mirror still reads `MemoryRequest`.
    pub(crate) fn release_inbound(&self) {
        self.rx_declared.store(0, Release);
        critical_section::with(|cs| {
            self.buffers.borrow_ref_mut(cs).inbound = Inbound::Claimed;
        })
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

// === impl Completion ===

impl Completion {
    pub(crate) fn new(signals: &'static Signals) -> Self {
        Self { signals }
    }

    /// Reports that the transfer in flight has finished.
    ///
    /// Completions reported while the link is closed are ignored.
    pub fn transfer_complete(&self, status: TransferStatus) {
        self.signals.transfer_complete(status);
    }
}
