//! The link object and its dispatcher.
//!
//! A [`Phy`] owns the transfer engine, the line reader, the event sink and
//! the state machine. Interrupt handlers and API callers only ever hold
//! cheap, copyable views onto its [`Signals`]: a [`Handle`], a
//! [`LineMonitor`] or a [`Completion`].
//!
//! The state machine runs only inside [`Phy::dispatch`], which needs `&mut
//! self`, so it can never be re-entered. On a target, [`Phy::run`] is spawned
//! as a low-priority task and woken whenever a pending flag is raised.
use serde::Serialize;

use crate::{
    engine::TransferEngine,
    event::EventSink,
    lines::{Line, LineMonitor, LineReader},
    machine::{Io, Machine, State},
    settings::PhySettings,
    signals::{Completion, Reclaimed, Signals, Trigger},
    Error,
};

/// A split-transaction SPI link, as seen from the master side.
pub struct Phy<E, R, S> {
    signals: &'static Signals,
    engine: E,
    lines: R,
    sink: Option<S>,
    settings: PhySettings,
    machine: Machine,
    stats: Stats,
}

/// The API entry points of an open link.
///
/// `Handle`s are `Copy` and may be used from any context, including
/// interrupt handlers and the link's own event sink.
#[derive(Clone, Copy)]
pub struct Handle {
    signals: &'static Signals,
}

/// Counters kept by an open link. Reset by [`Phy::open`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_dropped: u32,
    /// Transfers that the engine refused to start or reported as failed.
    /// The link carries on regardless.
    pub transfer_errors: u32,
}

/// The triggers handled by one dispatch pass, in the order they ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pass {
    handled: [Option<Trigger>; Trigger::PRIORITY.len()],
    len: usize,
}

// === impl Phy ===

impl<E, R, S> Phy<E, R, S>
where
    E: TransferEngine,
    R: LineReader,
    S: EventSink,
{
    /// Returns a new, closed link.
    ///
    /// `signals` must not be shared with any other `Phy`.
    pub fn new(signals: &'static Signals, engine: E, lines: R, settings: PhySettings) -> Self {
        Self {
            signals,
            engine,
            lines,
            sink: None,
            settings,
            machine: Machine::new(),
            stats: Stats::default(),
        }
    }

    pub fn handle(&self) -> Handle {
        Handle {
            signals: self.signals,
        }
    }

    /// Returns the entry point for the engine's completion interrupt.
    pub fn completion(&self) -> Completion {
        Completion::new(self.signals)
    }

    /// Returns the entry point for the two line edge interrupts.
    pub fn line_monitor(&self) -> LineMonitor<R>
    where
        R: Clone,
    {
        LineMonitor::new(self.signals, self.lines.clone())
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    /// Returns `true` if a step finished but is waiting for the peer to
    /// become ready before the next one starts.
    pub fn is_waiting_for_ready(&self) -> bool {
        self.machine.wait_for_ready()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn settings(&self) -> &PhySettings {
        &self.settings
    }

    /// Opens the link, delivering all further events to `sink`.
    ///
    /// The engine is opened and both lines are sampled. A line that is
    /// already asserted is remembered but does not start anything: the peer
    /// is expected to produce a fresh edge.
    #[tracing::instrument(
        name = "Phy::open",
        level = "debug",
        skip(self, sink),
        fields(mtu = self.settings.mtu),
        err(Display)
    )]
    pub fn open(&mut self, sink: Option<S>) -> Result<(), Error> {
        if self.machine.state().is_open() {
            return Err(Error::AlreadyOpen);
        }
        let sink = sink.ok_or(Error::NullHandler)?;
        if !self.settings.is_valid() {
            return Err(Error::InvalidSettings);
        }
        if let Err(error) = self.engine.open() {
            tracing::warn!(?error, "failed to open transfer engine");
            return Err(Error::EngineOpen);
        }

        let peer_ready = self.lines.read(Line::PeerReady).is_asserted();
        let peer_request = self.lines.read(Line::PeerRequest).is_asserted();
        self.sink = Some(sink);
        self.stats = Stats::default();
        self.machine.start();
        self.signals.open(peer_ready, peer_request);

        tracing::info!(peer_ready, peer_request, "link open");
        Ok(())
    }

    /// Closes the link, whatever it was doing.
    ///
    /// Anything in flight is abandoned without an event, and any completion
    /// the engine reports afterwards is ignored. Buffers the link was
    /// holding are handed back.
    #[tracing::instrument(
        name = "Phy::close",
        level = "debug",
        skip(self),
        fields(state = %self.machine.state())
    )]
    pub fn close(&mut self) -> Reclaimed {
        let was_open = self.machine.state().is_open();
        let mut reclaimed = self.signals.close();
        if was_open {
            self.engine.close();
        }

        let (outbound, inbound) = self.machine.stop();
        reclaimed.outbound = reclaimed.outbound.or(outbound);
        reclaimed.inbound = reclaimed.inbound.or(inbound);
        self.sink = None;

        if was_open {
            tracing::info!("link closed");
        }
        reclaimed
    }

    /// Runs one dispatch pass.
    ///
    /// Each pending flag is taken and handled once, highest priority first.
    /// A flag raised while the pass runs is handled in the same pass if its
    /// turn has not come yet, and in the next one otherwise. Nothing runs
    /// while dispatch is disabled.
    pub fn dispatch(&mut self) -> Pass {
        let mut pass = Pass::default();
        if self.signals.is_masked() {
            return pass;
        }

        for trigger in Trigger::PRIORITY {
            if self.signals.take(trigger) {
                pass.push(trigger);
                self.step(trigger);
            }
        }
        pass
    }

    /// Dispatches forever, sleeping whenever there is nothing to do.
    pub async fn run(&mut self) {
        loop {
            let pass = self.dispatch();
            if !pass.is_empty() {
                tracing::trace!(?pass, state = %self.machine.state(), "dispatched");
            }

            if self.signals.is_masked() || !self.signals.has_pending() {
                if self.signals.wait_for_dispatch().await.is_err() {
                    tracing::warn!("dispatch wakeups closed, stopping");
                    return;
                }
            }
        }
    }

    fn step(&mut self, trigger: Trigger) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        if trigger == Trigger::TransferDone && self.signals.take_transfer_failed() {
            tracing::warn!(
                state = %self.machine.state(),
                "transfer failed, carrying on as if it succeeded"
            );
            self.stats.transfer_errors += 1;
        }

        let mut io = Io {
            engine: &mut self.engine,
            sink,
            signals: self.signals,
            stats: &mut self.stats,
            mtu: self.settings.mtu,
        };
        let from = self.machine.state();
        self.machine.handle(trigger, &mut io);
        tracing::trace!(
            ?trigger,
            %from,
            to = %self.machine.state(),
            wait_for_ready = self.machine.wait_for_ready(),
            "step"
        );
    }
}

impl<E, R, S> Drop for Phy<E, R, S> {
    fn drop(&mut self) {
        if self.machine.state().is_open() {
            // Stop feeding a link that no longer exists.
            let _ = self.signals.close();
        }
    }
}

// === impl Handle ===

impl Handle {
    /// Submits the first `len` bytes of `buf` for sending.
    ///
    /// The buffer belongs to the link until [`Event::Sent`] hands it back.
    ///
    /// # Errors
    ///
    /// - [`Error::NullBuffer`] if `buf` is empty
    /// - [`Error::InvalidLength`] if `len` is zero or longer than `buf`
    /// - [`Error::NotOpen`] if the link is closed
    /// - [`Error::Busy`] if another packet has not been sent yet
    ///
    /// [`Event::Sent`]: crate::Event::Sent
    pub fn send(&self, buf: &'static [u8], len: u16) -> Result<(), Error> {
        self.signals.submit_outbound(buf, len)
    }

    /// Answers an [`Event::BufferRequest`]. Passing `None` drops the inbound
    /// packet; it is still clocked in, and reported as [`Event::Dropped`].
    ///
    /// # Errors
    ///
    /// - [`Error::WrongState`] if the link is not waiting for a buffer
    /// - [`Error::InvalidLength`] if `buf` is shorter than the announced
    ///   packet
    /// - [`Error::Busy`] if a buffer was already supplied for this packet
    ///
    /// [`Event::BufferRequest`]: crate::Event::BufferRequest
    /// [`Event::Dropped`]: crate::Event::Dropped
    pub fn supply_receive_buffer(&self, buf: Option<&'static mut [u8]>) -> Result<(), Error> {
        self.signals.supply_inbound(buf)
    }

    /// Re-enables dispatch. If anything became pending while dispatch was
    /// disabled, the dispatcher is woken.
    pub fn enable_dispatch(&self) {
        self.signals.unmask();
    }

    /// Disables dispatch. Pending flags keep accumulating, but the state
    /// machine does not run until [`Handle::enable_dispatch`] is called.
    pub fn disable_dispatch(&self) {
        self.signals.mask();
    }

    pub fn state(&self) -> State {
        self.signals.state()
    }
}

// === impl Pass ===

impl Pass {
    fn push(&mut self, trigger: Trigger) {
        self.handled[self.len] = Some(trigger);
        self.len += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn triggers(&self) -> impl Iterator<Item = Trigger> + '_ {
        self.handled[..self.len].iter().flatten().copied()
    }
}
