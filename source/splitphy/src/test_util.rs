use super::*;

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    convert::Infallible,
    rc::Rc,
};

/// Something the link asked the engine to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Open,
    Close,
    Write(Vec<u8>),
    Read(usize),
}

/// Handshake lines driven by the test, standing in for the peer.
#[derive(Clone)]
pub(crate) struct SimLines {
    ready: Rc<Cell<Level>>,
    request: Rc<Cell<Level>>,
}

/// A transfer engine that records what it was asked to do and clocks in
/// bytes the test queued up for the peer to send.
#[derive(Clone, Default)]
pub(crate) struct SimEngine {
    inner: Rc<RefCell<EngineState>>,
}

#[derive(Default)]
struct EngineState {
    ops: Vec<Op>,
    peer_out: VecDeque<u8>,
    clocked_in: Vec<u8>,
    refuse_open: bool,
    refuse_transfers: bool,
}

/// Records every event; optionally answers buffer requests itself.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
    auto_supply: Rc<Cell<Option<Handle>>>,
}

pub(crate) struct Harness {
    pub(crate) phy: Phy<SimEngine, SimLines, Recorder>,
    pub(crate) handle: Handle,
    pub(crate) engine: SimEngine,
    pub(crate) recorder: Recorder,
    pub(crate) lines: SimLines,
    pub(crate) monitor: LineMonitor<SimLines>,
    pub(crate) completion: Completion,
}

// === impl SimLines ===

impl SimLines {
    pub(crate) fn new() -> Self {
        Self {
            ready: Rc::new(Cell::new(Level::High)),
            request: Rc::new(Cell::new(Level::High)),
        }
    }

    pub(crate) fn set(&self, line: Line, asserted: bool) {
        let level = if asserted { Level::Low } else { Level::High };
        match line {
            Line::PeerReady => self.ready.set(level),
            Line::PeerRequest => self.request.set(level),
        }
    }
}

impl LineReader for SimLines {
    type Error = Infallible;

    fn try_read(&self, line: Line) -> Result<Level, Self::Error> {
        Ok(match line {
            Line::PeerReady => self.ready.get(),
            Line::PeerRequest => self.request.get(),
        })
    }
}

// === impl SimEngine ===

impl SimEngine {
    pub(crate) fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut self.inner.borrow_mut().ops)
    }

    /// Queues bytes for the peer to clock out on the next reads.
    pub(crate) fn peer_sends(&self, bytes: &[u8]) {
        self.inner.borrow_mut().peer_out.extend(bytes.iter().copied());
    }

    pub(crate) fn refuse_open(&self) {
        self.inner.borrow_mut().refuse_open = true;
    }

    pub(crate) fn refuse_transfers(&self, refuse: bool) {
        self.inner.borrow_mut().refuse_transfers = refuse;
    }
}

impl TransferEngine for SimEngine {
    type Error = &'static str;

    fn open(&mut self) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.refuse_open {
            return Err("engine refused to open");
        }
        inner.ops.push(Op::Open);
        Ok(())
    }

    fn close(&mut self) {
        self.inner.borrow_mut().ops.push(Op::Close);
    }

    fn start_write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.refuse_transfers {
            return Err("engine busy");
        }
        inner.ops.push(Op::Write(data.to_vec()));
        Ok(())
    }

    fn start_read(&mut self, len: usize) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.refuse_transfers {
            return Err("engine busy");
        }
        inner.ops.push(Op::Read(len));
        // An idle peer clocks out 0xFF.
        let clocked_in = (0..len)
            .map(|_| inner.peer_out.pop_front().unwrap_or(0xFF))
            .collect();
        inner.clocked_in = clocked_in;
        Ok(())
    }

    fn finish_read(&mut self, into: &mut [u8]) {
        let inner = self.inner.borrow();
        into.copy_from_slice(&inner.clocked_in[..into.len()]);
    }
}

// === impl Recorder ===

impl Recorder {
    pub(crate) fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Answer every buffer request with a fresh buffer of exactly the
    /// announced length, from inside the event callback.
    pub(crate) fn auto_supply(&self, handle: Handle) {
        self.auto_supply.set(Some(handle));
    }
}

impl EventSink for Recorder {
    fn on_event(&mut self, event: Event) {
        tracing::debug!(?event, "recorded");
        if let (Event::BufferRequest { len }, Some(handle)) = (&event, self.auto_supply.get()) {
            handle
                .supply_receive_buffer(Some(leak_zeroed(usize::from(*len))))
                .expect("supplying from the callback must succeed");
        }
        self.events.borrow_mut().push(event);
    }
}

// === impl Harness ===

impl Harness {
    /// Returns an open link with both lines deasserted.
    pub(crate) fn new(mtu: u16) -> Self {
        Self::with_lines(mtu, false, false)
    }

    pub(crate) fn with_lines(mtu: u16, ready: bool, request: bool) -> Self {
        let mut harness = Self::closed(mtu);
        harness.lines.set(Line::PeerReady, ready);
        harness.lines.set(Line::PeerRequest, request);
        let recorder = harness.recorder.clone();
        harness.phy.open(Some(recorder)).expect("link must open");
        assert_eq!(harness.engine.take_ops(), vec![Op::Open]);
        harness
    }

    pub(crate) fn closed(mtu: u16) -> Self {
        trace_init();
        let signals: &'static Signals = Box::leak(Box::new(Signals::new()));
        let engine = SimEngine::default();
        let lines = SimLines::new();
        let settings = PhySettings::default().with_mtu(mtu);
        let phy = Phy::new(signals, engine.clone(), lines.clone(), settings);
        Self {
            handle: phy.handle(),
            monitor: phy.line_monitor(),
            completion: phy.completion(),
            phy,
            engine,
            recorder: Recorder::default(),
            lines,
        }
    }

    /// Drives the peer-ready line and fires its edge interrupt.
    pub(crate) fn peer_ready(&self, asserted: bool) {
        self.lines.set(Line::PeerReady, asserted);
        self.monitor.on_ready_edge();
    }

    /// Drives the peer-request line and fires its edge interrupt.
    pub(crate) fn peer_request(&self, asserted: bool) {
        self.lines.set(Line::PeerRequest, asserted);
        self.monitor.on_request_edge();
    }

    /// Fires the engine's completion interrupt.
    pub(crate) fn complete(&self) {
        self.completion.transfer_complete(TransferStatus::Success);
    }

    pub(crate) fn fail(&self) {
        self.completion.transfer_complete(TransferStatus::Failed);
    }

    pub(crate) fn pump(&mut self) -> Pass {
        self.phy.dispatch()
    }

    /// Completes the transfer in flight and runs one dispatch pass.
    pub(crate) fn complete_and_pump(&mut self) -> Pass {
        self.complete();
        self.pump()
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.engine.take_ops()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.recorder.take()
    }

    pub(crate) fn state(&self) -> State {
        self.phy.state()
    }
}

pub(crate) fn leak(bytes: &[u8]) -> &'static [u8] {
    Box::leak(bytes.to_vec().into_boxed_slice())
}

pub(crate) fn leak_zeroed(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

/// A packet whose bytes count up from zero, wrapping.
pub(crate) fn packet(len: usize) -> &'static [u8] {
    let bytes = (0..len).map(|i| i as u8).collect::<Vec<_>>();
    leak(&bytes)
}

pub(crate) fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("splitphy=debug").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}
