//! Drives a link through its public API only, against a scripted peer.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use splitphy::{
    wire, Event, Handle, Level, Line, LineReader, Phy, PhySettings, Signals, State,
    TransferEngine, TransferStatus,
};

/// Everything the peer sees on the bus, and everything it will send.
#[derive(Default)]
struct Bus {
    from_master: Vec<u8>,
    to_master: VecDeque<u8>,
    clocked_in: Vec<u8>,
}

#[derive(Clone, Default)]
struct Spi(Rc<RefCell<Bus>>);

#[derive(Clone)]
struct Pins {
    ready: Rc<Cell<bool>>,
    request: Rc<Cell<bool>>,
}

impl TransferEngine for Spi {
    type Error = ();

    fn open(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn start_write(&mut self, data: &[u8]) -> Result<(), ()> {
        self.0.borrow_mut().from_master.extend_from_slice(data);
        Ok(())
    }

    fn start_read(&mut self, len: usize) -> Result<(), ()> {
        let mut bus = self.0.borrow_mut();
        let bytes = (0..len)
            .map(|_| bus.to_master.pop_front().unwrap_or(0xFF))
            .collect();
        bus.clocked_in = bytes;
        Ok(())
    }

    fn finish_read(&mut self, into: &mut [u8]) {
        into.copy_from_slice(&self.0.borrow().clocked_in);
    }
}

impl LineReader for Pins {
    type Error = core::convert::Infallible;

    fn try_read(&self, line: Line) -> Result<Level, Self::Error> {
        let asserted = match line {
            Line::PeerReady => self.ready.get(),
            Line::PeerRequest => self.request.get(),
        };
        Ok(if asserted { Level::Low } else { Level::High })
    }
}

fn settle<E, R, S>(phy: &mut Phy<E, R, S>, complete: impl Fn())
where
    E: TransferEngine,
    R: LineReader,
    S: splitphy::EventSink,
{
    // Complete every transfer until the link is idle or needs a buffer.
    for _ in 0..64 {
        phy.dispatch();
        if matches!(phy.state(), State::Idle | State::MemoryRequest) {
            return;
        }
        complete();
    }
    panic!("link never settled, stuck in {}", phy.state());
}

#[test]
fn send_then_receive() {
    static SIGNALS: Signals = Signals::new();

    let spi = Spi::default();
    let pins = Pins {
        ready: Rc::new(Cell::new(true)),
        request: Rc::new(Cell::new(false)),
    };
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut phy: Phy<_, _, Box<dyn FnMut(Event)>> = Phy::new(
        &SIGNALS,
        spi.clone(),
        pins.clone(),
        PhySettings::default().with_mtu(16),
    );
    let handle: Handle = phy.handle();
    let monitor = phy.line_monitor();
    let completion = phy.completion();
    let complete = || completion.transfer_complete(TransferStatus::Success);

    phy.open(Some({
        let events = events.clone();
        Box::new(move |event: Event| events.borrow_mut().push(event))
    }))
    .expect("link opens");

    // Outbound: header, then two chunks.
    let message: &'static [u8] = b"hello from the master side";
    handle.send(message, message.len() as u16).unwrap();
    settle(&mut phy, complete);
    assert_eq!(
        events.borrow_mut().drain(..).collect::<Vec<_>>(),
        vec![Event::Sent { buf: message }]
    );

    let on_bus = std::mem::take(&mut spi.0.borrow_mut().from_master);
    assert_eq!(on_bus[..wire::HEADER_LEN], wire::encode_header(message.len() as u16));
    assert_eq!(&on_bus[wire::HEADER_LEN..], message);

    // Inbound: the peer asks to be polled.
    let reply = b"and hello back";
    {
        let mut bus = spi.0.borrow_mut();
        bus.to_master.extend(wire::encode_header(reply.len() as u16));
        bus.to_master.extend(reply.iter().copied());
    }
    pins.request.set(true);
    monitor.on_request_edge();
    settle(&mut phy, complete);
    assert_eq!(phy.state(), State::MemoryRequest);
    assert_eq!(
        events.borrow_mut().drain(..).collect::<Vec<_>>(),
        vec![Event::BufferRequest { len: reply.len() as u16 }]
    );
    assert_eq!(
        std::mem::take(&mut spi.0.borrow_mut().from_master),
        wire::encode_header(0),
        "the poll is an empty header"
    );

    pins.request.set(false);
    monitor.on_request_edge();
    let buf: &'static mut [u8] = Box::leak(vec![0; 32].into_boxed_slice());
    handle.supply_receive_buffer(Some(buf)).unwrap();
    settle(&mut phy, complete);

    let events = events.borrow_mut().drain(..).collect::<Vec<_>>();
    match &events[..] {
        [Event::Received { buf, len }] => {
            assert_eq!(usize::from(*len), reply.len());
            assert_eq!(&buf[..reply.len()], reply);
        }
        events => panic!("expected one received packet, got {events:?}"),
    }
    assert_eq!(phy.state(), State::Idle);

    let stats = phy.stats();
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.transfer_errors, 0);

    phy.close();
    assert_eq!(handle.state(), State::Disabled);
}
