//! Notifications delivered to the layer above the link.

/// A notification from the link to the layer above.
///
/// Events are delivered from the dispatch pass, never from interrupt context.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// An outbound packet was fully transferred. Ownership of its buffer
    /// returns to the caller, and the next [`Handle::send`] will be accepted.
    ///
    /// [`Handle::send`]: crate::Handle::send
    Sent { buf: &'static [u8] },

    /// An inbound packet of `len` bytes was written to the start of `buf`.
    Received { buf: &'static mut [u8], len: u16 },

    /// An inbound packet of `len` bytes arrived with no destination buffer and
    /// was discarded.
    Dropped { len: u16 },

    /// The peer announced an inbound packet of `len` bytes. The receiver must
    /// answer with [`Handle::supply_receive_buffer`], passing either a buffer
    /// of at least `len` bytes or `None` to drop the packet.
    ///
    /// [`Handle::supply_receive_buffer`]: crate::Handle::supply_receive_buffer
    BufferRequest { len: u16 },
}

/// Receives [`Event`]s from the link.
///
/// Any `FnMut(Event)` closure is an `EventSink`.
pub trait EventSink {
    fn on_event(&mut self, event: Event);
}

impl<F> EventSink for F
where
    F: FnMut(Event),
{
    #[inline]
    fn on_event(&mut self, event: Event) {
        (self)(event)
    }
}
