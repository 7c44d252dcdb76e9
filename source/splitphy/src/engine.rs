//! The byte-transfer engine underneath the link.
//!
//! The engine is the clocked SPI primitive (plus whatever DMA or FIFO sits
//! behind it). Starting a transfer never blocks: the engine reports that a
//! transfer finished by calling [`Completion::transfer_complete`] from its own
//! interrupt handler, and the link picks the completion up on its next
//! dispatch pass.
//!
//! [`Completion::transfer_complete`]: crate::Completion::transfer_complete
use core::fmt;

/// A non-blocking, half-duplex byte-transfer engine.
///
/// At most one transfer is ever in flight: the link does not start another
/// one until the previous one has been reported complete.
pub trait TransferEngine {
    /// Errors returned when the engine cannot be opened or cannot start a
    /// transfer.
    type Error: fmt::Debug;

    /// Brings up the engine. Called once by [`Phy::open`](crate::Phy::open).
    fn open(&mut self) -> Result<(), Self::Error>;

    /// Shuts the engine down and disables its completion notifications.
    /// Called by [`Phy::close`](crate::Phy::close), possibly with a transfer
    /// still in flight.
    fn close(&mut self);

    /// Starts clocking out `data`.
    ///
    /// `data` is only borrowed for the duration of this call, so the engine
    /// must capture it (into its FIFO or a bounce buffer) before returning.
    /// `data` is never longer than one MTU.
    fn start_write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Starts clocking in `len` bytes. `len` is never larger than one MTU.
    fn start_read(&mut self, len: usize) -> Result<(), Self::Error>;

    /// Copies the bytes clocked in by the last completed read into `into`.
    ///
    /// `into` is exactly as long as the `len` passed to the matching
    /// [`Self::start_read`].
    fn finish_read(&mut self, into: &mut [u8]);
}

/// Outcome of a transfer, as reported by the engine's completion interrupt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferStatus {
    /// All requested bytes were moved.
    Success,
    /// The engine reports the transfer went wrong.
    Failed,
}
