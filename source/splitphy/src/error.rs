use core::fmt;

/// Errors returned to callers of the link API.
///
/// These are all caller-misuse errors: returning one never disturbs a transfer
/// already in progress.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The buffer passed to [`Handle::send`](crate::Handle::send) has no
    /// storage.
    NullBuffer,
    /// A length of zero, a length past the end of the buffer, or a receive
    /// buffer shorter than the announced packet.
    InvalidLength,
    /// An outbound packet is already in flight, or a receive buffer was
    /// already supplied for the current inbound packet.
    Busy,
    /// A receive buffer was supplied while the link was not waiting for one.
    WrongState,
    /// [`Phy::open`](crate::Phy::open) was called on a link that is already
    /// open.
    AlreadyOpen,
    /// The link is closed.
    NotOpen,
    /// [`Phy::open`](crate::Phy::open) was called without an event sink.
    NullHandler,
    /// The configured [`PhySettings`](crate::PhySettings) are out of range.
    InvalidSettings,
    /// The transfer engine could not be opened.
    EngineOpen,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NullBuffer => "buffer has no storage",
            Error::InvalidLength => "invalid packet length",
            Error::Busy => "a buffer is already registered",
            Error::WrongState => "link is not waiting for a receive buffer",
            Error::AlreadyOpen => "link is already open",
            Error::NotOpen => "link is not open",
            Error::NullHandler => "no event sink was provided",
            Error::InvalidSettings => "invalid link settings",
            Error::EngineOpen => "transfer engine failed to open",
        };
        f.pad(msg)
    }
}
