//! The two handshake lines driven by the peer.
//!
//! This module provides the [`LineReader`] trait, which the platform
//! implements on top of its GPIO input pins, and the [`LineMonitor`], which
//! the platform calls from the edge-triggered interrupt of each line.
//!
//! Both lines are *active-low*: a line reading [`Level::Low`] is asserted.
//! Configuring the pins themselves (pull-ups, edge polarity, interrupt
//! priority) is platform-specific and must be done *before* the link is
//! opened.
#![deny(missing_docs)]
use core::fmt;

use crate::signals::Signals;

/// One of the two handshake lines driven by the peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Line {
    /// Asserted while the peer is prepared to exchange bytes now.
    PeerReady,
    /// Asserted while the peer has unsolicited data and wants to be polled.
    PeerRequest,
}

/// A GPIO pin digital level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    /// Logical low.
    Low,
    /// Logical high.
    High,
}

/// Reads the raw electrical level of the handshake lines.
pub trait LineReader {
    /// Errors returned by [`Self::try_read`].
    ///
    /// If reading a pin is an infallible operation, this type may be
    /// [`core::convert::Infallible`].
    type Error: fmt::Display;

    /// Attempts to return the current [`Level`] of `line`.
    fn try_read(&self, line: Line) -> Result<Level, Self::Error>;

    /// Returns the current [`Level`] of `line`.
    ///
    /// # Panics
    ///
    /// This method calls [`Self::try_read`] and panics if it returns an error.
    #[inline]
    fn read(&self, line: Line) -> Level {
        match self.try_read(line) {
            Ok(level) => level,
            Err(error) => panic!("failed to read {line} input level: {error}"),
        }
    }
}

impl<R: LineReader + ?Sized> LineReader for &R {
    type Error = R::Error;

    #[inline]
    fn try_read(&self, line: Line) -> Result<Level, Self::Error> {
        R::try_read(self, line)
    }
}

/// Edge interrupt entry points for the handshake lines.
///
/// Obtained from [`Phy::line_monitor`](crate::Phy::line_monitor). Each method
/// reads its line, latches the level and, on an edge *into* the asserted
/// state, requests a dispatch pass. Nothing here touches the state machine.
#[derive(Clone)]
pub struct LineMonitor<R> {
    signals: &'static Signals,
    reader: R,
}

// === impl Level ===

impl Level {
    /// Returns `true` if an active-low line at this level is asserted.
    #[inline]
    #[must_use]
    pub fn is_asserted(self) -> bool {
        self == Level::Low
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.pad("low"),
            Level::High => f.pad("high"),
        }
    }
}

// === impl Line ===

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::PeerReady => f.pad("peer-ready"),
            Line::PeerRequest => f.pad("peer-request"),
        }
    }
}

// === impl LineMonitor ===

impl<R: LineReader> LineMonitor<R> {
    pub(crate) fn new(signals: &'static Signals, reader: R) -> Self {
        Self { signals, reader }
    }

    /// Handles an edge (either direction) on the peer-ready line.
    pub fn on_ready_edge(&self) {
        let asserted = self.reader.read(Line::PeerReady).is_asserted();
        self.signals.ready_edge(asserted);
    }

    /// Handles an edge (either direction) on the peer-request line.
    pub fn on_request_edge(&self) {
        let asserted = self.reader.read(Line::PeerRequest).is_asserted();
        self.signals.request_edge(asserted);
    }
}
