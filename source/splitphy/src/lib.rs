//! # splitphy
//!
//! The physical transport layer of a split-MCU serialization link, master
//! side.
//!
//! Two microcontrollers share a half-duplex SPI bus plus two active-low
//! handshake lines driven by the peer:
//!
//! * **peer-ready**: the peer is prepared to exchange bytes right now.
//! * **peer-request**: the peer has a packet for us and wants to be polled.
//!
//! Every packet is preceded by a two-byte little-endian length header (see
//! [`wire`]). A header of zero carries no payload: it is how the master
//! polls the peer, handing it the bus so it can answer with its own header.
//! Payloads are moved in chunks of at most [`PhySettings::mtu`] bytes, with
//! each chunk waiting for the peer to be ready.
//!
//! ## Structure
//!
//! * A [`Phy`] owns the state machine, the [`TransferEngine`] that clocks
//!   bytes, the [`LineReader`] that samples the handshake lines, and the
//!   [`EventSink`] that hears about sent, received and dropped packets.
//! * Interrupt handlers feed it through a [`LineMonitor`] (line edges) and a
//!   [`Completion`] (transfer done). Callers feed it through a [`Handle`].
//!   None of these touch the state machine: they raise a pending flag in the
//!   shared [`Signals`] and wake the dispatcher.
//! * The dispatcher ([`Phy::dispatch`], or [`Phy::run`] as a task) drains
//!   the pending flags in a fixed priority order and steps the state machine
//!   once per flag.
//!
//! Nothing here blocks, and nothing times out: a peer that never becomes
//! ready stalls the link until it is closed.
#![cfg_attr(not(test), no_std)]

mod engine;
mod error;
mod event;
mod lines;
mod machine;
mod phy;
mod settings;
mod signals;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::{
    engine::{TransferEngine, TransferStatus},
    error::Error,
    event::{Event, EventSink},
    lines::{Level, Line, LineMonitor, LineReader},
    machine::State,
    phy::{Handle, Pass, Phy, Stats},
    settings::{PhySettings, PhySettingsOverrides},
    signals::{Completion, PendingFlags, Reclaimed, Signals, Trigger},
};
