//! Wire format of the link.
//!
//! Every payload phase is preceded by a fixed-size length header. The header
//! carries the total payload length as a little-endian `u16`; a header of `0`
//! is a valid poll that moves no payload. Payload bytes follow in chunks of at
//! most one MTU, and the receiver only learns the total length from the
//! header, never from chunk boundaries.

/// Size of the length header, in bytes.
pub const HEADER_LEN: usize = core::mem::size_of::<u16>();

/// Encodes a payload length into a length header.
#[inline]
#[must_use]
pub const fn encode_header(len: u16) -> [u8; HEADER_LEN] {
    len.to_le_bytes()
}

/// Decodes the payload length carried by a length header.
#[inline]
#[must_use]
pub const fn decode_header(header: [u8; HEADER_LEN]) -> u16 {
    u16::from_le_bytes(header)
}

/// Returns the length of the next chunk to move, given the declared `total`
/// and the number of bytes `moved` so far.
///
/// # Panics
///
/// If `moved` is greater than `total`, or if `mtu` is zero.
#[inline]
#[must_use]
pub fn chunk_len(mtu: u16, total: u16, moved: u16) -> u16 {
    assert!(mtu > 0, "a zero MTU can never make progress");
    assert!(
        moved <= total,
        "moved more bytes ({moved}) than the declared packet length ({total})"
    );
    core::cmp::min(mtu, total - moved)
}
