//! Fragmentation of messages into MTU-sized packets.
//!
//! Hosts call [`fragment`] before transmitting a message; routers call
//! [`refragment`] when a packet is too large for the next hop. Both run the
//! same splitting loop.
//!
//! # Algorithm
//! 1. `chunk = mtu - header_len`; fail if that leaves no payload room
//! 2. If the whole payload fits, emit it as a single packet
//! 3. Otherwise cut consecutive `chunk`-byte slices; offsets grow by the
//!    slice length and every slice but the last has `more_fragments` set

use crate::error::{FragmentError, Result};
use crate::packet::{HeaderLayout, Packet};

/// Split a message into packets no larger than `mtu` once encoded.
///
/// # Errors
/// `FragmentError::MtuTooSmall` if `mtu <= layout.header_len()`.
///
/// # Examples
/// ```
/// use netfrag_core::fragment::fragment;
/// use netfrag_core::packet::HeaderLayout;
///
/// let layout = HeaderLayout::new(2, 2, 3).unwrap(); // 8-byte header
/// let packets = fragment(2, 0, &[b'x'; 37], 20, &layout).unwrap();
///
/// let offsets: Vec<_> = packets.iter().map(|p| p.offset).collect();
/// assert_eq!(offsets, [0, 12, 24, 36]);
/// ```
pub fn fragment(
    destination: u32,
    id: u32,
    message: &[u8],
    mtu: usize,
    layout: &HeaderLayout,
) -> Result<Vec<Packet>> {
    split(destination, id, 0, message, false, mtu, layout)
}

/// Split a received packet for a next hop with a smaller MTU.
///
/// The pieces keep the packet's `id` and `destination`. Their offsets are
/// relative to the original message, not to this packet, and the last piece
/// inherits the packet's own `more_fragments` flag, since the packet may
/// itself be a middle fragment.
pub fn refragment(packet: &Packet, mtu: usize, layout: &HeaderLayout) -> Result<Vec<Packet>> {
    split(
        packet.destination,
        packet.id,
        packet.offset,
        &packet.payload,
        packet.more_fragments,
        mtu,
        layout,
    )
}

fn split(
    destination: u32,
    id: u32,
    base_offset: usize,
    payload: &[u8],
    more_after: bool,
    mtu: usize,
    layout: &HeaderLayout,
) -> Result<Vec<Packet>> {
    let header_len = layout.header_len();
    if mtu <= header_len {
        return Err(FragmentError::MtuTooSmall { mtu, header_len }.into());
    }
    let chunk_size = mtu - header_len;

    if payload.len() <= chunk_size {
        return Ok(vec![Packet::new(
            id,
            base_offset,
            more_after,
            destination,
            payload.to_vec(),
        )]);
    }

    let total = payload.len().div_ceil(chunk_size);
    let mut packets = Vec::with_capacity(total);

    for (i, chunk) in payload.chunks(chunk_size).enumerate() {
        let is_last = i + 1 == total;
        packets.push(Packet::new(
            id,
            base_offset + i * chunk_size,
            !is_last || more_after,
            destination,
            chunk.to_vec(),
        ));
    }

    Ok(packets)
}
