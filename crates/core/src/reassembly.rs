//! Reassembly of fragments back into messages.
//!
//! Fragments may arrive in any order: routers interleave flows and a message
//! can be re-split at several hops. The reassembler therefore buffers
//! fragments per message id, keyed by offset, and only emits a message once
//! the fragments cover `[0, end)` with no gaps, where `end` is known from the
//! fragment that has `more_fragments = false`.
//!
//! # Loss
//!
//! There are no timeouts. A message that never receives one of its
//! fragments stays pending until the caller [`discard`](Reassembler::discard)s
//! it, or until a new message arrives under the same id.
//!
//! # Id Reuse
//!
//! Sender ids wrap at the width of the id field. A fragment that conflicts
//! with a pending message (same offset with different bytes, an overlap, or
//! a different end) therefore starts a new message: the stale fragments are
//! dropped and the new fragment is buffered in their place. Only an exact
//! repeat of a buffered fragment is rejected as a duplicate.
//!
//! # Thread Safety
//!
//! This structure is NOT thread-safe. The owning host wraps it in a mutex.

use crate::error::{ReassemblyError, Result};
use crate::packet::Packet;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// State for a single message being reassembled.
#[derive(Debug, Default)]
struct MessageState {
    /// Fragment payloads indexed by offset
    fragments: BTreeMap<usize, Vec<u8>>,

    /// End of the message, once the terminal fragment has arrived
    end: Option<usize>,

    /// Payload bytes buffered so far
    buffered: usize,
}

impl MessageState {
    /// Check that `packet` fits alongside the buffered fragments.
    ///
    /// A fragment identical to one already buffered is a duplicate. Any
    /// other collision (same slot with different bytes, a partial overlap,
    /// or an end that disagrees with the terminal fragment) is a conflict.
    fn check(&self, packet: &Packet) -> std::result::Result<(), ReassemblyError> {
        let Packet {
            id,
            offset,
            more_fragments,
            ref payload,
            ..
        } = *packet;
        let end = offset + payload.len();
        let overlap = ReassemblyError::OverlappingFragment {
            id,
            offset,
            len: payload.len(),
        };

        // Nearest fragment at or before this offset must end before it starts
        if let Some((&prev_offset, prev)) = self.fragments.range(..=offset).next_back() {
            if prev_offset == offset && prev == payload {
                return Err(ReassemblyError::DuplicateFragment { id, offset });
            }
            if prev_offset == offset || prev_offset + prev.len() > offset {
                return Err(overlap);
            }
        }
        // Nearest fragment after this offset must start at or after its end
        if let Some((&next_offset, _)) = self.fragments.range(offset + 1..).next() {
            if next_offset < end {
                return Err(overlap);
            }
        }

        match self.end {
            Some(known) if !more_fragments && known != end => Err(overlap),
            Some(known) if end > known => Err(overlap),
            None if !more_fragments && self.buffered_end() > end => Err(overlap),
            _ => Ok(()),
        }
    }

    /// Insert a checked fragment and return true if the message is now complete.
    fn insert(&mut self, packet: Packet) -> bool {
        if !packet.more_fragments {
            self.end = Some(packet.end());
        }
        self.buffered += packet.payload.len();
        self.fragments.insert(packet.offset, packet.payload);

        self.is_complete()
    }

    /// End of the highest buffered fragment.
    fn buffered_end(&self) -> usize {
        self.fragments
            .iter()
            .next_back()
            .map_or(0, |(offset, payload)| offset + payload.len())
    }

    /// The buffered bytes cover `[0, end)` exactly.
    ///
    /// Fragments never overlap and never pass `end`, so matching byte counts
    /// means there are no gaps.
    fn is_complete(&self) -> bool {
        self.end == Some(self.buffered)
    }

    /// Concatenate fragments in offset order (consumes the state).
    fn take_message(self) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.buffered);
        for payload in self.fragments.into_values() {
            message.extend_from_slice(&payload);
        }
        message
    }

    fn missing_bytes(&self) -> Option<usize> {
        self.end.map(|end| end - self.buffered)
    }
}

/// Reassembler for collecting fragments back into messages.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Maximum messages tracked at once (None = unbounded)
    max_inflight: Option<usize>,

    /// In-flight messages indexed by id
    messages: HashMap<u32, MessageState>,

    /// Messages completed so far
    completed: u64,

    /// Pending messages dropped because their id was reused
    restarted: u64,
}

impl Reassembler {
    /// Create an unbounded reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reassembler that tracks at most `max` messages at once.
    pub fn with_max_inflight(max: usize) -> Self {
        Self {
            max_inflight: Some(max),
            ..Self::default()
        }
    }

    /// Feed one fragment.
    ///
    /// # Returns
    /// - `Ok(Some(message))` when this fragment completed its message
    /// - `Ok(None)` if the fragment was buffered and the message is incomplete
    ///
    /// # Errors
    /// - `ReassemblyError::DuplicateFragment` if the same bytes were already
    ///   buffered at this offset
    /// - `ReassemblyError::WindowFull` if a new id would exceed the bound
    ///
    /// A rejected fragment leaves existing state untouched. A conflicting
    /// fragment replaces the pending message for its id.
    pub fn receive(&mut self, packet: Packet) -> Result<Option<Vec<u8>>> {
        let id = packet.id;

        if !self.messages.contains_key(&id) {
            if let Some(max) = self.max_inflight {
                if self.messages.len() >= max {
                    return Err(ReassemblyError::WindowFull { max }.into());
                }
            }
        }

        let state = self.messages.entry(id).or_default();
        match state.check(&packet) {
            Ok(()) => {}
            Err(e @ ReassemblyError::DuplicateFragment { .. }) => return Err(e.into()),
            Err(e) => {
                // The sender's id counter wrapped onto a stale message
                warn!(
                    id,
                    error = %e,
                    stale_bytes = state.buffered,
                    "id reused by a new message, discarding stale fragments"
                );
                *state = MessageState::default();
                self.restarted += 1;
            }
        }
        let complete = state.insert(packet);

        if !complete {
            return Ok(None);
        }

        let message = self
            .messages
            .remove(&id)
            .map(MessageState::take_message)
            .unwrap_or_default();
        self.completed += 1;

        Ok(Some(message))
    }

    /// Drop all buffered fragments for `id`. Returns true if any existed.
    pub fn discard(&mut self, id: u32) -> bool {
        self.messages.remove(&id).is_some()
    }

    /// Ids of messages still waiting for fragments, in ascending order.
    pub fn pending(&self) -> Vec<u32> {
        let mut ids: Vec<_> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Check if nothing is buffered.
    pub fn is_idle(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get statistics about current reassembly state.
    pub fn stats(&self) -> ReassemblerStats {
        ReassemblerStats {
            inflight_messages: self.messages.len(),
            buffered_bytes: self.messages.values().map(|m| m.buffered).sum(),
            awaiting_terminal: self.messages.values().filter(|m| m.end.is_none()).count(),
            missing_bytes: self.messages.values().filter_map(|m| m.missing_bytes()).sum(),
            completed_messages: self.completed,
            restarted_messages: self.restarted,
        }
    }
}

/// Statistics about reassembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblerStats {
    /// Messages currently being reassembled
    pub inflight_messages: usize,

    /// Payload bytes held across all pending messages
    pub buffered_bytes: usize,

    /// Pending messages whose terminal fragment has not arrived
    pub awaiting_terminal: usize,

    /// Known gaps, for messages whose end is known
    pub missing_bytes: usize,

    /// Messages emitted since creation
    pub completed_messages: u64,

    /// Stale messages discarded when a new message reused their id
    pub restarted_messages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fragment::fragment;
    use crate::packet::HeaderLayout;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn frag(id: u32, offset: usize, more: bool, payload: &[u8]) -> Packet {
        Packet::new(id, offset, more, 2, payload.to_vec())
    }

    fn fragments_of(message: &[u8], mtu: usize) -> Vec<Packet> {
        fragment(2, 1, message, mtu, &HeaderLayout::default()).unwrap()
    }

    #[test]
    fn test_single_unfragmented_packet() {
        let mut reassembler = Reassembler::new();

        let result = reassembler.receive(frag(0, 0, false, b"hello")).unwrap();
        assert_eq!(result.as_deref(), Some(&b"hello"[..]));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn test_in_order() {
        let mut reassembler = Reassembler::new();

        assert!(reassembler.receive(frag(4, 0, true, b"abc")).unwrap().is_none());
        assert!(reassembler.receive(frag(4, 3, true, b"def")).unwrap().is_none());

        let result = reassembler.receive(frag(4, 6, false, b"g")).unwrap();
        assert_eq!(result.unwrap(), b"abcdefg");
        assert_eq!(reassembler.stats().completed_messages, 1);
    }

    #[test]
    fn test_terminal_first() {
        let mut reassembler = Reassembler::new();

        assert!(reassembler.receive(frag(4, 6, false, b"g")).unwrap().is_none());
        assert_eq!(reassembler.stats().missing_bytes, 6);

        assert!(reassembler.receive(frag(4, 0, true, b"abc")).unwrap().is_none());
        let result = reassembler.receive(frag(4, 3, true, b"def")).unwrap();
        assert_eq!(result.unwrap(), b"abcdefg");
    }

    #[test]
    fn test_any_permutation_gives_same_message() {
        let message: Vec<u8> = (0..200u32).map(|i| (i * 7) as u8).collect();
        let packets = fragments_of(&message, 30);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..50 {
            let mut shuffled = packets.clone();
            shuffled.shuffle(&mut rng);

            let mut reassembler = Reassembler::new();
            let mut outputs = Vec::new();
            for packet in shuffled {
                if let Some(done) = reassembler.receive(packet).unwrap() {
                    outputs.push(done);
                }
            }

            assert_eq!(outputs, vec![message.clone()]);
            assert!(reassembler.is_idle());
        }
    }

    #[test]
    fn test_missing_middle_fragment_never_completes() {
        let message = vec![b'z'; 100];
        let packets = fragments_of(&message, 30);
        assert!(packets.len() > 2);

        let mut reassembler = Reassembler::new();
        for (i, packet) in packets.into_iter().enumerate() {
            if i == 1 {
                continue;
            }
            assert!(reassembler.receive(packet).unwrap().is_none());
        }

        assert_eq!(reassembler.pending(), vec![1]);
        assert_eq!(reassembler.stats().missing_bytes, 18);
    }

    #[test]
    fn test_missing_terminal_never_completes() {
        let mut reassembler = Reassembler::new();
        reassembler.receive(frag(1, 0, true, b"abc")).unwrap();
        reassembler.receive(frag(1, 3, true, b"def")).unwrap();

        let stats = reassembler.stats();
        assert_eq!(stats.inflight_messages, 1);
        assert_eq!(stats.awaiting_terminal, 1);
        assert_eq!(stats.buffered_bytes, 6);
    }

    #[test]
    fn test_interleaved_messages() {
        let first = vec![b'a'; 60];
        let second = vec![b'b'; 45];
        let layout = HeaderLayout::default();
        let a = fragment(2, 1, &first, 30, &layout).unwrap();
        let b = fragment(2, 2, &second, 30, &layout).unwrap();

        let mut reassembler = Reassembler::new();
        let mut done = Vec::new();
        let mut a_iter = a.into_iter();
        let mut b_iter = b.into_iter();
        loop {
            let next_a = a_iter.next();
            let next_b = b_iter.next();
            if next_a.is_none() && next_b.is_none() {
                break;
            }
            for packet in next_a.into_iter().chain(next_b) {
                if let Some(message) = reassembler.receive(packet).unwrap() {
                    done.push(message);
                }
            }
        }

        assert_eq!(done, vec![second, first]);
    }

    #[test]
    fn test_duplicate_fragment() {
        let mut reassembler = Reassembler::new();
        reassembler.receive(frag(1, 0, true, b"abc")).unwrap();

        let result = reassembler.receive(frag(1, 0, true, b"abc"));
        assert!(matches!(
            result,
            Err(Error::Reassembly(ReassemblyError::DuplicateFragment {
                id: 1,
                offset: 0
            }))
        ));

        // State is intact and the message still completes
        let result = reassembler.receive(frag(1, 3, false, b"d")).unwrap();
        assert_eq!(result.unwrap(), b"abcd");
    }

    #[test]
    fn test_reused_id_replaces_stale_fragments() {
        let mut reassembler = Reassembler::new();

        // First use of id 99 lost its terminal fragment
        assert!(reassembler.receive(frag(99, 0, true, b"AAAAAAAA")).unwrap().is_none());

        // The sender wrapped around and reused id 99
        assert!(reassembler.receive(frag(99, 0, true, b"BBBBBBBB")).unwrap().is_none());
        let result = reassembler.receive(frag(99, 8, false, b"bbbb")).unwrap();

        assert_eq!(result.unwrap(), b"BBBBBBBBbbbb");
        assert!(reassembler.is_idle());
        assert_eq!(reassembler.stats().restarted_messages, 1);
    }

    #[test]
    fn test_overlap_starts_new_message() {
        let mut reassembler = Reassembler::new();
        reassembler.receive(frag(1, 0, true, b"abcd")).unwrap();
        reassembler.receive(frag(1, 4, true, b"ef")).unwrap();

        // Straddles both buffered fragments
        assert!(reassembler.receive(frag(1, 2, true, b"xyz")).unwrap().is_none());

        let stats = reassembler.stats();
        assert_eq!(stats.restarted_messages, 1);
        assert_eq!(stats.buffered_bytes, 3);

        assert!(reassembler.receive(frag(1, 0, true, b"12")).unwrap().is_none());
        let result = reassembler.receive(frag(1, 5, false, b"!")).unwrap();
        assert_eq!(result.unwrap(), b"12xyz!");
    }

    #[test]
    fn test_conflicting_end_starts_new_message() {
        let mut reassembler = Reassembler::new();
        reassembler.receive(frag(1, 4, false, b"ef")).unwrap();
        assert_eq!(reassembler.stats().missing_bytes, 4);

        // A different terminal: the old message is gone
        assert!(reassembler.receive(frag(1, 8, false, b"ij")).unwrap().is_none());
        assert_eq!(reassembler.stats().missing_bytes, 8);

        // Reaching past the new end conflicts again
        assert!(reassembler.receive(frag(1, 6, true, b"ghijk")).unwrap().is_none());
        let stats = reassembler.stats();
        assert_eq!(stats.restarted_messages, 2);
        assert_eq!(stats.awaiting_terminal, 1);
    }

    #[test]
    fn test_fragments_that_fit_never_restart() {
        let mut reassembler = Reassembler::new();
        reassembler.receive(frag(1, 0, true, b"abcd")).unwrap();
        reassembler.receive(frag(1, 6, false, b"gh")).unwrap();

        let result = reassembler.receive(frag(1, 4, true, b"ef")).unwrap();
        assert_eq!(result.unwrap(), b"abcdefgh");
        assert_eq!(reassembler.stats().restarted_messages, 0);
    }

    #[test]
    fn test_window_full() {
        let mut reassembler = Reassembler::with_max_inflight(2);
        reassembler.receive(frag(0, 0, true, b"a")).unwrap();
        reassembler.receive(frag(1, 0, true, b"b")).unwrap();

        let result = reassembler.receive(frag(2, 0, true, b"c"));
        assert!(matches!(
            result,
            Err(Error::Reassembly(ReassemblyError::WindowFull { max: 2 }))
        ));

        // Existing ids still accepted
        let result = reassembler.receive(frag(0, 1, false, b"z")).unwrap();
        assert_eq!(result.unwrap(), b"az");
    }

    #[test]
    fn test_discard() {
        let mut reassembler = Reassembler::new();
        reassembler.receive(frag(3, 0, true, b"abc")).unwrap();

        assert!(reassembler.discard(3));
        assert!(!reassembler.discard(3));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn test_id_reused_after_completion() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.receive(frag(5, 0, false, b"one")).unwrap().is_some());
        assert!(reassembler.receive(frag(5, 0, false, b"two")).unwrap().is_some());
    }
}
