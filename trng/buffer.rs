// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! buffer provides the rate-decoupling FIFO between the expander and
//! the consumer.
//!
//! The buffer is a ring of four 512-bit slots. The expander writes
//! whole slots; the consumer drains them one 32-bit lane at a time,
//! in lane order. Its only backpressure signal is `needs_more`,
//! which is level-true whenever a slot is free, and which is what
//! ultimately drives the whole pipeline: a consumer that stops
//! acking eventually fills the ring and the datapath upstream goes
//! quiet.

use zeroize::Zeroize;

/// The number of 512-bit slots in the ring.
///
pub const SLOT_COUNT: usize = 4;

/// The size of one slot in bytes.
///
pub const SLOT_SIZE: usize = 64;

/// The number of 32-bit lanes in one slot.
///
pub const LANES: usize = SLOT_SIZE / 4;

/// OutputBuffer decouples keystream block production from
/// word-at-a-time consumption.
///
pub struct OutputBuffer {
    slots: [[u8; SLOT_SIZE]; SLOT_COUNT],

    // Read and write slot indices, and the number of
    // occupied slots. The buffer has one writer and one
    // reader, so `fill` fully determines full/empty.
    read: usize,
    write: usize,
    fill: usize,

    // The next lane of the slot at `read` to emit.
    // Resets to zero whenever `read` advances.
    word_index: usize,
}

impl OutputBuffer {
    /// Returns an empty buffer.
    ///
    pub fn new() -> Self {
        OutputBuffer {
            slots: [[0u8; SLOT_SIZE]; SLOT_COUNT],
            read: 0,
            write: 0,
            fill: 0,
            word_index: 0,
        }
    }

    /// Whether the expander should produce another block.
    ///
    pub fn needs_more(&self) -> bool {
        self.fill < SLOT_COUNT
    }

    /// Whether every slot is occupied.
    ///
    pub fn is_full(&self) -> bool {
        self.fill == SLOT_COUNT
    }

    /// Accepts one 512-bit block. Returns false, leaving
    /// the buffer unchanged, if no slot is free.
    ///
    pub fn push(&mut self, block: &[u8; SLOT_SIZE]) -> bool {
        if self.is_full() {
            return false;
        }

        self.slots[self.write].copy_from_slice(&block[..]);
        self.write = (self.write + 1) % SLOT_COUNT;
        self.fill += 1;

        true
    }

    /// Whether a random word is currently presented.
    ///
    pub fn rnd_valid(&self) -> bool {
        self.fill > 0
    }

    /// The presented random word: the lane at `word_index`
    /// of the oldest slot. Only meaningful while
    /// [`rnd_valid`](OutputBuffer::rnd_valid) is true;
    /// reads zero otherwise.
    ///
    pub fn rnd_data(&self) -> u32 {
        if !self.rnd_valid() {
            return 0;
        }

        let offset = self.word_index * 4;
        let lane = &self.slots[self.read][offset..offset + 4];
        u32::from_le_bytes([lane[0], lane[1], lane[2], lane[3]])
    }

    /// Consumes the presented word, advancing to the next
    /// lane. Consuming the last lane of a slot scrubs and
    /// releases the slot. Acks while empty are ignored.
    ///
    pub fn rnd_ack(&mut self) {
        if !self.rnd_valid() {
            return;
        }

        if self.word_index == LANES - 1 {
            self.slots[self.read].zeroize();
            self.word_index = 0;
            self.read = (self.read + 1) % SLOT_COUNT;
            self.fill -= 1;
        } else {
            self.word_index += 1;
        }
    }

    /// Scrubs every slot and resets the ring to empty in
    /// one atomic step.
    ///
    pub fn discard(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.zeroize();
        }

        self.read = 0;
        self.write = 0;
        self.fill = 0;
        self.word_index = 0;
    }

    /// The slot contents, for inspection in tests.
    ///
    #[cfg(test)]
    pub(crate) fn slots(&self) -> &[[u8; SLOT_SIZE]; SLOT_COUNT] {
        &self.slots
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Builds a block whose lane `i` holds `base + i`.
    ///
    fn numbered_block(base: u32) -> [u8; SLOT_SIZE] {
        let mut block = [0u8; SLOT_SIZE];
        for lane in 0..LANES {
            let word = base + lane as u32;
            block[lane * 4..lane * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        block
    }

    #[test]
    fn test_buffer_lane_order() {
        let mut buffer = OutputBuffer::new();
        assert!(!buffer.rnd_valid());
        assert_eq!(buffer.rnd_data(), 0);

        assert!(buffer.push(&numbered_block(100)));

        // Lanes come out in order, low bytes first.
        for lane in 0..LANES as u32 {
            assert!(buffer.rnd_valid());
            assert_eq!(buffer.rnd_data(), 100 + lane);
            buffer.rnd_ack();
        }

        assert!(!buffer.rnd_valid());
    }

    #[test]
    fn test_buffer_fifo_across_slots() {
        let mut buffer = OutputBuffer::new();
        for slot in 0..SLOT_COUNT as u32 {
            assert!(buffer.push(&numbered_block(slot * 1000)));
        }

        assert!(buffer.is_full());
        assert!(!buffer.needs_more());
        assert!(!buffer.push(&numbered_block(9999)));

        for slot in 0..SLOT_COUNT as u32 {
            for lane in 0..LANES as u32 {
                assert_eq!(buffer.rnd_data(), slot * 1000 + lane);
                buffer.rnd_ack();
            }
        }

        assert!(!buffer.rnd_valid());
        assert!(buffer.needs_more());
    }

    #[test]
    fn test_buffer_word_index_resets_on_slot_advance() {
        let mut buffer = OutputBuffer::new();
        buffer.push(&numbered_block(0));
        buffer.push(&numbered_block(500));

        for _ in 0..LANES {
            buffer.rnd_ack();
        }

        // First lane of the second slot.
        assert_eq!(buffer.rnd_data(), 500);
    }

    #[test]
    fn test_buffer_drained_slot_is_scrubbed() {
        let mut buffer = OutputBuffer::new();
        buffer.push(&numbered_block(7000));

        for _ in 0..LANES {
            buffer.rnd_ack();
        }

        assert_eq!(buffer.slots()[0], [0u8; SLOT_SIZE]);
    }

    #[test]
    fn test_buffer_discard() {
        let mut buffer = OutputBuffer::new();
        for slot in 0..3 {
            buffer.push(&numbered_block(slot * 100));
        }
        buffer.rnd_ack();

        buffer.discard();

        assert!(!buffer.rnd_valid());
        assert!(buffer.needs_more());
        for slot in buffer.slots() {
            assert_eq!(*slot, [0u8; SLOT_SIZE]);
        }

        // Discard is idempotent: a second one changes
        // nothing observable.
        buffer.discard();
        assert!(!buffer.rnd_valid());
        assert!(buffer.needs_more());
    }

    #[test]
    fn test_buffer_ack_while_empty_ignored() {
        let mut buffer = OutputBuffer::new();
        buffer.rnd_ack();

        buffer.push(&numbered_block(42));
        assert_eq!(buffer.rnd_data(), 42);
    }
}
